//! Partner download tracking
//!
//! Records when a partner starts and finishes pulling an asset. Purely
//! observational: reports never gate delivery, and only the first report of
//! each kind is kept.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::repository::{Applied, AssetStatusStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartnerDownloadEvent {
    Started,
    Completed,
}

#[derive(Clone)]
pub struct PartnerDownloadTracker {
    assets: Arc<AssetStatusStore>,
}

impl PartnerDownloadTracker {
    pub fn new(assets: Arc<AssetStatusStore>) -> Self {
        Self { assets }
    }

    /// Record a partner download event
    pub async fn record(
        &self,
        asset_id: &str,
        event: PartnerDownloadEvent,
    ) -> Result<Applied, StoreError> {
        let now = Utc::now();
        let applied = match event {
            PartnerDownloadEvent::Started => {
                self.assets.mark_partner_download_started(asset_id, now).await?
            }
            PartnerDownloadEvent::Completed => {
                self.assets.mark_partner_downloaded(asset_id, now).await?
            }
        };
        if applied.changed {
            if !applied.record.is_delivered() {
                tracing::warn!(asset_id, ?event, "Partner download reported before delivery");
            }
            tracing::info!(asset_id, ?event, "Recorded partner download");
        }
        Ok(applied)
    }
}
