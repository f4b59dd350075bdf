//! Delivery executor
//!
//! Copies one approved asset into its batch's partner folder and marks it
//! delivered. Every trigger path funnels through [`DeliveryExecutor`], which
//! serializes work per asset and re-reads the record under that lock, so
//! concurrent triggers for the same asset produce one copy and one
//! `Delivered` outcome; the rest observe `Idempotent`.
//!
//! Copies overwrite, so an attempt that fails after copying (or crashes
//! before the marker write) is safe to repeat.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use thiserror::Error;

use proofline_common::is_stable_id;
use proofline_content::{ContentError, ContentService, CopyOptions};

use crate::domain::entities::AssetStatusRecord;
use crate::domain::outcome::{DeliveryOutcome, DeliveryReceipt, DeliveryRequest, FailureReason};
use crate::repository::{AssetStatusStore, StoreError};
use crate::service::attachment::ProductionAssetAttachment;
use crate::service::resolver::{BatchResolver, ResolveError, ResolvedBatch};

/// Errors that escape the executor. Everything persistent is reported as a
/// `Failed` outcome instead.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Transient failure delivering {asset_id}: {reason}")]
    Transient { asset_id: String, reason: String },

    #[error("Store failure delivering {asset_id}: {source}")]
    Store {
        asset_id: String,
        #[source]
        source: StoreError,
    },
}

impl DeliveryError {
    /// Whether the job substrate should retry the delivery
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    fn from_store(asset_id: &str, err: StoreError) -> Self {
        if err.is_transient() {
            Self::Transient {
                asset_id: asset_id.to_string(),
                reason: err.to_string(),
            }
        } else {
            Self::Store {
                asset_id: asset_id.to_string(),
                source: err,
            }
        }
    }

    fn from_content(asset_id: &str, err: ContentError) -> Self {
        Self::Transient {
            asset_id: asset_id.to_string(),
            reason: err.to_string(),
        }
    }
}

impl From<DeliveryError> for proofline_common::Error {
    fn from(err: DeliveryError) -> Self {
        match err {
            DeliveryError::Transient { .. } => proofline_common::Error::Unavailable(err.to_string()),
            DeliveryError::Store { source, .. } => source.into(),
        }
    }
}

type Slot = Arc<tokio::sync::Mutex<()>>;

/// Holds an asset's slot; removes it from the map when no one else waits
struct SlotLease<'a> {
    slots: &'a Mutex<HashMap<String, Slot>>,
    asset_id: String,
    slot: Slot,
}

impl Drop for SlotLease<'_> {
    fn drop(&mut self) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        // One reference in the map, one here
        if Arc::strong_count(&self.slot) == 2 {
            slots.remove(&self.asset_id);
        }
    }
}

/// Folder name for an asset's deliverable inside the batch destination.
///
/// Filenames repeat across variants in one batch, so the asset id is part of
/// the name; two assets never share a folder.
fn deliverable_folder_name(record: &AssetStatusRecord) -> String {
    let name: String = record
        .filename
        .trim()
        .chars()
        .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
        .collect();
    if name.is_empty() {
        record.id.clone()
    } else {
        format!("{name} ({})", record.id)
    }
}

pub struct DeliveryExecutor {
    assets: Arc<AssetStatusStore>,
    resolver: BatchResolver,
    content: Arc<dyn ContentService>,
    attachment: ProductionAssetAttachment,
    in_flight: Mutex<HashMap<String, Slot>>,
}

impl DeliveryExecutor {
    pub fn new(
        assets: Arc<AssetStatusStore>,
        resolver: BatchResolver,
        content: Arc<dyn ContentService>,
        attachment: ProductionAssetAttachment,
    ) -> Self {
        Self {
            assets,
            resolver,
            content,
            attachment,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Deliver an asset with a fresh correlation id
    pub async fn deliver(&self, asset_id: &str) -> Result<DeliveryOutcome, DeliveryError> {
        self.deliver_request(&DeliveryRequest::new(asset_id)).await
    }

    /// Deliver an asset at most once
    pub async fn deliver_request(
        &self,
        request: &DeliveryRequest,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        let lease = self.lease(&request.asset_id);
        let _guard = lease.slot.lock().await;

        let result = self.deliver_exclusive(request).await;
        match &result {
            Ok(DeliveryOutcome::Delivered(receipt)) => tracing::info!(
                asset_id = %request.asset_id,
                correlation_id = %request.correlation_id,
                batch_id = %receipt.batch_id,
                destination = %receipt.destination_ref,
                items_copied = receipt.items_copied,
                "Asset delivered"
            ),
            Ok(DeliveryOutcome::Idempotent { .. }) => tracing::debug!(
                asset_id = %request.asset_id,
                correlation_id = %request.correlation_id,
                "Asset already delivered"
            ),
            Ok(DeliveryOutcome::Failed(failure)) => tracing::warn!(
                asset_id = %request.asset_id,
                correlation_id = %request.correlation_id,
                reason = %failure.reason,
                "Asset delivery failed"
            ),
            Err(e) => tracing::warn!(
                asset_id = %request.asset_id,
                correlation_id = %request.correlation_id,
                error = %e,
                retriable = e.is_retriable(),
                "Asset delivery errored"
            ),
        }
        result
    }

    /// Production bundle attachment failures since startup
    #[mutants::skip] // Delegates to ProductionAssetAttachment::failure_count()
    pub fn attachment_failures(&self) -> u64 {
        self.attachment.failure_count()
    }

    fn lease(&self, asset_id: &str) -> SlotLease<'_> {
        let mut slots = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        let slot = slots.entry(asset_id.to_string()).or_default().clone();
        SlotLease {
            slots: &self.in_flight,
            asset_id: asset_id.to_string(),
            slot,
        }
    }

    async fn deliver_exclusive(
        &self,
        request: &DeliveryRequest,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        let asset_id = request.asset_id.as_str();

        // Re-read under the per-asset lock; a delivery that finished while we
        // waited is visible here
        let Some(record) = self
            .assets
            .get(asset_id)
            .await
            .map_err(|e| DeliveryError::from_store(asset_id, e))?
        else {
            return Ok(DeliveryOutcome::failed(asset_id, FailureReason::NotFound));
        };
        if record.is_delivered() {
            return Ok(DeliveryOutcome::Idempotent {
                asset_id: record.id,
                delivered_at: record.delivered_at,
            });
        }

        let Some(source) = record.source().map(str::to_string) else {
            return self.fail(&record, FailureReason::MissingSource).await;
        };

        let known_batch_id = record.delivery_batch_id.as_deref();
        let hinted = match request.batch_id.as_deref() {
            Some(hint) if known_batch_id.is_none() => self.hinted_batch(&record, hint).await?,
            Some(hint) => {
                if known_batch_id != Some(hint) {
                    tracing::debug!(
                        asset_id,
                        hint,
                        "Ignoring batch hint that differs from the asset record"
                    );
                }
                None
            }
            None => None,
        };

        let batch = match hinted {
            Some(batch) => batch,
            None => {
                let Some(reference) = record.delivery_batch_ref.as_deref().or(known_batch_id)
                else {
                    return self.fail(&record, FailureReason::NoBatchAssigned).await;
                };
                match self
                    .resolver
                    .resolve(reference, known_batch_id, record.project_ref.as_deref())
                    .await
                {
                    Ok(batch) => batch,
                    Err(ResolveError::Store(e)) => {
                        return Err(DeliveryError::from_store(asset_id, e))
                    }
                    Err(e) => {
                        let reason = e.failure_reason().unwrap_or(FailureReason::BatchNotFound {
                            reference: reference.to_string(),
                        });
                        return self.fail(&record, reason).await;
                    }
                }
            }
        };

        if known_batch_id != Some(batch.stable_batch_id.as_str()) {
            if let Err(e) = self
                .assets
                .record_batch_resolution(asset_id, &batch.stable_batch_id)
                .await
            {
                tracing::warn!(asset_id, error = %e, "Failed to persist resolved batch id");
            }
        }

        let folder = match self
            .content
            .ensure_child_folder(
                &batch.destination_location_ref,
                &deliverable_folder_name(&record),
            )
            .await
        {
            Ok(folder) => folder,
            Err(e) if e.is_transient() => return Err(DeliveryError::from_content(asset_id, e)),
            Err(ContentError::NotFound(_)) => {
                return self
                    .fail(
                        &record,
                        FailureReason::MissingDestination {
                            batch_id: batch.stable_batch_id,
                        },
                    )
                    .await;
            }
            Err(e) => {
                return self
                    .fail(
                        &record,
                        FailureReason::ContentRejected {
                            detail: e.to_string(),
                        },
                    )
                    .await;
            }
        };

        let report = match self
            .content
            .copy_folder_tree(&source, &folder.id, CopyOptions { overwrite: true })
            .await
        {
            Ok(report) => report,
            Err(e) if e.is_transient() => return Err(DeliveryError::from_content(asset_id, e)),
            Err(ContentError::NotFound(_)) => {
                return self.fail(&record, FailureReason::MissingSource).await;
            }
            Err(e) => {
                return self
                    .fail(
                        &record,
                        FailureReason::ContentRejected {
                            detail: e.to_string(),
                        },
                    )
                    .await;
            }
        };
        if !report.is_complete() {
            return self
                .fail(
                    &record,
                    FailureReason::PartialCopyFailure {
                        copied: report.items_copied,
                        failed: report.items_failed.len(),
                    },
                )
                .await;
        }

        let delivered_at = Utc::now();
        let applied = self
            .assets
            .mark_delivered(asset_id, &folder.id, &folder.url, delivered_at)
            .await
            .map_err(|e| DeliveryError::from_store(asset_id, e))?;
        if !applied.changed {
            return Ok(DeliveryOutcome::Idempotent {
                asset_id: applied.record.id,
                delivered_at: applied.record.delivered_at,
            });
        }

        let attachment = self.attachment.attach(&folder).await;

        Ok(DeliveryOutcome::Delivered(DeliveryReceipt {
            asset_id: asset_id.to_string(),
            batch_id: batch.stable_batch_id,
            destination_ref: folder.id,
            content_url: folder.url,
            delivered_at: applied.record.delivered_at.unwrap_or(delivered_at),
            items_copied: report.items_copied,
            attachment,
        }))
    }

    /// Batch named by a trigger's pre-resolved stable id, used in place of
    /// name resolution when the record has no cached id yet. The hint only
    /// counts when it agrees with the record's own reference (same id or
    /// same display name), so a stale event cannot redirect the asset.
    async fn hinted_batch(
        &self,
        record: &AssetStatusRecord,
        hint: &str,
    ) -> Result<Option<ResolvedBatch>, DeliveryError> {
        if !is_stable_id(hint) {
            return Ok(None);
        }
        let batch = match self.resolver.resolve(hint, Some(hint), None).await {
            Ok(batch) => batch,
            Err(ResolveError::Store(e)) => return Err(DeliveryError::from_store(&record.id, e)),
            Err(e) => {
                tracing::debug!(asset_id = %record.id, hint, error = %e, "Batch hint did not resolve");
                return Ok(None);
            }
        };
        let agrees = match record.delivery_batch_ref.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(reference) => reference == batch.stable_batch_id || reference == batch.display_name,
        };
        if !agrees {
            tracing::debug!(
                asset_id = %record.id,
                hint,
                "Ignoring batch hint that disagrees with the asset's batch reference"
            );
            return Ok(None);
        }
        Ok(Some(batch))
    }

    /// Record the failure on the asset (best effort) and report it
    async fn fail(
        &self,
        record: &AssetStatusRecord,
        reason: FailureReason,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        if let Err(e) = self
            .assets
            .record_delivery_failure(&record.id, &reason.to_string(), Utc::now())
            .await
        {
            tracing::warn!(asset_id = %record.id, error = %e, "Failed to record delivery failure");
        }
        Ok(DeliveryOutcome::failed(&record.id, reason))
    }
}
