//! Domain entities for the Delivery domain
//!
//! Asset status records, delivery batches, and the audit trail written
//! whenever an asset's review or delivery state changes. Field names match
//! the columns of the hosted record store.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use proofline_common::{new_record_id, BatchReference};

/// Record store table holding one row per reviewable asset
pub const ASSET_STATUSES_TABLE: &str = "asset_statuses";

/// Record store table holding operator-managed delivery batches
pub const DELIVERY_BATCHES_TABLE: &str = "delivery_batches";

/// Record store table holding the asset audit trail
pub const ASSET_STATUS_EVENTS_TABLE: &str = "asset_status_events";

/// Maximum filename length accepted on creation
pub const MAX_FILENAME_LENGTH: usize = 255;

/// Deserialize a nullable column into its type's default
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Timestamps are stored with microsecond precision; normalize before
/// writing so that repeated writes compare equal to what was read back.
pub fn store_timestamp(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(6)
}

/// Review status of an asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    #[default]
    New,
    Seen,
    Approved,
    NeedsChanges,
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReviewStatus::New => write!(f, "new"),
            ReviewStatus::Seen => write!(f, "seen"),
            ReviewStatus::Approved => write!(f, "approved"),
            ReviewStatus::NeedsChanges => write!(f, "needs_changes"),
        }
    }
}

/// Who approved an asset on the client side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Approver {
    pub name: String,
    pub email: String,
}

/// Review and delivery state of one asset.
///
/// Identity is `(review_token, source_content_ref)`; `id` is the stable
/// record id assigned on creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetStatusRecord {
    pub id: String,
    pub review_token: String,
    #[serde(default)]
    pub source_content_ref: Option<String>,
    pub filename: String,
    #[serde(default)]
    pub tactic: Option<String>,
    #[serde(default)]
    pub variant: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: ReviewStatus,
    #[serde(default, deserialize_with = "null_as_default")]
    pub client_approved: bool,
    #[serde(default)]
    pub first_seen_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_seen_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub approved_by_name: Option<String>,
    #[serde(default)]
    pub approved_by_email: Option<String>,
    /// Batch reference as entered: stable id or display name
    #[serde(default)]
    pub delivery_batch_ref: Option<String>,
    /// Stable batch id discovered by resolution
    #[serde(default)]
    pub delivery_batch_id: Option<String>,
    #[serde(default)]
    pub project_ref: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub ready_for_delivery: bool,
    #[serde(default)]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub delivered_flag: bool,
    #[serde(default)]
    pub delivered_destination_ref: Option<String>,
    #[serde(default)]
    pub delivered_content_url: Option<String>,
    #[serde(default)]
    pub partner_download_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub partner_downloaded_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub last_delivery_error: Option<String>,
    #[serde(default)]
    pub last_delivery_attempt_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl AssetStatusRecord {
    /// Create a record for an asset a reviewer has just viewed
    pub fn first_seen(asset: &SeenAsset, seen_at: DateTime<Utc>) -> Self {
        let seen_at = store_timestamp(seen_at);
        let mut record = Self::blank(
            &asset.review_token,
            &asset.source_content_ref,
            &asset.filename,
            seen_at,
        );
        record.tactic = asset.tactic.clone();
        record.variant = asset.variant.clone();
        record.status = ReviewStatus::Seen;
        record.first_seen_at = Some(seen_at);
        record.last_seen_at = Some(seen_at);
        record
    }

    /// Create a record for an asset that predates view tracking
    pub fn backfilled(asset: &BackfillAsset, created_at: DateTime<Utc>) -> Self {
        let mut record = Self::blank(
            &asset.review_token,
            &asset.source_content_ref,
            &asset.filename,
            store_timestamp(created_at),
        );
        record.tactic = asset.tactic.clone();
        record.variant = asset.variant.clone();
        record.status = asset.status.unwrap_or_default();
        record.project_ref = asset.project_ref.clone();
        record.notes = asset.notes.clone();
        record
    }

    fn blank(
        review_token: &str,
        source_content_ref: &str,
        filename: &str,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: new_record_id(),
            review_token: review_token.to_string(),
            source_content_ref: Some(source_content_ref.to_string()),
            filename: filename.to_string(),
            tactic: None,
            variant: None,
            status: ReviewStatus::New,
            client_approved: false,
            first_seen_at: None,
            last_seen_at: None,
            approved_at: None,
            approved_by_name: None,
            approved_by_email: None,
            delivery_batch_ref: None,
            delivery_batch_id: None,
            project_ref: None,
            ready_for_delivery: false,
            delivered_at: None,
            delivered_flag: false,
            delivered_destination_ref: None,
            delivered_content_url: None,
            partner_download_started_at: None,
            partner_downloaded_at: None,
            notes: None,
            last_delivery_error: None,
            last_delivery_attempt_at: None,
            created_at: Some(created_at),
        }
    }

    /// Either delivery marker counts; an asset with either set is never
    /// copied again.
    pub fn is_delivered(&self) -> bool {
        self.delivered_flag || self.delivered_at.is_some()
    }

    /// Approved, flagged ready, and not yet delivered
    pub fn is_ready(&self) -> bool {
        self.ready_for_delivery && !self.is_delivered()
    }

    pub fn approved_by(&self) -> Option<Approver> {
        match (&self.approved_by_name, &self.approved_by_email) {
            (None, None) => None,
            (name, email) => Some(Approver {
                name: name.clone().unwrap_or_default(),
                email: email.clone().unwrap_or_default(),
            }),
        }
    }

    /// Classified batch reference, if one has been assigned
    pub fn batch_reference(&self) -> Option<BatchReference> {
        self.delivery_batch_ref
            .as_deref()
            .and_then(|raw| BatchReference::parse(raw).ok())
    }

    /// Source content reference, if present and non-blank
    pub fn source(&self) -> Option<&str> {
        self.source_content_ref
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// An asset surfaced on a review page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeenAsset {
    pub review_token: String,
    pub source_content_ref: String,
    pub filename: String,
    #[serde(default)]
    pub tactic: Option<String>,
    #[serde(default)]
    pub variant: Option<String>,
}

/// An asset created ahead of (or without) view tracking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackfillAsset {
    pub review_token: String,
    pub source_content_ref: String,
    pub filename: String,
    #[serde(default)]
    pub tactic: Option<String>,
    #[serde(default)]
    pub variant: Option<String>,
    #[serde(default)]
    pub status: Option<ReviewStatus>,
    #[serde(default)]
    pub project_ref: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Batch lifecycle tag maintained by operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatusTag {
    Active,
    #[default]
    Inactive,
}

/// A named grouping of deliveries targeting one partner destination folder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryBatch {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub project_ref: Option<String>,
    #[serde(default)]
    pub destination_location_ref: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status_tag: BatchStatusTag,
}

impl DeliveryBatch {
    pub fn is_active(&self) -> bool {
        self.status_tag == BatchStatusTag::Active
    }

    /// Destination folder, if present and non-blank
    pub fn destination(&self) -> Option<&str> {
        self.destination_location_ref
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
    }
}

/// Kind of change recorded in the audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetAction {
    Seen,
    Backfilled,
    ReviewStatus,
    ClientApproved,
    Delivered,
    PartnerDownloadStarted,
    PartnerDownloaded,
}

impl std::fmt::Display for AssetAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AssetAction::Seen => "seen",
            AssetAction::Backfilled => "backfilled",
            AssetAction::ReviewStatus => "review_status",
            AssetAction::ClientApproved => "client_approved",
            AssetAction::Delivered => "delivered",
            AssetAction::PartnerDownloadStarted => "partner_download_started",
            AssetAction::PartnerDownloaded => "partner_downloaded",
        };
        f.write_str(name)
    }
}

/// One audit trail row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetStatusEvent {
    pub id: String,
    pub asset_id: String,
    pub action: AssetAction,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AssetStatusEvent {
    pub fn new(asset_id: &str, action: AssetAction, payload: serde_json::Value) -> Self {
        Self {
            id: new_record_id(),
            asset_id: asset_id.to_string(),
            action,
            payload,
            created_at: store_timestamp(Utc::now()),
        }
    }
}
