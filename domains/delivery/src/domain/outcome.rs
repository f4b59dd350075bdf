//! Delivery requests and their terminal outcomes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A request to deliver one asset, carried by every trigger path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRequest {
    pub asset_id: String,
    /// Stable batch id already known to the caller, if any
    #[serde(default)]
    pub batch_id: Option<String>,
    pub correlation_id: String,
}

impl DeliveryRequest {
    pub fn new(asset_id: impl Into<String>) -> Self {
        Self {
            asset_id: asset_id.into(),
            batch_id: None,
            correlation_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_batch_id(mut self, batch_id: Option<String>) -> Self {
        self.batch_id = batch_id;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }
}

/// Result of attaching the shared production bundle to a delivered folder.
/// Never affects the delivery outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttachmentOutcome {
    /// No production bundle is configured
    Skipped,
    Attached { items_copied: usize },
    Failed { reason: String },
}

/// Proof of a successful copy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub asset_id: String,
    pub batch_id: String,
    pub destination_ref: String,
    pub content_url: String,
    pub delivered_at: DateTime<Utc>,
    pub items_copied: usize,
    pub attachment: AttachmentOutcome,
}

/// Why a delivery did not happen. Failures are not retried by the job
/// substrate; an asset that stays ready is picked up again by the scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum FailureReason {
    NotFound,
    MissingSource,
    NoBatchAssigned,
    BatchNotFound { reference: String },
    AmbiguousBatch { reference: String, candidates: Vec<String> },
    MissingDestination { batch_id: String },
    ContentRejected { detail: String },
    PartialCopyFailure { copied: usize, failed: usize },
}

impl FailureReason {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::MissingSource => "missing_source",
            Self::NoBatchAssigned => "no_batch_assigned",
            Self::BatchNotFound { .. } => "batch_not_found",
            Self::AmbiguousBatch { .. } => "ambiguous_batch",
            Self::MissingDestination { .. } => "missing_destination",
            Self::ContentRejected { .. } => "content_rejected",
            Self::PartialCopyFailure { .. } => "partial_copy_failure",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found: asset does not exist"),
            Self::MissingSource => write!(f, "missing_source: asset has no source content"),
            Self::NoBatchAssigned => write!(f, "no_batch_assigned: asset has no delivery batch"),
            Self::BatchNotFound { reference } => {
                write!(f, "batch_not_found: no batch matches '{}'", reference)
            }
            Self::AmbiguousBatch {
                reference,
                candidates,
            } => write!(
                f,
                "ambiguous_batch: '{}' matches {}",
                reference,
                candidates.join(", ")
            ),
            Self::MissingDestination { batch_id } => write!(
                f,
                "missing_destination: batch {} has no destination folder",
                batch_id
            ),
            Self::ContentRejected { detail } => write!(f, "content_rejected: {}", detail),
            Self::PartialCopyFailure { copied, failed } => write!(
                f,
                "partial_copy_failure: {} of {} items failed",
                failed,
                copied + failed
            ),
        }
    }
}

/// A delivery that reached a persistent failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryFailure {
    pub asset_id: String,
    pub reason: FailureReason,
}

/// Terminal outcome of one delivery attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered(DeliveryReceipt),
    /// The asset was already delivered; nothing was copied
    Idempotent {
        asset_id: String,
        delivered_at: Option<DateTime<Utc>>,
    },
    Failed(DeliveryFailure),
}

impl DeliveryOutcome {
    pub fn failed(asset_id: &str, reason: FailureReason) -> Self {
        Self::Failed(DeliveryFailure {
            asset_id: asset_id.to_string(),
            reason,
        })
    }

    pub fn asset_id(&self) -> &str {
        match self {
            Self::Delivered(receipt) => &receipt.asset_id,
            Self::Idempotent { asset_id, .. } => asset_id,
            Self::Failed(failure) => &failure.asset_id,
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered(_))
    }

    pub fn is_idempotent(&self) -> bool {
        matches!(self, Self::Idempotent { .. })
    }

    pub fn failure_reason(&self) -> Option<&FailureReason> {
        match self {
            Self::Failed(failure) => Some(&failure.reason),
            _ => None,
        }
    }
}
