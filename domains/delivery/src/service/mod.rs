//! Delivery services: batch resolution, the exactly-once executor, and the
//! trigger paths that feed it

pub mod attachment;
pub mod executor;
pub mod resolver;
pub mod tracker;
pub mod triggers;

pub use attachment::ProductionAssetAttachment;
pub use executor::{DeliveryError, DeliveryExecutor};
pub use resolver::{BatchResolver, ResolutionPath, ResolveError, ResolvedBatch};
pub use tracker::{PartnerDownloadEvent, PartnerDownloadTracker};
pub use triggers::{
    approval_events, AssetApproved, EventTrigger, ScanReport, ScheduledScan,
    ASSET_APPROVED_EVENT, DELIVER_FUNCTION_ID,
};
