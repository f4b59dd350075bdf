//! Delivery domain: asset review state, batch resolution, exactly-once
//! partner delivery

pub mod api;
pub mod config;
pub mod domain;
pub mod repository;
pub mod service;

use std::sync::Arc;

use proofline_content::ContentService;
use proofline_inngest::TaskRunner;
use proofline_records::RecordStore;

// Re-export domain types at the crate root for convenience
pub use config::DeliveryConfig;
pub use domain::entities::*;
pub use domain::outcome::{
    AttachmentOutcome, DeliveryFailure, DeliveryOutcome, DeliveryReceipt, DeliveryRequest,
    FailureReason,
};
pub use domain::state::{ReviewEvent, ReviewStateMachine, StateError};
// Re-export repository types
pub use repository::{
    Applied, AssetStatusStore, BatchRepository, BulkApproval, ClientApproval, StoreError,
};
pub use service::{
    BatchResolver, DeliveryError, DeliveryExecutor, EventTrigger, PartnerDownloadEvent,
    PartnerDownloadTracker, ProductionAssetAttachment, ScanReport, ScheduledScan,
};

// Re-export API types
pub use api::routes;
pub use api::DeliveryState;

/// The delivery components wired over one record store and content service
#[derive(Clone)]
pub struct Delivery {
    pub assets: Arc<AssetStatusStore>,
    pub executor: Arc<DeliveryExecutor>,
    pub scan: Arc<ScheduledScan>,
    pub tracker: PartnerDownloadTracker,
    pub config: DeliveryConfig,
}

impl Delivery {
    pub fn new(
        store: Arc<dyn RecordStore>,
        content: Arc<dyn ContentService>,
        config: &DeliveryConfig,
    ) -> Self {
        let assets = Arc::new(AssetStatusStore::new(store.clone()));
        let resolver = BatchResolver::new(BatchRepository::new(store));
        let attachment = ProductionAssetAttachment::new(
            content.clone(),
            config.production_bundle_ref.clone(),
            config.production_subfolder.clone(),
        );
        let executor = Arc::new(DeliveryExecutor::new(
            assets.clone(),
            resolver,
            content,
            attachment,
        ));
        let scan = Arc::new(ScheduledScan::new(assets.clone(), executor.clone(), config));
        let tracker = PartnerDownloadTracker::new(assets.clone());

        Self {
            assets,
            executor,
            scan,
            tracker,
            config: config.clone(),
        }
    }

    /// Subscribe the delivery function to approval events
    pub fn register_functions(&self, runner: &TaskRunner) {
        runner.subscribe(
            EventTrigger::function_config(&self.config),
            Arc::new(EventTrigger::new(self.executor.clone())),
        );
    }
}
