//! Delivery domain state

use proofline_inngest::{InngestService, TaskRunner};
use std::sync::Arc;

use crate::Delivery;

/// Application state for the Delivery domain
#[derive(Clone)]
pub struct DeliveryState {
    pub delivery: Delivery,
    /// Publishing side of the job substrate
    pub events: Arc<dyn InngestService>,
    /// Registered functions, invoked by the function endpoint
    pub runner: TaskRunner,
}
