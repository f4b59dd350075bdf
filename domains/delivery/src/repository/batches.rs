//! Delivery batch repository
//!
//! Batches are created and renamed by operators in the hosted store; this
//! side only reads them.

use std::sync::Arc;

use tokio::sync::OnceCell;

use proofline_records::{Filter, Record, RecordStore};

use crate::domain::entities::{DeliveryBatch, DELIVERY_BATCHES_TABLE};
use crate::repository::error::StoreError;
use crate::repository::schema::{SchemaCapabilities, DELIVERY_BATCH_FIELDS};

const ENTITY: &str = "batch";

fn decode(record: &Record) -> Result<DeliveryBatch, StoreError> {
    Ok(record.decode()?)
}

#[derive(Clone)]
pub struct BatchRepository {
    store: Arc<dyn RecordStore>,
    capabilities: Arc<OnceCell<SchemaCapabilities>>,
}

impl BatchRepository {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            capabilities: Arc::new(OnceCell::new()),
        }
    }

    /// Fail fast when the batches table lacks a field resolution depends on
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        self.capabilities
            .get_or_try_init(|| {
                SchemaCapabilities::negotiate(self.store.as_ref(), &DELIVERY_BATCH_FIELDS)
            })
            .await?;
        Ok(())
    }

    /// Find batch by stable id
    pub async fn find(&self, id: &str) -> Result<Option<DeliveryBatch>, StoreError> {
        self.ensure_schema().await?;
        self.store
            .find(DELIVERY_BATCHES_TABLE, id)
            .await
            .map_err(|e| StoreError::from_record(ENTITY, e))?
            .as_ref()
            .map(decode)
            .transpose()
    }

    /// Batches currently carrying a display name, lowest id first
    pub async fn list_by_name(&self, display_name: &str) -> Result<Vec<DeliveryBatch>, StoreError> {
        self.list(&Filter::new().eq("display_name", display_name))
            .await
    }

    /// Batches belonging to a project, lowest id first
    pub async fn list_by_project(
        &self,
        project_ref: &str,
    ) -> Result<Vec<DeliveryBatch>, StoreError> {
        self.list(&Filter::new().eq("project_ref", project_ref))
            .await
    }

    async fn list(&self, filter: &Filter) -> Result<Vec<DeliveryBatch>, StoreError> {
        self.ensure_schema().await?;
        self.store
            .list(DELIVERY_BATCHES_TABLE, filter, None)
            .await
            .map_err(|e| StoreError::from_record(ENTITY, e))?
            .iter()
            .map(decode)
            .collect()
    }
}
