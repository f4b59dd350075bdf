//! Repository implementations for the Delivery domain

pub mod asset_statuses;
pub mod batches;
pub mod error;
pub mod schema;

pub use asset_statuses::{Applied, AssetStatusStore, BulkApproval, ClientApproval};
pub use batches::BatchRepository;
pub use error::StoreError;
pub use schema::{FieldPolicy, SchemaCapabilities};
