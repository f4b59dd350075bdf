//! Proofline Record Store
//!
//! Port to the hosted record store that holds asset review state and
//! delivery batches:
//! - PostgreSQL adapter (Supabase) projecting rows as JSON objects
//! - In-memory mock with schema simulation and fault injection
//! - Configurable provider, connection URL, and bulk-update batch limit
//!
//! The store offers single-record atomicity only. `update_many` is atomic per
//! call and bounded by `batch_limit()`; callers chunk larger updates themselves.

pub mod mock;
pub mod postgres;

use std::sync::Arc;

use proofline_common::{env_or, env_parse_or};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Field map of a record, keyed by column name
pub type Fields = serde_json::Map<String, Value>;

/// Default number of records a single bulk update may touch
pub const DEFAULT_BATCH_LIMIT: usize = 10;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordStoreError {
    #[error("Record not found: {table}/{id}")]
    NotFound { table: String, id: String },

    #[error("Unknown field '{field}' on table '{table}'")]
    UnknownField { table: String, field: String },

    #[error("Transient record store error: {0}")]
    Transient(String),

    #[error("Bulk update of {size} records exceeds the store limit of {limit}")]
    BatchTooLarge { size: usize, limit: usize },

    #[error("Invalid record data: {0}")]
    InvalidData(String),

    #[error("Record store configuration error: {0}")]
    Configuration(String),

    #[error("Record store error: {0}")]
    Backend(String),
}

impl RecordStoreError {
    /// Network, auth, and availability failures worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// A record as returned by the store. `fields` always contains `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub fields: Fields,
}

impl Record {
    /// Build a record from a field map, extracting its `id`
    pub fn from_fields(fields: Fields) -> Result<Self, RecordStoreError> {
        let id = fields
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| RecordStoreError::InvalidData("record has no string id".to_string()))?
            .to_string();
        Ok(Self { id, fields })
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Deserialize the field map into a typed entity
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, RecordStoreError> {
        serde_json::from_value(Value::Object(self.fields.clone())).map_err(|e| {
            RecordStoreError::InvalidData(format!("record {} does not decode: {}", self.id, e))
        })
    }
}

/// One entry of a bulk update
#[derive(Debug, Clone, PartialEq)]
pub struct RecordUpdate {
    pub id: String,
    pub fields: Fields,
}

/// Equality filter over top-level fields, optionally restricted to a set of ids.
///
/// A `null` filter value matches both an explicit null and an absent field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub equals: Fields,
    /// Fields that must not hold `true`; null, absent and `false` all pass
    pub not_true: Vec<String>,
    pub id_in: Option<Vec<String>>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `field == value`
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.equals.insert(field.into(), value.into());
        self
    }

    /// Require `field` to be anything but `true`
    pub fn not_true(mut self, field: impl Into<String>) -> Self {
        self.not_true.push(field.into());
        self
    }

    /// Restrict to the given record ids
    pub fn ids(mut self, ids: Vec<String>) -> Self {
        self.id_in = Some(ids);
        self
    }

    /// Evaluate the filter against a field map
    pub fn matches(&self, fields: &Fields) -> bool {
        if let Some(ids) = &self.id_in {
            let id = fields.get("id").and_then(Value::as_str).unwrap_or_default();
            if !ids.iter().any(|candidate| candidate == id) {
                return false;
            }
        }
        if self
            .not_true
            .iter()
            .any(|field| fields.get(field) == Some(&Value::Bool(true)))
        {
            return false;
        }
        self.equals
            .iter()
            .all(|(field, expected)| fields.get(field).unwrap_or(&Value::Null) == expected)
    }
}

/// Record store trait for different backends
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    /// Maximum number of records a single `update_many` call accepts
    fn batch_limit(&self) -> usize;

    /// Look up a record by id
    async fn find(&self, table: &str, id: &str) -> Result<Option<Record>, RecordStoreError>;

    /// List records matching a filter, ordered by id
    async fn list(
        &self,
        table: &str,
        filter: &Filter,
        limit: Option<usize>,
    ) -> Result<Vec<Record>, RecordStoreError>;

    /// Create a record; `fields` must carry the record `id`
    async fn create(&self, table: &str, fields: Fields) -> Result<Record, RecordStoreError>;

    /// Update the given fields of one record
    async fn update(&self, table: &str, id: &str, fields: Fields)
        -> Result<Record, RecordStoreError>;

    /// Update up to `batch_limit()` records in one atomic call
    async fn update_many(
        &self,
        table: &str,
        updates: Vec<RecordUpdate>,
    ) -> Result<Vec<Record>, RecordStoreError>;

    /// Field names the table currently exposes; `None` when the backend
    /// cannot report its schema
    async fn field_names(&self, table: &str) -> Result<Option<Vec<String>>, RecordStoreError>;
}

/// Record store configuration
#[derive(Clone)]
pub struct RecordStoreConfig {
    /// Record store provider (postgres, mock)
    pub provider: String,
    /// Connection URL for the postgres provider
    pub database_url: Option<String>,
    /// Maximum records per bulk update
    pub batch_limit: usize,
    /// Connection pool size
    pub max_connections: u32,
}

impl std::fmt::Debug for RecordStoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStoreConfig")
            .field("provider", &self.provider)
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "[REDACTED]"),
            )
            .field("batch_limit", &self.batch_limit)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

impl RecordStoreConfig {
    /// Create record store config from environment variables
    pub fn from_env() -> Result<Self, RecordStoreError> {
        let provider = env_or("RECORD_STORE_PROVIDER", "mock");
        let database_url = std::env::var("DATABASE_URL").ok();
        let batch_limit = env_parse_or("RECORD_BATCH_LIMIT", DEFAULT_BATCH_LIMIT);
        let max_connections = env_parse_or("DATABASE_MAX_CONNECTIONS", 5u32);

        if batch_limit == 0 {
            return Err(RecordStoreError::Configuration(
                "RECORD_BATCH_LIMIT must be at least 1".to_string(),
            ));
        }
        if provider == "postgres" && database_url.is_none() {
            return Err(RecordStoreError::Configuration(
                "DATABASE_URL is required for the postgres provider".to_string(),
            ));
        }

        Ok(Self {
            provider,
            database_url,
            batch_limit,
            max_connections,
        })
    }
}

/// Factory for creating RecordStore implementations
pub struct RecordStoreFactory;

impl RecordStoreFactory {
    /// Create a RecordStore based on configuration
    pub async fn create(config: RecordStoreConfig) -> Result<Arc<dyn RecordStore>, RecordStoreError> {
        match config.provider.as_str() {
            "postgres" => {
                tracing::info!("Creating PostgreSQL record store");
                let url = config.database_url.as_deref().ok_or_else(|| {
                    RecordStoreError::Configuration(
                        "DATABASE_URL is required for the postgres provider".to_string(),
                    )
                })?;
                let store =
                    postgres::PgRecordStore::connect(url, config.max_connections, config.batch_limit)
                        .await?;
                Ok(Arc::new(store))
            }
            "mock" => {
                tracing::info!("Creating in-memory mock record store");
                Ok(Arc::new(mock::MockRecordStore::with_batch_limit(
                    config.batch_limit,
                )))
            }
            provider => Err(RecordStoreError::Configuration(format!(
                "Unknown record store provider: {}. Supported providers: postgres, mock",
                provider
            ))),
        }
    }
}
