//! Errors raised by the delivery repositories

use proofline_records::RecordStoreError;
use thiserror::Error;

use crate::domain::state::StateError;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Transient store error: {0}")]
    Transient(String),

    #[error("Required field '{field}' is missing from table '{table}'")]
    SchemaFieldMissing { table: String, field: String },

    #[error(transparent)]
    InvalidTransition(#[from] StateError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Store error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Map a record store failure, naming the entity for not-found cases
    pub fn from_record(entity: &'static str, err: RecordStoreError) -> Self {
        match err {
            RecordStoreError::NotFound { id, .. } => Self::NotFound { entity, id },
            RecordStoreError::UnknownField { table, field } => {
                Self::SchemaFieldMissing { table, field }
            }
            RecordStoreError::Transient(message) => Self::Transient(message),
            other => Self::Backend(other.to_string()),
        }
    }
}

impl From<RecordStoreError> for StoreError {
    fn from(err: RecordStoreError) -> Self {
        Self::from_record("record", err)
    }
}

impl From<StoreError> for proofline_common::Error {
    fn from(err: StoreError) -> Self {
        use proofline_common::Error;
        match err {
            StoreError::NotFound { .. } => Error::NotFound(err.to_string()),
            StoreError::Transient(message) => Error::Unavailable(message),
            StoreError::InvalidTransition(e) => Error::Conflict(e.to_string()),
            StoreError::Validation(message) => Error::Validation(message),
            StoreError::SchemaFieldMissing { .. } | StoreError::Backend(_) => {
                Error::Internal(err.to_string())
            }
        }
    }
}
