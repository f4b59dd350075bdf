//! Shared utilities, configuration, and error handling for Proofline
//!
//! This crate provides common functionality used across the Proofline workspace:
//! - Configuration management following 12-factor principles
//! - Error types and their HTTP rendering
//! - Opaque reference helpers (stable ids vs. display names)
//! - State machine error types

pub mod config;
pub mod error;
pub mod extractors;
pub mod reference;
pub mod state;

pub use config::{env_or, env_parse_or};
pub use error::{Error, Result};
pub use extractors::ValidatedJson;
pub use reference::{is_stable_id, new_record_id, BatchReference};
pub use state::StateError;
