//! Errors raised by review state transitions

use thiserror::Error;

/// Rejected state transition
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StateError {
    #[error("Invalid transition: cannot apply {event} from {from}")]
    InvalidTransition { from: String, event: String },

    #[error("Transition not allowed: {0}")]
    GuardFailed(String),
}
