//! State machine for asset review status transitions
//!
//! Review states: New → Seen (view); Seen | NeedsChanges → Approved (approve);
//! Seen | Approved → NeedsChanges (request changes).
//! Repeating the current state is accepted and leaves the status unchanged.

pub use proofline_common::StateError;

use crate::domain::entities::ReviewStatus;

/// Events that trigger review status transitions
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReviewEvent {
    /// A reviewer opened the asset
    View,
    /// A reviewer approved the asset
    Approve,
    /// A reviewer asked for another revision
    RequestChanges,
}

impl ReviewEvent {
    /// Event that moves an asset into the given status
    pub fn targeting(status: ReviewStatus) -> Result<Self, StateError> {
        match status {
            ReviewStatus::Seen => Ok(Self::View),
            ReviewStatus::Approved => Ok(Self::Approve),
            ReviewStatus::NeedsChanges => Ok(Self::RequestChanges),
            ReviewStatus::New => Err(StateError::GuardFailed(
                "an asset cannot be returned to new".to_string(),
            )),
        }
    }
}

impl std::fmt::Display for ReviewEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::View => write!(f, "view"),
            Self::Approve => write!(f, "approve"),
            Self::RequestChanges => write!(f, "request_changes"),
        }
    }
}

/// Review state machine
pub struct ReviewStateMachine;

impl ReviewStateMachine {
    /// Attempt a state transition
    pub fn transition(
        current: ReviewStatus,
        event: ReviewEvent,
    ) -> Result<ReviewStatus, StateError> {
        let next = match (current, event) {
            (ReviewStatus::New, ReviewEvent::View) => ReviewStatus::Seen,
            // Viewing never demotes a reviewed asset
            (status, ReviewEvent::View) => status,
            (
                ReviewStatus::Seen | ReviewStatus::NeedsChanges | ReviewStatus::Approved,
                ReviewEvent::Approve,
            ) => ReviewStatus::Approved,
            (
                ReviewStatus::Seen | ReviewStatus::Approved | ReviewStatus::NeedsChanges,
                ReviewEvent::RequestChanges,
            ) => ReviewStatus::NeedsChanges,
            (ReviewStatus::New, _) => {
                return Err(StateError::InvalidTransition {
                    from: current.to_string(),
                    event: event.to_string(),
                });
            }
        };

        Ok(next)
    }

    /// Check if a transition is valid without performing it
    pub fn can_transition(current: ReviewStatus, event: &ReviewEvent) -> bool {
        Self::transition(current, *event).is_ok()
    }
}
