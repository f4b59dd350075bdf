//! Batch resolution
//!
//! Turns a batch reference as entered by a client (stable id or display
//! name) into a concrete batch with a destination folder. Display names
//! drift when operators rename batches, so an unmatched name falls back to
//! the asset's project and heals when exactly one candidate remains.

use serde::Serialize;
use thiserror::Error;

use proofline_common::BatchReference;

use crate::domain::entities::DeliveryBatch;
use crate::domain::outcome::FailureReason;
use crate::repository::{BatchRepository, StoreError};

/// How a reference was matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPath {
    StableId,
    DisplayName,
    /// The name matched nothing; the project held a single candidate
    ProjectFallback,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedBatch {
    pub stable_batch_id: String,
    pub display_name: String,
    pub destination_location_ref: String,
    pub via: ResolutionPath,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ResolveError {
    #[error("No batch matches '{reference}'")]
    BatchNotFound { reference: String },

    #[error("Batch reference '{reference}' is ambiguous: {candidates:?}")]
    AmbiguousBatch {
        reference: String,
        candidates: Vec<String>,
    },

    #[error("Batch {batch_id} has no destination folder")]
    MissingDestination { batch_id: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ResolveError {
    /// Persistent failure reason, or `None` for store errors
    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            Self::BatchNotFound { reference } => Some(FailureReason::BatchNotFound {
                reference: reference.clone(),
            }),
            Self::AmbiguousBatch {
                reference,
                candidates,
            } => Some(FailureReason::AmbiguousBatch {
                reference: reference.clone(),
                candidates: candidates.clone(),
            }),
            Self::MissingDestination { batch_id } => Some(FailureReason::MissingDestination {
                batch_id: batch_id.clone(),
            }),
            Self::Store(_) => None,
        }
    }
}

fn ids(batches: &[DeliveryBatch]) -> Vec<String> {
    let mut ids: Vec<String> = batches.iter().map(|b| b.id.clone()).collect();
    ids.sort();
    ids
}

#[derive(Clone)]
pub struct BatchResolver {
    batches: BatchRepository,
}

impl BatchResolver {
    pub fn new(batches: BatchRepository) -> Self {
        Self { batches }
    }

    /// Resolve a batch reference.
    ///
    /// A known stable id wins outright. Otherwise a stable-id reference
    /// resolves directly or not at all; a display name must match exactly
    /// one batch, with `project_scope` breaking ties between equal names
    /// and serving as the fallback when the name matches nothing.
    pub async fn resolve(
        &self,
        reference: &str,
        known_stable_id: Option<&str>,
        project_scope: Option<&str>,
    ) -> Result<ResolvedBatch, ResolveError> {
        if let Some(id) = known_stable_id.filter(|id| !id.trim().is_empty()) {
            let batch = self
                .batches
                .find(id)
                .await?
                .ok_or_else(|| ResolveError::BatchNotFound {
                    reference: id.to_string(),
                })?;
            return with_destination(batch, ResolutionPath::StableId);
        }

        let reference = BatchReference::parse(reference).map_err(|_| {
            ResolveError::BatchNotFound {
                reference: reference.to_string(),
            }
        })?;
        match &reference {
            BatchReference::StableId(id) => {
                let batch = self
                    .batches
                    .find(id)
                    .await?
                    .ok_or_else(|| ResolveError::BatchNotFound {
                        reference: id.clone(),
                    })?;
                with_destination(batch, ResolutionPath::StableId)
            }
            BatchReference::DisplayName(name) => self.resolve_name(name, project_scope).await,
        }
    }

    async fn resolve_name(
        &self,
        name: &str,
        project_scope: Option<&str>,
    ) -> Result<ResolvedBatch, ResolveError> {
        let mut named = self.batches.list_by_name(name).await?;
        match named.len() {
            0 => {}
            1 => return with_destination(named.remove(0), ResolutionPath::DisplayName),
            _ => {
                let mut in_scope: Vec<DeliveryBatch> = match project_scope {
                    Some(project) => named
                        .iter()
                        .filter(|b| b.project_ref.as_deref() == Some(project))
                        .cloned()
                        .collect(),
                    None => Vec::new(),
                };
                if in_scope.len() == 1 {
                    return with_destination(in_scope.remove(0), ResolutionPath::DisplayName);
                }
                let candidates = if in_scope.is_empty() { &named } else { &in_scope };
                return Err(ResolveError::AmbiguousBatch {
                    reference: name.to_string(),
                    candidates: ids(candidates),
                });
            }
        }

        let Some(project) = project_scope.filter(|p| !p.trim().is_empty()) else {
            return Err(ResolveError::BatchNotFound {
                reference: name.to_string(),
            });
        };

        let in_project = self.batches.list_by_project(project).await?;
        let active: Vec<DeliveryBatch> = in_project
            .iter()
            .filter(|b| b.is_active())
            .cloned()
            .collect();
        let mut pool = if active.is_empty() { in_project } else { active };

        match pool.len() {
            0 => Err(ResolveError::BatchNotFound {
                reference: name.to_string(),
            }),
            1 => {
                let batch = pool.remove(0);
                tracing::warn!(
                    reference = name,
                    project,
                    batch_id = %batch.id,
                    current_name = %batch.display_name,
                    "Batch name not found; healed to the project's only candidate"
                );
                with_destination(batch, ResolutionPath::ProjectFallback)
            }
            _ => Err(ResolveError::AmbiguousBatch {
                reference: name.to_string(),
                candidates: ids(&pool),
            }),
        }
    }
}

fn with_destination(
    batch: DeliveryBatch,
    via: ResolutionPath,
) -> Result<ResolvedBatch, ResolveError> {
    let Some(destination) = batch.destination().map(str::to_string) else {
        return Err(ResolveError::MissingDestination { batch_id: batch.id });
    };
    Ok(ResolvedBatch {
        stable_batch_id: batch.id,
        display_name: batch.display_name,
        destination_location_ref: destination,
        via,
    })
}
