//! Review page API handlers: view tracking and client approval

use std::collections::HashSet;

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use proofline_common::{BatchReference, Error, Result, ValidatedJson};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::assets::AssetResponse;
use crate::api::middleware::DeliveryState;
use crate::domain::entities::{Approver, SeenAsset};
use crate::repository::{BulkApproval, ClientApproval};
use crate::service::approval_events;

/// Request for recording a reviewer view
#[derive(Debug, Deserialize, Validate)]
pub struct MarkSeenRequest {
    #[validate(length(min = 1, message = "source_content_ref cannot be empty"))]
    pub source_content_ref: String,

    #[validate(length(min = 1, max = 255, message = "filename must be 1-255 characters"))]
    pub filename: String,

    pub tactic: Option<String>,
    pub variant: Option<String>,
}

/// Request for approving assets on behalf of the client
#[derive(Debug, Deserialize, Validate)]
pub struct ClientApprovalRequest {
    #[validate(length(min = 1, max = 500, message = "asset_ids must contain 1-500 ids"))]
    pub asset_ids: Vec<String>,

    #[validate(length(min = 1, max = 200, message = "approver_name must be 1-200 characters"))]
    pub approver_name: String,

    #[validate(email(message = "Invalid approver email"))]
    pub approver_email: String,

    #[validate(length(min = 1, message = "delivery_batch_ref cannot be empty"))]
    pub delivery_batch_ref: String,
}

/// Bulk approval result plus the number of approval events published
#[derive(Debug, Serialize)]
pub struct ClientApprovalResponse {
    #[serde(flatten)]
    pub approval: BulkApproval,
    pub events_published: usize,
}

/// List every asset on a review page
pub async fn list_review_assets(
    State(state): State<DeliveryState>,
    Path(token): Path<String>,
) -> Result<Json<Vec<AssetResponse>>> {
    let assets = state.delivery.assets.list_by_token(&token).await?;
    Ok(Json(assets.into_iter().map(Into::into).collect()))
}

/// Record that a reviewer viewed an asset
pub async fn mark_seen(
    State(state): State<DeliveryState>,
    Path(token): Path<String>,
    ValidatedJson(req): ValidatedJson<MarkSeenRequest>,
) -> Result<Json<AssetResponse>> {
    let record = state
        .delivery
        .assets
        .upsert_seen(
            &SeenAsset {
                review_token: token,
                source_content_ref: req.source_content_ref,
                filename: req.filename,
                tactic: req.tactic,
                variant: req.variant,
            },
            Utc::now(),
        )
        .await?;
    Ok(Json(record.into()))
}

/// Approve assets for delivery and publish one approval event per asset
/// whose approval changed. A failed publish is left to the scheduled scan.
pub async fn client_approval(
    State(state): State<DeliveryState>,
    Path(token): Path<String>,
    ValidatedJson(req): ValidatedJson<ClientApprovalRequest>,
) -> Result<Json<ClientApprovalResponse>> {
    let reference = BatchReference::parse(&req.delivery_batch_ref)?;

    let on_page: HashSet<String> = state
        .delivery
        .assets
        .list_by_token(&token)
        .await?
        .into_iter()
        .map(|a| a.id)
        .collect();
    let foreign: Vec<&str> = req
        .asset_ids
        .iter()
        .filter(|id| !on_page.contains(*id))
        .map(String::as_str)
        .collect();
    if !foreign.is_empty() {
        return Err(Error::NotFound(format!(
            "Assets not on this review page: {}",
            foreign.join(", ")
        )));
    }

    let approved_at = Utc::now();
    let approval = state
        .delivery
        .assets
        .bulk_set_client_approved(
            &req.asset_ids,
            &ClientApproval {
                approved_at,
                approved_by: Approver {
                    name: req.approver_name,
                    email: req.approver_email,
                },
                delivery_batch_ref: reference.as_str().to_string(),
            },
        )
        .await?;

    let events = approval_events(&approval.changed, reference.stable_id(), approved_at);
    let events_published = if events.is_empty() {
        0
    } else {
        let count = events.len();
        match state.events.send_events(events).await {
            Ok(()) => count,
            Err(e) => {
                tracing::warn!(
                    review_token = %token,
                    count,
                    error = %e,
                    "Failed to publish approval events; scan will pick the assets up"
                );
                0
            }
        }
    };

    if !approval.is_complete() {
        tracing::warn!(
            review_token = %token,
            failed_at_index = ?approval.failed_at_index,
            retriable = approval.retriable,
            "Client approval stopped partway"
        );
    }

    Ok(Json(ClientApprovalResponse {
        approval,
        events_published,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(ids: Vec<&str>, email: &str) -> ClientApprovalRequest {
        ClientApprovalRequest {
            asset_ids: ids.into_iter().map(String::from).collect(),
            approver_name: "Dana".to_string(),
            approver_email: email.to_string(),
            delivery_batch_ref: "Batch 1".to_string(),
        }
    }

    #[test]
    fn test_client_approval_requires_ids() {
        assert!(request(vec![], "dana@client.example").validate().is_err());
        assert!(request(vec!["recAAAAAAAAAAAAAA"], "dana@client.example")
            .validate()
            .is_ok());
    }

    #[test]
    fn test_client_approval_requires_email() {
        assert!(request(vec!["recAAAAAAAAAAAAAA"], "not-an-email")
            .validate()
            .is_err());
    }

    #[test]
    fn test_response_flattens_bulk_outcome() {
        let response = ClientApprovalResponse {
            approval: BulkApproval {
                requested: 2,
                succeeded: 2,
                changed: vec!["recAAAAAAAAAAAAAA".to_string()],
                ..BulkApproval::default()
            },
            events_published: 1,
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["requested"], 2);
        assert_eq!(value["events_published"], 1);
        assert!(value["failed_at_index"].is_null());
    }
}
