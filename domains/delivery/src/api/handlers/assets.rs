//! Asset status API handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use proofline_common::{Error, Result, ValidatedJson};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::api::middleware::DeliveryState;
use crate::domain::entities::{AssetStatusRecord, BackfillAsset, ReviewStatus};
use crate::domain::outcome::DeliveryOutcome;
use crate::service::PartnerDownloadEvent;

/// Asset status response DTO
#[derive(Debug, Serialize, Deserialize)]
pub struct AssetResponse {
    pub id: String,
    pub review_token: String,
    pub source_content_ref: Option<String>,
    pub filename: String,
    pub tactic: Option<String>,
    pub variant: Option<String>,
    pub status: ReviewStatus,
    pub client_approved: bool,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by_name: Option<String>,
    pub delivery_batch_ref: Option<String>,
    pub ready_for_delivery: bool,
    pub delivered: bool,
    pub delivered_at: Option<DateTime<Utc>>,
    pub delivered_content_url: Option<String>,
    pub partner_download_started_at: Option<DateTime<Utc>>,
    pub partner_downloaded_at: Option<DateTime<Utc>>,
    pub last_delivery_error: Option<String>,
    pub notes: Option<String>,
}

impl From<AssetStatusRecord> for AssetResponse {
    fn from(a: AssetStatusRecord) -> Self {
        Self {
            delivered: a.is_delivered(),
            id: a.id,
            review_token: a.review_token,
            source_content_ref: a.source_content_ref,
            filename: a.filename,
            tactic: a.tactic,
            variant: a.variant,
            status: a.status,
            client_approved: a.client_approved,
            approved_at: a.approved_at,
            approved_by_name: a.approved_by_name,
            delivery_batch_ref: a.delivery_batch_ref,
            ready_for_delivery: a.ready_for_delivery,
            delivered_at: a.delivered_at,
            delivered_content_url: a.delivered_content_url,
            partner_download_started_at: a.partner_download_started_at,
            partner_downloaded_at: a.partner_downloaded_at,
            last_delivery_error: a.last_delivery_error,
            notes: a.notes,
        }
    }
}

/// Request for backfilling an asset that predates view tracking
#[derive(Debug, Deserialize, Validate)]
pub struct BackfillRequest {
    #[validate(length(min = 1, message = "review_token cannot be empty"))]
    pub review_token: String,

    #[validate(length(min = 1, message = "source_content_ref cannot be empty"))]
    pub source_content_ref: String,

    #[validate(length(min = 1, max = 255, message = "filename must be 1-255 characters"))]
    pub filename: String,

    pub tactic: Option<String>,
    pub variant: Option<String>,

    /// Initial review status (defaults to `new`)
    pub status: Option<ReviewStatus>,

    pub project_ref: Option<String>,

    #[validate(length(max = 10000, message = "notes too long"))]
    pub notes: Option<String>,
}

/// Request for a reviewer decision
#[derive(Debug, Deserialize, Validate)]
pub struct ReviewStatusRequest {
    pub status: ReviewStatus,

    #[validate(length(max = 10000, message = "notes too long"))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartnerDownloadRequest {
    pub event: PartnerDownloadEvent,
}

/// Get a single asset by id
pub async fn get_asset(
    State(state): State<DeliveryState>,
    Path(id): Path<String>,
) -> Result<Json<AssetResponse>> {
    let asset = state
        .delivery
        .assets
        .get(&id)
        .await?
        .ok_or_else(|| Error::NotFound("Asset not found".to_string()))?;
    Ok(Json(asset.into()))
}

/// Create a record for an existing asset. Returns 200 with the existing
/// record when one already matches the key.
pub async fn backfill_asset(
    State(state): State<DeliveryState>,
    ValidatedJson(req): ValidatedJson<BackfillRequest>,
) -> Result<(StatusCode, Json<AssetResponse>)> {
    let applied = state
        .delivery
        .assets
        .backfill(&BackfillAsset {
            review_token: req.review_token,
            source_content_ref: req.source_content_ref,
            filename: req.filename,
            tactic: req.tactic,
            variant: req.variant,
            status: req.status,
            project_ref: req.project_ref,
            notes: req.notes,
        })
        .await?;

    let status = if applied.changed {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(applied.record.into())))
}

/// Apply a reviewer decision to one asset
pub async fn update_review_status(
    State(state): State<DeliveryState>,
    Path(id): Path<String>,
    ValidatedJson(req): ValidatedJson<ReviewStatusRequest>,
) -> Result<Json<AssetResponse>> {
    let applied = state
        .delivery
        .assets
        .set_review_status(&id, req.status, req.notes)
        .await?;
    Ok(Json(applied.record.into()))
}

/// Attempt delivery of one asset now. Persistent failures are returned as
/// a `failed` outcome with 200; transient ones map to 503.
pub async fn deliver_asset(
    State(state): State<DeliveryState>,
    Path(id): Path<String>,
) -> Result<Json<DeliveryOutcome>> {
    let outcome = state.delivery.executor.deliver(&id).await?;
    Ok(Json(outcome))
}

/// Record a partner download report
pub async fn partner_download(
    State(state): State<DeliveryState>,
    Path(id): Path<String>,
    Json(req): Json<PartnerDownloadRequest>,
) -> Result<Json<AssetResponse>> {
    let applied = state.delivery.tracker.record(&id, req.event).await?;
    Ok(Json(applied.record.into()))
}
