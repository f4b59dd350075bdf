//! Route definitions for Delivery domain API

use axum::{
    routing::{get, patch, post},
    Router,
};

use super::handlers::{assets, dispatch, reviews};
use super::middleware::DeliveryState;

/// Create all Delivery domain API routes
pub fn routes() -> Router<DeliveryState> {
    Router::new()
        .route("/v1/reviews/{token}/assets", get(reviews::list_review_assets))
        .route("/v1/reviews/{token}/assets/seen", post(reviews::mark_seen))
        .route(
            "/v1/reviews/{token}/client-approval",
            post(reviews::client_approval),
        )
        .route("/v1/assets/backfill", post(assets::backfill_asset))
        .route("/v1/assets/{id}", get(assets::get_asset))
        .route("/v1/assets/{id}/review", patch(assets::update_review_status))
        .route("/v1/assets/{id}/deliver", post(assets::deliver_asset))
        .route(
            "/v1/assets/{id}/partner-download",
            post(assets::partner_download),
        )
        .route("/internal/delivery/scan", post(dispatch::run_scan))
        .route(
            "/api/inngest/functions/{function_id}",
            post(dispatch::invoke_function),
        )
}
