//! Job substrate entry points: function invocation and the scan tick
//!
//! Both are internal endpoints. The hosted substrate calls the function
//! endpoint once per attempt and owns the retry schedule; the scheduler calls
//! the scan endpoint where no long-lived process runs the scan loop.

use axum::{
    extract::{Path, State},
    http::{HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use proofline_common::Result;
use proofline_inngest::{FunctionError, InngestEvent};
use serde::Deserialize;
use serde_json::json;

use crate::api::middleware::DeliveryState;
use crate::service::ScanReport;

/// Tells the substrate not to retry a failed attempt
pub const NO_RETRY_HEADER: &str = "x-inngest-no-retry";

/// Invocation body sent by the substrate
#[derive(Debug, Deserialize)]
pub struct InvokeRequest {
    pub event: InngestEvent,
    #[serde(default)]
    pub ctx: InvokeContext,
}

#[derive(Debug, Default, Deserialize)]
pub struct InvokeContext {
    /// Zero-based attempt number
    #[serde(default)]
    pub attempt: u32,
}

/// Run one attempt of a registered function
pub async fn invoke_function(
    State(state): State<DeliveryState>,
    Path(function_id): Path<String>,
    Json(req): Json<InvokeRequest>,
) -> Response {
    let attempt = req.ctx.attempt + 1;
    match state
        .runner
        .invoke_once(&function_id, &req.event, attempt)
        .await
    {
        Ok(value) => (StatusCode::OK, Json(value)).into_response(),
        Err(FunctionError::Retriable(message)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": {"code": "RETRIABLE", "message": message}})),
        )
            .into_response(),
        Err(FunctionError::NonRetriable(message)) => (
            StatusCode::BAD_REQUEST,
            [(
                HeaderName::from_static(NO_RETRY_HEADER),
                HeaderValue::from_static("true"),
            )],
            Json(json!({"error": {"code": "NON_RETRIABLE", "message": message}})),
        )
            .into_response(),
    }
}

/// Run one scheduled scan tick
pub async fn run_scan(State(state): State<DeliveryState>) -> Result<Json<ScanReport>> {
    let report = state.delivery.scan.tick().await?;
    Ok(Json(report))
}
