//! Job substrate endpoint integration tests

use axum::http::{Method, StatusCode};
use serde_json::json;

use proofline_delivery::service::{ASSET_APPROVED_EVENT, DELIVER_FUNCTION_ID};

use crate::common::{request, DeliveryTestApp, BATCH_A, PARTNER_ROOT_A};
use tower::ServiceExt;

fn invoke_body(asset_id: &str, attempt: u32) -> serde_json::Value {
    json!({
        "event": {"name": ASSET_APPROVED_EVENT, "data": {"asset_id": asset_id}},
        "ctx": {"attempt": attempt},
    })
}

#[tokio::test]
async fn test_invoke_delivers_asset() {
    let app = DeliveryTestApp::new();
    app.seed_batch(BATCH_A, "Spring Launch", PARTNER_ROOT_A, true);
    let id = app.view("src-1").await;
    app.approve(&[id.clone()], "Spring Launch").await;

    let (status, body) = app
        .send(
            Method::POST,
            &format!("/api/inngest/functions/{DELIVER_FUNCTION_ID}"),
            Some(invoke_body(&id, 0)),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["outcome"], "delivered");
}

#[tokio::test]
async fn test_invoke_transient_failure_asks_for_retry() {
    let app = DeliveryTestApp::new();
    app.seed_batch(BATCH_A, "Spring Launch", PARTNER_ROOT_A, true);
    let id = app.view("src-1").await;
    app.approve(&[id.clone()], "Spring Launch").await;
    app.content.fail_next_calls(1);

    let uri = format!("/api/inngest/functions/{DELIVER_FUNCTION_ID}");
    let (status, body) = app.send(Method::POST, &uri, Some(invoke_body(&id, 0))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "RETRIABLE");

    // The substrate retries; the next attempt succeeds
    let (status, body) = app.send(Method::POST, &uri, Some(invoke_body(&id, 1))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "delivered");
}

#[tokio::test]
async fn test_invoke_unknown_function_is_not_retried() {
    let app = DeliveryTestApp::new();
    let response = app
        .router
        .clone()
        .oneshot(request(
            Method::POST,
            "/api/inngest/functions/no-such-function",
            Some(invoke_body("recAAAAAAAAAAAAAA", 0)),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.headers().get("x-inngest-no-retry").unwrap(),
        "true"
    );
}

#[tokio::test]
async fn test_invoke_persistent_failure_completes_with_failed_outcome() {
    let app = DeliveryTestApp::new();
    let (status, body) = app
        .send(
            Method::POST,
            &format!("/api/inngest/functions/{DELIVER_FUNCTION_ID}"),
            Some(invoke_body("recDOESNOTEXIST01", 0)),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "failed");
    assert_eq!(body["reason"]["code"], "not_found");
}

#[tokio::test]
async fn test_scan_endpoint_runs_one_tick() {
    let app = DeliveryTestApp::new();
    app.seed_batch(BATCH_A, "Spring Launch", PARTNER_ROOT_A, true);
    let ids = vec![app.view("src-1").await, app.view("src-2").await];
    app.approve(&ids, "Spring Launch").await;

    let (status, body) = app
        .send(Method::POST, "/internal/delivery/scan", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["examined"], 2);
    assert_eq!(body["delivered"], 2);

    let (_, body) = app
        .send(Method::POST, "/internal/delivery/scan", None)
        .await;
    assert_eq!(body["examined"], 0);
}
