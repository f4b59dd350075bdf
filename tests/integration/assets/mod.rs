//! Asset endpoint integration tests: backfill, manual delivery, partner
//! download tracking

use axum::http::{Method, StatusCode};
use serde_json::json;

use crate::common::{DeliveryTestApp, BATCH_A, PARTNER_ROOT_A, REVIEW_TOKEN};

#[tokio::test]
async fn test_backfill_is_idempotent() {
    let app = DeliveryTestApp::new();
    let body = json!({
        "review_token": REVIEW_TOKEN,
        "source_content_ref": "src-legacy",
        "filename": "legacy.mov",
        "status": "approved",
    });

    let (status, first) = app
        .send(Method::POST, "/v1/assets/backfill", Some(body.clone()))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["status"], "approved");

    let (status, second) = app
        .send(Method::POST, "/v1/assets/backfill", Some(body))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["id"], second["id"]);
}

#[tokio::test]
async fn test_get_unknown_asset_is_not_found() {
    let app = DeliveryTestApp::new();
    let (status, body) = app
        .send(Method::GET, "/v1/assets/recDOESNOTEXIST01", None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_manual_delivery_then_idempotent() {
    let app = DeliveryTestApp::new();
    app.seed_batch(BATCH_A, "Spring Launch", PARTNER_ROOT_A, true);
    let id = app.view("src-1").await;
    app.approve(&[id.clone()], "Spring Launch").await;

    let (status, body) = app
        .send(Method::POST, &format!("/v1/assets/{id}/deliver"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "delivered");
    assert_eq!(body["batch_id"], BATCH_A);
    assert_eq!(body["items_copied"], 2);

    let (status, body) = app
        .send(Method::POST, &format!("/v1/assets/{id}/deliver"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "idempotent");
    assert_eq!(app.content.copy_call_count(), 1);

    let (_, asset) = app.send(Method::GET, &format!("/v1/assets/{id}"), None).await;
    assert_eq!(asset["delivered"], true);
    assert!(asset["delivered_content_url"].is_string());
}

#[tokio::test]
async fn test_manual_delivery_reports_failure_reason() {
    let app = DeliveryTestApp::new();
    let id = app.view("src-1").await;
    app.approve(&[id.clone()], "No Such Batch").await;

    let (status, body) = app
        .send(Method::POST, &format!("/v1/assets/{id}/deliver"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "failed");
    assert_eq!(body["reason"]["code"], "batch_not_found");

    let (_, asset) = app.send(Method::GET, &format!("/v1/assets/{id}"), None).await;
    assert_eq!(asset["delivered"], false);
    assert!(asset["last_delivery_error"]
        .as_str()
        .unwrap()
        .starts_with("batch_not_found"));
}

#[tokio::test]
async fn test_manual_delivery_transient_error_is_unavailable() {
    let app = DeliveryTestApp::new();
    app.seed_batch(BATCH_A, "Spring Launch", PARTNER_ROOT_A, true);
    let id = app.view("src-1").await;
    app.approve(&[id.clone()], "Spring Launch").await;
    app.content.fail_next_calls(1);

    let (status, body) = app
        .send(Method::POST, &format!("/v1/assets/{id}/deliver"), None)
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE, "{body}");
}

#[tokio::test]
async fn test_partner_download_first_report_wins() {
    let app = DeliveryTestApp::new();
    app.seed_batch(BATCH_A, "Spring Launch", PARTNER_ROOT_A, true);
    let id = app.view("src-1").await;
    app.approve(&[id.clone()], "Spring Launch").await;
    app.send(Method::POST, &format!("/v1/assets/{id}/deliver"), None)
        .await;

    let uri = format!("/v1/assets/{id}/partner-download");
    let (status, started) = app
        .send(Method::POST, &uri, Some(json!({"event": "started"})))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (_, again) = app
        .send(Method::POST, &uri, Some(json!({"event": "started"})))
        .await;
    assert_eq!(
        started["partner_download_started_at"],
        again["partner_download_started_at"]
    );

    let (_, completed) = app
        .send(Method::POST, &uri, Some(json!({"event": "completed"})))
        .await;
    assert!(completed["partner_downloaded_at"].is_string());
}

#[tokio::test]
async fn test_partner_download_rejects_unknown_event() {
    let app = DeliveryTestApp::new();
    let id = app.view("src-1").await;
    let (status, _) = app
        .send(
            Method::POST,
            &format!("/v1/assets/{id}/partner-download"),
            Some(json!({"event": "paused"})),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}
