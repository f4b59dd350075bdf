//! Review page integration tests: view tracking and client approval

use axum::http::{Method, StatusCode};
use serde_json::json;

use proofline_delivery::service::ASSET_APPROVED_EVENT;
use proofline_delivery::{ASSET_STATUSES_TABLE, ASSET_STATUS_EVENTS_TABLE};
use proofline_records::mock::MockOp;

use crate::common::{DeliveryTestApp, BATCH_A, PARTNER_ROOT_A, REVIEW_TOKEN};

#[tokio::test]
async fn test_first_view_creates_asset_and_repeat_view_keeps_it() {
    let app = DeliveryTestApp::new();
    let first = app.view("src-1").await;
    let second = app.view("src-1").await;
    assert_eq!(first, second);

    let (status, body) = app
        .send(Method::GET, &format!("/v1/reviews/{REVIEW_TOKEN}/assets"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let assets = body.as_array().unwrap();
    assert_eq!(assets.len(), 1);
    assert_eq!(assets[0]["status"], "seen");
    assert_eq!(assets[0]["delivered"], false);
}

#[tokio::test]
async fn test_view_rejects_blank_filename() {
    let app = DeliveryTestApp::new();
    let (status, body) = app
        .send(
            Method::POST,
            &format!("/v1/reviews/{REVIEW_TOKEN}/assets/seen"),
            Some(json!({"source_content_ref": "src-1", "filename": ""})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_client_approval_publishes_one_event_per_changed_asset() {
    let app = DeliveryTestApp::new();
    app.seed_batch(BATCH_A, "Spring Launch", PARTNER_ROOT_A, true);
    let ids = vec![app.view("src-1").await, app.view("src-2").await];

    let (status, body) = app.approve(&ids, "Spring Launch").await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["requested"], 2);
    assert_eq!(body["succeeded"], 2);
    assert_eq!(body["events_published"], 2);
    assert_eq!(app.events.events_named(ASSET_APPROVED_EVENT).len(), 2);

    // Re-approving the same way changes nothing and publishes nothing
    let (status, body) = app.approve(&ids, "Spring Launch").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["changed"], json!([]));
    assert_eq!(body["events_published"], 0);
    assert_eq!(app.events.events_named(ASSET_APPROVED_EVENT).len(), 2);
}

#[tokio::test]
async fn test_retried_client_approval_keeps_first_sign_off() {
    let app = DeliveryTestApp::new();
    app.seed_batch(BATCH_A, "Spring Launch", PARTNER_ROOT_A, true);
    let id = app.view("src-1").await;

    app.approve(&[id.clone()], "Spring Launch").await;
    let first = app.records.get(ASSET_STATUSES_TABLE, &id).unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let (status, body) = app.approve(&[id.clone()], "Spring Launch").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["changed"], json!([]));
    assert_eq!(body["events_published"], 0);

    let second = app.records.get(ASSET_STATUSES_TABLE, &id).unwrap();
    assert_eq!(second["approved_at"], first["approved_at"]);
    let approvals = app
        .records
        .records(ASSET_STATUS_EVENTS_TABLE)
        .iter()
        .filter(|e| e["action"] == "client_approved")
        .count();
    assert_eq!(approvals, 1);
    assert_eq!(app.events.recorded_events().len(), 1);
}

#[tokio::test]
async fn test_client_approval_rejects_assets_from_other_pages() {
    let app = DeliveryTestApp::new();
    let id = app.view("src-1").await;

    let (status, body) = app
        .approve(&[id, "recNOTONTHISPAGE1".to_string()], "Spring Launch")
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("recNOTONTHISPAGE1"));
    assert_eq!(app.records.call_count(MockOp::UpdateMany), 0);
}

#[tokio::test]
async fn test_client_approval_survives_publish_failure() {
    let app = DeliveryTestApp::new();
    app.seed_batch(BATCH_A, "Spring Launch", PARTNER_ROOT_A, true);
    let id = app.view("src-1").await;
    app.events.fail_next_sends(1);

    let (status, body) = app.approve(&[id.clone()], "Spring Launch").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["events_published"], 0);

    // The scan still delivers the approved asset
    let report = app.delivery.scan.tick().await.unwrap();
    assert_eq!(report.delivered, 1);
}

#[tokio::test]
async fn test_client_approval_reports_resumable_chunk_failure() {
    let app = DeliveryTestApp::new();
    let mut ids = Vec::new();
    for i in 0..15 {
        ids.push(app.view(&format!("src-{i}")).await);
    }
    // Second chunk of ten fails
    app.records.fail_after(MockOp::UpdateMany, 1, 1);

    let (status, body) = app.approve(&ids, "Spring Launch").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["succeeded"], 10);
    assert_eq!(body["failed_at_index"], 10);
    assert_eq!(body["retriable"], true);
    assert_eq!(body["events_published"], 10);

    let (_, body) = app.approve(&ids[10..], "Spring Launch").await;
    assert_eq!(body["succeeded"], 5);
    assert!(body["failed_at_index"].is_null());
}

#[tokio::test]
async fn test_request_changes_withdraws_approved_asset() {
    let app = DeliveryTestApp::new();
    app.seed_batch(BATCH_A, "Spring Launch", PARTNER_ROOT_A, true);
    let id = app.view("src-1").await;
    app.approve(&[id.clone()], "Spring Launch").await;

    let (status, body) = app
        .send(
            Method::PATCH,
            &format!("/v1/assets/{id}/review"),
            Some(json!({"status": "needs_changes", "notes": "Logo too small"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "needs_changes");
    assert_eq!(body["ready_for_delivery"], false);
    assert_eq!(body["notes"], "Logo too small");

    let report = app.delivery.scan.tick().await.unwrap();
    assert_eq!(report.examined, 0);
}

#[tokio::test]
async fn test_review_status_cannot_skip_viewing() {
    let app = DeliveryTestApp::new();
    let (status, body) = app
        .send(
            Method::POST,
            "/v1/assets/backfill",
            Some(json!({
                "review_token": REVIEW_TOKEN,
                "source_content_ref": "src-1",
                "filename": "cut.mov",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["id"].as_str().unwrap().to_string();

    let (status, body) = app
        .send(
            Method::PATCH,
            &format!("/v1/assets/{id}/review"),
            Some(json!({"status": "approved"})),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");
}
