//! End-to-end delivery scenarios across both trigger paths

use std::time::Duration;

use axum::http::{Method, StatusCode};
use serde_json::{json, Value};
use tokio::task::JoinSet;
use tower::ServiceExt;

use proofline_delivery::{DeliveryConfig, ASSET_STATUSES_TABLE, ASSET_STATUS_EVENTS_TABLE};
use proofline_inngest::{FunctionError, RunStatus};

use crate::common::{
    parse_body, request, DeliveryTestApp, BATCH_A, BATCH_B, PARTNER_ROOT_A, PARTNER_ROOT_B,
    PROJECT, REVIEW_TOKEN,
};

fn delivered_audits(app: &DeliveryTestApp) -> usize {
    app.records
        .records(ASSET_STATUS_EVENTS_TABLE)
        .iter()
        .filter(|e| e["action"] == "delivered")
        .count()
}

/// Name of an asset's folder under the partner root
fn folder(id: &str, filename: &str) -> String {
    format!("{filename} ({id})")
}

async fn backfill_in_project(app: &DeliveryTestApp, source: &str, filename: &str) -> String {
    app.seed_source(source);
    let (status, body) = app
        .send(
            Method::POST,
            "/v1/assets/backfill",
            Some(json!({
                "review_token": REVIEW_TOKEN,
                "source_content_ref": source,
                "filename": filename,
                "status": "seen",
                "project_ref": PROJECT,
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_event_path_delivers_approved_assets() {
    let app = DeliveryTestApp::new();
    app.seed_batch(BATCH_A, "Spring Launch", PARTNER_ROOT_A, true);
    let ids = vec![app.view("src-1").await, app.view("src-2").await];
    app.approve(&ids, "Spring Launch").await;

    let runs = app.drain_events().await;
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|r| r.is_completed()));
    assert_eq!(app.content.copy_call_count(), 2);
    assert!(app.content.child_folder(PARTNER_ROOT_A, &folder(&ids[0], "src-1.mov")).is_some());
    assert!(app.content.child_folder(PARTNER_ROOT_A, &folder(&ids[1], "src-2.mov")).is_some());

    // Redelivered events are absorbed
    let runs = app.drain_events().await;
    assert!(runs
        .iter()
        .all(|r| matches!(&r.status, RunStatus::Completed(v) if v["outcome"] == "idempotent")));
    assert_eq!(app.content.copy_call_count(), 2);
}

#[tokio::test]
async fn test_renamed_batch_heals_to_projects_only_active_batch() {
    let app = DeliveryTestApp::new();
    // "Batch 1" was renamed and retired; the project has one active batch
    app.seed_batch(BATCH_A, "Batch 1 (Q3)", PARTNER_ROOT_A, false);
    app.seed_batch(BATCH_B, "Batch 2", PARTNER_ROOT_B, true);
    let id = backfill_in_project(&app, "src-a", "cut-a.mov").await;
    app.approve(&[id.clone()], "Batch 1").await;

    let (status, body) = app
        .send(Method::POST, &format!("/v1/assets/{id}/deliver"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "delivered", "{body}");
    assert_eq!(body["batch_id"], BATCH_B);
    assert!(app.content.child_folder(PARTNER_ROOT_B, &folder(&id, "cut-a.mov")).is_some());
    assert!(app.content.child_folder(PARTNER_ROOT_A, &folder(&id, "cut-a.mov")).is_none());

    let stored = app.records.get(ASSET_STATUSES_TABLE, &id).unwrap();
    assert_eq!(stored["delivery_batch_id"], BATCH_B);
}

#[tokio::test]
async fn test_already_delivered_asset_is_idempotent_on_scan_path() {
    let app = DeliveryTestApp::new();
    app.seed_batch(BATCH_A, "Spring Launch", PARTNER_ROOT_A, true);
    let id = app.view("src-1").await;
    app.approve(&[id.clone()], "Spring Launch").await;

    // Delivered by an earlier process that only set the timestamp
    let mut stored = app.records.get(ASSET_STATUSES_TABLE, &id).unwrap();
    stored.insert("delivered_at".to_string(), json!("2026-03-01T12:00:00Z"));
    app.records.insert(ASSET_STATUSES_TABLE, stored);

    let report = app.delivery.scan.tick().await.unwrap();
    assert_eq!(report.examined, 0);
    let outcome = app.delivery.executor.deliver(&id).await.unwrap();
    assert!(outcome.is_idempotent());
    assert_eq!(app.content.copy_call_count(), 0);
}

#[tokio::test]
async fn test_event_and_scan_race_delivers_each_asset_once() {
    let app = DeliveryTestApp::new();
    app.seed_batch(BATCH_A, "Spring Launch", PARTNER_ROOT_A, true);
    let mut ids = Vec::new();
    for i in 0..5 {
        ids.push(app.view(&format!("src-{i}")).await);
    }
    app.approve(&ids, "Spring Launch").await;
    app.content.set_latency(Duration::from_millis(10));

    let (runs, report) = tokio::join!(app.drain_events(), app.delivery.scan.tick());
    let report = report.unwrap();
    let event_deliveries = runs
        .iter()
        .filter(|r| matches!(&r.status, RunStatus::Completed(v) if v["outcome"] == "delivered"))
        .count();

    assert_eq!(event_deliveries + report.delivered, 5);
    assert_eq!(app.content.copy_call_count(), 5);
    assert_eq!(delivered_audits(&app), 5);
}

#[tokio::test]
async fn test_concurrent_manual_deliveries_copy_once() {
    let app = DeliveryTestApp::new();
    app.seed_batch(BATCH_A, "Spring Launch", PARTNER_ROOT_A, true);
    let id = app.view("src-1").await;
    app.approve(&[id.clone()], "Spring Launch").await;
    app.content.set_latency(Duration::from_millis(5));

    let mut set = JoinSet::new();
    for _ in 0..10 {
        let router = app.router.clone();
        let uri = format!("/v1/assets/{id}/deliver");
        set.spawn(async move {
            let response = router
                .oneshot(request(Method::POST, &uri, None))
                .await
                .unwrap();
            parse_body(response).await
        });
    }

    let mut outcomes: Vec<Value> = Vec::new();
    while let Some(joined) = set.join_next().await {
        outcomes.push(joined.unwrap());
    }
    let delivered = outcomes.iter().filter(|o| o["outcome"] == "delivered").count();
    let idempotent = outcomes.iter().filter(|o| o["outcome"] == "idempotent").count();
    assert_eq!((delivered, idempotent), (1, 9));
    assert_eq!(app.content.copy_call_count(), 1);
    assert_eq!(delivered_audits(&app), 1);
}

#[tokio::test]
async fn test_partial_copy_is_retried_by_scan() {
    let app = DeliveryTestApp::new();
    app.seed_batch(BATCH_A, "Spring Launch", PARTNER_ROOT_A, true);
    let id = app.view("src-1").await;
    app.approve(&[id.clone()], "Spring Launch").await;
    app.content.fail_next_copy_items(1);

    let outcome = app.delivery.executor.deliver(&id).await.unwrap();
    assert_eq!(
        outcome.failure_reason().map(|r| r.code()),
        Some("partial_copy_failure")
    );

    let report = app.delivery.scan.tick().await.unwrap();
    assert_eq!(report.delivered, 1);
    let delivered = app
        .content
        .child_folder(PARTNER_ROOT_A, &folder(&id, "src-1.mov"))
        .unwrap();
    assert_eq!(app.content.items_in(&delivered).len(), 2);
}

#[tokio::test]
async fn test_exhausted_event_retries_fall_back_to_scan() {
    let app = DeliveryTestApp::new();
    app.seed_batch(BATCH_A, "Spring Launch", PARTNER_ROOT_A, true);
    let id = app.view("src-1").await;
    app.approve(&[id.clone()], "Spring Launch").await;
    // More failures than the default retry budget of 3 retries
    app.content.fail_next_calls(4);

    let runs = app.drain_events().await;
    assert_eq!(runs[0].attempts, 4);
    assert!(matches!(
        runs[0].status,
        RunStatus::Failed(FunctionError::Retriable(_))
    ));

    let report = app.delivery.scan.tick().await.unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(app.content.copy_call_count(), 1);
}

#[tokio::test]
async fn test_production_bundle_attached_after_delivery() {
    let app = DeliveryTestApp::with_config(DeliveryConfig {
        production_bundle_ref: Some("bundle".to_string()),
        ..DeliveryConfig::default()
    });
    app.content
        .seed_folder("bundle", &[("grade.cube", "lut"), ("fonts.zip", "f")]);
    app.seed_batch(BATCH_A, "Spring Launch", PARTNER_ROOT_A, true);
    let id = app.view("src-1").await;
    app.approve(&[id.clone()], "Spring Launch").await;

    let (_, body) = app
        .send(Method::POST, &format!("/v1/assets/{id}/deliver"), None)
        .await;
    assert_eq!(body["attachment"]["status"], "attached");
    assert_eq!(body["attachment"]["items_copied"], 2);

    let delivered = app
        .content
        .child_folder(PARTNER_ROOT_A, &folder(&id, "src-1.mov"))
        .unwrap();
    let bundle = app
        .content
        .child_folder(&delivered, "Production Assets")
        .unwrap();
    assert_eq!(app.content.items_in(&bundle).len(), 2);
}

#[tokio::test]
async fn test_missing_bundle_does_not_block_delivery() {
    let app = DeliveryTestApp::with_config(DeliveryConfig {
        production_bundle_ref: Some("missing-bundle".to_string()),
        ..DeliveryConfig::default()
    });
    app.seed_batch(BATCH_A, "Spring Launch", PARTNER_ROOT_A, true);
    let id = app.view("src-1").await;
    app.approve(&[id.clone()], "Spring Launch").await;

    let (_, body) = app
        .send(Method::POST, &format!("/v1/assets/{id}/deliver"), None)
        .await;
    assert_eq!(body["outcome"], "delivered");
    assert_eq!(body["attachment"]["status"], "failed");
    assert_eq!(app.delivery.executor.attachment_failures(), 1);
}
