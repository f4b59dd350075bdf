//! Common test utilities and fixtures for integration tests
//!
//! Every test app runs against the in-memory record store, content service
//! and job substrate, so tests can seed data, inject faults and inspect
//! what was written.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use proofline_app::{compose, App, AppParts};
use proofline_content::mock::MockContentService;
use proofline_delivery::{Delivery, DeliveryConfig, DELIVERY_BATCHES_TABLE};
use proofline_inngest::mock::MockInngestService;
use proofline_inngest::TaskRunner;
use proofline_records::mock::MockRecordStore;
use proofline_records::Fields;

pub const REVIEW_TOKEN: &str = "tok-spring";
pub const PROJECT: &str = "proj-1";
pub const BATCH_A: &str = "recBATCHAAAAAAAAA";
pub const BATCH_B: &str = "recBATCHBBBBBBBBB";
pub const PARTNER_ROOT_A: &str = "partner-a";
pub const PARTNER_ROOT_B: &str = "partner-b";

/// Test application wired over mocks
pub struct DeliveryTestApp {
    pub router: Router,
    pub delivery: Delivery,
    pub records: MockRecordStore,
    pub content: MockContentService,
    pub events: MockInngestService,
    pub runner: TaskRunner,
}

impl DeliveryTestApp {
    pub fn new() -> Self {
        Self::with_config(DeliveryConfig {
            retry_backoff_ms: 1,
            ..DeliveryConfig::default()
        })
    }

    pub fn with_config(config: DeliveryConfig) -> Self {
        let records = MockRecordStore::with_batch_limit(10);
        let content = MockContentService::new();
        let events = MockInngestService::new();
        let runner = TaskRunner::new();

        let App { router, delivery } = compose(AppParts {
            store: Arc::new(records.clone()),
            content: Arc::new(content.clone()),
            events: Arc::new(events.clone()),
            runner: runner.clone(),
            delivery: config,
        });

        Self {
            router,
            delivery,
            records,
            content,
            events,
            runner,
        }
    }

    /// Seed a delivery batch and its partner root folder
    pub fn seed_batch(&self, id: &str, display_name: &str, destination: &str, active: bool) {
        self.content.seed_folder(destination, &[]);
        self.records.insert(
            DELIVERY_BATCHES_TABLE,
            fields(json!({
                "id": id,
                "display_name": display_name,
                "project_ref": PROJECT,
                "destination_location_ref": destination,
                "status_tag": if active { "active" } else { "inactive" },
            })),
        );
    }

    /// Seed a source folder with a few media items
    pub fn seed_source(&self, source: &str) {
        self.content
            .seed_folder(source, &[("master.mov", "m"), ("thumb.png", "t")]);
    }

    pub async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(request(method, uri, body))
            .await
            .unwrap();
        let status = response.status();
        (status, parse_body(response).await)
    }

    /// Record a view and return the asset id
    pub async fn view(&self, source: &str) -> String {
        self.seed_source(source);
        let (status, body) = self
            .send(
                Method::POST,
                &format!("/v1/reviews/{REVIEW_TOKEN}/assets/seen"),
                Some(json!({
                    "source_content_ref": source,
                    "filename": format!("{source}.mov"),
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "view failed: {body}");
        body["id"].as_str().unwrap().to_string()
    }

    pub async fn approve(&self, ids: &[String], batch_ref: &str) -> (StatusCode, Value) {
        self.send(
            Method::POST,
            &format!("/v1/reviews/{REVIEW_TOKEN}/client-approval"),
            Some(json!({
                "asset_ids": ids,
                "approver_name": "Dana Client",
                "approver_email": "dana@client.example",
                "delivery_batch_ref": batch_ref,
            })),
        )
        .await
    }

    /// Run every approval event published so far through the task runner,
    /// as the substrate would
    pub async fn drain_events(&self) -> Vec<proofline_inngest::FunctionRun> {
        let mut runs = Vec::new();
        for event in self.events.recorded_events() {
            runs.extend(self.runner.run_event(event).await);
        }
        runs
    }
}

pub fn fields(value: Value) -> Fields {
    value.as_object().cloned().unwrap()
}

pub fn request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder().method(method).uri(uri);
    match body {
        Some(b) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&b).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// Parse response body as JSON, or `Null` when empty or not JSON
pub async fn parse_body(response: axum::http::Response<Body>) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap_or(Value::Null)
}
