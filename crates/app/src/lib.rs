//! Proofline application composition root
//!
//! Wires the record store, content service and job substrate into the
//! delivery domain and mounts its router.

use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use axum::Router;
use proofline_content::{ContentConfig, ContentService, ContentServiceFactory};
use proofline_delivery::{Delivery, DeliveryConfig, DeliveryState};
use proofline_inngest::{InngestConfig, InngestService, InngestServiceFactory, TaskRunner};
use proofline_records::{RecordStore, RecordStoreConfig, RecordStoreFactory};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;

/// Request bodies above this size are rejected with 413
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Adapters the application is composed from
pub struct AppParts {
    pub store: Arc<dyn RecordStore>,
    pub content: Arc<dyn ContentService>,
    pub events: Arc<dyn InngestService>,
    pub runner: TaskRunner,
    pub delivery: DeliveryConfig,
}

/// A composed application: its router plus the delivery components the
/// binaries drive directly (the scan loop)
pub struct App {
    pub router: Router,
    pub delivery: Delivery,
}

/// Build the application from environment configuration
pub async fn create_app() -> Result<App, anyhow::Error> {
    let store = RecordStoreFactory::create(RecordStoreConfig::from_env()?).await?;
    let content: Arc<dyn ContentService> =
        Arc::from(ContentServiceFactory::create(ContentConfig::from_env()?)?);
    let runner = TaskRunner::new();
    let events: Arc<dyn InngestService> = Arc::from(InngestServiceFactory::create(
        InngestConfig::from_env()?,
        runner.clone(),
    )?);

    Ok(compose(AppParts {
        store,
        content,
        events,
        runner,
        delivery: DeliveryConfig::from_env(),
    }))
}

/// Compose the router from explicit adapters
pub fn compose(parts: AppParts) -> App {
    let delivery = Delivery::new(parts.store, parts.content, &parts.delivery);
    delivery.register_functions(&parts.runner);

    let state = DeliveryState {
        delivery: delivery.clone(),
        events: parts.events,
        runner: parts.runner,
    };

    let router = Router::new()
        .route("/health", axum::routing::get(health_check))
        .route(
            "/",
            axum::routing::get(|| async { "Proofline API v0.0.1-SNAPSHOT" }),
        )
        .merge(proofline_delivery::routes().with_state(state));

    App { router, delivery }
}

/// CORS for the comma-separated origin list; `*` or blank is permissive
pub fn build_cors_layer(origins: &str) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty() && *o != "*")
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if origins.is_empty() {
        return CorsLayer::permissive();
    }

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
}

pub fn body_limit_layer() -> RequestBodyLimitLayer {
    RequestBodyLimitLayer::new(MAX_BODY_BYTES)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
