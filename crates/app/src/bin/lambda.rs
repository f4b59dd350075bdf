//! Proofline API - AWS Lambda Runtime
//!
//! No scan loop runs here; the scheduler calls `POST /internal/delivery/scan`.

use lambda_http::{run, Error};
use tower_http::trace::TraceLayer;
use tracing::info;

use proofline_app::{body_limit_layer, build_cors_layer, create_app};

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .without_time()
        .init();

    info!("Initializing Proofline API Lambda");

    let app = create_app()
        .await
        .map_err(|e| Error::from(format!("App initialization error: {}", e)))?;

    let cors_origins = std::env::var("CORS_ALLOWED_ORIGINS")
        .map_err(|_| Error::from("CORS_ALLOWED_ORIGINS environment variable is required"))?;

    let router = app
        .router
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer(&cors_origins))
        .layer(body_limit_layer());

    info!("Proofline API Lambda ready to serve requests");

    run(router).await
}
