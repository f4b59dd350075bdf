// Proofline API - Local Development Server

use std::net::SocketAddr;
use tokio::signal;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use proofline_app::{body_limit_layer, build_cors_layer, create_app};
use proofline_common::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .pretty()
        .init();

    info!("Starting Proofline API local development server");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!("Configuration loaded successfully");

    let app = create_app().await.map_err(|e| {
        error!("Failed to create application: {}", e);
        e
    })?;

    // Layers applied innermost-first: body limit, then CORS, then tracing outermost.
    let router = app
        .router
        .layer(body_limit_layer())
        .layer(build_cors_layer(
            config.cors_allowed_origins.as_deref().unwrap_or("*"),
        ))
        .layer(TraceLayer::new_for_http());

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let scan = app.delivery.scan.clone();
    let scan_task = tokio::spawn(async move {
        scan.run_until(async move {
            let _ = shutdown_rx.wait_for(|stop| *stop).await;
        })
        .await;
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    info!("Server starting on http://{}", addr);
    info!("Health check available at http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = scan_task.await {
        error!("Scan loop ended abnormally: {}", e);
    }

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}
