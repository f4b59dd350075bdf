//! Proofline Inngest Service
//!
//! Durable job substrate integration:
//! - Inngest HTTP event API client for production publishing
//! - In-process `TaskRunner` with retry-on-error and per-key concurrency caps,
//!   used locally and behind the function invocation endpoint
//! - Mock Inngest service that records events for test assertions

pub mod client;
pub mod mock;
pub mod runner;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use runner::{
    FunctionConfig, FunctionContext, FunctionError, FunctionHandler, FunctionRun, RunStatus,
    TaskRunner,
};

#[derive(Error, Debug)]
pub enum InngestError {
    #[error("Inngest configuration error: {0}")]
    Configuration(String),

    #[error("Inngest request error: {0}")]
    Request(String),

    #[error("Inngest response error: {0}")]
    Response(String),
}

/// An event to send to Inngest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InngestEvent {
    pub name: String,
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<serde_json::Value>,
    /// Idempotency key; Inngest drops repeated events with the same id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<i64>,
}

impl InngestEvent {
    pub fn new(name: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            data,
            user: None,
            id: None,
            ts: None,
        }
    }

    /// Attach an idempotency key
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Inngest service configuration.
#[derive(Clone)]
pub struct InngestConfig {
    /// Inngest provider (inngest, local, mock)
    pub provider: String,
    /// Event key for authenticating with the Inngest event API
    pub event_key: String,
    /// Base URL for the Inngest event API
    pub base_url: String,
    /// Optional signing key for function invocation verification
    pub signing_key: Option<String>,
}

impl std::fmt::Debug for InngestConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InngestConfig")
            .field("provider", &self.provider)
            .field("event_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field(
                "signing_key",
                &self.signing_key.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl InngestConfig {
    /// Create Inngest config from environment variables.
    pub fn from_env() -> Result<Self, InngestError> {
        let provider = std::env::var("INNGEST_PROVIDER").unwrap_or_else(|_| "local".to_string());

        let event_key = std::env::var("INNGEST_EVENT_KEY").unwrap_or_default();

        let base_url = std::env::var("INNGEST_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:8288".to_string());

        let signing_key = std::env::var("INNGEST_SIGNING_KEY").ok();

        if provider == "inngest" && event_key.is_empty() {
            return Err(InngestError::Configuration(
                "INNGEST_EVENT_KEY is required for Inngest provider".to_string(),
            ));
        }

        Ok(Self {
            provider,
            event_key,
            base_url,
            signing_key,
        })
    }
}

/// Inngest service trait: the publishing side of the job substrate.
#[async_trait::async_trait]
pub trait InngestService: Send + Sync {
    /// Send a single event to Inngest.
    async fn send_event(&self, event: InngestEvent) -> Result<(), InngestError>;

    /// Send multiple events to Inngest in a single request.
    async fn send_events(&self, events: Vec<InngestEvent>) -> Result<(), InngestError>;
}

/// Factory for creating InngestService implementations.
pub struct InngestServiceFactory;

impl InngestServiceFactory {
    /// Create an InngestService based on configuration. The `local` provider
    /// delivers events straight to the given in-process runner.
    pub fn create(
        config: InngestConfig,
        runner: TaskRunner,
    ) -> Result<Box<dyn InngestService>, InngestError> {
        match config.provider.as_str() {
            "inngest" => {
                tracing::info!("Creating Inngest client service");
                if config.event_key.is_empty() {
                    return Err(InngestError::Configuration(
                        "INNGEST_EVENT_KEY is required for Inngest provider".to_string(),
                    ));
                }
                Ok(Box::new(client::InngestClient::new(config)?))
            }
            "local" => {
                tracing::info!("Routing events to the in-process task runner");
                Ok(Box::new(runner))
            }
            "mock" => {
                tracing::info!("Creating mock Inngest service");
                Ok(Box::new(mock::MockInngestService::new()))
            }
            provider => Err(InngestError::Configuration(format!(
                "Unknown Inngest provider: {}. Supported providers: inngest, local, mock",
                provider
            ))),
        }
    }
}
