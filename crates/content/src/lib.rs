//! Proofline Content Service
//!
//! Port to the storage service that holds creative assets and partner
//! delivery folders:
//! - HTTP content bridge client for production
//! - In-memory mock with per-call failure injection for tests
//! - Configurable provider, base URL, API key and timeout
//!
//! Copies are overwrite-safe: copying the same tree twice into the same
//! destination leaves one copy of every item.

pub mod client;
pub mod mock;

use proofline_common::{env_or, env_parse_or};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ContentError {
    #[error("Content configuration error: {0}")]
    Configuration(String),

    #[error("Content request error: {0}")]
    Request(String),

    #[error("Content response error: {0}")]
    Response(String),

    #[error("Content not found: {0}")]
    NotFound(String),
}

impl ContentError {
    /// Transport and availability failures worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Request(_))
    }
}

/// A folder in the content store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderRef {
    pub id: String,
    pub url: String,
}

/// Options for `copy_folder_tree`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyOptions {
    /// Replace items that already exist at the destination
    pub overwrite: bool,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self { overwrite: true }
    }
}

/// One item that could not be copied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyFailure {
    pub path: String,
    pub reason: String,
}

/// Outcome of a tree copy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyReport {
    pub items_copied: usize,
    #[serde(default)]
    pub items_failed: Vec<CopyFailure>,
}

impl CopyReport {
    /// Every item made it to the destination
    pub fn is_complete(&self) -> bool {
        self.items_failed.is_empty()
    }

    pub fn total_items(&self) -> usize {
        self.items_copied + self.items_failed.len()
    }
}

/// Content service configuration
#[derive(Clone)]
pub struct ContentConfig {
    /// Content provider (http, mock)
    pub provider: String,
    /// Base URL of the content bridge API
    pub base_url: String,
    /// Bearer token for the content bridge API
    pub api_key: Option<String>,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl std::fmt::Debug for ContentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentConfig")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl ContentConfig {
    /// Create content config from environment variables
    pub fn from_env() -> Result<Self, ContentError> {
        let provider = env_or("CONTENT_PROVIDER", "mock");
        let base_url = env_or("CONTENT_BASE_URL", "http://localhost:8300");
        let api_key = std::env::var("CONTENT_API_KEY").ok();
        let timeout_secs = env_parse_or("CONTENT_TIMEOUT_SECS", 120u64);

        if provider == "http" && api_key.is_none() {
            return Err(ContentError::Configuration(
                "CONTENT_API_KEY is required for the http provider".to_string(),
            ));
        }

        Ok(Self {
            provider,
            base_url,
            api_key,
            timeout_secs,
        })
    }
}

/// Content service trait for different storage backends
#[async_trait::async_trait]
pub trait ContentService: Send + Sync {
    /// Copy every item under `source` into `destination`.
    /// Item-level failures are reported, not raised.
    async fn copy_folder_tree(
        &self,
        source: &str,
        destination: &str,
        options: CopyOptions,
    ) -> Result<CopyReport, ContentError>;

    /// Return the child folder of `parent` named `name`, creating it if needed
    async fn ensure_child_folder(&self, parent: &str, name: &str)
        -> Result<FolderRef, ContentError>;
}

/// Factory for creating ContentService implementations
pub struct ContentServiceFactory;

impl ContentServiceFactory {
    /// Create a ContentService based on configuration
    pub fn create(config: ContentConfig) -> Result<Box<dyn ContentService>, ContentError> {
        match config.provider.as_str() {
            "http" => {
                tracing::info!(base_url = %config.base_url, "Creating HTTP content service");
                Ok(Box::new(client::ContentClient::new(config)?))
            }
            "mock" => {
                tracing::info!("Creating mock content service");
                Ok(Box::new(mock::MockContentService::new()))
            }
            provider => Err(ContentError::Configuration(format!(
                "Unknown content provider: {}. Supported providers: http, mock",
                provider
            ))),
        }
    }
}
