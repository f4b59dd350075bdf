//! Content Bridge HTTP Client
//!
//! Talks to the content bridge that fronts partner storage:
//! - `POST {base_url}/v1/folders/{parent}/children` with `{"name"}`
//! - `POST {base_url}/v1/copy` with `{"source", "destination", "overwrite"}`

use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;

use crate::{ContentConfig, ContentError, ContentService, CopyOptions, CopyReport, FolderRef};

/// Real HTTP client for the content bridge API.
pub struct ContentClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Serialize)]
struct ChildFolderBody<'a> {
    name: &'a str,
}

#[derive(Serialize)]
struct CopyBody<'a> {
    source: &'a str,
    destination: &'a str,
    overwrite: bool,
}

impl ContentClient {
    /// Create a new content client from configuration.
    pub fn new(config: ContentConfig) -> Result<Self, ContentError> {
        let api_key = config.api_key.ok_or_else(|| {
            ContentError::Configuration(
                "CONTENT_API_KEY is required for the http provider".to_string(),
            )
        })?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ContentError::Configuration(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn post<B, T>(&self, path: &str, body: &B, subject: &str) -> Result<T, ContentError>
    where
        B: Serialize + ?Sized,
        T: serde::de::DeserializeOwned,
    {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| ContentError::Request(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ContentError::NotFound(subject.to_string()));
        }
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ContentError::Request(format!(
                "Content bridge returned {}",
                status
            )));
        }
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read response body".to_string());
            return Err(ContentError::Response(format!(
                "Content bridge returned {}: {}",
                status, body
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ContentError::Response(format!("Malformed response: {}", e)))
    }
}

#[async_trait::async_trait]
impl ContentService for ContentClient {
    async fn copy_folder_tree(
        &self,
        source: &str,
        destination: &str,
        options: CopyOptions,
    ) -> Result<CopyReport, ContentError> {
        let body = CopyBody {
            source,
            destination,
            overwrite: options.overwrite,
        };
        let report: CopyReport = self.post("/v1/copy", &body, source).await?;
        tracing::debug!(
            source,
            destination,
            items_copied = report.items_copied,
            items_failed = report.items_failed.len(),
            "Folder tree copied"
        );
        Ok(report)
    }

    async fn ensure_child_folder(
        &self,
        parent: &str,
        name: &str,
    ) -> Result<FolderRef, ContentError> {
        let path = format!("/v1/folders/{}/children", parent);
        self.post(&path, &ChildFolderBody { name }, parent).await
    }
}
