//! Inngest HTTP Client Implementation
//!
//! POSTs events to the Inngest event API at `{base_url}/e/{event_key}`.
//! Batches are split to stay under the event API's per-request cap.

use std::time::Duration;

use crate::{InngestConfig, InngestError, InngestEvent, InngestService};

/// Maximum events per event API request
const MAX_EVENTS_PER_REQUEST: usize = 100;

/// Real Inngest HTTP client for sending events to the Inngest event API.
pub struct InngestClient {
    http: reqwest::Client,
    event_url: String,
}

impl InngestClient {
    /// Create a new Inngest client from configuration.
    pub fn new(config: InngestConfig) -> Result<Self, InngestError> {
        let event_url = format!(
            "{}/e/{}",
            config.base_url.trim_end_matches('/'),
            config.event_key
        );
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| InngestError::Configuration(e.to_string()))?;
        Ok(Self { http, event_url })
    }

    async fn post_chunk(&self, events: &[InngestEvent]) -> Result<(), InngestError> {
        let response = self
            .http
            .post(&self.event_url)
            .json(events)
            .send()
            .await
            .map_err(|e| InngestError::Request(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(InngestError::Request(format!(
                "Inngest API returned {}",
                status
            )));
        }
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read response body".to_string());
            return Err(InngestError::Response(format!(
                "Inngest API returned {}: {}",
                status, body
            )));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl InngestService for InngestClient {
    async fn send_event(&self, event: InngestEvent) -> Result<(), InngestError> {
        self.send_events(vec![event]).await
    }

    async fn send_events(&self, events: Vec<InngestEvent>) -> Result<(), InngestError> {
        for chunk in events.chunks(MAX_EVENTS_PER_REQUEST) {
            self.post_chunk(chunk).await?;
        }
        tracing::debug!(count = events.len(), "Inngest events sent successfully");
        Ok(())
    }
}
