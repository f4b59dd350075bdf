//! Delivery triggers
//!
//! Two independent paths feed the executor:
//! - [`EventTrigger`] handles `delivery/asset.approved` events on the job
//!   substrate, with bounded retries and a per-asset concurrency key
//! - [`ScheduledScan`] periodically sweeps ready-but-undelivered assets, as a
//!   safety net for events that never fired
//!
//! Both may race on the same asset; the executor makes the later one
//! observe `Idempotent`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use proofline_inngest::{
    FunctionConfig, FunctionContext, FunctionError, FunctionHandler, InngestEvent,
};

use crate::config::DeliveryConfig;
use crate::domain::outcome::{DeliveryOutcome, DeliveryRequest};
use crate::repository::{AssetStatusStore, StoreError};
use crate::service::executor::DeliveryExecutor;

/// Event published once per newly approved asset
pub const ASSET_APPROVED_EVENT: &str = "delivery/asset.approved";

/// Function id of the delivery handler on the job substrate
pub const DELIVER_FUNCTION_ID: &str = "deliver-approved-asset";

/// Payload of [`ASSET_APPROVED_EVENT`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetApproved {
    pub asset_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl AssetApproved {
    pub fn into_request(self) -> DeliveryRequest {
        let request = DeliveryRequest::new(self.asset_id).with_batch_id(self.batch_id);
        match self.correlation_id {
            Some(correlation_id) => request.with_correlation_id(correlation_id),
            None => request,
        }
    }
}

/// Approval events for the given assets. The event id folds in the approval
/// time so a repeated publish of the same approval is dropped by the
/// substrate while a later re-approval is not.
pub fn approval_events(
    asset_ids: &[String],
    batch_id: Option<&str>,
    approved_at: DateTime<Utc>,
) -> Vec<InngestEvent> {
    asset_ids
        .iter()
        .map(|asset_id| {
            let payload = AssetApproved {
                asset_id: asset_id.clone(),
                batch_id: batch_id.map(str::to_string),
                correlation_id: Some(Uuid::new_v4().to_string()),
            };
            InngestEvent::new(
                ASSET_APPROVED_EVENT,
                serde_json::to_value(&payload).unwrap_or(Value::Null),
            )
            .with_id(format!(
                "asset-approved-{}-{}",
                asset_id,
                approved_at.timestamp_micros()
            ))
        })
        .collect()
}

/// Job substrate handler that delivers the asset named by an approval event
pub struct EventTrigger {
    executor: Arc<DeliveryExecutor>,
}

impl EventTrigger {
    pub fn new(executor: Arc<DeliveryExecutor>) -> Self {
        Self { executor }
    }

    /// Registration for the delivery function: bounded retries, a global
    /// concurrency cap, and at most one run per asset at a time
    pub fn function_config(config: &DeliveryConfig) -> FunctionConfig {
        FunctionConfig::new(DELIVER_FUNCTION_ID, ASSET_APPROVED_EVENT)
            .with_retries(config.max_retries)
            .with_concurrency(config.concurrency)
            .with_key("/asset_id", 1)
            .with_backoff(config.retry_backoff(), Duration::from_secs(60))
    }
}

#[async_trait::async_trait]
impl FunctionHandler for EventTrigger {
    async fn call(
        &self,
        ctx: &FunctionContext,
        event: &InngestEvent,
    ) -> Result<Value, FunctionError> {
        let payload: AssetApproved = serde_json::from_value(event.data.clone())
            .map_err(|e| FunctionError::NonRetriable(format!("Malformed approval event: {e}")))?;
        let request = payload.into_request();
        tracing::debug!(
            asset_id = %request.asset_id,
            correlation_id = %request.correlation_id,
            attempt = ctx.attempt,
            max_attempts = ctx.max_attempts,
            "Handling approval event"
        );

        match self.executor.deliver_request(&request).await {
            Ok(outcome) => serde_json::to_value(&outcome)
                .map_err(|e| FunctionError::NonRetriable(e.to_string())),
            Err(e) if e.is_retriable() => Err(FunctionError::Retriable(e.to_string())),
            Err(e) => Err(FunctionError::NonRetriable(e.to_string())),
        }
    }
}

/// Counts from one scan tick
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    pub examined: usize,
    pub delivered: usize,
    pub idempotent: usize,
    pub failed: usize,
    /// Transient errors; the asset stays ready for the next tick
    pub errored: usize,
}

impl ScanReport {
    fn record(&mut self, result: &Result<DeliveryOutcome, crate::service::DeliveryError>) {
        match result {
            Ok(DeliveryOutcome::Delivered(_)) => self.delivered += 1,
            Ok(DeliveryOutcome::Idempotent { .. }) => self.idempotent += 1,
            Ok(DeliveryOutcome::Failed(_)) => self.failed += 1,
            Err(_) => self.errored += 1,
        }
    }
}

/// Periodic sweep of assets that are ready but undelivered
pub struct ScheduledScan {
    assets: Arc<AssetStatusStore>,
    executor: Arc<DeliveryExecutor>,
    interval: Duration,
    max_items: usize,
    concurrency: usize,
}

impl ScheduledScan {
    pub fn new(
        assets: Arc<AssetStatusStore>,
        executor: Arc<DeliveryExecutor>,
        config: &DeliveryConfig,
    ) -> Self {
        Self {
            assets,
            executor,
            interval: config.scan_interval(),
            max_items: config.scan_max_items.max(1),
            concurrency: config.concurrency.max(1),
        }
    }

    /// Run one tick: deliver up to `max_items` ready assets with bounded
    /// parallelism. Assets beyond the cap wait for the next tick.
    pub async fn tick(&self) -> Result<ScanReport, StoreError> {
        let candidates = self.assets.list_ready_undelivered(self.max_items).await?;
        let mut report = ScanReport {
            examined: candidates.len(),
            ..ScanReport::default()
        };
        if candidates.is_empty() {
            return Ok(report);
        }

        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut set = JoinSet::new();
        for asset in candidates {
            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let executor = self.executor.clone();
            set.spawn(async move {
                let _permit = permit;
                executor.deliver(&asset.id).await
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(result) => report.record(&result),
                Err(e) => {
                    tracing::error!(error = %e, "Scan delivery task panicked");
                    report.errored += 1;
                }
            }
        }

        tracing::info!(
            examined = report.examined,
            delivered = report.delivered,
            idempotent = report.idempotent,
            failed = report.failed,
            errored = report.errored,
            "Delivery scan tick complete"
        );
        Ok(report)
    }

    /// Tick on a fixed interval until `shutdown` resolves
    #[mutants::skip] // Runs until shutdown; mutants would hang
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        tracing::info!(interval_secs = self.interval.as_secs(), "Delivery scan started");
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        tracing::warn!(error = %e, "Delivery scan tick failed");
                    }
                }
            }
        }
        tracing::info!("Delivery scan stopped");
    }
}
