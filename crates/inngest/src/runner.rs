//! In-process task runner
//!
//! Models the hosted job substrate: functions subscribe to an event name and
//! every matching event runs each function with
//! - retry on `FunctionError::Retriable`, up to `retries` extra attempts with
//!   exponential backoff
//! - a global concurrency cap per function
//! - an optional per-key cap (key read from the event data by JSON pointer)
//!
//! The same registrations back the HTTP invocation endpoint, where the hosted
//! substrate owns retries and `invoke_once` runs a single attempt.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;

use crate::{InngestError, InngestEvent, InngestService};

/// Registration options for one function
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionConfig {
    pub id: String,
    /// Event name that triggers the function
    pub event: String,
    /// Extra attempts after the first failure
    pub retries: u32,
    /// Maximum concurrent runs of this function
    pub concurrency: usize,
    /// JSON pointer into the event data naming the concurrency key
    pub key: Option<String>,
    /// Maximum concurrent runs sharing one key
    pub key_concurrency: usize,
    pub backoff: Duration,
    pub max_backoff: Duration,
}

impl FunctionConfig {
    pub fn new(id: impl Into<String>, event: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            event: event.into(),
            retries: 3,
            concurrency: 10,
            key: None,
            key_concurrency: 1,
            backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Limit concurrent runs per value found at `pointer` in the event data
    pub fn with_key(mut self, pointer: impl Into<String>, key_concurrency: usize) -> Self {
        self.key = Some(pointer.into());
        self.key_concurrency = key_concurrency.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: Duration, max_backoff: Duration) -> Self {
        self.backoff = backoff;
        self.max_backoff = max_backoff;
        self
    }

    /// Total attempts including the first
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Delay after the given failed attempt (1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FunctionError {
    /// Transient failure; the substrate should run the function again
    #[error("retriable: {0}")]
    Retriable(String),

    /// Permanent failure; retrying cannot help
    #[error("non-retriable: {0}")]
    NonRetriable(String),
}

/// Per-attempt context handed to a handler
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionContext {
    pub function_id: String,
    /// 1-based attempt number
    pub attempt: u32,
    pub max_attempts: u32,
}

#[async_trait::async_trait]
pub trait FunctionHandler: Send + Sync {
    async fn call(&self, ctx: &FunctionContext, event: &InngestEvent)
        -> Result<Value, FunctionError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    Completed(Value),
    Failed(FunctionError),
}

/// Final result of running one function for one event
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionRun {
    pub function_id: String,
    pub attempts: u32,
    pub status: RunStatus,
}

impl FunctionRun {
    pub fn is_completed(&self) -> bool {
        matches!(self.status, RunStatus::Completed(_))
    }
}

struct Registration {
    config: FunctionConfig,
    handler: Arc<dyn FunctionHandler>,
    slots: Arc<Semaphore>,
    key_slots: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl Registration {
    fn key_for(&self, event: &InngestEvent) -> Option<String> {
        let pointer = self.config.key.as_deref()?;
        match event.data.pointer(pointer)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    fn key_semaphore(&self, key: &str) -> Result<Arc<Semaphore>, FunctionError> {
        let mut slots = self
            .key_slots
            .lock()
            .map_err(|e| FunctionError::Retriable(format!("key slots lock poisoned: {e}")))?;
        Ok(slots
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.config.key_concurrency)))
            .clone())
    }

    /// Drop the key's semaphore once nobody else holds or waits on it
    fn release_key(&self, key: &str, semaphore: Arc<Semaphore>) {
        if let Ok(mut slots) = self.key_slots.lock() {
            // One reference in the map, one held here
            if Arc::strong_count(&semaphore) == 2 {
                slots.remove(key);
            }
        }
    }

    async fn attempt(&self, event: &InngestEvent, attempt: u32) -> Result<Value, FunctionError> {
        let key = self.key_for(event);

        // Key slot first, so runs queued behind a busy key do not hold global slots
        let key_slot: Option<(Arc<Semaphore>, OwnedSemaphorePermit)> = match &key {
            Some(key) => {
                let semaphore = self.key_semaphore(key)?;
                let permit = semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|e| FunctionError::Retriable(e.to_string()))?;
                Some((semaphore, permit))
            }
            None => None,
        };
        let global = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| FunctionError::Retriable(e.to_string()))?;

        let ctx = FunctionContext {
            function_id: self.config.id.clone(),
            attempt,
            max_attempts: self.config.max_attempts(),
        };
        let result = self.handler.call(&ctx, event).await;

        drop(global);
        if let (Some(key), Some((semaphore, permit))) = (key, key_slot) {
            drop(permit);
            self.release_key(&key, semaphore);
        }
        result
    }

    async fn run(&self, event: InngestEvent) -> FunctionRun {
        let max_attempts = self.config.max_attempts();
        let mut attempt = 1;
        loop {
            match self.attempt(&event, attempt).await {
                Ok(output) => {
                    return FunctionRun {
                        function_id: self.config.id.clone(),
                        attempts: attempt,
                        status: RunStatus::Completed(output),
                    }
                }
                Err(FunctionError::Retriable(reason)) if attempt < max_attempts => {
                    let delay = self.config.backoff_for(attempt);
                    tracing::warn!(
                        function_id = %self.config.id,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        reason = %reason,
                        "Function attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => {
                    tracing::error!(
                        function_id = %self.config.id,
                        attempt,
                        error = %error,
                        "Function failed"
                    );
                    return FunctionRun {
                        function_id: self.config.id.clone(),
                        attempts: attempt,
                        status: RunStatus::Failed(error),
                    };
                }
            }
        }
    }
}

/// In-process job substrate. Cheap to clone; clones share registrations.
#[derive(Clone, Default)]
pub struct TaskRunner {
    functions: Arc<RwLock<Vec<Arc<Registration>>>>,
}

impl TaskRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for the config's event name
    pub fn subscribe(&self, config: FunctionConfig, handler: Arc<dyn FunctionHandler>) {
        tracing::info!(
            function_id = %config.id,
            event = %config.event,
            retries = config.retries,
            concurrency = config.concurrency,
            "Registering function"
        );
        let registration = Arc::new(Registration {
            slots: Arc::new(Semaphore::new(config.concurrency.max(1))),
            key_slots: Mutex::new(HashMap::new()),
            config,
            handler,
        });
        match self.functions.write() {
            Ok(mut functions) => functions.push(registration),
            Err(poisoned) => poisoned.into_inner().push(registration),
        }
    }

    pub fn function_ids(&self) -> Vec<String> {
        self.registrations()
            .iter()
            .map(|r| r.config.id.clone())
            .collect()
    }

    fn registrations(&self) -> Vec<Arc<Registration>> {
        match self.functions.read() {
            Ok(functions) => functions.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Run every function subscribed to the event, with retries, and wait
    /// for all of them to finish
    pub async fn run_event(&self, event: InngestEvent) -> Vec<FunctionRun> {
        let matching: Vec<_> = self
            .registrations()
            .into_iter()
            .filter(|r| r.config.event == event.name)
            .collect();
        if matching.is_empty() {
            tracing::debug!(event = %event.name, "No functions subscribed to event");
            return Vec::new();
        }

        let mut set = JoinSet::new();
        for registration in matching {
            let event = event.clone();
            set.spawn(async move { registration.run(event).await });
        }

        let mut runs = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(run) => runs.push(run),
                Err(e) => tracing::error!(error = %e, "Function task panicked"),
            }
        }
        runs
    }

    /// Run a single attempt of one function; retries belong to the caller
    pub async fn invoke_once(
        &self,
        function_id: &str,
        event: &InngestEvent,
        attempt: u32,
    ) -> Result<Value, FunctionError> {
        let registration = self
            .registrations()
            .into_iter()
            .find(|r| r.config.id == function_id)
            .ok_or_else(|| {
                FunctionError::NonRetriable(format!("Unknown function: {}", function_id))
            })?;
        registration.attempt(event, attempt.max(1)).await
    }
}

#[async_trait::async_trait]
impl InngestService for TaskRunner {
    async fn send_event(&self, event: InngestEvent) -> Result<(), InngestError> {
        self.send_events(vec![event]).await
    }

    async fn send_events(&self, events: Vec<InngestEvent>) -> Result<(), InngestError> {
        for event in events {
            let runner = self.clone();
            tokio::spawn(async move {
                let name = event.name.clone();
                let runs = runner.run_event(event).await;
                tracing::debug!(event = %name, runs = runs.len(), "Event handled");
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    fn quick(id: &str) -> FunctionConfig {
        FunctionConfig::new(id, "test/event")
            .with_backoff(Duration::from_millis(1), Duration::from_millis(5))
    }

    fn event(data: Value) -> InngestEvent {
        InngestEvent::new("test/event", data)
    }

    /// Fails with the given error until `failures` attempts have been made
    struct Flaky {
        failures: u32,
        error: FunctionError,
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl FunctionHandler for Flaky {
        async fn call(
            &self,
            _ctx: &FunctionContext,
            _event: &InngestEvent,
        ) -> Result<Value, FunctionError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.failures {
                Err(self.error.clone())
            } else {
                Ok(serde_json::json!({"call": n}))
            }
        }
    }

    /// Tracks peak concurrency overall
    #[derive(Default)]
    struct Gauge {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl FunctionHandler for Gauge {
        async fn call(
            &self,
            _ctx: &FunctionContext,
            _event: &InngestEvent,
        ) -> Result<Value, FunctionError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(Value::Null)
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = FunctionConfig::new("f", "e")
            .with_backoff(Duration::from_secs(1), Duration::from_secs(5));
        assert_eq!(config.backoff_for(1), Duration::from_secs(1));
        assert_eq!(config.backoff_for(2), Duration::from_secs(2));
        assert_eq!(config.backoff_for(3), Duration::from_secs(4));
        assert_eq!(config.backoff_for(4), Duration::from_secs(5));
        assert_eq!(config.max_attempts(), 4);
    }

    #[tokio::test]
    async fn test_retriable_errors_are_retried_until_success() {
        let runner = TaskRunner::new();
        let handler = Arc::new(Flaky {
            failures: 2,
            error: FunctionError::Retriable("store timeout".to_string()),
            calls: AtomicU32::new(0),
        });
        runner.subscribe(quick("flaky").with_retries(3), handler.clone());

        let runs = runner.run_event(event(serde_json::json!({}))).await;
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].attempts, 3);
        assert!(runs[0].is_completed());
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let runner = TaskRunner::new();
        let handler = Arc::new(Flaky {
            failures: u32::MAX,
            error: FunctionError::Retriable("down".to_string()),
            calls: AtomicU32::new(0),
        });
        runner.subscribe(quick("down").with_retries(2), handler.clone());

        let runs = runner.run_event(event(serde_json::json!({}))).await;
        assert_eq!(runs[0].attempts, 3);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert!(matches!(
            runs[0].status,
            RunStatus::Failed(FunctionError::Retriable(_))
        ));
    }

    #[tokio::test]
    async fn test_non_retriable_errors_stop_immediately() {
        let runner = TaskRunner::new();
        let handler = Arc::new(Flaky {
            failures: u32::MAX,
            error: FunctionError::NonRetriable("bad payload".to_string()),
            calls: AtomicU32::new(0),
        });
        runner.subscribe(quick("strict").with_retries(5), handler.clone());

        let runs = runner.run_event(event(serde_json::json!({}))).await;
        assert_eq!(runs[0].attempts, 1);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_events_only_reach_subscribed_functions() {
        let runner = TaskRunner::new();
        let handler = Arc::new(Gauge::default());
        runner.subscribe(quick("gauge"), handler);

        let runs = runner
            .run_event(InngestEvent::new("other/event", Value::Null))
            .await;
        assert!(runs.is_empty());
    }

    #[tokio::test]
    async fn test_same_key_runs_are_serialized() {
        let runner = TaskRunner::new();
        let handler = Arc::new(Gauge::default());
        runner.subscribe(
            quick("keyed").with_concurrency(10).with_key("/asset_id", 1),
            handler.clone(),
        );

        let mut set = JoinSet::new();
        for _ in 0..5 {
            let runner = runner.clone();
            set.spawn(async move {
                runner
                    .run_event(event(serde_json::json!({"asset_id": "recAAAAAAAAAAAAAA"})))
                    .await
            });
        }
        while set.join_next().await.is_some() {}

        assert_eq!(handler.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_global_concurrency_is_capped() {
        let runner = TaskRunner::new();
        let handler = Arc::new(Gauge::default());
        runner.subscribe(
            quick("capped").with_concurrency(2).with_key("/asset_id", 1),
            handler.clone(),
        );

        let mut set = JoinSet::new();
        for i in 0..6 {
            let runner = runner.clone();
            set.spawn(async move { runner.run_event(event(serde_json::json!({"asset_id": i}))).await });
        }
        while set.join_next().await.is_some() {}

        let peak = handler.peak.load(Ordering::SeqCst);
        assert!(peak <= 2, "peak concurrency was {peak}");
    }

    #[tokio::test]
    async fn test_invoke_once_runs_a_single_attempt() {
        let runner = TaskRunner::new();
        let handler = Arc::new(Flaky {
            failures: 1,
            error: FunctionError::Retriable("blip".to_string()),
            calls: AtomicU32::new(0),
        });
        runner.subscribe(quick("once"), handler.clone());

        let first = runner.invoke_once("once", &event(Value::Null), 1).await;
        assert!(matches!(first, Err(FunctionError::Retriable(_))));
        let second = runner.invoke_once("once", &event(Value::Null), 2).await;
        assert!(second.is_ok());
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invoke_once_unknown_function() {
        let runner = TaskRunner::new();
        let err = runner
            .invoke_once("missing", &event(Value::Null), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, FunctionError::NonRetriable(_)));
    }

    #[tokio::test]
    async fn test_send_event_dispatches_in_background() {
        let runner = TaskRunner::new();
        let handler = Arc::new(Flaky {
            failures: 0,
            error: FunctionError::Retriable(String::new()),
            calls: AtomicU32::new(0),
        });
        runner.subscribe(quick("bg"), handler.clone());

        runner.send_event(event(Value::Null)).await.unwrap();

        for _ in 0..100 {
            if handler.calls.load(Ordering::SeqCst) == 1 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("background run never happened");
    }
}
