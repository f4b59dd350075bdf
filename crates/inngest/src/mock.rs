//! Mock Inngest Service Implementation
//!
//! Records published events in memory for test assertions and can be told
//! to reject the next publish. Thread-safe via `Arc<Mutex<>>`.

use crate::{InngestError, InngestEvent, InngestService};
use std::sync::{Arc, Mutex};

/// Mock Inngest service that records events for test assertions.
#[derive(Debug, Clone, Default)]
pub struct MockInngestService {
    events: Arc<Mutex<Vec<InngestEvent>>>,
    failing_sends: Arc<Mutex<usize>>,
}

impl MockInngestService {
    /// Create a new mock Inngest service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return all recorded events.
    pub fn recorded_events(&self) -> Vec<InngestEvent> {
        self.events
            .lock()
            .expect("events lock poisoned — prior test panicked")
            .clone()
    }

    /// Return recorded events with the given name.
    pub fn events_named(&self, name: &str) -> Vec<InngestEvent> {
        self.recorded_events()
            .into_iter()
            .filter(|e| e.name == name)
            .collect()
    }

    /// Reject the next `count` publish calls with a request error.
    pub fn fail_next_sends(&self, count: usize) {
        *self
            .failing_sends
            .lock()
            .expect("failure lock poisoned — prior test panicked") = count;
    }

    fn trip_failure(&self) -> Result<(), InngestError> {
        let mut failing = self
            .failing_sends
            .lock()
            .map_err(|e| InngestError::Request(format!("failure lock poisoned: {e}")))?;
        if *failing > 0 {
            *failing -= 1;
            return Err(InngestError::Request("injected publish failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl InngestService for MockInngestService {
    async fn send_event(&self, event: InngestEvent) -> Result<(), InngestError> {
        self.send_events(vec![event]).await
    }

    async fn send_events(&self, events: Vec<InngestEvent>) -> Result<(), InngestError> {
        self.trip_failure()?;
        tracing::debug!(count = events.len(), "Mock Inngest: recording events");
        self.events
            .lock()
            .map_err(|e| InngestError::Request(format!("events lock poisoned: {e}")))?
            .extend(events);
        Ok(())
    }
}
