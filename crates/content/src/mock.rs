//! Mock Content Service Implementation
//!
//! Programmable in-memory storage for delivery tests:
//! - folders hold items keyed by path, so repeated copies overwrite
//! - `fail_next_copy_items` makes the next copy report item failures
//! - `fail_next_calls` raises transient errors
//! - call and item counters for exactly-once assertions

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::{ContentError, ContentService, CopyFailure, CopyOptions, CopyReport, FolderRef};

#[derive(Debug, Clone, Default)]
struct Folder {
    parent: Option<String>,
    name: String,
    items: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct MockState {
    folders: HashMap<String, Folder>,
    next_folder: u64,
    copy_calls: usize,
    items_written: usize,
    failing_items_next_copy: usize,
    failing_calls: usize,
    copy_log: Vec<(String, String)>,
}

/// Mock content service that keeps folders in memory
#[derive(Debug, Clone, Default)]
pub struct MockContentService {
    state: Arc<Mutex<MockState>>,
    latency: Arc<Mutex<Option<Duration>>>,
}

impl MockContentService {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state
            .lock()
            .expect("content state lock poisoned — prior test panicked")
    }

    /// Create (or replace) a top-level folder with the given items
    pub fn seed_folder(&self, id: &str, items: &[(&str, &str)]) {
        let mut state = self.lock();
        state.folders.insert(
            id.to_string(),
            Folder {
                parent: None,
                name: id.to_string(),
                items: items
                    .iter()
                    .map(|(path, body)| (path.to_string(), body.to_string()))
                    .collect(),
            },
        );
    }

    /// Items currently stored in a folder, keyed by path
    pub fn items_in(&self, folder_id: &str) -> BTreeMap<String, String> {
        self.lock()
            .folders
            .get(folder_id)
            .map(|f| f.items.clone())
            .unwrap_or_default()
    }

    /// Child folder id of `parent` named `name`, if it exists
    pub fn child_folder(&self, parent: &str, name: &str) -> Option<String> {
        self.lock()
            .folders
            .iter()
            .find(|(_, f)| f.parent.as_deref() == Some(parent) && f.name == name)
            .map(|(id, _)| id.clone())
    }

    /// Make the next copy report its first `count` items as failed
    pub fn fail_next_copy_items(&self, count: usize) {
        self.lock().failing_items_next_copy = count;
    }

    /// Fail the next `count` calls (copy or folder) with a transient error
    pub fn fail_next_calls(&self, count: usize) {
        self.lock().failing_calls = count;
    }

    /// Delay every call, widening race windows in concurrency tests
    pub fn set_latency(&self, latency: Duration) {
        *self
            .latency
            .lock()
            .expect("latency lock poisoned — prior test panicked") = Some(latency);
    }

    pub fn copy_call_count(&self) -> usize {
        self.lock().copy_calls
    }

    /// Total items written across all copies, including overwrites
    pub fn items_written(&self) -> usize {
        self.lock().items_written
    }

    /// (source, destination) pairs in call order
    pub fn copy_log(&self) -> Vec<(String, String)> {
        self.lock().copy_log.clone()
    }

    async fn enter(&self) -> Result<std::sync::MutexGuard<'_, MockState>, ContentError> {
        let latency = *self
            .latency
            .lock()
            .map_err(|e| ContentError::Request(format!("latency lock poisoned: {e}")))?;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self
            .state
            .lock()
            .map_err(|e| ContentError::Request(format!("content state lock poisoned: {e}")))?;
        if state.failing_calls > 0 {
            state.failing_calls -= 1;
            return Err(ContentError::Request("injected content failure".to_string()));
        }
        Ok(state)
    }
}

#[async_trait::async_trait]
impl ContentService for MockContentService {
    async fn copy_folder_tree(
        &self,
        source: &str,
        destination: &str,
        options: CopyOptions,
    ) -> Result<CopyReport, ContentError> {
        let mut state = self.enter().await?;
        state.copy_calls += 1;
        state
            .copy_log
            .push((source.to_string(), destination.to_string()));

        let items = state
            .folders
            .get(source)
            .map(|f| f.items.clone())
            .ok_or_else(|| ContentError::NotFound(source.to_string()))?;
        if !state.folders.contains_key(destination) {
            return Err(ContentError::NotFound(destination.to_string()));
        }

        let failing = std::mem::take(&mut state.failing_items_next_copy);
        let mut report = CopyReport::default();
        let mut written = 0;
        for (index, (path, body)) in items.into_iter().enumerate() {
            if index < failing {
                report.items_failed.push(CopyFailure {
                    path,
                    reason: "injected item failure".to_string(),
                });
                continue;
            }
            if let Some(target) = state.folders.get_mut(destination) {
                if !options.overwrite && target.items.contains_key(&path) {
                    report.items_failed.push(CopyFailure {
                        path,
                        reason: "exists".to_string(),
                    });
                    continue;
                }
                target.items.insert(path, body);
                written += 1;
            }
        }
        report.items_copied = written;
        state.items_written += written;

        tracing::debug!(
            source,
            destination,
            items_copied = report.items_copied,
            items_failed = report.items_failed.len(),
            "Mock content: copied folder tree"
        );
        Ok(report)
    }

    async fn ensure_child_folder(
        &self,
        parent: &str,
        name: &str,
    ) -> Result<FolderRef, ContentError> {
        let mut state = self.enter().await?;
        if !state.folders.contains_key(parent) {
            return Err(ContentError::NotFound(parent.to_string()));
        }

        let existing = state
            .folders
            .iter()
            .find(|(_, f)| f.parent.as_deref() == Some(parent) && f.name == name)
            .map(|(id, _)| id.clone());

        let id = match existing {
            Some(id) => id,
            None => {
                state.next_folder += 1;
                let id = format!("fld-{}", state.next_folder);
                state.folders.insert(
                    id.clone(),
                    Folder {
                        parent: Some(parent.to_string()),
                        name: name.to_string(),
                        items: BTreeMap::new(),
                    },
                );
                id
            }
        };

        Ok(FolderRef {
            url: format!("https://content.mock/folders/{}", id),
            id,
        })
    }
}
