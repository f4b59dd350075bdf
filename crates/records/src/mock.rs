//! Mock Record Store Implementation
//!
//! In-memory tables for tests and local development:
//! - optional per-table schemas, so unknown-field errors can be simulated
//! - programmable transient failures per operation
//! - optional latency to widen check-then-act windows
//! - per-operation call counters for assertions
//!
//! Thread-safe via `Arc<Mutex<>>`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::{Fields, Filter, Record, RecordStore, RecordStoreError, RecordUpdate, DEFAULT_BATCH_LIMIT};

/// Operations the mock can count and fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Find,
    List,
    Create,
    Update,
    UpdateMany,
    FieldNames,
}

/// Fail `count` calls of an operation after letting `skip` calls through
#[derive(Debug, Clone, Copy, Default)]
struct FaultPlan {
    skip: usize,
    count: usize,
}

type Tables = HashMap<String, BTreeMap<String, Fields>>;

#[derive(Debug, Clone)]
pub struct MockRecordStore {
    tables: Arc<Mutex<Tables>>,
    schemas: Arc<Mutex<HashMap<String, HashSet<String>>>>,
    faults: Arc<Mutex<HashMap<MockOp, FaultPlan>>>,
    calls: Arc<Mutex<HashMap<MockOp, usize>>>,
    latency: Arc<Mutex<Option<Duration>>>,
    batch_limit: usize,
}

impl MockRecordStore {
    pub fn new() -> Self {
        Self::with_batch_limit(DEFAULT_BATCH_LIMIT)
    }

    pub fn with_batch_limit(batch_limit: usize) -> Self {
        Self {
            tables: Arc::new(Mutex::new(HashMap::new())),
            schemas: Arc::new(Mutex::new(HashMap::new())),
            faults: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(HashMap::new())),
            latency: Arc::new(Mutex::new(None)),
            batch_limit,
        }
    }

    /// Seed a record directly, bypassing schema checks and counters
    pub fn insert(&self, table: &str, fields: Fields) {
        let id = fields
            .get("id")
            .and_then(|v| v.as_str())
            .expect("seeded records need a string id")
            .to_string();
        self.tables
            .lock()
            .expect("tables lock poisoned — prior test panicked")
            .entry(table.to_string())
            .or_default()
            .insert(id, fields);
    }

    /// Snapshot of one record
    pub fn get(&self, table: &str, id: &str) -> Option<Fields> {
        self.tables
            .lock()
            .expect("tables lock poisoned — prior test panicked")
            .get(table)
            .and_then(|rows| rows.get(id).cloned())
    }

    /// Snapshot of every record in a table, ordered by id
    pub fn records(&self, table: &str) -> Vec<Fields> {
        self.tables
            .lock()
            .expect("tables lock poisoned — prior test panicked")
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Declare the fields a table exposes; writes to other fields then fail
    pub fn set_schema(&self, table: &str, fields: &[&str]) {
        self.schemas
            .lock()
            .expect("schemas lock poisoned — prior test panicked")
            .insert(
                table.to_string(),
                fields.iter().map(|f| f.to_string()).collect(),
            );
    }

    /// Fail the next `count` calls of `op` with a transient error
    pub fn fail_next(&self, op: MockOp, count: usize) {
        self.fail_after(op, 0, count);
    }

    /// Let `skip` calls of `op` succeed, then fail the following `count`
    pub fn fail_after(&self, op: MockOp, skip: usize, count: usize) {
        self.faults
            .lock()
            .expect("faults lock poisoned — prior test panicked")
            .insert(op, FaultPlan { skip, count });
    }

    /// Delay every operation, widening race windows in concurrency tests
    pub fn set_latency(&self, latency: Duration) {
        *self
            .latency
            .lock()
            .expect("latency lock poisoned — prior test panicked") = Some(latency);
    }

    /// Number of calls made to an operation
    pub fn call_count(&self, op: MockOp) -> usize {
        self.calls
            .lock()
            .expect("calls lock poisoned — prior test panicked")
            .get(&op)
            .copied()
            .unwrap_or(0)
    }

    /// Count the call, apply latency, and trip any planned fault
    async fn enter(&self, op: MockOp) -> Result<(), RecordStoreError> {
        let latency = *self
            .latency
            .lock()
            .map_err(|e| RecordStoreError::Backend(format!("latency lock poisoned: {e}")))?;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        *self
            .calls
            .lock()
            .map_err(|e| RecordStoreError::Backend(format!("calls lock poisoned: {e}")))?
            .entry(op)
            .or_insert(0) += 1;

        let mut faults = self
            .faults
            .lock()
            .map_err(|e| RecordStoreError::Backend(format!("faults lock poisoned: {e}")))?;
        if let Some(plan) = faults.get_mut(&op) {
            if plan.skip > 0 {
                plan.skip -= 1;
            } else if plan.count > 0 {
                plan.count -= 1;
                return Err(RecordStoreError::Transient(format!(
                    "injected {:?} failure",
                    op
                )));
            }
        }
        Ok(())
    }

    fn check_schema(&self, table: &str, fields: &Fields) -> Result<(), RecordStoreError> {
        let schemas = self
            .schemas
            .lock()
            .map_err(|e| RecordStoreError::Backend(format!("schemas lock poisoned: {e}")))?;
        if let Some(schema) = schemas.get(table) {
            if let Some(field) = fields.keys().find(|f| !schema.contains(*f)) {
                return Err(RecordStoreError::UnknownField {
                    table: table.to_string(),
                    field: field.clone(),
                });
            }
        }
        Ok(())
    }

    fn lock_tables(&self) -> Result<std::sync::MutexGuard<'_, Tables>, RecordStoreError> {
        self.tables
            .lock()
            .map_err(|e| RecordStoreError::Backend(format!("tables lock poisoned: {e}")))
    }
}

impl Default for MockRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

fn apply(existing: &mut Fields, fields: &Fields) {
    for (key, value) in fields {
        if key != "id" {
            existing.insert(key.clone(), value.clone());
        }
    }
}

#[async_trait::async_trait]
impl RecordStore for MockRecordStore {
    fn batch_limit(&self) -> usize {
        self.batch_limit
    }

    async fn find(&self, table: &str, id: &str) -> Result<Option<Record>, RecordStoreError> {
        self.enter(MockOp::Find).await?;
        let tables = self.lock_tables()?;
        tables
            .get(table)
            .and_then(|rows| rows.get(id).cloned())
            .map(Record::from_fields)
            .transpose()
    }

    async fn list(
        &self,
        table: &str,
        filter: &Filter,
        limit: Option<usize>,
    ) -> Result<Vec<Record>, RecordStoreError> {
        self.enter(MockOp::List).await?;
        let tables = self.lock_tables()?;
        let Some(rows) = tables.get(table) else {
            return Ok(Vec::new());
        };
        rows.values()
            .filter(|fields| filter.matches(fields))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .map(Record::from_fields)
            .collect()
    }

    async fn create(&self, table: &str, fields: Fields) -> Result<Record, RecordStoreError> {
        self.enter(MockOp::Create).await?;
        self.check_schema(table, &fields)?;
        let record = Record::from_fields(fields)?;

        let mut tables = self.lock_tables()?;
        let rows = tables.entry(table.to_string()).or_default();
        if rows.contains_key(&record.id) {
            return Err(RecordStoreError::Backend(format!(
                "duplicate id {} in {}",
                record.id, table
            )));
        }
        rows.insert(record.id.clone(), record.fields.clone());
        tracing::debug!(table, id = %record.id, "Mock record store: created record");
        Ok(record)
    }

    async fn update(
        &self,
        table: &str,
        id: &str,
        fields: Fields,
    ) -> Result<Record, RecordStoreError> {
        self.enter(MockOp::Update).await?;
        self.check_schema(table, &fields)?;

        let mut tables = self.lock_tables()?;
        let existing = tables
            .get_mut(table)
            .and_then(|rows| rows.get_mut(id))
            .ok_or_else(|| RecordStoreError::NotFound {
                table: table.to_string(),
                id: id.to_string(),
            })?;
        apply(existing, &fields);
        Record::from_fields(existing.clone())
    }

    async fn update_many(
        &self,
        table: &str,
        updates: Vec<RecordUpdate>,
    ) -> Result<Vec<Record>, RecordStoreError> {
        self.enter(MockOp::UpdateMany).await?;
        if updates.len() > self.batch_limit {
            return Err(RecordStoreError::BatchTooLarge {
                size: updates.len(),
                limit: self.batch_limit,
            });
        }
        for update in &updates {
            self.check_schema(table, &update.fields)?;
        }

        let mut tables = self.lock_tables()?;
        let rows = tables.entry(table.to_string()).or_default();

        // Validate the whole chunk first so it applies atomically
        if let Some(missing) = updates.iter().find(|u| !rows.contains_key(&u.id)) {
            return Err(RecordStoreError::NotFound {
                table: table.to_string(),
                id: missing.id.clone(),
            });
        }

        let mut records = Vec::with_capacity(updates.len());
        for update in &updates {
            if let Some(existing) = rows.get_mut(&update.id) {
                apply(existing, &update.fields);
                records.push(Record::from_fields(existing.clone())?);
            }
        }
        Ok(records)
    }

    async fn field_names(&self, table: &str) -> Result<Option<Vec<String>>, RecordStoreError> {
        self.enter(MockOp::FieldNames).await?;
        let schemas = self
            .schemas
            .lock()
            .map_err(|e| RecordStoreError::Backend(format!("schemas lock poisoned: {e}")))?;
        Ok(schemas.get(table).map(|schema| {
            let mut names: Vec<String> = schema.iter().cloned().collect();
            names.sort();
            names
        }))
    }
}
