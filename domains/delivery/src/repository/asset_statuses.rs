//! Asset status repository
//!
//! All reads and writes of per-asset review and delivery state go through
//! [`AssetStatusStore`]. Writes pass through the negotiated schema so that
//! optional columns missing from the live table are omitted rather than
//! failing the write. Every state change appends an audit row; no-op
//! writes append nothing.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::OnceCell;

use proofline_common::BatchReference;
use proofline_records::{Fields, Filter, Record, RecordStore, RecordStoreError, RecordUpdate};

use crate::domain::entities::{
    store_timestamp, Approver, AssetAction, AssetStatusEvent, AssetStatusRecord, BackfillAsset,
    ReviewStatus, SeenAsset, ASSET_STATUSES_TABLE, ASSET_STATUS_EVENTS_TABLE,
    MAX_FILENAME_LENGTH,
};
use crate::domain::state::{ReviewEvent, ReviewStateMachine};
use crate::repository::error::StoreError;
use crate::repository::schema::{SchemaCapabilities, ASSET_STATUS_FIELDS};

const ENTITY: &str = "asset";

/// A write that may have been a no-op
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub record: AssetStatusRecord,
    pub changed: bool,
}

impl Applied {
    fn changed(record: AssetStatusRecord) -> Self {
        Self {
            record,
            changed: true,
        }
    }

    fn unchanged(record: AssetStatusRecord) -> Self {
        Self {
            record,
            changed: false,
        }
    }
}

/// Client sign-off applied to a set of assets
#[derive(Debug, Clone, PartialEq)]
pub struct ClientApproval {
    pub approved_at: DateTime<Utc>,
    pub approved_by: Approver,
    pub delivery_batch_ref: String,
}

/// Result of a chunked bulk approval.
///
/// Chunks apply atomically and in order. On failure, every id before
/// `failed_at_index` is approved and nothing from that index on is, so the
/// caller can resume from there.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct BulkApproval {
    pub requested: usize,
    pub succeeded: usize,
    /// Ids whose approval state actually changed
    pub changed: Vec<String>,
    pub failed_at_index: Option<usize>,
    pub error: Option<String>,
    pub retriable: bool,
}

impl BulkApproval {
    pub fn is_complete(&self) -> bool {
        self.failed_at_index.is_none()
    }
}

fn to_fields(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        _ => Fields::new(),
    }
}

fn decode(record: &Record) -> Result<AssetStatusRecord, StoreError> {
    Ok(record.decode()?)
}

fn validate_identity(review_token: &str, source_ref: &str, filename: &str) -> Result<(), StoreError> {
    if review_token.trim().is_empty() {
        return Err(StoreError::Validation(
            "review_token cannot be empty".to_string(),
        ));
    }
    if source_ref.trim().is_empty() {
        return Err(StoreError::Validation(
            "source_content_ref cannot be empty".to_string(),
        ));
    }
    if filename.trim().is_empty() || filename.len() > MAX_FILENAME_LENGTH {
        return Err(StoreError::Validation(format!(
            "filename must be 1 to {} characters",
            MAX_FILENAME_LENGTH
        )));
    }
    Ok(())
}

/// Fields a client approval would write, or `None` when the record already
/// carries this approver's sign-off for this batch. A repeated sign-off keeps
/// the first `approved_at`.
fn approval_fields(
    record: &AssetStatusRecord,
    approval: &ClientApproval,
    batch: &BatchReference,
) -> Option<Fields> {
    let approved_at = store_timestamp(approval.approved_at);
    let same_batch = record.delivery_batch_ref.as_deref() == Some(batch.as_str());
    let unchanged = record.client_approved
        && record.status == ReviewStatus::Approved
        && record.approved_at.is_some()
        && record.approved_by_name.as_deref() == Some(approval.approved_by.name.as_str())
        && record.approved_by_email.as_deref() == Some(approval.approved_by.email.as_str())
        && same_batch
        && (record.ready_for_delivery || record.is_delivered());
    if unchanged {
        return None;
    }

    let mut fields = to_fields(json!({
        "client_approved": true,
        "status": ReviewStatus::Approved,
        "approved_at": approved_at,
        "approved_by_name": approval.approved_by.name,
        "approved_by_email": approval.approved_by.email,
        "delivery_batch_ref": batch.as_str(),
        "ready_for_delivery": true,
    }));
    match batch.stable_id() {
        Some(id) => {
            fields.insert("delivery_batch_id".to_string(), json!(id));
        }
        // A renamed reference invalidates the cached resolution
        None if !same_batch => {
            fields.insert("delivery_batch_id".to_string(), Value::Null);
        }
        None => {}
    }
    Some(fields)
}

/// Repository for per-asset review and delivery state
pub struct AssetStatusStore {
    store: Arc<dyn RecordStore>,
    capabilities: OnceCell<SchemaCapabilities>,
}

impl AssetStatusStore {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            capabilities: OnceCell::new(),
        }
    }

    /// Negotiated schema, probed on first use
    pub async fn capabilities(&self) -> Result<&SchemaCapabilities, StoreError> {
        self.capabilities
            .get_or_try_init(|| SchemaCapabilities::negotiate(self.store.as_ref(), &ASSET_STATUS_FIELDS))
            .await
    }

    /// Look up an asset by stable id
    pub async fn get(&self, id: &str) -> Result<Option<AssetStatusRecord>, StoreError> {
        self.store
            .find(ASSET_STATUSES_TABLE, id)
            .await
            .map_err(|e| StoreError::from_record(ENTITY, e))?
            .as_ref()
            .map(decode)
            .transpose()
    }

    /// Look up an asset that must exist
    pub async fn require(&self, id: &str) -> Result<AssetStatusRecord, StoreError> {
        self.get(id).await?.ok_or_else(|| StoreError::NotFound {
            entity: ENTITY,
            id: id.to_string(),
        })
    }

    /// Look up an asset by its natural key
    pub async fn get_by_key(
        &self,
        review_token: &str,
        source_ref: &str,
    ) -> Result<Option<AssetStatusRecord>, StoreError> {
        let filter = Filter::new()
            .eq("review_token", review_token)
            .eq("source_content_ref", source_ref);
        let records = self
            .store
            .list(ASSET_STATUSES_TABLE, &filter, Some(2))
            .await
            .map_err(|e| StoreError::from_record(ENTITY, e))?;
        if records.len() > 1 {
            tracing::warn!(
                review_token,
                source_ref,
                "Duplicate asset records share a key; using the lowest id"
            );
        }
        records.first().map(decode).transpose()
    }

    /// All assets on one review page
    pub async fn list_by_token(
        &self,
        review_token: &str,
    ) -> Result<Vec<AssetStatusRecord>, StoreError> {
        let filter = Filter::new().eq("review_token", review_token);
        self.store
            .list(ASSET_STATUSES_TABLE, &filter, None)
            .await
            .map_err(|e| StoreError::from_record(ENTITY, e))?
            .iter()
            .map(decode)
            .collect()
    }

    /// Approved assets flagged ready and not yet delivered, lowest id first
    pub async fn list_ready_undelivered(
        &self,
        limit: usize,
    ) -> Result<Vec<AssetStatusRecord>, StoreError> {
        // Rows written outside this service may carry a null flag
        let filter = Filter::new()
            .eq("ready_for_delivery", true)
            .not_true("delivered_flag");
        let records = self
            .store
            .list(ASSET_STATUSES_TABLE, &filter, None)
            .await
            .map_err(|e| StoreError::from_record(ENTITY, e))?;

        let mut ready = Vec::new();
        for record in &records {
            let asset = decode(record)?;
            if asset.is_ready() {
                ready.push(asset);
                if ready.len() == limit {
                    break;
                }
            }
        }
        Ok(ready)
    }

    /// Record that a reviewer viewed an asset, creating its record on first view
    pub async fn upsert_seen(
        &self,
        asset: &SeenAsset,
        seen_at: DateTime<Utc>,
    ) -> Result<AssetStatusRecord, StoreError> {
        validate_identity(&asset.review_token, &asset.source_content_ref, &asset.filename)?;
        let seen_at = store_timestamp(seen_at);

        let Some(existing) = self
            .get_by_key(&asset.review_token, &asset.source_content_ref)
            .await?
        else {
            let record = self
                .create(AssetStatusRecord::first_seen(asset, seen_at))
                .await?;
            self.audit(&record.id, AssetAction::Seen, json!({"first_view": true}))
                .await;
            return Ok(record);
        };

        let next = ReviewStateMachine::transition(existing.status, ReviewEvent::View)?;
        let mut fields = to_fields(json!({ "last_seen_at": seen_at }));
        if existing.first_seen_at.is_none() {
            fields.insert("first_seen_at".to_string(), json!(seen_at));
        }
        if next != existing.status {
            fields.insert("status".to_string(), json!(next));
        }

        let record = self.write(&existing.id, fields).await?;
        if next != existing.status {
            self.audit(
                &record.id,
                AssetAction::Seen,
                json!({"from": existing.status, "to": next}),
            )
            .await;
        }
        Ok(record)
    }

    /// Create a record for an asset that predates view tracking.
    /// Existing records are returned untouched.
    pub async fn backfill(&self, asset: &BackfillAsset) -> Result<Applied, StoreError> {
        validate_identity(&asset.review_token, &asset.source_content_ref, &asset.filename)?;

        if let Some(existing) = self
            .get_by_key(&asset.review_token, &asset.source_content_ref)
            .await?
        {
            return Ok(Applied::unchanged(existing));
        }

        let record = self
            .create(AssetStatusRecord::backfilled(asset, Utc::now()))
            .await?;
        self.audit(
            &record.id,
            AssetAction::Backfilled,
            json!({"status": record.status}),
        )
        .await;
        Ok(Applied::changed(record))
    }

    /// Apply a reviewer decision. Requesting changes on an undelivered asset
    /// withdraws it from delivery.
    pub async fn set_review_status(
        &self,
        id: &str,
        target: ReviewStatus,
        notes: Option<String>,
    ) -> Result<Applied, StoreError> {
        let existing = self.require(id).await?;
        let next = ReviewStateMachine::transition(existing.status, ReviewEvent::targeting(target)?)?;

        let mut fields = Fields::new();
        if next != existing.status {
            fields.insert("status".to_string(), json!(next));
        }
        if next == ReviewStatus::NeedsChanges
            && existing.ready_for_delivery
            && !existing.is_delivered()
        {
            fields.insert("ready_for_delivery".to_string(), json!(false));
        }
        if let Some(notes) = notes.filter(|n| existing.notes.as_ref() != Some(n)) {
            fields.insert("notes".to_string(), json!(notes));
        }
        if fields.is_empty() {
            return Ok(Applied::unchanged(existing));
        }

        let record = self.write(id, fields).await?;
        if next != existing.status {
            self.audit(
                id,
                AssetAction::ReviewStatus,
                json!({"from": existing.status, "to": next}),
            )
            .await;
        }
        Ok(Applied::changed(record))
    }

    /// Apply a client approval to many assets, chunked to the store's
    /// bulk limit. Records already carrying this approval are not rewritten.
    pub async fn bulk_set_client_approved(
        &self,
        ids: &[String],
        approval: &ClientApproval,
    ) -> Result<BulkApproval, StoreError> {
        let batch = BatchReference::parse(&approval.delivery_batch_ref)
            .map_err(|e| StoreError::Validation(e.to_string()))?;
        let limit = self.store.batch_limit().max(1);

        let mut outcome = BulkApproval {
            requested: ids.len(),
            ..BulkApproval::default()
        };
        for (index, chunk) in ids.chunks(limit).enumerate() {
            match self.approve_chunk(chunk, approval, &batch).await {
                Ok(changed) => {
                    outcome.succeeded += chunk.len();
                    for id in changed {
                        if !outcome.changed.contains(&id) {
                            outcome.changed.push(id);
                        }
                    }
                }
                Err(err) => {
                    let failed_at = index * limit;
                    tracing::warn!(
                        failed_at_index = failed_at,
                        requested = ids.len(),
                        error = %err,
                        "Bulk client approval stopped at failing chunk"
                    );
                    outcome.failed_at_index = Some(failed_at);
                    outcome.retriable = err.is_transient();
                    outcome.error = Some(err.to_string());
                    break;
                }
            }
        }

        tracing::info!(
            requested = outcome.requested,
            succeeded = outcome.succeeded,
            changed = outcome.changed.len(),
            batch = %batch,
            "Applied client approval"
        );
        Ok(outcome)
    }

    async fn approve_chunk(
        &self,
        chunk: &[String],
        approval: &ClientApproval,
        batch: &BatchReference,
    ) -> Result<Vec<String>, StoreError> {
        let filter = Filter::new().ids(chunk.to_vec());
        let records: Vec<AssetStatusRecord> = self
            .store
            .list(ASSET_STATUSES_TABLE, &filter, None)
            .await
            .map_err(|e| StoreError::from_record(ENTITY, e))?
            .iter()
            .map(decode)
            .collect::<Result<_, _>>()?;

        if let Some(missing) = chunk.iter().find(|id| !records.iter().any(|r| &r.id == *id)) {
            return Err(StoreError::NotFound {
                entity: ENTITY,
                id: missing.clone(),
            });
        }

        let updates: Vec<RecordUpdate> = records
            .iter()
            .filter_map(|record| {
                approval_fields(record, approval, batch).map(|fields| RecordUpdate {
                    id: record.id.clone(),
                    fields,
                })
            })
            .collect();
        if updates.is_empty() {
            return Ok(Vec::new());
        }

        let changed: Vec<String> = updates.iter().map(|u| u.id.clone()).collect();
        self.write_many(updates).await?;
        for id in &changed {
            self.audit(
                id,
                AssetAction::ClientApproved,
                json!({
                    "delivery_batch_ref": batch.as_str(),
                    "approved_by_email": approval.approved_by.email,
                }),
            )
            .await;
        }
        Ok(changed)
    }

    /// Write the delivery markers. Check-then-write: callers serialize
    /// per asset so that the check cannot race a concurrent delivery.
    pub async fn mark_delivered(
        &self,
        id: &str,
        destination_ref: &str,
        content_url: &str,
        delivered_at: DateTime<Utc>,
    ) -> Result<Applied, StoreError> {
        let existing = self.require(id).await?;
        if existing.is_delivered() {
            return Ok(Applied::unchanged(existing));
        }

        let delivered_at = store_timestamp(delivered_at);
        let record = self
            .write(
                id,
                to_fields(json!({
                    "delivered_at": delivered_at,
                    "delivered_flag": true,
                    "delivered_destination_ref": destination_ref,
                    "delivered_content_url": content_url,
                    "last_delivery_error": null,
                    "last_delivery_attempt_at": delivered_at,
                })),
            )
            .await?;
        self.audit(
            id,
            AssetAction::Delivered,
            json!({"destination_ref": destination_ref, "content_url": content_url}),
        )
        .await;
        Ok(Applied::changed(record))
    }

    /// Record that the partner began downloading; only the first report counts
    pub async fn mark_partner_download_started(
        &self,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<Applied, StoreError> {
        let existing = self.require(id).await?;
        if existing.partner_download_started_at.is_some() {
            return Ok(Applied::unchanged(existing));
        }

        let at = store_timestamp(at);
        let record = self
            .write(id, to_fields(json!({ "partner_download_started_at": at })))
            .await?;
        if record.partner_download_started_at.is_none() {
            return Ok(Applied::unchanged(record));
        }
        self.audit(id, AssetAction::PartnerDownloadStarted, json!({}))
            .await;
        Ok(Applied::changed(record))
    }

    /// Record that the partner finished downloading; only the first report counts
    pub async fn mark_partner_downloaded(
        &self,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<Applied, StoreError> {
        let existing = self.require(id).await?;
        if existing.partner_downloaded_at.is_some() {
            return Ok(Applied::unchanged(existing));
        }

        let at = store_timestamp(at);
        let mut fields = to_fields(json!({ "partner_downloaded_at": at }));
        if existing.partner_download_started_at.is_none() {
            fields.insert("partner_download_started_at".to_string(), json!(at));
        }
        let record = self.write(id, fields).await?;
        if record.partner_downloaded_at.is_none() {
            return Ok(Applied::unchanged(record));
        }
        self.audit(id, AssetAction::PartnerDownloaded, json!({})).await;
        Ok(Applied::changed(record))
    }

    /// Persist the stable batch id a display-name reference resolved to
    pub async fn record_batch_resolution(
        &self,
        id: &str,
        batch_id: &str,
    ) -> Result<(), StoreError> {
        self.write(id, to_fields(json!({ "delivery_batch_id": batch_id })))
            .await?;
        Ok(())
    }

    /// Persist why the last delivery attempt failed
    pub async fn record_delivery_failure(
        &self,
        id: &str,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.write(
            id,
            to_fields(json!({
                "last_delivery_error": reason,
                "last_delivery_attempt_at": store_timestamp(at),
            })),
        )
        .await?;
        Ok(())
    }

    async fn create(&self, record: AssetStatusRecord) -> Result<AssetStatusRecord, StoreError> {
        let caps = self.capabilities().await?;
        let mut fields = caps.filter(to_fields(serde_json::to_value(&record).map_err(
            |e| StoreError::Backend(format!("asset record does not serialize: {e}")),
        )?));
        loop {
            match self
                .store
                .create(ASSET_STATUSES_TABLE, fields.clone())
                .await
            {
                Ok(created) => return decode(&created),
                Err(RecordStoreError::UnknownField { table, field }) => {
                    if caps.degrade(&field) && fields.remove(&field).is_some() {
                        continue;
                    }
                    return Err(StoreError::SchemaFieldMissing { table, field });
                }
                Err(err) => return Err(StoreError::from_record(ENTITY, err)),
            }
        }
    }

    /// Update one record, omitting unavailable optional fields. A write left
    /// with nothing to change returns the current record.
    async fn write(&self, id: &str, fields: Fields) -> Result<AssetStatusRecord, StoreError> {
        let caps = self.capabilities().await?;
        let mut fields = caps.filter(fields);
        loop {
            if fields.is_empty() {
                return self.require(id).await;
            }
            match self
                .store
                .update(ASSET_STATUSES_TABLE, id, fields.clone())
                .await
            {
                Ok(updated) => return decode(&updated),
                Err(RecordStoreError::UnknownField { table, field }) => {
                    if caps.degrade(&field) && fields.remove(&field).is_some() {
                        continue;
                    }
                    return Err(StoreError::SchemaFieldMissing { table, field });
                }
                Err(err) => return Err(StoreError::from_record(ENTITY, err)),
            }
        }
    }

    /// Atomic bulk update of at most `batch_limit()` records
    async fn write_many(&self, updates: Vec<RecordUpdate>) -> Result<(), StoreError> {
        let caps = self.capabilities().await?;
        let mut updates: Vec<RecordUpdate> = updates
            .into_iter()
            .map(|u| RecordUpdate {
                id: u.id,
                fields: caps.filter(u.fields),
            })
            .collect();
        loop {
            match self
                .store
                .update_many(ASSET_STATUSES_TABLE, updates.clone())
                .await
            {
                Ok(_) => return Ok(()),
                Err(RecordStoreError::UnknownField { table, field }) => {
                    let mut removed = false;
                    if caps.degrade(&field) {
                        for update in &mut updates {
                            removed |= update.fields.remove(&field).is_some();
                        }
                    }
                    if !removed {
                        return Err(StoreError::SchemaFieldMissing { table, field });
                    }
                }
                Err(err) => return Err(StoreError::from_record(ENTITY, err)),
            }
        }
    }

    /// Append an audit row. The state change has already been committed,
    /// so a failed append is logged rather than surfaced.
    async fn audit(&self, asset_id: &str, action: AssetAction, payload: Value) {
        let event = AssetStatusEvent::new(asset_id, action, payload);
        let fields = match serde_json::to_value(&event) {
            Ok(value) => to_fields(value),
            Err(e) => {
                tracing::warn!(asset_id, %action, error = %e, "Audit event does not serialize");
                return;
            }
        };
        if let Err(e) = self.store.create(ASSET_STATUS_EVENTS_TABLE, fields).await {
            tracing::warn!(asset_id, %action, error = %e, "Failed to append audit event");
        }
    }
}
