//! Schema capability negotiation
//!
//! Operators may add or drop optional columns at any time. Each repository
//! probes the table once, refuses to run without its required fields, and
//! degrades gracefully when an optional field is missing: writes simply
//! omit it. A field the store rejects later is demoted the same way.

use std::collections::HashSet;
use std::sync::RwLock;

use proofline_records::{Fields, RecordStore};

use crate::repository::error::StoreError;

/// Required and optional fields of one table
#[derive(Debug)]
pub struct FieldPolicy {
    pub table: &'static str,
    pub required: &'static [&'static str],
    pub optional: &'static [&'static str],
}

impl FieldPolicy {
    pub fn is_optional(&self, field: &str) -> bool {
        self.optional.contains(&field)
    }
}

pub static ASSET_STATUS_FIELDS: FieldPolicy = FieldPolicy {
    table: crate::domain::entities::ASSET_STATUSES_TABLE,
    required: &[
        "id",
        "review_token",
        "source_content_ref",
        "filename",
        "status",
        "client_approved",
        "first_seen_at",
        "last_seen_at",
        "approved_at",
        "approved_by_name",
        "approved_by_email",
        "delivery_batch_ref",
        "ready_for_delivery",
        "delivered_at",
        "delivered_flag",
        "delivered_destination_ref",
    ],
    optional: &[
        "tactic",
        "variant",
        "notes",
        "delivery_batch_id",
        "project_ref",
        "delivered_content_url",
        "partner_download_started_at",
        "partner_downloaded_at",
        "last_delivery_error",
        "last_delivery_attempt_at",
        "created_at",
    ],
};

pub static DELIVERY_BATCH_FIELDS: FieldPolicy = FieldPolicy {
    table: crate::domain::entities::DELIVERY_BATCHES_TABLE,
    required: &["id", "display_name", "destination_location_ref"],
    optional: &["project_ref", "status_tag"],
};

/// Negotiated view of which optional fields a table currently accepts
#[derive(Debug)]
pub struct SchemaCapabilities {
    policy: &'static FieldPolicy,
    unavailable: RwLock<HashSet<String>>,
}

impl SchemaCapabilities {
    /// Assume every field exists; used when the backend cannot report its schema
    pub fn assume_all(policy: &'static FieldPolicy) -> Self {
        Self {
            policy,
            unavailable: RwLock::new(HashSet::new()),
        }
    }

    /// Probe the table and record which optional fields are missing.
    /// Fails when a required field is missing.
    pub async fn negotiate(
        store: &dyn RecordStore,
        policy: &'static FieldPolicy,
    ) -> Result<Self, StoreError> {
        let Some(names) = store.field_names(policy.table).await? else {
            tracing::debug!(
                table = policy.table,
                "Record store cannot report its schema; assuming all fields exist"
            );
            return Ok(Self::assume_all(policy));
        };
        let present: HashSet<&str> = names.iter().map(String::as_str).collect();

        if let Some(missing) = policy.required.iter().find(|f| !present.contains(*f)) {
            return Err(StoreError::SchemaFieldMissing {
                table: policy.table.to_string(),
                field: missing.to_string(),
            });
        }

        let unavailable: HashSet<String> = policy
            .optional
            .iter()
            .filter(|f| !present.contains(*f))
            .map(|f| f.to_string())
            .collect();
        for field in &unavailable {
            tracing::warn!(
                table = policy.table,
                field = %field,
                "Optional field missing from schema; writes will omit it"
            );
        }

        Ok(Self {
            policy,
            unavailable: RwLock::new(unavailable),
        })
    }

    pub fn is_available(&self, field: &str) -> bool {
        self.unavailable
            .read()
            .map(|set| !set.contains(field))
            .unwrap_or(true)
    }

    /// Drop unavailable optional fields from a write
    pub fn filter(&self, mut fields: Fields) -> Fields {
        if let Ok(unavailable) = self.unavailable.read() {
            fields.retain(|name, _| !unavailable.contains(name));
        }
        fields
    }

    /// Demote a field the store rejected. Returns false for required or
    /// unknown fields, which cannot be dropped from a write.
    pub fn degrade(&self, field: &str) -> bool {
        if !self.policy.is_optional(field) {
            return false;
        }
        if let Ok(mut unavailable) = self.unavailable.write() {
            if unavailable.insert(field.to_string()) {
                tracing::warn!(
                    table = self.policy.table,
                    field,
                    "Store rejected optional field; omitting it from now on"
                );
            }
        }
        true
    }
}
