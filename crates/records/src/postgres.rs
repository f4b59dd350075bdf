//! PostgreSQL record store
//!
//! Each logical table is a real Postgres table. Rows are projected with
//! `to_jsonb(t.*)` and written through `jsonb_populate_record`, so the adapter
//! stays schema-agnostic while Postgres keeps the column types.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, LazyLock};

use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::RwLock;

use crate::{Fields, Filter, Record, RecordStore, RecordStoreError, RecordUpdate};

/// Table and column names are interpolated into SQL, so they must be plain identifiers.
static IDENTIFIER_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^[a-z_][a-z0-9_]{0,62}$").expect("identifier regex is valid")
});

/// SQLSTATE for `undefined_column`
const UNDEFINED_COLUMN: &str = "42703";

pub struct PgRecordStore {
    pool: PgPool,
    batch_limit: usize,
    columns: RwLock<HashMap<String, Arc<HashSet<String>>>>,
}

impl PgRecordStore {
    pub fn new(pool: PgPool, batch_limit: usize) -> Self {
        Self {
            pool,
            batch_limit,
            columns: RwLock::new(HashMap::new()),
        }
    }

    /// Connect a pool and build the store
    pub async fn connect(
        url: &str,
        max_connections: u32,
        batch_limit: usize,
    ) -> Result<Self, RecordStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error(e, "connect"))?;
        Ok(Self::new(pool, batch_limit))
    }

    async fn load_columns(&self, table: &str) -> Result<Arc<HashSet<String>>, RecordStoreError> {
        let names = sqlx::query_scalar::<_, String>(
            "SELECT column_name::text FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = $1 \
             ORDER BY ordinal_position",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(e, table))?;

        let set = Arc::new(names.into_iter().collect::<HashSet<_>>());
        self.columns
            .write()
            .await
            .insert(table.to_string(), set.clone());
        Ok(set)
    }

    /// Reject field names the table does not have. The cached column set is
    /// refreshed once before giving up, in case the schema grew.
    async fn ensure_known_fields(&self, table: &str, fields: &Fields) -> Result<(), RecordStoreError> {
        for field in fields.keys() {
            validate_identifier(field)?;
        }

        let cached = self.columns.read().await.get(table).cloned();
        let columns = match cached {
            Some(columns) if fields.keys().all(|f| columns.contains(f)) => return Ok(()),
            _ => self.load_columns(table).await?,
        };

        match fields.keys().find(|f| !columns.contains(*f)) {
            Some(field) => Err(RecordStoreError::UnknownField {
                table: table.to_string(),
                field: field.clone(),
            }),
            None => Ok(()),
        }
    }

    async fn update_in<'e, E>(
        executor: E,
        table: &str,
        id: &str,
        fields: &Fields,
    ) -> Result<Option<Value>, RecordStoreError>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let columns: Vec<&str> = fields.keys().map(String::as_str).collect();
        let sql = update_sql(table, &columns);
        sqlx::query_scalar::<_, Value>(&sql)
            .bind(id)
            .bind(Value::Object(fields.clone()))
            .fetch_optional(executor)
            .await
            .map_err(|e| map_sqlx_error(e, table))
    }
}

#[async_trait::async_trait]
impl RecordStore for PgRecordStore {
    fn batch_limit(&self) -> usize {
        self.batch_limit
    }

    async fn find(&self, table: &str, id: &str) -> Result<Option<Record>, RecordStoreError> {
        validate_identifier(table)?;
        let sql = format!("SELECT to_jsonb(t.*) FROM \"{table}\" AS t WHERE t.id = $1");
        let row = sqlx::query_scalar::<_, Value>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(e, table))?;

        row.map(into_record).transpose()
    }

    async fn list(
        &self,
        table: &str,
        filter: &Filter,
        limit: Option<usize>,
    ) -> Result<Vec<Record>, RecordStoreError> {
        validate_identifier(table)?;
        let sql = format!(
            "SELECT to_jsonb(t.*) FROM \"{table}\" AS t \
             WHERE to_jsonb(t.*) @> $1::jsonb \
             AND ($2::text[] IS NULL OR t.id = ANY($2)) \
             AND NOT EXISTS (SELECT 1 FROM unnest($4::text[]) AS f(name) \
                             WHERE to_jsonb(t.*) -> f.name = 'true'::jsonb) \
             ORDER BY t.id LIMIT $3"
        );
        let rows = sqlx::query_scalar::<_, Value>(&sql)
            .bind(Value::Object(filter.equals.clone()))
            .bind(filter.id_in.clone())
            .bind(limit.map(|l| l as i64))
            .bind(filter.not_true.clone())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(e, table))?;

        rows.into_iter().map(into_record).collect()
    }

    async fn create(&self, table: &str, fields: Fields) -> Result<Record, RecordStoreError> {
        validate_identifier(table)?;
        if !fields.contains_key("id") {
            return Err(RecordStoreError::InvalidData(
                "records must be created with an id".to_string(),
            ));
        }
        self.ensure_known_fields(table, &fields).await?;

        let sql = format!(
            "INSERT INTO \"{table}\" AS t \
             SELECT * FROM jsonb_populate_record(NULL::\"{table}\", $1::jsonb) \
             RETURNING to_jsonb(t.*)"
        );
        let row = sqlx::query_scalar::<_, Value>(&sql)
            .bind(Value::Object(fields))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(e, table))?;

        into_record(row)
    }

    async fn update(
        &self,
        table: &str,
        id: &str,
        fields: Fields,
    ) -> Result<Record, RecordStoreError> {
        validate_identifier(table)?;
        if fields.is_empty() {
            return self
                .find(table, id)
                .await?
                .ok_or_else(|| not_found(table, id));
        }
        self.ensure_known_fields(table, &fields).await?;

        Self::update_in(&self.pool, table, id, &fields)
            .await?
            .map(into_record)
            .transpose()?
            .ok_or_else(|| not_found(table, id))
    }

    async fn update_many(
        &self,
        table: &str,
        updates: Vec<RecordUpdate>,
    ) -> Result<Vec<Record>, RecordStoreError> {
        validate_identifier(table)?;
        if updates.len() > self.batch_limit {
            return Err(RecordStoreError::BatchTooLarge {
                size: updates.len(),
                limit: self.batch_limit,
            });
        }
        for update in &updates {
            self.ensure_known_fields(table, &update.fields).await?;
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(e, table))?;

        let mut records = Vec::with_capacity(updates.len());
        for update in &updates {
            let row = if update.fields.is_empty() {
                let sql = format!("SELECT to_jsonb(t.*) FROM \"{table}\" AS t WHERE t.id = $1");
                sqlx::query_scalar::<_, Value>(&sql)
                    .bind(&update.id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(|e| map_sqlx_error(e, table))?
            } else {
                Self::update_in(&mut *tx, table, &update.id, &update.fields).await?
            };
            // Dropping the transaction rolls back the chunk
            let row = row.ok_or_else(|| not_found(table, &update.id))?;
            records.push(into_record(row)?);
        }

        tx.commit().await.map_err(|e| map_sqlx_error(e, table))?;
        Ok(records)
    }

    async fn field_names(&self, table: &str) -> Result<Option<Vec<String>>, RecordStoreError> {
        validate_identifier(table)?;
        let columns = self.load_columns(table).await?;
        let mut names: Vec<String> = columns.iter().cloned().collect();
        names.sort();
        Ok(Some(names))
    }
}

fn not_found(table: &str, id: &str) -> RecordStoreError {
    RecordStoreError::NotFound {
        table: table.to_string(),
        id: id.to_string(),
    }
}

fn into_record(value: Value) -> Result<Record, RecordStoreError> {
    match value {
        Value::Object(fields) => Record::from_fields(fields),
        other => Err(RecordStoreError::InvalidData(format!(
            "expected a row object, got {}",
            other
        ))),
    }
}

fn validate_identifier(name: &str) -> Result<(), RecordStoreError> {
    if IDENTIFIER_REGEX.is_match(name) {
        Ok(())
    } else {
        Err(RecordStoreError::InvalidData(format!(
            "'{}' is not a valid table or column name",
            name
        )))
    }
}

/// Build the single-row update statement for the given columns.
/// `$1` binds the record id, `$2` the JSON object of new values.
fn update_sql(table: &str, columns: &[&str]) -> String {
    let quoted: Vec<String> = columns.iter().map(|c| format!("\"{c}\"")).collect();
    let list = quoted.join(", ");
    let target = if quoted.len() == 1 {
        list.clone()
    } else {
        format!("({list})")
    };
    format!(
        "UPDATE \"{table}\" AS t SET {target} = \
         (SELECT {list} FROM jsonb_populate_record(NULL::\"{table}\", $2::jsonb)) \
         WHERE t.id = $1 RETURNING to_jsonb(t.*)"
    )
}

/// Extract the first double-quoted name from a Postgres error message,
/// e.g. `column "tactic" of relation "asset_statuses" does not exist`.
fn first_quoted_name(message: &str) -> Option<String> {
    let start = message.find('"')? + 1;
    let len = message[start..].find('"')?;
    Some(message[start..start + len].to_string())
}

fn map_sqlx_error(err: sqlx::Error, table: &str) -> RecordStoreError {
    match &err {
        sqlx::Error::Database(db) => {
            let code = db.code().map(|c| c.to_string()).unwrap_or_default();
            if code == UNDEFINED_COLUMN {
                return RecordStoreError::UnknownField {
                    table: table.to_string(),
                    field: first_quoted_name(db.message()).unwrap_or_default(),
                };
            }
            // Connection exceptions, auth failures, admin shutdown, too many
            // connections, serialization failures and deadlocks
            if code.starts_with("08")
                || code.starts_with("28")
                || matches!(code.as_str(), "57P01" | "53300" | "40001" | "40P01")
            {
                return RecordStoreError::Transient(err.to_string());
            }
            RecordStoreError::Backend(err.to_string())
        }
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => RecordStoreError::Transient(err.to_string()),
        _ => RecordStoreError::Backend(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_validation() {
        assert!(validate_identifier("asset_statuses").is_ok());
        assert!(validate_identifier("_hidden").is_ok());
        assert!(validate_identifier("Asset").is_err());
        assert!(validate_identifier("assets; DROP TABLE x").is_err());
        assert!(validate_identifier("a\"b").is_err());
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn test_update_sql_multiple_columns() {
        let sql = update_sql("asset_statuses", &["delivered_at", "delivered_flag"]);
        assert!(sql.starts_with("UPDATE \"asset_statuses\" AS t SET (\"delivered_at\", \"delivered_flag\") ="));
        assert!(sql.contains("SELECT \"delivered_at\", \"delivered_flag\" FROM jsonb_populate_record(NULL::\"asset_statuses\", $2::jsonb)"));
        assert!(sql.ends_with("WHERE t.id = $1 RETURNING to_jsonb(t.*)"));
    }

    #[test]
    fn test_update_sql_single_column_has_no_row_constructor() {
        let sql = update_sql("asset_statuses", &["notes"]);
        assert!(sql.contains("SET \"notes\" = (SELECT \"notes\" FROM"));
    }

    #[test]
    fn test_first_quoted_name() {
        assert_eq!(
            first_quoted_name("column \"tactic\" of relation \"asset_statuses\" does not exist"),
            Some("tactic".to_string())
        );
        assert_eq!(first_quoted_name("no quotes here"), None);
    }

    #[test]
    fn test_pool_errors_are_transient() {
        assert!(map_sqlx_error(sqlx::Error::PoolTimedOut, "t").is_transient());
        assert!(map_sqlx_error(sqlx::Error::PoolClosed, "t").is_transient());
        assert!(!map_sqlx_error(sqlx::Error::RowNotFound, "t").is_transient());
    }
}
