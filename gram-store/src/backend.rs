use crate::error::{Result, StoreError};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};

pub const EXPIRES_AT_FIELD: &str = "expires_at";

/// Logical tables. Each backend maps these onto its own storage unit
/// (a dashmap, a SQLite table, a Postgres table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Chats,
    Pipelines,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Chats => "chats",
            Table::Pipelines => "pipelines",
        }
    }

    pub const ALL: [Table; 2] = [Table::Chats, Table::Pipelines];
}

/// Uniform point-operation interface over a pluggable key-value store.
///
/// Documents are JSON objects carrying an `expires_at` epoch-milliseconds
/// field. Millisecond resolution matters: lease windows can be sub-second,
/// and whole-second truncation would make a fresh reservation look expired.
/// The backend reaps expired documents on its own schedule; `get` and
/// `create_if_absent` must treat an expired document as absent so callers
/// never observe a record past its stated expiry.
///
/// `create_if_absent` is the only operation the coalescing protocol's
/// correctness depends on: it must be linearizable with respect to other
/// `create_if_absent` and `get` calls on the same key.
#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn create_if_absent(&self, table: Table, key: &str, doc: Value) -> Result<()>;

    async fn get(&self, table: Table, key: &str) -> Result<Value>;

    async fn put(&self, table: Table, key: &str, doc: Value) -> Result<()>;

    /// Merge `fields` into an existing document; `NotFound` if the key is
    /// absent or expired. Used by the chat store upsert, never by coalescing.
    async fn update_fields(&self, table: Table, key: &str, fields: Map<String, Value>)
    -> Result<()>;

    async fn delete(&self, table: Table, key: &str) -> Result<()>;
}

pub(crate) fn now_epoch_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub(crate) fn doc_expires_at(doc: &Value) -> Result<i64> {
    doc.get(EXPIRES_AT_FIELD)
        .and_then(Value::as_i64)
        .ok_or_else(|| StoreError::Malformed(format!("document missing {EXPIRES_AT_FIELD}")))
}

pub(crate) fn is_expired(doc: &Value, now: i64) -> bool {
    match doc.get(EXPIRES_AT_FIELD).and_then(Value::as_i64) {
        Some(expires_at) => expires_at <= now,
        // No expiry field means the document never expires.
        None => false,
    }
}

pub(crate) fn merge_fields(doc: &mut Value, fields: Map<String, Value>) -> Result<()> {
    let object = doc
        .as_object_mut()
        .ok_or_else(|| StoreError::Malformed("document is not a JSON object".to_string()))?;
    for (name, value) in fields {
        object.insert(name, value);
    }
    Ok(())
}
