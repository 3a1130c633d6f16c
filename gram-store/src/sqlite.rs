use crate::backend::{KvBackend, Table, doc_expires_at, merge_fields, now_epoch_ms};
use crate::error::{Result, StoreError};
use async_trait::async_trait;
use rusqlite::{Connection, params};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// SQLite-backed store. Conditional creates ride on the primary-key
/// constraint; expired rows are filtered on read and reaped opportunistically
/// before each conditional create.
///
/// rusqlite is synchronous, so every operation runs on the blocking pool with
/// the connection behind a mutex.
#[derive(Clone)]
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        for table in Table::ALL {
            conn.execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {} (
                        key TEXT PRIMARY KEY,
                        doc TEXT NOT NULL,
                        expires_at INTEGER NOT NULL
                    )",
                    table.as_str()
                ),
                [],
            )?;
        }
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| StoreError::Backend("sqlite connection lock poisoned".to_string()))?;
            op(&guard)
        })
        .await?
    }
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(inner, _)
            if inner.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[async_trait]
impl KvBackend for SqliteBackend {
    async fn create_if_absent(&self, table: Table, key: &str, doc: Value) -> Result<()> {
        let key = key.to_string();
        let expires_at = doc_expires_at(&doc)?;
        let encoded = serde_json::to_string(&doc)?;
        self.with_conn(move |conn| {
            let now = now_epoch_ms();
            // Reap every stale row, not just this key's: an expired
            // reservation must not block a new one, and pipeline keys never
            // recur after expiry, so this is the only place dead rows go.
            // Both statements hold the connection lock, and SQLite
            // serializes writers, so the pair is atomic per key.
            conn.execute(
                &format!("DELETE FROM {} WHERE expires_at <= ?1", table.as_str()),
                params![now],
            )?;
            let inserted = conn.execute(
                &format!(
                    "INSERT INTO {} (key, doc, expires_at) VALUES (?1, ?2, ?3)",
                    table.as_str()
                ),
                params![key, encoded, expires_at],
            );
            match inserted {
                Ok(_) => Ok(()),
                Err(e) if is_constraint_violation(&e) => Err(StoreError::AlreadyExists),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn get(&self, table: Table, key: &str) -> Result<Value> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let now = now_epoch_ms();
            let row: std::result::Result<String, rusqlite::Error> = conn.query_row(
                &format!(
                    "SELECT doc FROM {} WHERE key = ?1 AND expires_at > ?2",
                    table.as_str()
                ),
                params![key, now],
                |row| row.get(0),
            );
            match row {
                Ok(encoded) => Ok(serde_json::from_str(&encoded)?),
                Err(rusqlite::Error::QueryReturnedNoRows) => Err(StoreError::NotFound),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn put(&self, table: Table, key: &str, doc: Value) -> Result<()> {
        let key = key.to_string();
        let expires_at = doc_expires_at(&doc)?;
        let encoded = serde_json::to_string(&doc)?;
        self.with_conn(move |conn| {
            conn.execute(
                &format!(
                    "INSERT OR REPLACE INTO {} (key, doc, expires_at) VALUES (?1, ?2, ?3)",
                    table.as_str()
                ),
                params![key, encoded, expires_at],
            )?;
            Ok(())
        })
        .await
    }

    async fn update_fields(
        &self,
        table: Table,
        key: &str,
        fields: Map<String, Value>,
    ) -> Result<()> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let now = now_epoch_ms();
            let row: std::result::Result<String, rusqlite::Error> = conn.query_row(
                &format!(
                    "SELECT doc FROM {} WHERE key = ?1 AND expires_at > ?2",
                    table.as_str()
                ),
                params![key, now],
                |row| row.get(0),
            );
            let mut doc: Value = match row {
                Ok(encoded) => serde_json::from_str(&encoded)?,
                Err(rusqlite::Error::QueryReturnedNoRows) => return Err(StoreError::NotFound),
                Err(e) => return Err(e.into()),
            };
            merge_fields(&mut doc, fields)?;
            let expires_at = doc_expires_at(&doc)?;
            let encoded = serde_json::to_string(&doc)?;
            conn.execute(
                &format!(
                    "UPDATE {} SET doc = ?2, expires_at = ?3 WHERE key = ?1",
                    table.as_str()
                ),
                params![key, encoded, expires_at],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, table: Table, key: &str) -> Result<()> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                &format!("DELETE FROM {} WHERE key = ?1", table.as_str()),
                params![key],
            )?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::SqliteBackend;
    use crate::backend::{EXPIRES_AT_FIELD, KvBackend, Table, now_epoch_ms};
    use crate::error::StoreError;
    use serde_json::{Map, json};

    fn open_temp() -> SqliteBackend {
        SqliteBackend::open(":memory:").unwrap()
    }

    #[tokio::test]
    async fn create_get_put_delete_cycle() {
        let backend = open_temp();
        let doc = json!({"message_id": 42, EXPIRES_AT_FIELD: now_epoch_ms() + 60_000});
        backend
            .create_if_absent(Table::Pipelines, "k", doc.clone())
            .await
            .unwrap();
        assert!(matches!(
            backend
                .create_if_absent(Table::Pipelines, "k", doc)
                .await
                .unwrap_err(),
            StoreError::AlreadyExists
        ));

        let fetched = backend.get(Table::Pipelines, "k").await.unwrap();
        assert_eq!(fetched["message_id"], 42);

        let replacement = json!({"message_id": 43, EXPIRES_AT_FIELD: now_epoch_ms() + 60_000});
        backend.put(Table::Pipelines, "k", replacement).await.unwrap();
        let fetched = backend.get(Table::Pipelines, "k").await.unwrap();
        assert_eq!(fetched["message_id"], 43);

        backend.delete(Table::Pipelines, "k").await.unwrap();
        assert!(matches!(
            backend.get(Table::Pipelines, "k").await.unwrap_err(),
            StoreError::NotFound
        ));
    }

    #[tokio::test]
    async fn expired_row_does_not_block_a_new_create() {
        let backend = open_temp();
        let stale = json!({"message_id": 0, EXPIRES_AT_FIELD: now_epoch_ms() - 1_000});
        backend
            .create_if_absent(Table::Pipelines, "k", stale)
            .await
            .unwrap();
        assert!(matches!(
            backend.get(Table::Pipelines, "k").await.unwrap_err(),
            StoreError::NotFound
        ));

        let fresh = json!({"message_id": 9, EXPIRES_AT_FIELD: now_epoch_ms() + 60_000});
        backend
            .create_if_absent(Table::Pipelines, "k", fresh)
            .await
            .unwrap();
        let fetched = backend.get(Table::Pipelines, "k").await.unwrap();
        assert_eq!(fetched["message_id"], 9);
    }

    #[tokio::test]
    async fn create_reaps_expired_rows_under_other_keys() {
        let backend = open_temp();
        for i in 0..20 {
            let stale = json!({"message_id": i, EXPIRES_AT_FIELD: now_epoch_ms() - 1_000});
            backend
                .put(Table::Pipelines, &format!("dead-{i}"), stale)
                .await
                .unwrap();
        }
        let fresh = json!({"message_id": 99, EXPIRES_AT_FIELD: now_epoch_ms() + 60_000});
        backend
            .create_if_absent(Table::Pipelines, "live", fresh)
            .await
            .unwrap();

        let count: i64 = backend
            .conn
            .lock()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM pipelines", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn update_fields_requires_a_live_row() {
        let backend = open_temp();
        let mut fields = Map::new();
        fields.insert("updated".to_string(), json!("yes"));
        assert!(matches!(
            backend
                .update_fields(Table::Chats, "c", fields.clone())
                .await
                .unwrap_err(),
            StoreError::NotFound
        ));

        let doc = json!({"bot": "gitlab", EXPIRES_AT_FIELD: now_epoch_ms() + 60_000});
        backend.put(Table::Chats, "c", doc).await.unwrap();
        backend.update_fields(Table::Chats, "c", fields).await.unwrap();
        let fetched = backend.get(Table::Chats, "c").await.unwrap();
        assert_eq!(fetched["updated"], "yes");
        assert_eq!(fetched["bot"], "gitlab");
    }
}
