use crate::backend::{KvBackend, Table, is_expired, merge_fields, now_epoch_ms};
use crate::error::{Result, StoreError};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::{Map, Value};

/// In-memory backend for local development and tests.
///
/// Expiry is enforced lazily: an expired document behaves as absent for
/// every operation, and each `create_if_absent` reaps the expired documents
/// of the whole table so abandoned keys do not accumulate.
#[derive(Default)]
pub struct MemoryBackend {
    chats: DashMap<String, Value>,
    pipelines: DashMap<String, Value>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, table: Table) -> &DashMap<String, Value> {
        match table {
            Table::Chats => &self.chats,
            Table::Pipelines => &self.pipelines,
        }
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn create_if_absent(&self, table: Table, key: &str, doc: Value) -> Result<()> {
        let now = now_epoch_ms();
        // Pipeline keys never recur once expired, so reap the whole table
        // here rather than only on key touch.
        self.table(table).retain(|_, existing| !is_expired(existing, now));
        // The dashmap entry holds a shard lock, making the check-then-insert
        // atomic with respect to concurrent calls on the same key.
        match self.table(table).entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if is_expired(occupied.get(), now) {
                    occupied.insert(doc);
                    Ok(())
                } else {
                    Err(StoreError::AlreadyExists)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(doc);
                Ok(())
            }
        }
    }

    async fn get(&self, table: Table, key: &str) -> Result<Value> {
        let now = now_epoch_ms();
        let map = self.table(table);
        if let Some(existing) = map.get(key) {
            if !is_expired(existing.value(), now) {
                return Ok(existing.value().clone());
            }
        } else {
            return Err(StoreError::NotFound);
        }
        map.remove_if(key, |_, doc| is_expired(doc, now));
        Err(StoreError::NotFound)
    }

    async fn put(&self, table: Table, key: &str, doc: Value) -> Result<()> {
        self.table(table).insert(key.to_string(), doc);
        Ok(())
    }

    async fn update_fields(
        &self,
        table: Table,
        key: &str,
        fields: Map<String, Value>,
    ) -> Result<()> {
        let now = now_epoch_ms();
        match self.table(table).entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if is_expired(occupied.get(), now) {
                    occupied.remove();
                    return Err(StoreError::NotFound);
                }
                merge_fields(occupied.get_mut(), fields)
            }
            Entry::Vacant(_) => Err(StoreError::NotFound),
        }
    }

    async fn delete(&self, table: Table, key: &str) -> Result<()> {
        self.table(table).remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryBackend;
    use crate::backend::{EXPIRES_AT_FIELD, KvBackend, Table, now_epoch_ms};
    use crate::error::StoreError;
    use serde_json::{Map, Value, json};
    use std::time::Duration;

    fn doc(message_id: i64, ttl_ms: i64) -> Value {
        json!({
            "message_id": message_id,
            EXPIRES_AT_FIELD: now_epoch_ms() + ttl_ms,
        })
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let backend = MemoryBackend::new();
        backend
            .create_if_absent(Table::Pipelines, "k1", doc(7, 60_000))
            .await
            .unwrap();
        let fetched = backend.get(Table::Pipelines, "k1").await.unwrap();
        assert_eq!(fetched["message_id"], 7);
    }

    #[tokio::test]
    async fn second_create_is_rejected_while_record_is_live() {
        let backend = MemoryBackend::new();
        backend
            .create_if_absent(Table::Pipelines, "k1", doc(1, 60_000))
            .await
            .unwrap();
        let err = backend
            .create_if_absent(Table::Pipelines, "k1", doc(2, 60_000))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists));
    }

    #[tokio::test]
    async fn expired_record_is_absent_for_get_and_create() {
        let backend = MemoryBackend::new();
        backend
            .create_if_absent(Table::Pipelines, "k1", doc(1, -5_000))
            .await
            .unwrap();
        assert!(matches!(
            backend.get(Table::Pipelines, "k1").await.unwrap_err(),
            StoreError::NotFound
        ));
        // The expired record must not block a new reservation.
        backend
            .create_if_absent(Table::Pipelines, "k1", doc(2, 60_000))
            .await
            .unwrap();
        let fetched = backend.get(Table::Pipelines, "k1").await.unwrap();
        assert_eq!(fetched["message_id"], 2);
    }

    #[tokio::test]
    async fn sub_second_ttl_stays_live_until_it_lapses() {
        let backend = MemoryBackend::new();
        backend
            .create_if_absent(Table::Pipelines, "k1", doc(1, 200))
            .await
            .unwrap();
        // A 200 ms expiry must not truncate down to "already expired".
        let fetched = backend.get(Table::Pipelines, "k1").await.unwrap();
        assert_eq!(fetched["message_id"], 1);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(matches!(
            backend.get(Table::Pipelines, "k1").await.unwrap_err(),
            StoreError::NotFound
        ));
    }

    #[tokio::test]
    async fn create_reaps_expired_records_under_other_keys() {
        let backend = MemoryBackend::new();
        for i in 0..20 {
            backend
                .put(Table::Pipelines, &format!("dead-{i}"), doc(i, -1_000))
                .await
                .unwrap();
        }
        backend
            .create_if_absent(Table::Pipelines, "live", doc(99, 60_000))
            .await
            .unwrap();
        assert_eq!(backend.pipelines.len(), 1);
    }

    #[tokio::test]
    async fn update_fields_merges_into_live_record_only() {
        let backend = MemoryBackend::new();
        let mut fields = Map::new();
        fields.insert("touched".to_string(), json!(true));

        let err = backend
            .update_fields(Table::Chats, "missing", fields.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));

        backend.put(Table::Chats, "c1", doc(0, 60_000)).await.unwrap();
        backend
            .update_fields(Table::Chats, "c1", fields)
            .await
            .unwrap();
        let fetched = backend.get(Table::Chats, "c1").await.unwrap();
        assert_eq!(fetched["touched"], true);
        assert_eq!(fetched["message_id"], 0);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let backend = MemoryBackend::new();
        backend.put(Table::Chats, "c1", doc(0, 60_000)).await.unwrap();
        backend.delete(Table::Chats, "c1").await.unwrap();
        backend.delete(Table::Chats, "c1").await.unwrap();
        assert!(matches!(
            backend.get(Table::Chats, "c1").await.unwrap_err(),
            StoreError::NotFound
        ));
    }
}
