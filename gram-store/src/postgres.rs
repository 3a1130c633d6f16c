use crate::backend::{KvBackend, Table, doc_expires_at, merge_fields, now_epoch_ms};
use crate::error::{Result, StoreError};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions};

/// Postgres-backed store. `INSERT ... ON CONFLICT DO NOTHING` provides the
/// atomic create-if-absent; expired rows are filtered in every read and
/// reaped before each conditional create.
#[derive(Clone)]
pub struct PostgresBackend {
    pool: PgPool,
}

fn pg_table(table: Table) -> &'static str {
    match table {
        Table::Chats => "gram_chats",
        Table::Pipelines => "gram_pipelines",
    }
}

impl PostgresBackend {
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(8).connect(url).await?;
        for table in Table::ALL {
            sqlx::query(&format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    key TEXT PRIMARY KEY,
                    doc JSONB NOT NULL,
                    expires_at BIGINT NOT NULL
                )",
                pg_table(table)
            ))
            .execute(&pool)
            .await?;
        }
        Ok(Self { pool })
    }
}

#[async_trait]
impl KvBackend for PostgresBackend {
    async fn create_if_absent(&self, table: Table, key: &str, doc: Value) -> Result<()> {
        let expires_at = doc_expires_at(&doc)?;
        let now = now_epoch_ms();
        let mut tx = self.pool.begin().await?;
        // Reap every stale row, not just this key's; pipeline keys never
        // recur after expiry, so this is the only place dead rows go.
        sqlx::query(&format!(
            "DELETE FROM {} WHERE expires_at <= $1",
            pg_table(table)
        ))
        .bind(now)
        .execute(&mut tx)
        .await?;
        let inserted = sqlx::query(&format!(
            "INSERT INTO {} (key, doc, expires_at) VALUES ($1, $2, $3)
             ON CONFLICT (key) DO NOTHING",
            pg_table(table)
        ))
        .bind(key)
        .bind(&doc)
        .bind(expires_at)
        .execute(&mut tx)
        .await?;
        tx.commit().await?;
        if inserted.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists);
        }
        Ok(())
    }

    async fn get(&self, table: Table, key: &str) -> Result<Value> {
        let now = now_epoch_ms();
        let row = sqlx::query(&format!(
            "SELECT doc FROM {} WHERE key = $1 AND expires_at > $2",
            pg_table(table)
        ))
        .bind(key)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(row.try_get("doc")?),
            None => Err(StoreError::NotFound),
        }
    }

    async fn put(&self, table: Table, key: &str, doc: Value) -> Result<()> {
        let expires_at = doc_expires_at(&doc)?;
        sqlx::query(&format!(
            "INSERT INTO {} (key, doc, expires_at) VALUES ($1, $2, $3)
             ON CONFLICT (key) DO UPDATE SET doc = EXCLUDED.doc, expires_at = EXCLUDED.expires_at",
            pg_table(table)
        ))
        .bind(key)
        .bind(&doc)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_fields(
        &self,
        table: Table,
        key: &str,
        fields: Map<String, Value>,
    ) -> Result<()> {
        let now = now_epoch_ms();
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(&format!(
            "SELECT doc FROM {} WHERE key = $1 AND expires_at > $2 FOR UPDATE",
            pg_table(table)
        ))
        .bind(key)
        .bind(now)
        .fetch_optional(&mut tx)
        .await?;
        let mut doc: Value = match row {
            Some(row) => row.try_get("doc")?,
            None => return Err(StoreError::NotFound),
        };
        merge_fields(&mut doc, fields)?;
        let expires_at = doc_expires_at(&doc)?;
        sqlx::query(&format!(
            "UPDATE {} SET doc = $2, expires_at = $3 WHERE key = $1",
            pg_table(table)
        ))
        .bind(key)
        .bind(&doc)
        .bind(expires_at)
        .execute(&mut tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, table: Table, key: &str) -> Result<()> {
        sqlx::query(&format!("DELETE FROM {} WHERE key = $1", pg_table(table)))
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
