//! Persistence for gitgram.
//!
//! A uniform key-value interface ([`KvBackend`]) with in-memory, SQLite, and
//! Postgres implementations, plus the two stores built on top of it: chat
//! registrations ([`ChatStore`]) and the coalescing pipeline-message store
//! ([`PipelineMessages`]) that guarantees one Telegram message per pipeline.

mod backend;
mod chats;
mod coalesce;
mod error;
mod memory;
mod postgres;
mod sqlite;

pub use backend::{EXPIRES_AT_FIELD, KvBackend, Table};
pub use chats::{BotKind, ChatId, ChatStore, DEFAULT_CHAT_RETENTION};
pub use coalesce::{CoalesceConfig, CoalescingKey, PipelineMessages, Resolution};
pub use error::{Result, StoreError};
pub use memory::MemoryBackend;
pub use postgres::PostgresBackend;
pub use sqlite::SqliteBackend;

use std::sync::Arc;

/// Open a backend from a storage URL: `mem:`, `sqlite:<path>`, or
/// `postgres://...`.
pub async fn open_backend(url: &str) -> Result<Arc<dyn KvBackend>> {
    if url == "mem:" || url.is_empty() {
        return Ok(Arc::new(MemoryBackend::new()));
    }
    if let Some(path) = url.strip_prefix("sqlite:") {
        return Ok(Arc::new(SqliteBackend::open(path)?));
    }
    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        return Ok(Arc::new(PostgresBackend::connect(url).await?));
    }
    Err(StoreError::Backend(format!(
        "unsupported storage url: {url} (expected mem:, sqlite:<path>, or postgres://)"
    )))
}

#[cfg(test)]
mod tests {
    use super::open_backend;

    #[tokio::test]
    async fn memory_and_sqlite_urls_open() {
        assert!(open_backend("mem:").await.is_ok());
        assert!(open_backend("sqlite::memory:").await.is_ok());
        assert!(open_backend("redis://nope").await.is_err());
    }
}
