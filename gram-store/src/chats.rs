use crate::backend::{EXPIRES_AT_FIELD, KvBackend, Table};
use crate::error::{Result, StoreError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, json};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Telegram chat identifier, parsed once at the HTTP boundary and passed as
/// a typed value everywhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(i64);

impl ChatId {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl FromStr for ChatId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.parse::<i64>().map(Self)
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which bot a chat is registered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotKind {
    Github,
    Gitlab,
}

impl BotKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BotKind::Github => "github",
            BotKind::Gitlab => "gitlab",
        }
    }
}

impl FromStr for BotKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "github" => Ok(BotKind::Github),
            "gitlab" => Ok(BotKind::Gitlab),
            other => Err(StoreError::Malformed(format!("unknown bot kind: {other}"))),
        }
    }
}

impl fmt::Display for BotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registration records for chats the bots deliver to, keyed by
/// (chat id, bot kind). Owned exclusively by the delivery path: refreshed on
/// every successful send, deleted when the chat becomes unreachable.
#[derive(Clone)]
pub struct ChatStore {
    backend: Arc<dyn KvBackend>,
    retention: Duration,
}

pub const DEFAULT_CHAT_RETENTION: Duration = Duration::from_secs(180 * 24 * 60 * 60);

impl ChatStore {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self {
            backend,
            retention: DEFAULT_CHAT_RETENTION,
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    fn key(chat_id: ChatId, bot: BotKind) -> String {
        format!("{chat_id}:{bot}")
    }

    fn expires_at(&self) -> i64 {
        Utc::now().timestamp_millis() + self.retention.as_millis() as i64
    }

    /// Touch the record for (chat, bot), creating it on first delivery.
    pub async fn upsert(&self, chat_id: ChatId, bot: BotKind) -> Result<()> {
        let now = Utc::now();
        let mut fields = Map::new();
        fields.insert("updated_at".to_string(), json!(now.to_rfc3339()));
        fields.insert(EXPIRES_AT_FIELD.to_string(), json!(self.expires_at()));

        let key = Self::key(chat_id, bot);
        match self
            .backend
            .update_fields(Table::Chats, &key, fields)
            .await
        {
            Ok(()) => Ok(()),
            Err(StoreError::NotFound) => {
                let doc = json!({
                    "chat_id": chat_id,
                    "bot": bot,
                    "created_at": now.to_rfc3339(),
                    "updated_at": now.to_rfc3339(),
                    EXPIRES_AT_FIELD: self.expires_at(),
                });
                self.backend.put(Table::Chats, &key, doc).await
            }
            Err(e) => Err(e),
        }
    }

    pub async fn delete(&self, chat_id: ChatId, bot: BotKind) -> Result<()> {
        self.backend
            .delete(Table::Chats, &Self::key(chat_id, bot))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::{BotKind, ChatId, ChatStore};
    use crate::backend::{KvBackend, Table};
    use crate::error::StoreError;
    use crate::memory::MemoryBackend;
    use std::str::FromStr;
    use std::sync::Arc;

    #[test]
    fn chat_id_parses_negative_group_ids() {
        let id = ChatId::from_str("-1001234567890").unwrap();
        assert_eq!(id.as_i64(), -1001234567890);
        assert!(ChatId::from_str("not-a-number").is_err());
    }

    #[tokio::test]
    async fn upsert_creates_then_touches() {
        let backend = Arc::new(MemoryBackend::new());
        let store = ChatStore::new(backend.clone());
        let chat = ChatId::new(7001);

        store.upsert(chat, BotKind::Gitlab).await.unwrap();
        let created = backend.get(Table::Chats, "7001:gitlab").await.unwrap();
        let created_at = created["created_at"].clone();

        store.upsert(chat, BotKind::Gitlab).await.unwrap();
        let touched = backend.get(Table::Chats, "7001:gitlab").await.unwrap();
        assert_eq!(touched["created_at"], created_at);
        assert_eq!(touched["chat_id"], 7001);
    }

    #[tokio::test]
    async fn records_are_scoped_per_bot_kind() {
        let backend = Arc::new(MemoryBackend::new());
        let store = ChatStore::new(backend.clone());
        let chat = ChatId::new(42);

        store.upsert(chat, BotKind::Github).await.unwrap();
        assert!(matches!(
            backend.get(Table::Chats, "42:gitlab").await.unwrap_err(),
            StoreError::NotFound
        ));

        store.delete(chat, BotKind::Github).await.unwrap();
        assert!(matches!(
            backend.get(Table::Chats, "42:github").await.unwrap_err(),
            StoreError::NotFound
        ));
    }
}
