use crate::backend::{EXPIRES_AT_FIELD, KvBackend, Table};
use crate::chats::ChatId;
use crate::error::{Result, StoreError};
use chrono::Utc;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// `message_id` value marking a reservation: a caller has claimed the right
/// to create the Telegram message but has not committed the real id yet.
const RESERVED_MESSAGE_ID: i64 = 0;

/// Digest identifying one (pipeline URL, chat) pair. All status updates for
/// the same pipeline delivered to the same chat map to the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CoalescingKey(String);

impl CoalescingKey {
    pub fn for_pipeline(pipeline_url: &str, chat_id: ChatId) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(pipeline_url.as_bytes());
        hasher.update(b":");
        hasher.update(chat_id.to_string().as_bytes());
        Self(to_lower_hex(&hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CoalescingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn to_lower_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(char::from_digit((byte >> 4) as u32, 16).unwrap_or('0'));
        out.push(char::from_digit((byte & 0x0f) as u32, 16).unwrap_or('0'));
    }
    out
}

/// Outcome of [`PipelineMessages::resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// No message exists for this key; the caller won the reservation and
    /// must create the Telegram message, then call `commit`.
    Create,
    /// A message already exists; the caller must edit it.
    Edit(i64),
    /// The wait budget ran out while another caller held the reservation.
    /// Callers treat this like `Create` to bound webhook latency; the
    /// trade-off is a small chance of a duplicate message.
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct CoalesceConfig {
    /// Total budget `resolve` may spend waiting for a reservation holder.
    pub wait_budget: Duration,
    /// Poll interval while another caller's reservation is pending.
    pub reserved_poll: Duration,
    /// Backoff after losing the create race between get and create.
    pub create_race_backoff: Duration,
    /// Reservation lifetime. Kept shorter than `wait_budget` so a crashed
    /// winner is reaped by TTL before waiters give up.
    pub lease_window: Duration,
    /// Lifetime of a resolved record; refreshed on every edit.
    pub retention_window: Duration,
}

impl Default for CoalesceConfig {
    fn default() -> Self {
        Self {
            wait_budget: Duration::from_secs(15),
            reserved_poll: Duration::from_millis(200),
            create_race_backoff: Duration::from_millis(100),
            lease_window: Duration::from_secs(10),
            retention_window: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Maps a [`CoalescingKey`] to at most one Telegram message id.
///
/// Mutual exclusion for "who creates the message" is delegated entirely to
/// the backend's atomic `create_if_absent`; there is no in-process locking,
/// so the protocol stays correct across replicas. Record lifecycle per key:
/// Absent -> Reserved(0) -> Resolved(message_id); a reservation either
/// resolves via `commit` or is reaped back to Absent by backend TTL.
#[derive(Clone)]
pub struct PipelineMessages {
    backend: Arc<dyn KvBackend>,
    cfg: CoalesceConfig,
}

impl PipelineMessages {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self {
            backend,
            cfg: CoalesceConfig::default(),
        }
    }

    pub fn with_config(mut self, cfg: CoalesceConfig) -> Self {
        self.cfg = cfg;
        self
    }

    /// Decide whether the caller is first (create a message) or late (edit
    /// the existing one) for this key. Never blocks past the wait budget;
    /// observes `cancel` between backend round-trips.
    #[tracing::instrument(level = "debug", skip(self, cancel), fields(key = %key))]
    pub async fn resolve(
        &self,
        key: &CoalescingKey,
        cancel: &CancellationToken,
    ) -> Result<Resolution> {
        let started = Instant::now();

        loop {
            if started.elapsed() > self.cfg.wait_budget {
                tracing::warn!(
                    key = %key,
                    waited_ms = started.elapsed().as_millis() as u64,
                    "wait budget exhausted; treating pipeline as unseen (may duplicate a message)"
                );
                return Ok(Resolution::TimedOut);
            }
            if cancel.is_cancelled() {
                return Err(StoreError::Cancelled);
            }

            match self.backend.get(Table::Pipelines, key.as_str()).await {
                Ok(doc) => {
                    let message_id = doc
                        .get("message_id")
                        .and_then(Value::as_i64)
                        .ok_or_else(|| {
                            StoreError::Malformed("pipeline record missing message_id".to_string())
                        })?;
                    if message_id != RESERVED_MESSAGE_ID {
                        return Ok(Resolution::Edit(message_id));
                    }
                    // Another caller holds the reservation; wait for it to
                    // commit or for its lease to lapse.
                    self.pause(self.cfg.reserved_poll, cancel).await?;
                }
                Err(StoreError::NotFound) => {
                    let now = Utc::now();
                    let reservation = json!({
                        "message_id": RESERVED_MESSAGE_ID,
                        "created_at": now.to_rfc3339(),
                        "updated_at": now.to_rfc3339(),
                        EXPIRES_AT_FIELD: now.timestamp_millis()
                            + self.cfg.lease_window.as_millis() as i64,
                    });
                    match self
                        .backend
                        .create_if_absent(Table::Pipelines, key.as_str(), reservation)
                        .await
                    {
                        Ok(()) => return Ok(Resolution::Create),
                        Err(StoreError::AlreadyExists) => {
                            // Lost the race between get and create.
                            self.pause(self.cfg.create_race_backoff, cancel).await?;
                        }
                        Err(e) => return Err(e),
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Publish the real message id for a reservation this caller won.
    pub async fn commit(&self, key: &CoalescingKey, message_id: i64) -> Result<()> {
        self.put_resolved(key, message_id).await
    }

    /// Slide the record's expiry forward after a successful edit so
    /// long-running pipelines stay coalesced.
    pub async fn refresh(&self, key: &CoalescingKey, message_id: i64) -> Result<()> {
        self.put_resolved(key, message_id).await
    }

    async fn put_resolved(&self, key: &CoalescingKey, message_id: i64) -> Result<()> {
        let now = Utc::now();
        // Preserve the original creation time when the record is still there;
        // if the lease lapsed underneath us, start over from now.
        let created_at = match self.backend.get(Table::Pipelines, key.as_str()).await {
            Ok(doc) => doc
                .get("created_at")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| now.to_rfc3339()),
            Err(StoreError::NotFound) => now.to_rfc3339(),
            Err(e) => return Err(e),
        };
        let doc = json!({
            "message_id": message_id,
            "created_at": created_at,
            "updated_at": now.to_rfc3339(),
            EXPIRES_AT_FIELD: now.timestamp_millis() + self.cfg.retention_window.as_millis() as i64,
        });
        self.backend.put(Table::Pipelines, key.as_str(), doc).await
    }

    async fn pause(&self, duration: Duration, cancel: &CancellationToken) -> Result<()> {
        tokio::select! {
            _ = cancel.cancelled() => Err(StoreError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}
