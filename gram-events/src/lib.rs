//! Webhook payload parsing and Telegram-HTML rendering.
//!
//! Renderers are pure: bytes in, formatted text out. `Ok(None)` means the
//! event is intentionally ignored (filtered branch, uninteresting action).

mod format;
mod github;
mod gitlab;

pub use format::{commit_link, escape_html};
pub use github::render_github;
pub use gitlab::render_gitlab;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EventError>;

#[derive(Debug, Error)]
pub enum EventError {
    #[error("unsupported event type: {0}")]
    UnsupportedEvent(String),

    #[error("malformed payload: {0}")]
    Payload(String),
}

impl From<serde_json::Error> for EventError {
    fn from(e: serde_json::Error) -> Self {
        Self::Payload(e.to_string())
    }
}

/// A rendered event ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Post a standalone message.
    Message(String),
    /// Status update for a CI pipeline: delivered through the coalescing
    /// store so all updates for one pipeline edit a single message.
    PipelineUpdate { pipeline_url: String, text: String },
}
