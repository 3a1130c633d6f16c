use gram_store::StoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TelegramError>;

#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("telegram api error: {description}")]
    Api { description: String },

    #[error("http error: {0}")]
    Http(String),

    #[error("unexpected response format: {0}")]
    ResponseFormat(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TelegramError {
    /// True when the failure means the chat can never be delivered to again
    /// (bot blocked, kicked, or the chat is gone). The delivery path drops
    /// the chat registration on these.
    pub fn is_chat_unreachable(&self) -> bool {
        let TelegramError::Api { description } = self else {
            return false;
        };
        let description = description.to_ascii_lowercase();
        description.contains("bot was blocked")
            || description.contains("bot was kicked")
            || description.contains("user is deactivated")
            || description.contains("chat not found")
            || description.contains("bot is not a member")
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TelegramError::Store(StoreError::Cancelled))
    }
}

impl From<reqwest::Error> for TelegramError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

impl From<serde_json::Error> for TelegramError {
    fn from(e: serde_json::Error) -> Self {
        Self::ResponseFormat(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::TelegramError;

    #[test]
    fn unreachable_chat_classifier_matches_known_descriptions() {
        let blocked = TelegramError::Api {
            description: "Forbidden: bot was blocked by the user".to_string(),
        };
        assert!(blocked.is_chat_unreachable());

        let missing = TelegramError::Api {
            description: "Bad Request: chat not found".to_string(),
        };
        assert!(missing.is_chat_unreachable());

        let flood = TelegramError::Api {
            description: "Too Many Requests: retry after 30".to_string(),
        };
        assert!(!flood.is_chat_unreachable());

        assert!(!TelegramError::Http("timeout".to_string()).is_chat_unreachable());
    }
}
