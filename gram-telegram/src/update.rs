use crate::error::Result;
use crate::notifier::Notifier;
use gram_store::{BotKind, ChatId};
use serde::Deserialize;

/// Narrow capability the webhook route depends on: hand over the raw update
/// body, get back success or failure.
#[async_trait::async_trait]
pub trait UpdateProcessor: Send + Sync {
    async fn process_update(&self, body: &[u8]) -> Result<()>;
}

/// Handles inbound bot updates: `/start`, `/help`, `/webhook` commands and
/// removal events that retire a chat's registration.
pub struct BotFrontend {
    notifier: Notifier,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct Update {
    #[serde(default)]
    message: Option<Message>,
    #[serde(default)]
    my_chat_member: Option<ChatMemberUpdate>,
}

#[derive(Debug, Deserialize)]
struct Message {
    chat: Chat,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct ChatMemberUpdate {
    chat: Chat,
    new_chat_member: ChatMember,
}

#[derive(Debug, Deserialize)]
struct ChatMember {
    #[serde(default)]
    status: String,
}

/// True when the first word of `text` is `/{command}` or `/{command}@SomeBot`.
fn matches_command(text: &str, command: &str) -> bool {
    let Some(first_word) = text.split_whitespace().next() else {
        return false;
    };
    let plain = format!("/{command}");
    first_word == plain || first_word.starts_with(&format!("{plain}@"))
}

impl BotFrontend {
    pub fn new(notifier: Notifier, base_url: &str) -> Self {
        Self {
            notifier,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn kind(&self) -> BotKind {
        self.notifier.bot().kind()
    }

    fn provider_name(&self) -> &'static str {
        match self.kind() {
            BotKind::Github => "GitHub",
            BotKind::Gitlab => "GitLab",
        }
    }

    pub fn chat_webhook_url(&self, chat_id: ChatId) -> String {
        format!("{}/{}/{}", self.base_url, self.kind(), chat_id)
    }

    async fn handle_start(&self, chat_id: ChatId) {
        let text = format!(
            "👋 Welcome to {} Watch Bot!\n\n\
             I can forward {} webhook events to this chat.\n\n\
             Use /webhook to get your unique webhook URL.",
            self.provider_name(),
            self.provider_name(),
        );
        self.notifier.send_or_log(chat_id, &text).await;
    }

    async fn handle_help(&self, chat_id: ChatId) {
        let text = format!(
            "📚 <b>Available Commands</b>\n\n\
             • /start - Start the bot\n\
             • /help - Show this help message\n\
             • /webhook - Get your unique {} webhook URL\n\n\
             To set up webhooks, use the appropriate command and add the URL to \
             your repository's webhook settings.",
            self.provider_name(),
        );
        self.notifier.send_or_log(chat_id, &text).await;
    }

    async fn handle_webhook(&self, chat_id: ChatId) {
        let text = format!(
            "🔗 <b>Your {} Webhook URL</b>\n\n<code>{}</code>\n\n\
             <b>How to set up:</b>\n\n\
             1. Go to your repository's webhook settings\n\
             2. Paste the URL above in the 'URL' field\n\
             3. Select the events you want to receive\n\
             4. Save the webhook\n\n\
             You'll receive a confirmation message when the webhook is set up correctly.",
            self.provider_name(),
            self.chat_webhook_url(chat_id),
        );
        self.notifier.send_or_log(chat_id, &text).await;
    }
}

#[async_trait::async_trait]
impl UpdateProcessor for BotFrontend {
    async fn process_update(&self, body: &[u8]) -> Result<()> {
        let update: Update = serde_json::from_slice(body)?;

        if let Some(member_update) = update.my_chat_member {
            let status = member_update.new_chat_member.status.as_str();
            if status == "kicked" || status == "left" {
                let chat_id = ChatId::new(member_update.chat.id);
                tracing::info!(%chat_id, status, "bot removed from chat; dropping registration");
                self.notifier.retire_chat(chat_id).await;
            }
            return Ok(());
        }

        let Some(message) = update.message else {
            // Unhandled update kinds are acknowledged silently.
            return Ok(());
        };
        let Some(text) = message.text.as_deref() else {
            return Ok(());
        };
        let chat_id = ChatId::new(message.chat.id);

        if matches_command(text, "start") {
            self.handle_start(chat_id).await;
        } else if matches_command(text, "help") {
            self.handle_help(chat_id).await;
        } else if matches_command(text, "webhook") {
            self.handle_webhook(chat_id).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::matches_command;

    #[test]
    fn command_matching_accepts_bare_and_addressed_forms() {
        assert!(matches_command("/webhook", "webhook"));
        assert!(matches_command("/webhook@GitlabWatchBot", "webhook"));
        assert!(matches_command("/webhook extra words", "webhook"));
        assert!(!matches_command("/webhooks", "webhook"));
        assert!(!matches_command("say /webhook", "webhook"));
        assert!(!matches_command("", "webhook"));
    }
}
