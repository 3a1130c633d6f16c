use crate::bot::TelegramBot;
use crate::error::Result;
use gram_events::Notification;
use gram_store::{ChatId, ChatStore, CoalescingKey, PipelineMessages, Resolution};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The delivery path: sends or edits Telegram messages and maintains the
/// chat registration records around each outcome.
#[derive(Clone)]
pub struct Notifier {
    bot: Arc<TelegramBot>,
    chats: ChatStore,
    pipelines: PipelineMessages,
}

impl Notifier {
    pub fn new(bot: Arc<TelegramBot>, chats: ChatStore, pipelines: PipelineMessages) -> Self {
        Self {
            bot,
            chats,
            pipelines,
        }
    }

    pub fn bot(&self) -> &TelegramBot {
        &self.bot
    }

    /// Route a rendered notification to the chat. Pipeline updates go
    /// through the coalescing store; everything else is a plain send.
    pub async fn deliver(
        &self,
        chat_id: ChatId,
        notification: &Notification,
        cancel: &CancellationToken,
    ) -> Result<()> {
        match notification {
            Notification::Message(text) => {
                self.send_message(chat_id, text).await?;
                Ok(())
            }
            Notification::PipelineUpdate { pipeline_url, text } => {
                self.send_or_update_pipeline(chat_id, pipeline_url, text, cancel)
                    .await
            }
        }
    }

    /// Send a standalone message, keeping the chat record in sync with the
    /// delivery outcome.
    pub async fn send_message(&self, chat_id: ChatId, text: &str) -> Result<i64> {
        match self.bot.send_message(chat_id, text).await {
            Ok(message_id) => {
                if let Err(e) = self.chats.upsert(chat_id, self.bot.kind()).await {
                    tracing::error!(%chat_id, error = %e, "failed to record chat registration");
                }
                Ok(message_id)
            }
            Err(e) => {
                if e.is_chat_unreachable() {
                    tracing::info!(%chat_id, error = %e, "chat unreachable; dropping registration");
                    if let Err(delete_err) = self.chats.delete(chat_id, self.bot.kind()).await {
                        tracing::error!(%chat_id, error = %delete_err, "failed to drop chat registration");
                    }
                }
                Err(e)
            }
        }
    }

    /// Drop the chat's registration record (bot removed from the chat).
    pub async fn retire_chat(&self, chat_id: ChatId) {
        if let Err(e) = self.chats.delete(chat_id, self.bot.kind()).await {
            tracing::error!(%chat_id, error = %e, "failed to drop chat registration");
        }
    }

    /// Best-effort send for command replies where a failure only warrants a log line.
    pub async fn send_or_log(&self, chat_id: ChatId, text: &str) {
        if let Err(e) = self.send_message(chat_id, text).await {
            tracing::error!(%chat_id, error = %e, "failed to send message");
        }
    }

    /// First event for a pipeline posts a new message; every later event
    /// edits that message. The coalescing store decides which side this
    /// caller is on; a timed-out resolve degrades to a fresh message.
    #[tracing::instrument(level = "debug", skip(self, text, cancel), fields(chat_id = %chat_id))]
    pub async fn send_or_update_pipeline(
        &self,
        chat_id: ChatId,
        pipeline_url: &str,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let key = CoalescingKey::for_pipeline(pipeline_url, chat_id);
        match self.pipelines.resolve(&key, cancel).await? {
            Resolution::Create | Resolution::TimedOut => {
                let message_id = self.send_message(chat_id, text).await?;
                self.pipelines.commit(&key, message_id).await?;
                Ok(())
            }
            Resolution::Edit(message_id) => {
                self.bot.edit_message_text(chat_id, message_id, text).await?;
                self.pipelines.refresh(&key, message_id).await?;
                Ok(())
            }
        }
    }
}
