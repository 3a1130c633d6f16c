use crate::error::{Result, TelegramError};
use gram_store::{BotKind, ChatId};
use reqwest::Url;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;

/// Thin client over the Telegram Bot API for one bot token.
#[derive(Clone)]
pub struct TelegramBot {
    http: reqwest::Client,
    bot_token: String,
    kind: BotKind,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotProfile {
    pub id: i64,
    pub username: String,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

pub struct BotCommand {
    pub command: &'static str,
    pub description: &'static str,
}

impl TelegramBot {
    pub fn new(kind: BotKind, bot_token: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            bot_token: bot_token.to_string(),
            kind,
        })
    }

    pub fn kind(&self) -> BotKind {
        self.kind
    }

    fn api_url(&self, method: &str) -> Result<Url> {
        Url::parse(&format!(
            "https://api.telegram.org/bot{}/{}",
            self.bot_token, method
        ))
        .map_err(|e| TelegramError::Http(e.to_string()))
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: Value) -> Result<T> {
        let url = self.api_url(method)?;
        let response = self.http.post(url).json(&body).send().await?;
        let parsed: ApiResponse<T> = response.json().await?;
        if !parsed.ok {
            return Err(TelegramError::Api {
                description: parsed
                    .description
                    .unwrap_or_else(|| format!("{method} failed without a description")),
            });
        }
        parsed.result.ok_or_else(|| {
            TelegramError::ResponseFormat(format!("{method} returned ok without a result"))
        })
    }

    /// Send a message, returning the Telegram message id for later edits.
    pub async fn send_message(&self, chat_id: ChatId, text: &str) -> Result<i64> {
        let sent: SentMessage = self
            .call(
                "sendMessage",
                json!({
                    "chat_id": chat_id.as_i64(),
                    "text": text,
                    "parse_mode": "HTML",
                    "link_preview_options": {"is_disabled": true},
                }),
            )
            .await?;
        Ok(sent.message_id)
    }

    pub async fn edit_message_text(
        &self,
        chat_id: ChatId,
        message_id: i64,
        text: &str,
    ) -> Result<()> {
        let _: Value = self
            .call(
                "editMessageText",
                json!({
                    "chat_id": chat_id.as_i64(),
                    "message_id": message_id,
                    "text": text,
                    "parse_mode": "HTML",
                    "link_preview_options": {"is_disabled": true},
                }),
            )
            .await?;
        Ok(())
    }

    pub async fn get_me(&self) -> Result<BotProfile> {
        self.call("getMe", json!({})).await
    }

    pub async fn set_webhook(&self, webhook_url: &str, secret_token: &str) -> Result<()> {
        let _: bool = self
            .call(
                "setWebhook",
                json!({
                    "url": webhook_url,
                    "secret_token": secret_token,
                }),
            )
            .await?;
        Ok(())
    }

    pub async fn set_my_commands(&self, commands: &[BotCommand]) -> Result<()> {
        let listed: Vec<Value> = commands
            .iter()
            .map(|c| json!({"command": c.command, "description": c.description}))
            .collect();
        let _: bool = self
            .call("setMyCommands", json!({"commands": listed}))
            .await?;
        Ok(())
    }

    pub async fn set_my_description(&self, description: &str) -> Result<()> {
        let _: bool = self
            .call("setMyDescription", json!({"description": description}))
            .await?;
        Ok(())
    }

    pub async fn set_my_short_description(&self, short_description: &str) -> Result<()> {
        let _: bool = self
            .call(
                "setMyShortDescription",
                json!({"short_description": short_description}),
            )
            .await?;
        Ok(())
    }
}
