//! gitgram configuration loader.
//!
//! Settings come from an optional TOML file with environment overrides on
//! top, so container deployments can run from environment variables alone.
//! Derived values (the Telegram webhook secret token) are computed once here
//! and carried in the config struct.

use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GitgramConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub bots: BotsConfig,
    /// Shared secret used to derive the Telegram webhook secret token.
    #[serde(default)]
    pub secret_key: String,
    #[serde(skip)]
    webhook_secret_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Public base URL this service is reachable at; used to build webhook
    /// URLs handed to users and registered with Telegram.
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
    #[serde(default = "default_http_max_in_flight")]
    pub http_max_in_flight: usize,
}

fn default_port() -> u16 {
    8080
}

fn default_http_timeout_seconds() -> u64 {
    30
}

fn default_http_max_in_flight() -> usize {
    512
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            base_url: String::new(),
            http_timeout_seconds: default_http_timeout_seconds(),
            http_max_in_flight: default_http_max_in_flight(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// `mem:`, `sqlite:<path>`, or `postgres://...`.
    #[serde(default = "default_storage_url")]
    pub url: String,
}

fn default_storage_url() -> String {
    "mem:".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            url: default_storage_url(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BotsConfig {
    #[serde(default)]
    pub github_token: String,
    #[serde(default)]
    pub gitlab_token: String,
}

impl GitgramConfig {
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let path = path
            .or_else(|| std::env::var("GITGRAM_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("gitgram.toml"));

        let mut cfg: GitgramConfig = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => toml::from_str(&contents)
                .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?,
            // Environment-only deployments have no config file.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => GitgramConfig::default(),
            Err(e) => return Err(anyhow::anyhow!("read config {}: {e}", path.display())),
        };

        cfg.apply_env_overrides();
        cfg.server.base_url = cfg.server.base_url.trim_end_matches('/').to_string();
        cfg.webhook_secret_token = derive_webhook_secret_token(&cfg.secret_key);
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("PORT") {
            if let Ok(port) = v.trim().parse() {
                self.server.port = port;
            }
        }
        if let Ok(v) = std::env::var("BASE_URL") {
            if !v.trim().is_empty() {
                self.server.base_url = v;
            }
        }
        if let Ok(v) = std::env::var("STORAGE_URL") {
            if !v.trim().is_empty() {
                self.storage.url = v;
            }
        }
        if let Ok(v) = std::env::var("GITHUB_TELEGRAM_BOT_TOKEN") {
            if !v.trim().is_empty() {
                self.bots.github_token = v;
            }
        }
        if let Ok(v) = std::env::var("GITLAB_TELEGRAM_BOT_TOKEN") {
            if !v.trim().is_empty() {
                self.bots.gitlab_token = v;
            }
        }
        if let Ok(v) = std::env::var("SECRET_KEY") {
            if !v.trim().is_empty() {
                self.secret_key = v;
            }
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.bots.github_token.trim().is_empty() && self.bots.gitlab_token.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "at least one of bots.github_token / bots.gitlab_token \
                 (GITHUB_TELEGRAM_BOT_TOKEN / GITLAB_TELEGRAM_BOT_TOKEN) is required"
            ));
        }
        if self.secret_key.trim().is_empty() {
            return Err(anyhow::anyhow!("secret_key (SECRET_KEY) is required"));
        }
        if self.server.base_url.trim().is_empty() {
            return Err(anyhow::anyhow!("server.base_url (BASE_URL) is required"));
        }
        Ok(())
    }

    /// Secret token Telegram echoes back on webhook deliveries, derived from
    /// the shared secret at load time.
    pub fn webhook_secret_token(&self) -> &str {
        &self.webhook_secret_token
    }
}

fn derive_webhook_secret_token(secret_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret_key.as_bytes());
    hasher.update(b":telegram");
    to_lower_hex(&hasher.finalize())
}

fn to_lower_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(char::from_digit((byte >> 4) as u32, 16).unwrap_or('0'));
        out.push(char::from_digit((byte & 0x0f) as u32, 16).unwrap_or('0'));
    }
    out
}
