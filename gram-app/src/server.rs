//! HTTP server assembly and lifecycle.
//!
//! [`serve`] loads configuration, opens the storage backend, wires one
//! [`Provider`] per configured bot, and runs the axum server until a
//! shutdown signal arrives. The shutdown token is shared with webhook
//! handlers so in-flight coalescing waits abort instead of holding the
//! drain open.

use crate::config::GitgramConfig;
use crate::routes;
use axum::Extension;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::Response;
use gram_store::{BotKind, ChatStore, KvBackend, PipelineMessages};
use gram_telegram::{BOT_COMMANDS, BotFrontend, Notifier, TelegramBot, UpdateProcessor};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::classify::ServerErrorsFailureClass;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// One configured Telegram bot with its delivery path and command frontend.
pub struct Provider {
    pub notifier: Notifier,
    pub frontend: Arc<dyn UpdateProcessor>,
}

pub struct AppState {
    pub github: Option<Provider>,
    pub gitlab: Option<Provider>,
    pub webhook_secret_token: String,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn provider(&self, kind: BotKind) -> Option<&Provider> {
        match kind {
            BotKind::Github => self.github.as_ref(),
            BotKind::Gitlab => self.gitlab.as_ref(),
        }
    }
}

fn build_provider(
    cfg: &GitgramConfig,
    backend: Arc<dyn KvBackend>,
    kind: BotKind,
    token: &str,
) -> anyhow::Result<Provider> {
    let bot = Arc::new(TelegramBot::new(kind, token)?);
    let notifier = Notifier::new(
        bot,
        ChatStore::new(backend.clone()),
        PipelineMessages::new(backend),
    );
    let frontend = Arc::new(BotFrontend::new(notifier.clone(), &cfg.server.base_url));
    Ok(Provider {
        notifier,
        frontend,
    })
}

fn build_providers(
    cfg: &GitgramConfig,
    backend: &Arc<dyn KvBackend>,
) -> anyhow::Result<(Option<Provider>, Option<Provider>)> {
    let github = if cfg.bots.github_token.trim().is_empty() {
        None
    } else {
        Some(build_provider(
            cfg,
            backend.clone(),
            BotKind::Github,
            &cfg.bots.github_token,
        )?)
    };
    let gitlab = if cfg.bots.gitlab_token.trim().is_empty() {
        None
    } else {
        Some(build_provider(
            cfg,
            backend.clone(),
            BotKind::Gitlab,
            &cfg.bots.gitlab_token,
        )?)
    };
    Ok((github, gitlab))
}

pub async fn serve(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let cfg = GitgramConfig::load(config_path).await?;
    let backend = gram_store::open_backend(&cfg.storage.url).await?;
    tracing::info!(storage_url = %cfg.storage.url, "storage backend opened");

    let (github, gitlab) = build_providers(&cfg, &backend)?;
    tracing::info!(
        github_enabled = github.is_some(),
        gitlab_enabled = gitlab.is_some(),
        base_url = %cfg.server.base_url,
        "bot providers configured"
    );

    let shutdown = CancellationToken::new();
    let state = Arc::new(AppState {
        github,
        gitlab,
        webhook_secret_token: cfg.webhook_secret_token().to_string(),
        shutdown: shutdown.clone(),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.server.port));
    let listener = preflight_bind_listener(addr).await?;

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id_from_headers(request.headers())
            )
        })
        .on_response(
            |response: &Response, latency: Duration, _span: &tracing::Span| {
                tracing::info!(
                    status = response.status().as_u16(),
                    latency_ms = latency.as_millis() as u64,
                    "http request completed"
                );
            },
        )
        .on_failure(
            |error: ServerErrorsFailureClass, latency: Duration, _span: &tracing::Span| {
                tracing::error!(
                    error_class = %error,
                    latency_ms = latency.as_millis() as u64,
                    "http request failed"
                );
            },
        );

    let app = routes::router()
        .layer(Extension(state))
        .layer(GlobalConcurrencyLimitLayer::new(cfg.server.http_max_in_flight))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(cfg.server.http_timeout_seconds),
        ))
        .layer(trace_layer)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    tracing::info!(%addr, "gitgram serving");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;
    tracing::info!("http server shutdown completed");

    shutdown.cancel();
    Ok(())
}

/// Validate configuration, storage, and Telegram credentials, then exit.
pub async fn doctor(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let cfg = GitgramConfig::load(config_path).await?;
    tracing::info!("config loaded and validated");

    let backend = gram_store::open_backend(&cfg.storage.url).await?;
    tracing::info!(storage_url = %cfg.storage.url, "storage backend reachable");

    let (github, gitlab) = build_providers(&cfg, &backend)?;
    for provider in [github.as_ref(), gitlab.as_ref()].into_iter().flatten() {
        let bot = provider.notifier.bot();
        let profile = bot.get_me().await?;
        tracing::info!(
            bot = %bot.kind(),
            username = %profile.username,
            "telegram credentials verified"
        );
    }
    tracing::info!("doctor checks passed");
    Ok(())
}

/// Register webhooks, commands, and descriptions with Telegram for every
/// configured bot. Run once per deployment or whenever the base URL changes.
pub async fn init_bots(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let cfg = GitgramConfig::load(config_path).await?;
    let backend = gram_store::open_backend(&cfg.storage.url).await?;
    let (github, gitlab) = build_providers(&cfg, &backend)?;

    for provider in [github.as_ref(), gitlab.as_ref()].into_iter().flatten() {
        let bot = provider.notifier.bot();
        let kind = bot.kind();
        let profile = bot.get_me().await?;
        tracing::info!(bot = %kind, username = %profile.username, "initializing bot");

        let webhook_url = format!("{}/telegram/webhook/{kind}", cfg.server.base_url);
        bot.set_webhook(&webhook_url, cfg.webhook_secret_token())
            .await?;
        bot.set_my_commands(&BOT_COMMANDS).await?;
        bot.set_my_description(&format!(
            "Sends {kind} webhook notifications to this chat. \
             Use /webhook to get your webhook URL.",
        ))
        .await?;
        bot.set_my_short_description(&format!("{kind} notifications for Telegram"))
            .await?;
        tracing::info!(bot = %kind, webhook_url = %webhook_url, "bot initialized");
    }
    Ok(())
}

async fn preflight_bind_listener(addr: SocketAddr) -> anyhow::Result<tokio::net::TcpListener> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("bind failed for {addr}: {e}"))?;
    tracing::info!(%addr, "listener bound");
    Ok(listener)
}

fn request_id_from_headers(headers: &axum::http::HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .unwrap_or_else(|| "missing".to_string())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler; falling back to ctrl_c only");
                if let Err(ctrlc_err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %ctrlc_err, "failed to await ctrl-c signal");
                }
                shutdown.cancel();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("received ctrl-c; beginning graceful shutdown");
            }
            _ = terminate.recv() => {
                tracing::warn!("received SIGTERM; beginning graceful shutdown");
            }
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to await ctrl-c signal");
        } else {
            tracing::warn!("received ctrl-c; beginning graceful shutdown");
        }
    }
    shutdown.cancel();
}
