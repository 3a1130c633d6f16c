pub mod github;
pub mod gitlab;
pub mod health;
pub mod telegram;

use crate::server::{AppState, Provider};
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use gram_events::Notification;
use gram_store::ChatId;
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new()
        .merge(health::router())
        .merge(github::router())
        .merge(gitlab::router())
        .merge(telegram::router())
}

pub(crate) fn ok_response() -> Response {
    Json(serde_json::json!({"status": "ok"})).into_response()
}

pub(crate) fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, message.into()).into_response()
}

/// Deliver a rendered notification, mapping delivery failures onto HTTP
/// statuses. The cancellation token observed inside the coalescing wait is
/// a child of the server's shutdown token, so in-flight waits abort
/// promptly on shutdown.
pub(crate) async fn deliver(
    state: &Arc<AppState>,
    provider: &Provider,
    chat_id: ChatId,
    notification: &Notification,
) -> Response {
    let cancel = state.shutdown.child_token();
    match provider.notifier.deliver(chat_id, notification, &cancel).await {
        Ok(()) => ok_response(),
        Err(e) if e.is_cancelled() => {
            tracing::warn!(%chat_id, "delivery cancelled");
            error_response(StatusCode::REQUEST_TIMEOUT, "delivery cancelled")
        }
        Err(e) => {
            tracing::error!(%chat_id, error = %e, "failed to deliver notification");
            error_response(StatusCode::BAD_GATEWAY, "failed to deliver notification")
        }
    }
}
