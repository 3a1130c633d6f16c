use crate::routes::{deliver, error_response, ok_response};
use crate::server::AppState;
use axum::body::Bytes;
use axum::extract::{Extension, Path};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::routing::post;
use gram_events::render_gitlab;
use gram_store::{BotKind, ChatId};
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new().route("/gitlab/{chat_id}", post(handle_webhook))
}

#[tracing::instrument(level = "info", skip_all, fields(chat_id = %chat_id))]
async fn handle_webhook(
    Extension(state): Extension<Arc<AppState>>,
    Path(chat_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(provider) = state.provider(BotKind::Gitlab) else {
        return error_response(StatusCode::NOT_FOUND, "gitlab bot is not configured");
    };
    let chat_id: ChatId = match chat_id.parse() {
        Ok(chat_id) => chat_id,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "invalid chat id"),
    };
    let Some(event_type) = headers.get("x-gitlab-event").and_then(|v| v.to_str().ok()) else {
        return error_response(StatusCode::BAD_REQUEST, "missing X-Gitlab-Event header");
    };

    match render_gitlab(event_type, &body) {
        Ok(Some(notification)) => deliver(&state, provider, chat_id, &notification).await,
        Ok(None) => ok_response(),
        Err(e) => {
            tracing::warn!(event_type, error = %e, "rejected gitlab payload");
            error_response(StatusCode::BAD_REQUEST, "failed to parse gitlab event")
        }
    }
}
