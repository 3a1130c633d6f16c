use crate::routes::{deliver, error_response, ok_response};
use crate::server::AppState;
use axum::body::Bytes;
use axum::extract::{Extension, Path, Query};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::routing::post;
use gram_events::render_github;
use gram_store::{BotKind, ChatId};
use serde::Deserialize;
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new().route("/github/{chat_id}", post(handle_webhook))
}

#[derive(Debug, Deserialize)]
struct WebhookQuery {
    #[serde(default)]
    branch: Option<String>,
}

#[tracing::instrument(level = "info", skip_all, fields(chat_id = %chat_id))]
async fn handle_webhook(
    Extension(state): Extension<Arc<AppState>>,
    Path(chat_id): Path<String>,
    Query(query): Query<WebhookQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(provider) = state.provider(BotKind::Github) else {
        return error_response(StatusCode::NOT_FOUND, "github bot is not configured");
    };
    let chat_id: ChatId = match chat_id.parse() {
        Ok(chat_id) => chat_id,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "invalid chat id"),
    };
    let Some(event_type) = headers.get("x-github-event").and_then(|v| v.to_str().ok()) else {
        return error_response(StatusCode::BAD_REQUEST, "missing X-GitHub-Event header");
    };

    let branch_filter = query.branch.as_deref().filter(|b| !b.is_empty());
    match render_github(event_type, &body, branch_filter) {
        Ok(Some(notification)) => deliver(&state, provider, chat_id, &notification).await,
        Ok(None) => ok_response(),
        Err(e) => {
            tracing::warn!(event_type, error = %e, "rejected github payload");
            error_response(StatusCode::BAD_REQUEST, "failed to parse github event")
        }
    }
}
