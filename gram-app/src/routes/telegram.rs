use crate::routes::{error_response, ok_response};
use crate::server::AppState;
use axum::body::Bytes;
use axum::extract::{Extension, Path};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::routing::post;
use gram_store::BotKind;
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new().route("/telegram/webhook/{bot}", post(handle_update))
}

#[tracing::instrument(level = "info", skip_all, fields(bot = %bot))]
async fn handle_update(
    Extension(state): Extension<Arc<AppState>>,
    Path(bot): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Ok(kind) = bot.parse::<BotKind>() else {
        return error_response(StatusCode::NOT_FOUND, "unknown bot");
    };
    let Some(provider) = state.provider(kind) else {
        return error_response(StatusCode::NOT_FOUND, "bot is not configured");
    };

    // Telegram echoes the secret token registered with setWebhook; reject
    // deliveries that do not carry it.
    let presented = headers
        .get("x-telegram-bot-api-secret-token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !constant_time_eq(presented, &state.webhook_secret_token) {
        tracing::warn!(bot = %kind, "rejected update with bad secret token");
        return error_response(StatusCode::UNAUTHORIZED, "invalid secret token");
    }

    match provider.frontend.process_update(&body).await {
        Ok(()) => ok_response(),
        Err(e) => {
            tracing::error!(bot = %kind, error = %e, "failed to process telegram update");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to process telegram update",
            )
        }
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0_u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::constant_time_eq;

    #[test]
    fn secret_comparison_requires_exact_match() {
        assert!(constant_time_eq("abc123", "abc123"));
        assert!(!constant_time_eq("abc123", "abc124"));
        assert!(!constant_time_eq("abc123", "abc12"));
        assert!(!constant_time_eq("", "x"));
        assert!(constant_time_eq("", ""));
    }
}
