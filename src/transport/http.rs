//! HTTP ingest routes.
//!
//! `POST /api/messages` accepts one message and hands it to the debounce
//! coordinator. Replies are not returned on the request; they go out through
//! the channel's outputs once the batch runs.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::coordinator::DebounceCoordinator;

/// Label used for messages that arrive over HTTP when the caller gives none.
const DEFAULT_HTTP_LABEL: &str = "HTTP";

/// Body of `POST /api/messages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    pub user_id: String,
    /// Defaults to `user_id`.
    #[serde(default)]
    pub chat_id: Option<String>,
    pub text: String,
    /// Generated when absent.
    #[serde(default)]
    pub message_id: Option<String>,
    /// Label shown in merged batches.
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IngestResponse {
    pub accepted: bool,
    pub message_id: String,
}

/// Build the ingest router.
pub fn ingest_routes(coordinator: Arc<DebounceCoordinator>) -> Router {
    Router::new()
        .route("/api/messages", post(ingest_message))
        .route("/health", get(health))
        .with_state(coordinator)
}

async fn health() -> &'static str {
    "ok"
}

async fn ingest_message(
    State(coordinator): State<Arc<DebounceCoordinator>>,
    Json(body): Json<IngestRequest>,
) -> impl IntoResponse {
    if body.user_id.trim().is_empty() || body.text.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "user_id and text are required" })),
        )
            .into_response();
    }

    let chat_id = body.chat_id.unwrap_or_else(|| body.user_id.clone());
    let message_id = body
        .message_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let source = body.source.unwrap_or_else(|| DEFAULT_HTTP_LABEL.to_string());

    match coordinator
        .enqueue(&body.user_id, &chat_id, &body.text, &message_id, &source)
        .await
    {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(IngestResponse {
                accepted: true,
                message_id,
            }),
        )
            .into_response(),
        Err(e) => {
            warn!(user_id = %body.user_id, error = %e, "HTTP ingest failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}
