//! HTTP ingress for the companion.
//!
//! Four endpoints: the device highlight path (`/kobo-ask`), the two ask
//! APIs (`/ask`, `/ask-with-image`), and the Telegram webhook. Device
//! endpoints authenticate with the shared `X-API-Key` secret compared in
//! constant time; the webhook never fails outward.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::companion::diagram::DiagramPipeline;
use crate::companion::generator::TextGenerator;
use crate::config::CompanionConfig;
use crate::tasks::TaskScheduler;
use crate::telegram::gateway::TelegramGateway;
use crate::telegram::router::ConversationRouter;

pub mod ask;
pub mod kobo;
pub mod webhook;

/// Body limit for the device highlight endpoint: the 8 KiB passage plus
/// generous JSON envelope headroom.
const KOBO_BODY_LIMIT: usize = 65_536;

/// Body limit for the multipart image endpoint: the 20 MiB image plus
/// multipart framing headroom.
const IMAGE_BODY_LIMIT: usize = 22_020_096;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Dependencies injected into every handler.
#[derive(Clone)]
pub struct AppState {
    /// Validated startup configuration.
    pub config: Arc<CompanionConfig>,
    /// Text generator, when the text model is configured.
    pub generator: Option<TextGenerator>,
    /// Diagram pipeline (its strategies may individually be disabled).
    pub diagrams: Arc<DiagramPipeline>,
    /// Telegram gateway, when messaging is configured.
    pub gateway: Option<Arc<TelegramGateway>>,
    /// Conversation router, when messaging is configured.
    pub conversation: Option<Arc<ConversationRouter>>,
    /// Background task scheduler.
    pub scheduler: Arc<TaskScheduler>,
}

/// Build the service router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/kobo-ask",
            post(kobo::kobo_ask).layer(DefaultBodyLimit::max(KOBO_BODY_LIMIT)),
        )
        .route("/ask", post(ask::ask))
        .route(
            "/ask-with-image",
            post(ask::ask_with_image).layer(DefaultBodyLimit::max(IMAGE_BODY_LIMIT)),
        )
        .route("/telegram-webhook", post(webhook::telegram_webhook))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// HTTP-facing error taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The API key is missing or wrong.
    #[error("invalid api key")]
    Unauthorized,
    /// The payload is malformed or violates a bound.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// The text generator is not configured.
    #[error("text generator is not configured")]
    GeneratorUnavailable,
    /// The model failed to produce an answer for a path with no fallback.
    #[error("generation failed: {0}")]
    Generation(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::GeneratorUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Generation(_) => StatusCode::BAD_GATEWAY,
        };
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

/// Check the `X-API-Key` header against the configured device secret.
///
/// # Errors
///
/// Returns [`ApiError::Unauthorized`] on a missing or mismatched key.
pub fn require_api_key(headers: &HeaderMap, config: &CompanionConfig) -> Result<(), ApiError> {
    let provided = headers
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    if config.kobo_api_key.matches(provided) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}
