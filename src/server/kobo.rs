//! Device highlight ingress.
//!
//! The synchronous path must hand the e-reader a plain-text reply inside
//! its dialog timeout no matter what happens behind it: generator
//! failures degrade to a fixed fallback string, and the enrichment task
//! is fire-and-forget: a full scheduler drops it with a warning and the
//! device still gets its reply.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::IntoResponse;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{require_api_key, ApiError, AppState};
use crate::companion::enrich::run_enrichment;
use crate::types::HighlightRequest;

/// Reply used when the generator fails: the device must always show
/// something.
pub const FALLBACK_REPLY: &str = "The reading companion is temporarily unavailable.";

/// Deadline for the synchronous short explanation. The device itself
/// gives up at 25 s; staying well under that leaves room for the
/// response to travel.
const SHORT_REPLY_DEADLINE: Duration = Duration::from_secs(20);

/// `POST /kobo-ask`: explain a highlighted passage.
pub async fn kobo_ask(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.config)?;

    let request: HighlightRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("malformed request body: {e}")))?;
    request.validate().map_err(ApiError::BadRequest)?;

    let Some(ref generator) = state.generator else {
        return Err(ApiError::GeneratorUnavailable);
    };

    let request_id = Uuid::new_v4();
    info!(
        %request_id,
        book = %request.context.book,
        device_id = request.context.device_id.as_deref().unwrap_or("unknown"),
        passage_bytes = request.text.len(),
        "highlight received"
    );

    let short = match tokio::time::timeout(
        SHORT_REPLY_DEADLINE,
        generator.short_explain(&request.text, &request.context),
    )
    .await
    {
        Ok(Ok(short)) => short,
        Ok(Err(e)) => {
            warn!(%request_id, error = %e, "short explanation failed; returning fallback");
            FALLBACK_REPLY.to_owned()
        }
        Err(_) => {
            warn!(%request_id, "short explanation timed out; returning fallback");
            FALLBACK_REPLY.to_owned()
        }
    };

    schedule_enrichment(&state, request, request_id);

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        short,
    ))
}

/// Queue the background enrichment turn. Fails open: a missing messaging
/// setup or a full scheduler never affects the device reply.
fn schedule_enrichment(state: &AppState, request: HighlightRequest, request_id: Uuid) {
    let Some(ref messaging) = state.config.messaging else {
        debug!(%request_id, "messaging not configured; skipping enrichment");
        return;
    };
    let Some(ref gateway) = state.gateway else {
        debug!(%request_id, "gateway not available; skipping enrichment");
        return;
    };

    let gateway = Arc::clone(gateway);
    let generator = state.generator.clone();
    let diagrams = Arc::clone(&state.diagrams);
    let chat_id = messaging.chat_id;

    if let Err(e) = state.scheduler.schedule("enrich-highlight", async move {
        run_enrichment(gateway, generator, diagrams, chat_id, request).await;
    }) {
        warn!(%request_id, error = %e, "enrichment task dropped");
    }
}
