//! Telegram webhook ingress.
//!
//! This endpoint never fails outward: payloads that do not parse, update
//! shapes the router has no use for, and a full scheduler all acknowledge
//! with 200 so the platform does not redeliver.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use tracing::{debug, warn};

use super::AppState;
use crate::telegram::gateway::parse_update;

/// `POST /telegram-webhook`: receive one platform update.
pub async fn telegram_webhook(State(state): State<AppState>, body: Bytes) -> StatusCode {
    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            debug!(error = %e, "ignoring non-json webhook payload");
            return StatusCode::OK;
        }
    };

    let Some(update) = parse_update(&payload) else {
        debug!("ignoring non-text webhook update");
        return StatusCode::OK;
    };

    let Some(ref conversation) = state.conversation else {
        debug!("messaging not configured; ignoring webhook update");
        return StatusCode::OK;
    };

    // Answering can take multiple model calls; ack the platform now and
    // run the turn in the background.
    let conversation = Arc::clone(conversation);
    if let Err(e) = state.scheduler.schedule("conversation-turn", async move {
        conversation.on_update(update).await;
    }) {
        warn!(error = %e, "conversation turn dropped");
    }

    StatusCode::OK
}
