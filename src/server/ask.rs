//! General-question and image-understanding endpoints.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Multipart, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{require_api_key, ApiError, AppState};
use crate::companion::enrich::post_answer;
use crate::companion::generator::GeneratorError;
use crate::companion::intent::wants_visual;
use crate::types::ImageQuestion;

/// Question substituted in the channel card when an image upload arrives
/// without one.
const DEFAULT_IMAGE_QUESTION: &str = "What is in this image?";

// ---------------------------------------------------------------------------
// POST /ask
// ---------------------------------------------------------------------------

/// Request body for `/ask`.
#[derive(Debug, Deserialize)]
pub struct AskRequest {
    /// The question to answer.
    pub question: String,
    /// Whether to also post the answer to the channel.
    #[serde(default)]
    pub send_to_channel: bool,
}

/// Response body for `/ask`.
#[derive(Debug, Serialize)]
pub struct AskResponse {
    /// The question, echoed back.
    pub question: String,
    /// The generated answer.
    pub answer: String,
    /// Whether a channel post was scheduled.
    pub sent_to_channel: bool,
}

/// `POST /ask`: answer a context-free question.
pub async fn ask(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<AskResponse>, ApiError> {
    require_api_key(&headers, &state.config)?;

    let request: AskRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("malformed request body: {e}")))?;
    let question = request.question.trim().to_owned();
    if question.is_empty() {
        return Err(ApiError::BadRequest("question must not be empty".to_owned()));
    }

    let Some(ref generator) = state.generator else {
        return Err(ApiError::GeneratorUnavailable);
    };

    let visual = wants_visual(&question);
    let answer = generator
        .general_answer(&question, visual)
        .await
        .map_err(map_generator_error)?;

    let sent_to_channel = request.send_to_channel
        && schedule_channel_post(&state, question.clone(), answer.clone(), visual);

    info!(visual, sent_to_channel, "answered api question");
    Ok(Json(AskResponse {
        question,
        answer,
        sent_to_channel,
    }))
}

// ---------------------------------------------------------------------------
// POST /ask-with-image
// ---------------------------------------------------------------------------

/// Response body for `/ask-with-image`.
#[derive(Debug, Serialize)]
pub struct ImageAskResponse {
    /// The question that was asked (the default when none was supplied).
    pub question: String,
    /// The generated answer.
    pub answer: String,
    /// Original filename of the upload.
    pub image_filename: String,
    /// Size of the uploaded image in bytes.
    pub image_size_bytes: usize,
    /// Whether a channel post was scheduled.
    pub sent_to_channel: bool,
}

/// `POST /ask-with-image`: answer a question about an uploaded image.
pub async fn ask_with_image(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<ImageAskResponse>, ApiError> {
    require_api_key(&headers, &state.config)?;

    let upload = read_image_question(multipart).await?;
    upload.validate().map_err(ApiError::BadRequest)?;

    let Some(ref generator) = state.generator else {
        return Err(ApiError::GeneratorUnavailable);
    };

    let question = upload
        .question
        .clone()
        .unwrap_or_else(|| DEFAULT_IMAGE_QUESTION.to_owned());
    let image_size_bytes = upload.bytes.len();
    let image_filename = upload.filename.clone();

    let answer = generator
        .vision_answer(upload.bytes, &upload.mime, Some(&question))
        .await
        .map_err(map_generator_error)?;

    let sent_to_channel = upload.send_to_channel
        && schedule_channel_post(&state, question.clone(), answer.clone(), false);

    info!(
        image_size_bytes,
        sent_to_channel, "answered image question"
    );
    Ok(Json(ImageAskResponse {
        question,
        answer,
        image_filename,
        image_size_bytes,
        sent_to_channel,
    }))
}

/// Collect the multipart fields into an [`ImageQuestion`].
async fn read_image_question(mut multipart: Multipart) -> Result<ImageQuestion, ApiError> {
    let mut image: Option<(Vec<u8>, String, String)> = None;
    let mut question: Option<String> = None;
    let mut send_to_channel = false;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("malformed multipart body: {e}")))?
    {
        match field.name().unwrap_or("") {
            "image" => {
                let filename = field.file_name().unwrap_or("upload").to_owned();
                let mime = field.content_type().unwrap_or("").to_owned();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("failed to read image: {e}")))?;
                image = Some((bytes.to_vec(), mime, filename));
            }
            "question" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("failed to read question: {e}")))?;
                let text = text.trim().to_owned();
                if !text.is_empty() {
                    question = Some(text);
                }
            }
            "send_to_channel" => {
                let text = field.text().await.unwrap_or_default();
                send_to_channel = matches!(
                    text.trim().to_ascii_lowercase().as_str(),
                    "true" | "1" | "yes" | "on"
                );
            }
            _ => {}
        }
    }

    let (bytes, mime, filename) =
        image.ok_or_else(|| ApiError::BadRequest("missing image field".to_owned()))?;
    Ok(ImageQuestion {
        bytes,
        mime,
        filename,
        question,
        send_to_channel,
    })
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

fn map_generator_error(error: GeneratorError) -> ApiError {
    match error {
        GeneratorError::Unavailable(_) => ApiError::GeneratorUnavailable,
        GeneratorError::Generation(reason) => ApiError::Generation(reason),
    }
}

/// Schedule a channel post of the answer. Returns whether the post was
/// actually queued; messaging being unconfigured or the scheduler being
/// full both fail open.
fn schedule_channel_post(state: &AppState, question: String, answer: String, visual: bool) -> bool {
    let Some(ref messaging) = state.config.messaging else {
        return false;
    };
    let Some(ref gateway) = state.gateway else {
        return false;
    };

    let gateway = Arc::clone(gateway);
    let diagrams = Arc::clone(&state.diagrams);
    let chat_id = messaging.chat_id;

    match state.scheduler.schedule("post-answer", async move {
        post_answer(gateway, diagrams, chat_id, question, answer, visual).await;
    }) {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "channel post dropped");
            false
        }
    }
}
