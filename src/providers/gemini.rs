//! Gemini `generateContent` client.
//!
//! One client serves all three call shapes the companion needs: plain text
//! generation, vision (text question + inline image), and image-producing
//! generation (`responseModalities: ["TEXT", "IMAGE"]`). Request building
//! and response parsing are pure functions so the wire format is testable
//! without a server.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};

use super::{check_http_response, ModelReply, ProviderError, ReplyPart};
use crate::config::Secret;

/// An inline binary attachment for vision requests.
#[derive(Debug, Clone)]
pub struct InlineAttachment {
    /// Attachment MIME type.
    pub mime: String,
    /// Raw bytes; base64-encoded on the wire.
    pub bytes: Vec<u8>,
}

/// A single-turn generation request.
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    /// The full prompt text for this turn.
    pub prompt: String,
    /// Optional image attached to the prompt (vision calls).
    pub attachment: Option<InlineAttachment>,
    /// Whether the model is asked to respond with image parts as well as
    /// text (image-producing models only).
    pub response_images: bool,
}

/// Build the JSON body for a `generateContent` call.
pub fn build_request(request: &GenerateRequest) -> Value {
    let mut parts = vec![json!({ "text": request.prompt })];
    if let Some(ref attachment) = request.attachment {
        parts.push(json!({
            "inline_data": {
                "mime_type": attachment.mime,
                "data": STANDARD.encode(&attachment.bytes),
            }
        }));
    }

    let mut body = json!({
        "contents": [{ "role": "user", "parts": parts }],
    });
    if request.response_images {
        body["generationConfig"] = json!({ "responseModalities": ["TEXT", "IMAGE"] });
    }
    body
}

/// Parse a `generateContent` response body into a [`ModelReply`].
///
/// A response with no candidates (safety block, empty result) parses to an
/// empty reply rather than an error; only malformed JSON and undecodable
/// inline data are parse failures.
///
/// # Errors
///
/// Returns [`ProviderError::Parse`] on malformed JSON or invalid inline
/// image data.
pub fn parse_reply(body: &str) -> Result<ModelReply, ProviderError> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| ProviderError::Parse(e.to_string()))?;

    let Some(parts) = value
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(Value::as_array)
    else {
        return Ok(ModelReply::default());
    };

    let mut reply = ModelReply::default();
    for part in parts {
        if let Some(text) = part.get("text").and_then(Value::as_str) {
            reply.parts.push(ReplyPart::Text(text.to_owned()));
            continue;
        }
        if let Some(inline) = part.get("inlineData").or_else(|| part.get("inline_data")) {
            let mime = inline
                .get("mimeType")
                .or_else(|| inline.get("mime_type"))
                .and_then(Value::as_str)
                .unwrap_or("image/png")
                .to_owned();
            let data = inline
                .get("data")
                .and_then(Value::as_str)
                .ok_or_else(|| ProviderError::Parse("inline part missing data".to_owned()))?;
            let bytes = STANDARD
                .decode(data)
                .map_err(|e| ProviderError::Parse(format!("invalid inline image data: {e}")))?;
            reply.parts.push(ReplyPart::InlineImage { mime, bytes });
        }
    }

    Ok(reply)
}

/// Thin HTTP client for the `generateContent` API.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    base_url: String,
    api_key: Secret,
    client: reqwest::Client,
}

impl GeminiClient {
    /// Create a client against the given API base URL.
    pub fn new(base_url: impl Into<String>, api_key: Secret, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
            client,
        }
    }

    /// Run a single `generateContent` call against the named model.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on transport, status, or parse failure.
    pub async fn generate(
        &self,
        model: &str,
        request: &GenerateRequest,
    ) -> Result<ModelReply, ProviderError> {
        let url = format!("{}/v1beta/models/{model}:generateContent", self.base_url);
        let body = build_request(request);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", self.api_key.expose())
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let payload = check_http_response(response).await?;
        parse_reply(&payload)
    }
}
