//! Generative-model wire layer.
//!
//! Defines the shared reply model and error type used by the companion,
//! plus the HTTP helpers every call goes through. The single concrete
//! client is [`gemini::GeminiClient`], which speaks the `generateContent`
//! API for text, vision, and image-producing models.
//!
//! A model reply is a list of tagged parts: text, inline image bytes, or
//! nothing at all. Callers branch on the parts they care about; an empty
//! reply is data, not an exception.

use regex::Regex;

pub mod gemini;

// ---------------------------------------------------------------------------
// Reply model
// ---------------------------------------------------------------------------

/// One part of a model reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyPart {
    /// A text segment.
    Text(String),
    /// Inline binary image data returned by an image-producing model.
    InlineImage {
        /// Image MIME type as declared by the model.
        mime: String,
        /// Decoded image bytes.
        bytes: Vec<u8>,
    },
}

/// A complete model reply. May contain any mix of parts, or none: a
/// refusal or a "no image needed" outcome is an empty part list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelReply {
    /// Reply parts in model order.
    pub parts: Vec<ReplyPart>,
}

impl ModelReply {
    /// Concatenate all text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ReplyPart::Text(t) => Some(t.as_str()),
                ReplyPart::InlineImage { .. } => None,
            })
            .collect()
    }

    /// The first inline image, when the model produced one.
    pub fn first_image(&self) -> Option<(&str, &[u8])> {
        self.parts.iter().find_map(|p| match p {
            ReplyPart::InlineImage { mime, bytes } => Some((mime.as_str(), bytes.as_slice())),
            ReplyPart::Text(_) => None,
        })
    }

    /// Whether the reply carries no parts at all.
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by the model wire layer.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// HTTP transport failure.
    #[error("model request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Response did not match the expected schema.
    #[error("model response parse error: {0}")]
    Parse(String),
    /// Upstream responded with an error status.
    #[error("model returned non-success status {status}: {body}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// Sanitized response body.
        body: String,
    },
}

impl ProviderError {
    /// Whether a retry could plausibly succeed: transport failures,
    /// rate limiting, and upstream 5xx.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Request(_) => true,
            Self::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            Self::Parse(_) => false,
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

/// Check HTTP response status and return body text or a structured error.
///
/// # Errors
///
/// Returns `ProviderError::Request` on transport failure,
/// `ProviderError::HttpStatus` on non-2xx.
pub async fn check_http_response(response: reqwest::Response) -> Result<String, ProviderError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(ProviderError::HttpStatus {
            status: status.as_u16(),
            body: sanitize_http_error_body(&body),
        });
    }
    Ok(body)
}

/// Collapse, scrub, and truncate an upstream error body before it reaches
/// any log or error path. Key material must never survive this function.
pub fn sanitize_http_error_body(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut sanitized = collapsed;
    for pattern in [
        r"AIza[A-Za-z0-9_\-]{30,}",
        r"sk-[A-Za-z0-9]{32,}",
        r"\b\d{6,10}:[A-Za-z0-9_\-]{30,}",
        r"key=[A-Za-z0-9_\-]{16,}",
    ] {
        if let Ok(regex) = Regex::new(pattern) {
            sanitized = regex.replace_all(&sanitized, "[REDACTED]").into_owned();
        }
    }

    const MAX_ERROR_BODY_CHARS: usize = 256;
    if sanitized.chars().count() > MAX_ERROR_BODY_CHARS {
        let shortened = sanitized
            .chars()
            .take(MAX_ERROR_BODY_CHARS)
            .collect::<String>();
        return format!("{shortened}...[truncated]");
    }

    sanitized
}
