//! Core request and update types shared across the companion pipeline.

use serde::Deserialize;

/// Maximum accepted size of a highlighted passage, in bytes.
pub const MAX_HIGHLIGHT_BYTES: usize = 8192;

/// Maximum accepted size of an uploaded image, in bytes (20 MiB).
pub const MAX_IMAGE_BYTES: usize = 20_971_520;

/// Image MIME types accepted by the image-understanding endpoint.
pub const ALLOWED_IMAGE_MIMES: [&str; 4] =
    ["image/jpeg", "image/png", "image/gif", "image/webp"];

// ---------------------------------------------------------------------------
// Device ingress
// ---------------------------------------------------------------------------

/// Request mode sent by the device. Only `explain` exists today; the enum
/// keeps the wire field strict so unknown modes fail validation as 400.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestMode {
    /// Explain the selected passage.
    Explain,
}

/// Reading position metadata captured alongside a highlight.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HighlightContext {
    /// Book title, as the device reports it.
    #[serde(default)]
    pub book: String,
    /// Author name.
    #[serde(default)]
    pub author: String,
    /// Chapter title, when the device knows it.
    #[serde(default)]
    pub chapter: Option<String>,
    /// Opaque device identifier, used only for log correlation.
    #[serde(default)]
    pub device_id: Option<String>,
}

/// A highlighted passage posted by the e-reader.
///
/// Owned by the ingress handler through the synchronous path, then moved
/// into the enrichment task. Never persisted.
#[derive(Debug, Clone, Deserialize)]
pub struct HighlightRequest {
    /// Request mode.
    pub mode: RequestMode,
    /// The selected passage. Non-empty, at most [`MAX_HIGHLIGHT_BYTES`].
    pub text: String,
    /// Reading position metadata, used only for prompt construction.
    #[serde(default)]
    pub context: HighlightContext,
}

impl HighlightRequest {
    /// Validate payload bounds.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when the passage is empty or
    /// exceeds [`MAX_HIGHLIGHT_BYTES`].
    pub fn validate(&self) -> Result<(), String> {
        if self.text.is_empty() {
            return Err("text must not be empty".to_owned());
        }
        if self.text.len() > MAX_HIGHLIGHT_BYTES {
            return Err(format!(
                "text exceeds maximum size of {MAX_HIGHLIGHT_BYTES} bytes"
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Image understanding
// ---------------------------------------------------------------------------

/// An uploaded image plus an optional question about it.
#[derive(Debug, Clone)]
pub struct ImageQuestion {
    /// Raw image bytes.
    pub bytes: Vec<u8>,
    /// Declared MIME type, one of [`ALLOWED_IMAGE_MIMES`].
    pub mime: String,
    /// Original upload filename, echoed back in the response.
    pub filename: String,
    /// The question; a generic prompt is substituted when absent.
    pub question: Option<String>,
    /// Whether the answer should also be posted to the channel.
    pub send_to_channel: bool,
}

impl ImageQuestion {
    /// Validate the upload against the MIME allowlist and size bound.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason on violation.
    pub fn validate(&self) -> Result<(), String> {
        if self.bytes.is_empty() {
            return Err("image is empty".to_owned());
        }
        if self.bytes.len() > MAX_IMAGE_BYTES {
            return Err(format!(
                "image exceeds maximum size of {MAX_IMAGE_BYTES} bytes"
            ));
        }
        if !ALLOWED_IMAGE_MIMES.contains(&self.mime.as_str()) {
            return Err(format!("unsupported image type {}", self.mime));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Conversation updates
// ---------------------------------------------------------------------------

/// The message a conversation update replies to. This is the entire
/// context the follow-up flow needs: the prior body text and who wrote it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorMessage {
    /// Telegram message id of the replied-to message.
    pub message_id: i32,
    /// Author id of the replied-to message.
    pub sender_id: u64,
    /// Whether the replied-to message was authored by a bot account.
    pub sender_is_bot: bool,
    /// Body text of the replied-to message.
    pub text: String,
}

/// A normalized text-message update from the messaging platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationUpdate {
    /// Telegram message id of this update.
    pub message_id: i32,
    /// Chat the message was posted in.
    pub chat_id: i64,
    /// Author id.
    pub sender_id: u64,
    /// Whether the author is a bot account.
    pub sender_is_bot: bool,
    /// Message body text.
    pub text: String,
    /// `@username` mentions present in the message, without the leading `@`.
    pub mentions: Vec<String>,
    /// The replied-to message, when this update is a reply.
    pub reply_to: Option<PriorMessage>,
}

impl ConversationUpdate {
    /// Whether the message mentions the given bot username
    /// (case-insensitive).
    pub fn mentions_username(&self, username: &str) -> bool {
        self.mentions
            .iter()
            .any(|m| m.eq_ignore_ascii_case(username))
    }

    /// Whether the message is a reply to a message authored by the given
    /// user id.
    pub fn is_reply_to(&self, user_id: u64) -> bool {
        self.reply_to
            .as_ref()
            .is_some_and(|prior| prior.sender_id == user_id)
    }
}
