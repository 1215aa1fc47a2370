//! Outbound Telegram gateway and webhook update normalization.
//!
//! Wraps a teloxide [`Bot`] behind the small surface the companion needs:
//! threaded text and photo sends, best-effort typing indicators, a cached
//! bot identity, webhook registration, and the translation of raw webhook
//! payloads into [`ConversationUpdate`] values.

use teloxide::prelude::*;
use teloxide::types::{
    ChatAction, InputFile, Message, MessageEntityKind, MessageId, ReplyParameters, Update,
    UpdateKind,
};
use tokio::sync::OnceCell;
use tracing::debug;
use url::Url;

use crate::types::{ConversationUpdate, PriorMessage};

/// Errors from the Telegram Bot API.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The underlying API call failed.
    #[error("telegram api call failed: {0}")]
    Api(#[from] teloxide::RequestError),
}

/// The bot's own account, fetched once and cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotIdentity {
    /// Bot user id.
    pub id: u64,
    /// Bot username, without the leading `@`.
    pub username: String,
}

/// Typing-indicator variants the companion uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingKind {
    /// "typing…" while composing text.
    Typing,
    /// "sending photo…" while a diagram is in flight.
    UploadPhoto,
}

/// Thread-safe handle to the Telegram Bot API.
pub struct TelegramGateway {
    bot: Bot,
    identity: OnceCell<BotIdentity>,
}

impl TelegramGateway {
    /// Create a gateway from a bot token.
    pub fn new(bot_token: &str) -> Self {
        Self {
            bot: Bot::new(bot_token),
            identity: OnceCell::new(),
        }
    }

    /// Create a gateway pointed at a non-default Bot API server
    /// (self-hosted instances, tests).
    pub fn with_api_url(bot_token: &str, api_url: Url) -> Self {
        Self {
            bot: Bot::new(bot_token).set_api_url(api_url),
            identity: OnceCell::new(),
        }
    }

    /// Send a text message, optionally threaded as a reply.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when the platform rejects the send.
    pub async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i32>,
    ) -> Result<i32, GatewayError> {
        let mut request = self.bot.send_message(ChatId(chat_id), text);
        if let Some(message_id) = reply_to {
            request = request.reply_parameters(ReplyParameters::new(MessageId(message_id)));
        }
        let sent = request.await?;
        Ok(sent.id.0)
    }

    /// Send a photo from in-memory bytes, optionally captioned and
    /// threaded as a reply.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when the platform rejects the send.
    pub async fn send_photo(
        &self,
        chat_id: i64,
        image_bytes: Vec<u8>,
        caption: &str,
        reply_to: Option<i32>,
    ) -> Result<i32, GatewayError> {
        let photo = InputFile::memory(image_bytes).file_name("diagram.png");
        let mut request = self.bot.send_photo(ChatId(chat_id), photo);
        if !caption.is_empty() {
            request = request.caption(caption);
        }
        if let Some(message_id) = reply_to {
            request = request.reply_parameters(ReplyParameters::new(MessageId(message_id)));
        }
        let sent = request.await?;
        Ok(sent.id.0)
    }

    /// Best-effort typing indicator; failures are logged and swallowed.
    pub async fn typing(&self, chat_id: i64, kind: TypingKind) {
        let action = match kind {
            TypingKind::Typing => ChatAction::Typing,
            TypingKind::UploadPhoto => ChatAction::UploadPhoto,
        };
        if let Err(e) = self.bot.send_chat_action(ChatId(chat_id), action).await {
            debug!(error = %e, "failed to send chat action");
        }
    }

    /// The bot's own identity, fetched from `getMe` on first use and
    /// cached for the process lifetime.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when the first fetch fails; later calls
    /// return the cached value.
    pub async fn bot_identity(&self) -> Result<&BotIdentity, GatewayError> {
        self.identity
            .get_or_try_init(|| async {
                let me = self.bot.get_me().await?;
                let username = me.user.username.clone().unwrap_or_default();
                Ok(BotIdentity {
                    id: me.user.id.0,
                    username,
                })
            })
            .await
    }

    /// Point the platform's webhook at the given public URL.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when registration fails.
    pub async fn register_webhook(&self, url: Url) -> Result<(), GatewayError> {
        self.bot.set_webhook(url).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Webhook normalization
// ---------------------------------------------------------------------------

/// Parse a raw webhook payload into a [`ConversationUpdate`].
///
/// Returns `None` for anything that is not a text message: edited
/// messages, media, channel posts, callback queries, and payloads that do
/// not deserialize at all. The webhook endpoint acknowledges those with
/// 200 regardless.
pub fn parse_update(payload: &serde_json::Value) -> Option<ConversationUpdate> {
    // `Update`'s `kind` field is `#[serde(flatten)]` over a hand-rolled,
    // `deserialize_any`-based `Deserialize` impl; `serde_json`'s `Value`
    // deserializer does not drive that combination correctly, so the
    // payload is round-tripped through its string form instead.
    let update: Update = serde_json::from_str(&payload.to_string()).ok()?;
    match update.kind {
        UpdateKind::Message(message) => normalize_message(&message),
        _ => None,
    }
}

fn normalize_message(message: &Message) -> Option<ConversationUpdate> {
    let text = message.text()?.to_owned();
    let from = message.from.as_ref()?;

    let mut mentions = entity_mentions(message, &text);
    for literal in literal_mentions(&text) {
        if !mentions.iter().any(|m| m.eq_ignore_ascii_case(&literal)) {
            mentions.push(literal);
        }
    }

    let reply_to = message.reply_to_message().map(|prior| PriorMessage {
        message_id: prior.id.0,
        sender_id: prior.from.as_ref().map(|u| u.id.0).unwrap_or(0),
        sender_is_bot: prior.from.as_ref().is_some_and(|u| u.is_bot),
        text: prior.text().unwrap_or_default().to_owned(),
    });

    Some(ConversationUpdate {
        message_id: message.id.0,
        chat_id: message.chat.id.0,
        sender_id: from.id.0,
        sender_is_bot: from.is_bot,
        text,
        mentions,
        reply_to,
    })
}

/// Mentions declared in message entities. Telegram entity offsets are
/// UTF-16 code units, so the span is sliced in that encoding.
fn entity_mentions(message: &Message, text: &str) -> Vec<String> {
    let Some(entities) = message.entities() else {
        return Vec::new();
    };
    entities
        .iter()
        .filter(|e| e.kind == MessageEntityKind::Mention)
        .filter_map(|e| utf16_slice(text, e.offset, e.length))
        .filter_map(|span| span.strip_prefix('@').map(ToOwned::to_owned))
        .collect()
}

/// `@username` tokens found by scanning the text, as a fallback for
/// updates that arrive without entity metadata.
fn literal_mentions(text: &str) -> Vec<String> {
    text.split_whitespace()
        .filter_map(|token| token.strip_prefix('@'))
        .map(|name| {
            name.trim_end_matches(|c: char| !c.is_alphanumeric() && c != '_')
                .to_owned()
        })
        .filter(|name| !name.is_empty())
        .collect()
}

/// Slice a string by UTF-16 code-unit offset and length.
fn utf16_slice(text: &str, offset: usize, length: usize) -> Option<String> {
    let units: Vec<u16> = text.encode_utf16().collect();
    let end = offset.checked_add(length)?;
    if end > units.len() {
        return None;
    }
    String::from_utf16(&units[offset..end]).ok()
}
