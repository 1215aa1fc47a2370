//! Conversation routing for webhook updates.
//!
//! Each update is classified exactly once, in order: foreign chats and
//! bot-authored messages are dropped first (no outbound call of any kind),
//! a mention of the bot starts the general-question flow, a reply to one
//! of the bot's own messages starts the follow-up flow, and everything
//! else is ignored. Within a turn the text reply is always sent before
//! the diagram, and the diagram is threaded to the text reply.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::companion::diagram::{DiagramPipeline, VISUAL_CAPTION};
use crate::companion::generator::TextGenerator;
use crate::companion::intent::wants_visual;
use crate::telegram::gateway::{BotIdentity, TelegramGateway, TypingKind};
use crate::types::ConversationUpdate;

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// What the router decided to do with an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The bot was mentioned: answer as a fresh question.
    GeneralQuestion,
    /// The update replies to a bot message: continue that discussion.
    FollowUp,
    /// No action; the payload names the reason for the log line.
    Ignore(&'static str),
}

/// Classify an update. First match wins.
pub fn classify(
    update: &ConversationUpdate,
    home_chat_id: i64,
    bot: &BotIdentity,
) -> Disposition {
    if update.chat_id != home_chat_id {
        return Disposition::Ignore("foreign chat");
    }
    if update.sender_is_bot {
        return Disposition::Ignore("bot author");
    }
    if update.mentions_username(&bot.username) {
        return Disposition::GeneralQuestion;
    }
    if update.is_reply_to(bot.id) {
        return Disposition::FollowUp;
    }
    Disposition::Ignore("not addressed to the bot")
}

/// Remove every `@username` token for the given username from the text
/// (case-insensitive) and collapse the remaining whitespace.
pub fn strip_mention(text: &str, username: &str) -> String {
    text.split_whitespace()
        .filter(|token| {
            let name = token
                .strip_prefix('@')
                .map(|n| n.trim_end_matches(|c: char| !c.is_alphanumeric() && c != '_'));
            !name.is_some_and(|n| n.eq_ignore_ascii_case(username))
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Dispatches classified updates into the two conversation flows.
pub struct ConversationRouter {
    gateway: Arc<TelegramGateway>,
    generator: Option<TextGenerator>,
    diagrams: Arc<DiagramPipeline>,
    home_chat_id: i64,
    bot: BotIdentity,
}

impl ConversationRouter {
    /// Wire the router. The bot identity is injected at construction so
    /// classification never needs a network call.
    pub fn new(
        gateway: Arc<TelegramGateway>,
        generator: Option<TextGenerator>,
        diagrams: Arc<DiagramPipeline>,
        home_chat_id: i64,
        bot: BotIdentity,
    ) -> Self {
        Self {
            gateway,
            generator,
            diagrams,
            home_chat_id,
            bot,
        }
    }

    /// Handle one update end to end. Never returns an error: every
    /// failure is logged and ends the turn.
    pub async fn on_update(&self, update: ConversationUpdate) {
        match classify(&update, self.home_chat_id, &self.bot) {
            Disposition::Ignore(reason) => {
                debug!(message_id = update.message_id, reason, "ignoring update");
            }
            Disposition::GeneralQuestion => self.general_question(update).await,
            Disposition::FollowUp => self.follow_up(update).await,
        }
    }

    async fn general_question(&self, update: ConversationUpdate) {
        let question = strip_mention(&update.text, &self.bot.username);
        if question.is_empty() {
            debug!(message_id = update.message_id, "mention without a question");
            return;
        }
        let Some(ref generator) = self.generator else {
            warn!("text generator not configured; dropping question");
            return;
        };

        self.gateway.typing(self.home_chat_id, TypingKind::Typing).await;
        let visual = wants_visual(&question);
        let answer = match generator.general_answer(&question, visual).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(error = %e, "general answer generation failed");
                return;
            }
        };

        let text_id = match self
            .gateway
            .send_text(self.home_chat_id, &answer, Some(update.message_id))
            .await
        {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "failed to send answer; aborting turn");
                return;
            }
        };
        info!(message_id = update.message_id, visual, "answered channel question");

        self.maybe_send_diagram(visual, &question, &answer, text_id).await;
    }

    async fn follow_up(&self, update: ConversationUpdate) {
        let Some(ref prior) = update.reply_to else {
            debug!(message_id = update.message_id, "follow-up without prior message");
            return;
        };
        let question = update.text.trim();
        if question.is_empty() {
            return;
        }
        let Some(ref generator) = self.generator else {
            warn!("text generator not configured; dropping follow-up");
            return;
        };

        self.gateway.typing(self.home_chat_id, TypingKind::Typing).await;
        let visual = wants_visual(question);
        let answer = match generator.follow_up(question, &prior.text, visual).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(error = %e, "follow-up generation failed");
                return;
            }
        };

        let text_id = match self
            .gateway
            .send_text(self.home_chat_id, &answer, Some(update.message_id))
            .await
        {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "failed to send follow-up; aborting turn");
                return;
            }
        };
        info!(message_id = update.message_id, visual, "answered follow-up");

        self.maybe_send_diagram(visual, question, &answer, text_id).await;
    }

    /// Produce and deliver the turn's diagram, when one was asked for.
    /// A photo failure only logs; the text reply already went out.
    async fn maybe_send_diagram(
        &self,
        visual: bool,
        context: &str,
        prior_text: &str,
        reply_to: i32,
    ) {
        if !visual || !self.diagrams.enabled() {
            return;
        }
        self.gateway
            .typing(self.home_chat_id, TypingKind::UploadPhoto)
            .await;
        let Some(image) = self.diagrams.try_generate(context, prior_text).await else {
            debug!("no diagram produced for this turn");
            return;
        };
        if let Err(e) = self
            .gateway
            .send_photo(self.home_chat_id, image, VISUAL_CAPTION, Some(reply_to))
            .await
        {
            warn!(error = %e, "failed to send diagram photo");
        }
    }
}
