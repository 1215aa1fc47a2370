//! Background enrichment of a device highlight.
//!
//! Runs entirely off the device's request path: post the highlight card,
//! reply to it with the long analysis, then optionally reply to that with
//! a diagram. A failure at any step skips the remaining steps and ends
//! the turn; nothing here propagates to the ingress handler.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::companion::diagram::{DiagramPipeline, VISUAL_CAPTION};
use crate::companion::generator::TextGenerator;
use crate::telegram::gateway::TelegramGateway;
use crate::types::HighlightRequest;

/// Compose the channel message that opens a highlight turn: reading
/// position header plus the quoted selection.
pub fn compose_highlight_card(request: &HighlightRequest) -> String {
    let context = &request.context;
    let mut header = String::from("\u{1F4D6} ");
    if context.book.is_empty() {
        header.push_str("A highlight from your reading");
    } else {
        header.push_str(&context.book);
        if !context.author.is_empty() {
            header.push_str(&format!(" by {}", context.author));
        }
    }
    if let Some(ref chapter) = context.chapter {
        if !chapter.is_empty() {
            header.push_str(&format!(" ({chapter})"));
        }
    }
    format!("{header}\n\n\u{201C}{}\u{201D}", request.text.trim())
}

/// Run one enrichment turn to completion.
pub async fn run_enrichment(
    gateway: Arc<TelegramGateway>,
    generator: Option<TextGenerator>,
    diagrams: Arc<DiagramPipeline>,
    chat_id: i64,
    request: HighlightRequest,
) {
    let turn_id = Uuid::new_v4();

    let card = compose_highlight_card(&request);
    let card_id = match gateway.send_text(chat_id, &card, None).await {
        Ok(id) => id,
        Err(e) => {
            warn!(%turn_id, error = %e, "failed to post highlight card; ending turn");
            return;
        }
    };

    let Some(generator) = generator else {
        info!(%turn_id, card_id, "text generator not configured; highlight card only");
        return;
    };

    let analysis = match generator.long_explain(&request.text, &request.context).await {
        Ok(analysis) => analysis,
        Err(e) => {
            warn!(%turn_id, error = %e, "long analysis failed; ending turn");
            return;
        }
    };

    let analysis_id = match gateway.send_text(chat_id, &analysis, Some(card_id)).await {
        Ok(id) => id,
        Err(e) => {
            warn!(%turn_id, error = %e, "failed to post analysis; ending turn");
            return;
        }
    };

    let mut photo_sent = false;
    if diagrams.enabled() {
        if let Some(image) = diagrams.try_generate(&request.text, &analysis).await {
            match gateway
                .send_photo(chat_id, image, VISUAL_CAPTION, Some(analysis_id))
                .await
            {
                Ok(_) => photo_sent = true,
                Err(e) => warn!(%turn_id, error = %e, "failed to post diagram photo"),
            }
        }
    }

    info!(%turn_id, card_id, analysis_id, photo_sent, "enrichment turn complete");
}

/// Post a question/answer card to the channel on behalf of the HTTP ask
/// endpoints, with the same visual gating as the conversation flows.
pub async fn post_answer(
    gateway: Arc<TelegramGateway>,
    diagrams: Arc<DiagramPipeline>,
    chat_id: i64,
    question: String,
    answer: String,
    visual: bool,
) {
    let card = format!("\u{1F4AC} {question}\n\n{answer}");
    let card_id = match gateway.send_text(chat_id, &card, None).await {
        Ok(id) => id,
        Err(e) => {
            warn!(error = %e, "failed to post answer card");
            return;
        }
    };

    if visual && diagrams.enabled() {
        if let Some(image) = diagrams.try_generate(&question, &answer).await {
            if let Err(e) = gateway
                .send_photo(chat_id, image, VISUAL_CAPTION, Some(card_id))
                .await
            {
                warn!(error = %e, "failed to post answer diagram");
            }
        }
    }
}
