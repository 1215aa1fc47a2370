//! Text generation for both reply channels.
//!
//! The short form is device-bound: one or two plain-ASCII sentences, at
//! most 200 characters, sized for a 40-column dialog. The long form is
//! channel-bound and may use full Unicode, but must never contain fenced
//! blocks or rune-drawn diagrams; that constraint is enforced twice, in
//! the prompt and in a post-filter over the model output.

use std::time::Duration;

use tracing::warn;

use crate::config::TextModelConfig;
use crate::providers::gemini::{GeminiClient, GenerateRequest, InlineAttachment};
use crate::providers::ProviderError;
use crate::types::HighlightContext;

/// Upper bound of the device-bound short reply, in characters.
pub const SHORT_REPLY_MAX_CHARS: usize = 200;

/// Backoff before the single retry of a transient model failure.
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Minimum length of a fenced or rune-drawn block the post-filter removes.
const MIN_ART_BLOCK_LINES: usize = 3;

/// Question substituted when an image upload arrives without one.
const DEFAULT_VISION_QUESTION: &str =
    "Describe this image and explain anything notable in it.";

/// Instruction appended to channel prompts when a diagram will follow.
const VISUAL_EXCLUSION: &str = "A separate diagram image will be generated and \
    attached to this conversation; do not render a diagram in text and do not \
    describe what the diagram will contain.";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by the text generator.
#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    /// The model service is unreachable (transport failure or upstream
    /// outage that survived the retry).
    #[error("text model unavailable: {0}")]
    Unavailable(String),
    /// The model responded but produced nothing usable after one retry.
    #[error("text generation failed: {0}")]
    Generation(String),
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

/// Produces every text artifact the companion sends.
#[derive(Debug, Clone)]
pub struct TextGenerator {
    client: GeminiClient,
    model: String,
}

impl TextGenerator {
    /// Build a generator from validated configuration and a shared HTTP
    /// client.
    pub fn new(config: &TextModelConfig, http: reqwest::Client) -> Self {
        Self {
            client: GeminiClient::new(&config.base_url, config.api_key.clone(), http),
            model: config.model.clone(),
        }
    }

    /// Short device-bound explanation of a highlighted passage.
    ///
    /// The result is normalized for the device dialog: plain ASCII, no
    /// control characters, at most [`SHORT_REPLY_MAX_CHARS`] characters,
    /// truncated at a word boundary.
    ///
    /// # Errors
    ///
    /// Returns [`GeneratorError`] when the model is unreachable or
    /// produces nothing usable.
    pub async fn short_explain(
        &self,
        text: &str,
        context: &HighlightContext,
    ) -> Result<String, GeneratorError> {
        let prompt = short_prompt(text, context);
        let raw = self.complete(prompt, None).await?;
        let short = normalize_short_reply(&raw);
        if short.is_empty() {
            return Err(GeneratorError::Generation(
                "short reply empty after normalization".to_owned(),
            ));
        }
        Ok(short)
    }

    /// Long channel-bound analysis of a highlighted passage.
    ///
    /// # Errors
    ///
    /// Returns [`GeneratorError`] when the model is unreachable or
    /// produces nothing usable.
    pub async fn long_explain(
        &self,
        text: &str,
        context: &HighlightContext,
    ) -> Result<String, GeneratorError> {
        let prompt = long_prompt(text, context);
        let raw = self.complete(prompt, None).await?;
        finish_channel_reply(raw)
    }

    /// Answer a follow-up, given the body of the bot message being replied
    /// to as the entire prior context.
    ///
    /// # Errors
    ///
    /// Returns [`GeneratorError`] when the model is unreachable or
    /// produces nothing usable.
    pub async fn follow_up(
        &self,
        question: &str,
        prior_text: &str,
        wants_visual: bool,
    ) -> Result<String, GeneratorError> {
        let prompt = follow_up_prompt(question, prior_text, wants_visual);
        let raw = self.complete(prompt, None).await?;
        finish_channel_reply(raw)
    }

    /// Answer a context-free question from the channel.
    ///
    /// # Errors
    ///
    /// Returns [`GeneratorError`] when the model is unreachable or
    /// produces nothing usable.
    pub async fn general_answer(
        &self,
        question: &str,
        wants_visual: bool,
    ) -> Result<String, GeneratorError> {
        let prompt = general_prompt(question, wants_visual);
        let raw = self.complete(prompt, None).await?;
        finish_channel_reply(raw)
    }

    /// Answer a question about an uploaded image.
    ///
    /// # Errors
    ///
    /// Returns [`GeneratorError`] when the model is unreachable or
    /// produces nothing usable.
    pub async fn vision_answer(
        &self,
        image_bytes: Vec<u8>,
        mime: &str,
        question: Option<&str>,
    ) -> Result<String, GeneratorError> {
        let prompt = question.unwrap_or(DEFAULT_VISION_QUESTION).to_owned();
        let attachment = InlineAttachment {
            mime: mime.to_owned(),
            bytes: image_bytes,
        };
        let raw = self.complete(prompt, Some(attachment)).await?;
        Ok(raw)
    }

    /// Ask the model to write diagram source in a structured diagram
    /// language. Used by the image pipeline's render fallback; the raw
    /// reply is returned untouched for extraction.
    ///
    /// # Errors
    ///
    /// Returns [`GeneratorError`] when the model is unreachable or
    /// produces nothing usable.
    pub async fn diagram_source(&self, context: &str) -> Result<String, GeneratorError> {
        let prompt = format!(
            "Write a Mermaid diagram that best illustrates the following. \
             Choose the most fitting kind (flowchart, sequenceDiagram, \
             classDiagram, stateDiagram, erDiagram). Respond with the \
             diagram source only, in a fenced block labeled mermaid. If no \
             diagram would genuinely help, respond with the single word \
             NONE.\n\n{context}"
        );
        self.complete(prompt, None).await
    }

    /// One model call with a single retry on transient failure or empty
    /// output, 500 ms apart.
    async fn complete(
        &self,
        prompt: String,
        attachment: Option<InlineAttachment>,
    ) -> Result<String, GeneratorError> {
        let request = GenerateRequest {
            prompt,
            attachment,
            response_images: false,
        };

        let mut last_error: Option<ProviderError> = None;
        for attempt in 0u8..2 {
            if attempt > 0 {
                tokio::time::sleep(RETRY_BACKOFF).await;
            }
            match self.client.generate(&self.model, &request).await {
                Ok(reply) => {
                    let text = reply.text().trim().to_owned();
                    if !text.is_empty() {
                        return Ok(text);
                    }
                    warn!(model = %self.model, attempt, "model returned an empty reply");
                    last_error = None;
                }
                Err(e) if e.is_transient() => {
                    warn!(model = %self.model, attempt, error = %e, "transient model failure");
                    last_error = Some(e);
                }
                Err(e) => return Err(classify(e)),
            }
        }

        match last_error {
            Some(e) => Err(classify(e)),
            None => Err(GeneratorError::Generation(
                "model returned no usable text".to_owned(),
            )),
        }
    }
}

fn classify(error: ProviderError) -> GeneratorError {
    match error {
        ProviderError::Request(_) => GeneratorError::Unavailable(error.to_string()),
        ProviderError::HttpStatus { status, .. } if status == 429 || status >= 500 => {
            GeneratorError::Unavailable(error.to_string())
        }
        _ => GeneratorError::Generation(error.to_string()),
    }
}

fn finish_channel_reply(raw: String) -> Result<String, GeneratorError> {
    let filtered = strip_diagram_blocks(&raw);
    let trimmed = filtered.trim();
    if trimmed.is_empty() {
        return Err(GeneratorError::Generation(
            "reply empty after diagram filtering".to_owned(),
        ));
    }
    Ok(trimmed.to_owned())
}

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

fn context_header(context: &HighlightContext) -> String {
    let mut header = String::new();
    if !context.book.is_empty() {
        header.push_str(&format!("Book: {}\n", context.book));
    }
    if !context.author.is_empty() {
        header.push_str(&format!("Author: {}\n", context.author));
    }
    if let Some(ref chapter) = context.chapter {
        if !chapter.is_empty() {
            header.push_str(&format!("Chapter: {chapter}\n"));
        }
    }
    header
}

fn short_prompt(text: &str, context: &HighlightContext) -> String {
    format!(
        "You are a reading companion for an e-reader.\n{}The reader selected \
         this passage:\n\n\"{text}\"\n\nExplain it in one or two short \
         sentences, at most 200 characters in total. The answer is shown in \
         a tiny 40-column dialog: plain ASCII prose only, no lists, no \
         headings, no markdown, no quotation marks around the answer.",
        context_header(context)
    )
}

fn long_prompt(text: &str, context: &HighlightContext) -> String {
    format!(
        "You are a reading companion.\n{}The reader highlighted this \
         passage:\n\n\"{text}\"\n\nWrite a rich analysis for a chat message: \
         what it means, how it fits the book when that is apparent, and any \
         background that deepens understanding. Never use triple-backtick \
         code fences. Never draw diagrams out of text characters such as \
         boxes, pipes, dashes, or arrows; if something needs a picture, \
         describe it in prose instead.",
        context_header(context)
    )
}

fn follow_up_prompt(question: &str, prior_text: &str, wants_visual: bool) -> String {
    let exclusion = if wants_visual { VISUAL_EXCLUSION } else { "" };
    format!(
        "You are a reading companion continuing a conversation. Your \
         previous message was:\n\n{prior_text}\n\nThe reader replied:\n\n\
         {question}\n\nContinue the discussion, building on your previous \
         message. Never use triple-backtick code fences and never draw \
         diagrams out of text characters. {exclusion}"
    )
}

fn general_prompt(question: &str, wants_visual: bool) -> String {
    let exclusion = if wants_visual { VISUAL_EXCLUSION } else { "" };
    format!(
        "You are a knowledgeable reading companion. Answer the question \
         below for a chat message. Never use triple-backtick code fences \
         and never draw diagrams out of text characters such as boxes, \
         pipes, dashes, or arrows. {exclusion}\n\nQuestion: {question}"
    )
}

// ---------------------------------------------------------------------------
// Output shaping
// ---------------------------------------------------------------------------

/// Normalize a model reply for the device dialog: whitespace collapsed,
/// control characters stripped, common typographic characters mapped to
/// ASCII, everything else non-ASCII dropped, then word-boundary truncation
/// at [`SHORT_REPLY_MAX_CHARS`].
pub fn normalize_short_reply(raw: &str) -> String {
    let mut ascii = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '\u{2018}' | '\u{2019}' => ascii.push('\''),
            '\u{201C}' | '\u{201D}' => ascii.push('"'),
            '\u{2013}' | '\u{2014}' => ascii.push('-'),
            '\u{2026}' => ascii.push_str("..."),
            c if c.is_whitespace() => ascii.push(' '),
            c if c.is_ascii() && !c.is_ascii_control() => ascii.push(c),
            _ => {}
        }
    }
    let collapsed = ascii.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_at_word_boundary(&collapsed, SHORT_REPLY_MAX_CHARS)
}

/// Truncate to at most `max` characters, cutting at the last word boundary
/// that fits. Falls back to a hard cut when the text has no space within
/// the window.
pub fn truncate_at_word_boundary(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_owned();
    }
    let window: String = text.chars().take(max).collect();
    match window.rfind(' ') {
        Some(cut) => window[..cut].trim_end().to_owned(),
        None => window,
    }
}

/// Remove fenced blocks and rune-drawn diagram blocks from channel-bound
/// output.
///
/// Fenced blocks spanning at least [`MIN_ART_BLOCK_LINES`] lines are
/// removed whole; shorter fences are unwrapped and their body kept. Runs
/// of at least [`MIN_ART_BLOCK_LINES`] consecutive lines drawn
/// predominantly from box/pipe/dash/arrow characters are removed.
pub fn strip_diagram_blocks(text: &str) -> String {
    let without_fences = strip_fenced_blocks(text);
    let without_art = strip_drawing_runs(&without_fences);
    collapse_blank_lines(&without_art)
}

fn strip_fenced_blocks(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let mut kept: Vec<&str> = Vec::with_capacity(lines.len());
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        if line.trim_start().starts_with("```") {
            // Find the closing fence.
            let mut j = i.saturating_add(1);
            while j < lines.len() && !lines[j].trim_start().starts_with("```") {
                j = j.saturating_add(1);
            }
            let body_len = j.saturating_sub(i.saturating_add(1));
            if body_len < MIN_ART_BLOCK_LINES {
                // Short fence: keep the body, drop the fence markers.
                kept.extend_from_slice(&lines[i.saturating_add(1)..j.min(lines.len())]);
            }
            i = j.saturating_add(1);
            continue;
        }
        kept.push(line);
        i = i.saturating_add(1);
    }
    kept.join("\n")
}

fn strip_drawing_runs(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let mut kept: Vec<&str> = Vec::with_capacity(lines.len());
    let mut i = 0;
    while i < lines.len() {
        if is_drawing_line(lines[i]) {
            let mut j = i;
            while j < lines.len() && is_drawing_line(lines[j]) {
                j = j.saturating_add(1);
            }
            if j.saturating_sub(i) >= MIN_ART_BLOCK_LINES {
                i = j;
                continue;
            }
        }
        kept.push(lines[i]);
        i = i.saturating_add(1);
    }
    kept.join("\n")
}

/// A line counts as drawing when at least 60% of its non-whitespace
/// characters come from the box/pipe/dash/arrow repertoire.
fn is_drawing_line(line: &str) -> bool {
    let mut total: usize = 0;
    let mut drawing: usize = 0;
    for ch in line.chars() {
        if ch.is_whitespace() {
            continue;
        }
        total = total.saturating_add(1);
        let is_drawing_char = matches!(
            ch,
            '|' | '+' | '-' | '_' | '=' | '/' | '\\' | '<' | '>' | '^' | 'v' | '*' | '.' | ':'
        ) || ('\u{2500}'..='\u{257F}').contains(&ch)
            || matches!(ch, '\u{2190}'..='\u{2193}');
        if is_drawing_char {
            drawing = drawing.saturating_add(1);
        }
    }
    total > 0 && drawing.saturating_mul(10) >= total.saturating_mul(6)
}

fn collapse_blank_lines(text: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut blanks: usize = 0;
    for line in text.lines() {
        if line.trim().is_empty() {
            blanks = blanks.saturating_add(1);
            if blanks > 1 {
                continue;
            }
        } else {
            blanks = 0;
        }
        out.push(line);
    }
    out.join("\n")
}
