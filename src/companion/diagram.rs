//! Hybrid diagram production.
//!
//! Two strategies, tried in order. The direct strategy asks an
//! image-producing model for raster bytes; the render strategy asks the
//! text model for Mermaid source and fetches a PNG from an external
//! renderer. Producing no image is a legitimate outcome: every failure
//! in here resolves to `None`, never to an error in the caller.

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::companion::generator::TextGenerator;
use crate::config::CompanionConfig;
use crate::providers::gemini::{GeminiClient, GenerateRequest};

/// Deadline for the direct image-model call.
const DIRECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Deadline for generating diagram source from the text model.
const SOURCE_TIMEOUT: Duration = Duration::from_secs(10);

/// Deadline for fetching the rendered PNG.
const RENDER_TIMEOUT: Duration = Duration::from_secs(15);

/// How much of a failing renderer body is logged for diagnostics.
const RENDER_ERROR_LOG_BYTES: usize = 200;

/// Caption attached to every generated diagram photo.
pub const VISUAL_CAPTION: &str = "\u{1F3A8} Visual explanation";

/// First tokens that identify Mermaid diagram source.
const DIAGRAM_KEYWORDS: &[&str] = &[
    "flowchart",
    "sequenceDiagram",
    "classDiagram",
    "stateDiagram-v2",
    "stateDiagram",
    "erDiagram",
    "graph",
];

struct ImageModel {
    client: GeminiClient,
    model: String,
}

struct Renderer {
    base_url: String,
    http: reqwest::Client,
}

/// Produces at most one diagram per user turn, or nothing.
pub struct DiagramPipeline {
    image_model: Option<ImageModel>,
    renderer: Option<Renderer>,
    generator: Option<TextGenerator>,
}

impl DiagramPipeline {
    /// Wire the pipeline from configuration. The direct strategy needs an
    /// image model id plus the text-model credentials; the render
    /// strategy needs the renderer base URL plus the text generator.
    pub fn new(
        config: &CompanionConfig,
        http: reqwest::Client,
        generator: Option<TextGenerator>,
    ) -> Self {
        let image_model = match (&config.image_model_id, &config.text_model) {
            (Some(model), Some(text)) => Some(ImageModel {
                client: GeminiClient::new(&text.base_url, text.api_key.clone(), http.clone()),
                model: model.clone(),
            }),
            _ => None,
        };
        let renderer = config.renderer_base_url.as_ref().map(|base| Renderer {
            base_url: base.clone(),
            http,
        });
        Self {
            image_model,
            renderer,
            generator,
        }
    }

    /// Whether any strategy can run at all.
    pub fn enabled(&self) -> bool {
        self.image_model.is_some() || (self.renderer.is_some() && self.generator.is_some())
    }

    /// Try to produce one raster image for the turn.
    ///
    /// `context` is the user request (or highlight plus explanation);
    /// `prior_text` is the text reply just produced. Returns `None` when
    /// no strategy yields an image; never fails.
    pub async fn try_generate(&self, context: &str, prior_text: &str) -> Option<Vec<u8>> {
        if let Some(bytes) = self.direct(context, prior_text).await {
            return Some(bytes);
        }
        self.render(context, prior_text).await
    }

    /// Strategy A: ask the image model directly; accept inline bytes.
    async fn direct(&self, context: &str, prior_text: &str) -> Option<Vec<u8>> {
        let model = self.image_model.as_ref()?;
        let request = GenerateRequest {
            prompt: direct_prompt(context, prior_text),
            attachment: None,
            response_images: true,
        };

        match timeout(DIRECT_TIMEOUT, model.client.generate(&model.model, &request)).await {
            Ok(Ok(reply)) => match reply.first_image() {
                Some((mime, bytes)) if !bytes.is_empty() => {
                    debug!(mime, size = bytes.len(), "image model produced inline image");
                    Some(bytes.to_vec())
                }
                _ => {
                    debug!("image model declined to produce an image");
                    None
                }
            },
            Ok(Err(e)) => {
                warn!(error = %e, "image model call failed");
                None
            }
            Err(_) => {
                warn!("image model call timed out");
                None
            }
        }
    }

    /// Strategy B: diagram source from the text model, rendered externally.
    async fn render(&self, context: &str, prior_text: &str) -> Option<Vec<u8>> {
        let renderer = self.renderer.as_ref()?;
        let generator = self.generator.as_ref()?;

        let request = format!("{context}\n\n{prior_text}");
        let raw = match timeout(SOURCE_TIMEOUT, generator.diagram_source(&request)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                warn!(error = %e, "diagram source generation failed");
                return None;
            }
            Err(_) => {
                warn!("diagram source generation timed out");
                return None;
            }
        };

        let source = match extract_diagram_source(&raw) {
            Some(source) => source,
            None => {
                debug!("no diagram source found in model reply");
                return None;
            }
        };

        renderer.fetch(&source).await
    }
}

impl Renderer {
    async fn fetch(&self, source: &str) -> Option<Vec<u8>> {
        let url = renderer_url(&self.base_url, source);

        let response = match timeout(RENDER_TIMEOUT, self.http.get(&url).send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!(error = %e, "renderer request failed");
                return None;
            }
            Err(_) => {
                warn!("renderer request timed out");
                return None;
            }
        };

        let status = response.status();
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "failed to read renderer response");
                return None;
            }
        };

        if !status.is_success() || body.is_empty() {
            let head = body
                .iter()
                .take(RENDER_ERROR_LOG_BYTES)
                .copied()
                .collect::<Vec<u8>>();
            warn!(
                status = status.as_u16(),
                body = %String::from_utf8_lossy(&head),
                "renderer returned no usable image"
            );
            return None;
        }

        Some(body.to_vec())
    }
}

/// Build the renderer fetch URL: url-safe base64, no padding.
pub fn renderer_url(base_url: &str, source: &str) -> String {
    format!("{base_url}/{}", URL_SAFE_NO_PAD.encode(source.as_bytes()))
}

/// Extract Mermaid source from a model reply.
///
/// Layered: a fenced block labeled `mermaid` wins; else an unlabeled
/// fenced block whose first token is a recognized diagram keyword; else
/// the whole text when it starts with a recognized keyword; else nothing.
pub fn extract_diagram_source(raw: &str) -> Option<String> {
    let blocks = fenced_blocks(raw);

    for (label, body) in &blocks {
        if label.eq_ignore_ascii_case("mermaid") && !body.trim().is_empty() {
            return Some(body.trim().to_owned());
        }
    }

    for (label, body) in &blocks {
        if label.is_empty() && starts_with_diagram_keyword(body) {
            return Some(body.trim().to_owned());
        }
    }

    let trimmed = raw.trim();
    if starts_with_diagram_keyword(trimmed) {
        return Some(trimmed.to_owned());
    }

    None
}

/// All fenced blocks in the text as `(label, body)` pairs.
fn fenced_blocks(text: &str) -> Vec<(String, String)> {
    let mut blocks = Vec::new();
    let mut label: Option<String> = None;
    let mut body: Vec<&str> = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix("```") {
            match label.take() {
                Some(open_label) => {
                    blocks.push((open_label, body.join("\n")));
                    body.clear();
                }
                None => label = Some(rest.trim().to_owned()),
            }
            continue;
        }
        if label.is_some() {
            body.push(line);
        }
    }

    blocks
}

fn starts_with_diagram_keyword(text: &str) -> bool {
    let first = text.trim_start().split_whitespace().next().unwrap_or("");
    DIAGRAM_KEYWORDS.contains(&first)
}

fn direct_prompt(context: &str, prior_text: &str) -> String {
    format!(
        "Create a clean, labeled, whiteboard-style technical diagram that \
         illustrates the concept below. Prefer simple boxes, arrows, and \
         short labels over decoration. If a visualization would not \
         genuinely aid understanding, respond with text only and produce \
         no image.\n\nConcept:\n{context}\n\nExplanation already given:\n\
         {prior_text}"
    )
}
