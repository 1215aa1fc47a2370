//! Image pipeline tests: strategy selection, renderer round-trip, and the
//! rule that every failure resolves to no image rather than an error.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use kobo_companion::companion::diagram::DiagramPipeline;
use kobo_companion::companion::generator::TextGenerator;
use kobo_companion::config::CompanionConfig;

const PNG_MAGIC: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

fn config(
    model_server: Option<&str>,
    image_model: Option<&str>,
    renderer: Option<&str>,
) -> CompanionConfig {
    let model_server = model_server.map(ToOwned::to_owned);
    let image_model = image_model.map(ToOwned::to_owned);
    let renderer = renderer.map(ToOwned::to_owned);
    CompanionConfig::from_env_with(move |key| match key {
        "KOBO_API_KEY" => Some("k".to_owned()),
        "TEXT_MODEL_API_KEY" => model_server.as_ref().map(|_| "key".to_owned()),
        "TEXT_MODEL_ID" => model_server.as_ref().map(|_| "gemini-text".to_owned()),
        "TEXT_MODEL_BASE_URL" => model_server.clone(),
        "IMAGE_MODEL_ID" => image_model.clone(),
        "DIAGRAM_RENDERER_BASE_URL" => renderer.clone(),
        _ => None,
    })
    .expect("config should load")
}

fn pipeline(config: &CompanionConfig) -> DiagramPipeline {
    let http = reqwest::Client::new();
    let generator = config
        .text_model
        .as_ref()
        .map(|text| TextGenerator::new(text, http.clone()));
    DiagramPipeline::new(config, http, generator)
}

fn text_body(text: &str) -> serde_json::Value {
    json!({ "candidates": [{ "content": { "parts": [{ "text": text }] } }] })
}

#[tokio::test]
async fn render_strategy_round_trips_source_through_the_renderer() {
    let model = MockServer::start().await;
    let renderer = MockServer::start().await;
    let source = "flowchart TD\n  A[Client] --> B[Server]";

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_body(&format!(
            "```mermaid\n{source}\n```"
        ))))
        .mount(&model)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(PNG_MAGIC))
        .expect(1)
        .mount(&renderer)
        .await;

    let config = config(Some(&model.uri()), None, Some(&renderer.uri()));
    let image = pipeline(&config)
        .try_generate("how does a proxy work", "a proxy forwards requests")
        .await
        .expect("image expected");
    assert_eq!(image, PNG_MAGIC);

    // The URL path must decode byte-for-byte back to the diagram source.
    let requests = renderer.received_requests().await.expect("requests recorded");
    let encoded = requests[0].url.path().trim_start_matches('/').to_owned();
    let decoded = URL_SAFE_NO_PAD.decode(encoded).expect("should decode");
    assert_eq!(decoded, source.as_bytes());
}

#[tokio::test]
async fn renderer_failure_resolves_to_no_image() {
    let model = MockServer::start().await;
    let renderer = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(text_body("```mermaid\nflowchart TD\n  A --> B\n```")),
        )
        .mount(&model)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500).set_body_string("render error"))
        .mount(&renderer)
        .await;

    let config = config(Some(&model.uri()), None, Some(&renderer.uri()));
    assert!(pipeline(&config).try_generate("ctx", "prior").await.is_none());
}

#[tokio::test]
async fn renderer_empty_body_resolves_to_no_image() {
    let model = MockServer::start().await;
    let renderer = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(text_body("graph LR\n  A --> B")),
        )
        .mount(&model)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&renderer)
        .await;

    let config = config(Some(&model.uri()), None, Some(&renderer.uri()));
    assert!(pipeline(&config).try_generate("ctx", "prior").await.is_none());
}

#[tokio::test]
async fn prose_reply_never_reaches_the_renderer() {
    let model = MockServer::start().await;
    let renderer = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_body("NONE")))
        .mount(&model)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(PNG_MAGIC))
        .expect(0)
        .mount(&renderer)
        .await;

    let config = config(Some(&model.uri()), None, Some(&renderer.uri()));
    assert!(pipeline(&config).try_generate("ctx", "prior").await.is_none());
}

#[tokio::test]
async fn direct_strategy_returns_inline_bytes() {
    let model = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-image:generateContent"))
        .and(body_partial_json(json!({
            "generationConfig": { "responseModalities": ["TEXT", "IMAGE"] }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{ "content": { "parts": [
                { "text": "Here is the diagram." },
                { "inlineData": {
                    "mimeType": "image/png",
                    "data": base64::engine::general_purpose::STANDARD.encode(PNG_MAGIC)
                } }
            ] } }]
        })))
        .expect(1)
        .mount(&model)
        .await;

    let config = config(Some(&model.uri()), Some("gemini-image"), None);
    let image = pipeline(&config)
        .try_generate("tcp handshake", "three segments")
        .await
        .expect("image expected");
    assert_eq!(image, PNG_MAGIC);
}

#[tokio::test]
async fn direct_decline_falls_back_to_renderer() {
    let model = MockServer::start().await;
    let renderer = MockServer::start().await;

    // The image model answers with text only.
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-image:generateContent"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(text_body("No image would help here.")),
        )
        .expect(1)
        .mount(&model)
        .await;
    // The text model produces diagram source.
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-text:generateContent"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(text_body("sequenceDiagram\n  A->>B: SYN")),
        )
        .expect(1)
        .mount(&model)
        .await;
    Mock::given(method("GET"))
        .and(path_regex("^/[A-Za-z0-9_-]+$"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(PNG_MAGIC))
        .expect(1)
        .mount(&renderer)
        .await;

    let config = config(Some(&model.uri()), Some("gemini-image"), Some(&renderer.uri()));
    let image = pipeline(&config)
        .try_generate("tcp handshake", "three segments")
        .await
        .expect("fallback image expected");
    assert_eq!(image, PNG_MAGIC);
}

#[tokio::test]
async fn nothing_configured_means_no_image_and_no_calls() {
    let config = config(None, None, None);
    let pipeline = pipeline(&config);
    assert!(!pipeline.enabled());
    assert!(pipeline.try_generate("ctx", "prior").await.is_none());
}
