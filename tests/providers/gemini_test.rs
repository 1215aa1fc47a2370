//! Gemini client wire tests against a mock server.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use kobo_companion::config::Secret;
use kobo_companion::providers::gemini::{GeminiClient, GenerateRequest, InlineAttachment};
use kobo_companion::providers::ProviderError;

fn client(server: &MockServer) -> GeminiClient {
    GeminiClient::new(server.uri(), Secret::new("test-key"), reqwest::Client::new())
}

fn text_body(text: &str) -> serde_json::Value {
    json!({ "candidates": [{ "content": { "parts": [{ "text": text }] } }] })
}

#[tokio::test]
async fn generate_posts_to_model_endpoint_with_key_header() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-2.0-flash:generateContent"))
        .and(header("x-goog-api-key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_body("A short answer.")))
        .expect(1)
        .mount(&server)
        .await;

    let reply = client(&server)
        .generate(
            "gemini-2.0-flash",
            &GenerateRequest {
                prompt: "Explain DNS.".to_owned(),
                ..GenerateRequest::default()
            },
        )
        .await
        .expect("should succeed");

    assert_eq!(reply.text(), "A short answer.");
}

#[tokio::test]
async fn vision_request_carries_inline_data() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_body("A cat.")))
        .mount(&server)
        .await;

    let image = vec![0xFF, 0xD8, 0xFF, 0xE0];
    client(&server)
        .generate(
            "gemini-2.0-flash",
            &GenerateRequest {
                prompt: "What is this?".to_owned(),
                attachment: Some(InlineAttachment {
                    mime: "image/jpeg".to_owned(),
                    bytes: image.clone(),
                }),
                response_images: false,
            },
        )
        .await
        .expect("should succeed");

    let requests = server.received_requests().await.expect("requests recorded");
    let body: serde_json::Value =
        serde_json::from_slice(&requests[0].body).expect("json body");
    let inline = &body["contents"][0]["parts"][1]["inline_data"];
    assert_eq!(inline["mime_type"], "image/jpeg");
    assert_eq!(inline["data"], STANDARD.encode(&image));
}

#[tokio::test]
async fn inline_image_reply_is_decoded() {
    let server = MockServer::start().await;
    let png = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A];
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{ "content": { "parts": [
                { "inlineData": { "mimeType": "image/png", "data": STANDARD.encode(&png) } }
            ] } }]
        })))
        .mount(&server)
        .await;

    let reply = client(&server)
        .generate(
            "image-model",
            &GenerateRequest {
                prompt: "Draw.".to_owned(),
                response_images: true,
                ..GenerateRequest::default()
            },
        )
        .await
        .expect("should succeed");

    let (mime, bytes) = reply.first_image().expect("image expected");
    assert_eq!(mime, "image/png");
    assert_eq!(bytes, png.as_slice());
}

#[tokio::test]
async fn upstream_error_surfaces_status_with_scrubbed_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(403)
                .set_body_string("forbidden for key AIzaSyA1234567890abcdefghijklmnopqrstu"),
        )
        .mount(&server)
        .await;

    let error = client(&server)
        .generate(
            "gemini-2.0-flash",
            &GenerateRequest {
                prompt: "hi".to_owned(),
                ..GenerateRequest::default()
            },
        )
        .await
        .expect_err("should fail");

    match error {
        ProviderError::HttpStatus { status, body } => {
            assert_eq!(status, 403);
            assert!(!body.contains("AIzaSy"), "key leaked: {body}");
        }
        other => panic!("expected HttpStatus, got {other:?}"),
    }
}
