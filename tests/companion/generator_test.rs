//! Text generator behavior against a mock model server: retry policy,
//! device-reply shaping, and the channel-output diagram filter.

use serde_json::json;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use kobo_companion::companion::generator::{
    GeneratorError, TextGenerator, SHORT_REPLY_MAX_CHARS,
};
use kobo_companion::config::{Secret, TextModelConfig};
use kobo_companion::types::HighlightContext;

fn generator(server: &MockServer) -> TextGenerator {
    TextGenerator::new(
        &TextModelConfig {
            api_key: Secret::new("test-key"),
            model: "gemini-2.0-flash".to_owned(),
            base_url: server.uri(),
        },
        reqwest::Client::new(),
    )
}

fn text_body(text: &str) -> serde_json::Value {
    json!({ "candidates": [{ "content": { "parts": [{ "text": text }] } }] })
}

fn context() -> HighlightContext {
    HighlightContext {
        book: "SDI".to_owned(),
        author: "A. Xu".to_owned(),
        chapter: Some("Ch 1".to_owned()),
        device_id: None,
    }
}

#[tokio::test]
async fn short_reply_is_ascii_and_bounded() {
    let server = MockServer::start().await;
    let verbose = "A load balancer \u{2014} put simply \u{2014} spreads requests. ".repeat(12);
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_body(&verbose)))
        .mount(&server)
        .await;

    let short = generator(&server)
        .short_explain("A load balancer distributes traffic.", &context())
        .await
        .expect("should succeed");

    assert!(!short.is_empty());
    assert!(short.chars().count() <= SHORT_REPLY_MAX_CHARS);
    assert!(short.is_ascii());
    assert!(short.chars().all(|c| !c.is_ascii_control()));
}

#[tokio::test]
async fn transient_failure_is_retried_once_and_recovers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_body("Recovered answer.")))
        .mount(&server)
        .await;

    let answer = generator(&server)
        .general_answer("what is paging?", false)
        .await
        .expect("retry should recover");

    assert_eq!(answer, "Recovered answer.");
    let requests = server.received_requests().await.expect("requests recorded");
    assert_eq!(requests.len(), 2);
}

#[tokio::test]
async fn persistent_outage_is_unavailable_after_two_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let error = generator(&server)
        .general_answer("anything", false)
        .await
        .expect_err("should fail");
    assert!(matches!(error, GeneratorError::Unavailable(_)));
}

#[tokio::test]
async fn client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .expect(1)
        .mount(&server)
        .await;

    let error = generator(&server)
        .general_answer("anything", false)
        .await
        .expect_err("should fail");
    assert!(matches!(error, GeneratorError::Generation(_)));
}

#[tokio::test]
async fn empty_reply_is_retried_then_fails_generation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "promptFeedback": { "blockReason": "SAFETY" }
        })))
        .expect(2)
        .mount(&server)
        .await;

    let error = generator(&server)
        .general_answer("anything", false)
        .await
        .expect_err("should fail");
    assert!(matches!(error, GeneratorError::Generation(_)));
}

#[tokio::test]
async fn long_reply_never_contains_an_ascii_art_block() {
    let server = MockServer::start().await;
    let art = "The flow works like this:\n\
               ```\n+--------+      +--------+\n| client | ---> | server |\n+--------+      +--------+\n```\n\
               And the rest is prose worth keeping.";
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_body(art)))
        .mount(&server)
        .await;

    let analysis = generator(&server)
        .long_explain("passage", &context())
        .await
        .expect("should succeed");

    assert!(!analysis.contains("```"));
    assert!(!analysis.contains("+--------+"));
    assert!(analysis.contains("prose worth keeping"));
}

#[tokio::test]
async fn follow_up_prompt_carries_prior_context_and_exclusion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_body("Continuing.")))
        .mount(&server)
        .await;

    generator(&server)
        .follow_up(
            "can you draw that?",
            "Raft elects a leader per term.",
            true,
        )
        .await
        .expect("should succeed");

    let requests = server.received_requests().await.expect("requests recorded");
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).expect("json body");
    let prompt = body["contents"][0]["parts"][0]["text"]
        .as_str()
        .expect("prompt text");
    assert!(prompt.contains("Raft elects a leader per term."));
    assert!(prompt.contains("separate diagram image"));
}

#[tokio::test]
async fn short_prompt_names_the_book() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_body("Short.")))
        .mount(&server)
        .await;

    generator(&server)
        .short_explain("passage", &context())
        .await
        .expect("should succeed");

    let requests = server.received_requests().await.expect("requests recorded");
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).expect("json body");
    let prompt = body["contents"][0]["parts"][0]["text"]
        .as_str()
        .expect("prompt text");
    assert!(prompt.contains("Book: SDI"));
    assert!(prompt.contains("Author: A. Xu"));
}
