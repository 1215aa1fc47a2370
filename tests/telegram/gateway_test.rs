//! Gateway contract tests against a mock Bot API server.

use serde_json::json;
use url::Url;
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use kobo_companion::telegram::gateway::{TelegramGateway, TypingKind};

fn gateway(server: &MockServer) -> TelegramGateway {
    let api_url = Url::parse(&server.uri()).expect("mock uri");
    TelegramGateway::with_api_url("123:test-token", api_url)
}

fn message_result(message_id: i32) -> serde_json::Value {
    json!({
        "ok": true,
        "result": {
            "message_id": message_id,
            "date": 1_700_000_000,
            "chat": { "id": 7, "type": "private" },
            "text": "sent"
        }
    })
}

#[tokio::test]
async fn bot_identity_is_fetched_once_and_cached() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path_regex("(?i)getme$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "result": {
                "id": 999,
                "is_bot": true,
                "first_name": "Reader",
                "username": "reader_bot",
                "can_join_groups": false,
                "can_read_all_group_messages": false,
                "supports_inline_queries": false,
                "can_connect_to_business": false,
                "has_main_web_app": false
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway(&server);
    let first = gateway.bot_identity().await.expect("should fetch").clone();
    let second = gateway.bot_identity().await.expect("cached").clone();
    assert_eq!(first.id, 999);
    assert_eq!(first.username, "reader_bot");
    assert_eq!(first, second);
}

#[tokio::test]
async fn send_text_threads_replies() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path_regex("(?i)sendmessage$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(message_result(55)))
        .expect(1)
        .mount(&server)
        .await;

    let sent_id = gateway(&server)
        .send_text(7, "threaded reply", Some(31))
        .await
        .expect("should send");
    assert_eq!(sent_id, 55);

    let requests = server.received_requests().await.expect("requests recorded");
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).expect("json body");
    assert_eq!(body["text"], "threaded reply");
    assert_eq!(body["reply_parameters"]["message_id"], 31);
}

#[tokio::test]
async fn typing_failure_is_swallowed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path_regex("(?i)sendchataction$"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    // Must not panic or surface anything.
    gateway(&server).typing(7, TypingKind::Typing).await;
    gateway(&server).typing(7, TypingKind::UploadPhoto).await;
}
