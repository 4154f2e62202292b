use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{ header, Request, StatusCode };
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{ json, Value };
use tempfile::tempdir;
use tokio::sync::Mutex;
use tower::ServiceExt;
use wiremock::matchers::{ method, path };
use wiremock::{ Mock, MockServer, ResponseTemplate };

use chat_relay::backend::BackendClient;
use chat_relay::history::ConversationStore;
use chat_relay::relay::ChatRelay;
use chat_relay::server::api::router;

const PROMPT: &str = "You are a friendly and helpful AI assistant.";

fn app(backend_uri: &str, history_path: &Path) -> Router {
    let store = ConversationStore::new(history_path, PROMPT);
    let backend = BackendClient::new(backend_uri, Duration::from_secs(5)).unwrap();
    let relay = Arc::new(ChatRelay::new(Arc::new(Mutex::new(store)), backend));
    router(relay)
}

fn chat_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(resp: axum::response::Response) -> Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn history_of(app: &Router) -> Vec<Value> {
    let resp = app
        .clone()
        .oneshot(Request::builder().uri("/api/history").body(Body::empty()).unwrap()).await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    body["history"].as_array().unwrap().clone()
}

#[tokio::test]
async fn buffered_chat_returns_reply_and_commits_turn() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            json!({"message": {"role": "assistant", "content": "Hello there!"}})
        ))
        .mount(&server).await;
    let dir = tempdir().unwrap();
    let app = app(&server.uri(), &dir.path().join("chatlog.json"));

    let resp = app
        .clone()
        .oneshot(chat_request(json!({"message": "Hi", "stream": false}))).await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await, json!({"response": "Hello there!"}));

    let history = history_of(&app).await;
    assert_eq!(history.len(), 3);
    assert_eq!(history[0]["role"], "system");
    assert_eq!(history[1], json!({"role": "user", "content": "Hi"}));
    assert_eq!(history[2], json!({"role": "assistant", "content": "Hello there!"}));
}

#[tokio::test]
async fn backend_error_is_returned_as_payload_without_assistant_turn() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(500).set_body_string("oops"))
        .mount(&server).await;
    let dir = tempdir().unwrap();
    let app = app(&server.uri(), &dir.path().join("chatlog.json"));

    let resp = app
        .clone()
        .oneshot(chat_request(json!({"message": "Hi"}))).await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await, json!({"error": "Error 500: oops"}));

    let history = history_of(&app).await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[1]["role"], "user");
}

#[tokio::test]
async fn streamed_chat_forwards_ndjson_and_commits_reassembled_turn() {
    let server = MockServer::start().await;
    let ndjson = concat!(
        "{\"message\":{\"role\":\"assistant\",\"content\":\"Hello \"}}\n",
        "{\"message\":{\"role\":\"assistant\",\"content\":\"World\"}}\n"
    );
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(ndjson, "application/x-ndjson"))
        .mount(&server).await;
    let dir = tempdir().unwrap();
    let app = app(&server.uri(), &dir.path().join("chatlog.json"));

    let resp = app
        .clone()
        .oneshot(chat_request(json!({"message": "Hi", "stream": true}))).await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/x-ndjson");

    let wire = resp.into_body().collect().await.unwrap().to_bytes();
    let wire = String::from_utf8(wire.to_vec()).unwrap();
    let hello = wire.find("Hello ").expect("first fragment forwarded");
    let world = wire.find("World").expect("second fragment forwarded");
    assert!(hello < world);

    // The response body only closes after the relay task commits.
    let history = history_of(&app).await;
    assert_eq!(history.len(), 3);
    assert_eq!(history[2], json!({"role": "assistant", "content": "Hello World"}));
}

#[tokio::test]
async fn streamed_chat_with_only_malformed_chunks_commits_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw("definitely not json\n", "application/x-ndjson")
        )
        .mount(&server).await;
    let dir = tempdir().unwrap();
    let app = app(&server.uri(), &dir.path().join("chatlog.json"));

    let resp = app
        .clone()
        .oneshot(chat_request(json!({"message": "Hi", "stream": true}))).await
        .unwrap();
    // The raw chunk is still forwarded to the caller.
    let wire = resp.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&wire[..], b"definitely not json\n");

    let history = history_of(&app).await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[1]["role"], "user");
}

#[tokio::test]
async fn reset_clears_history_to_system_prompt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            json!({"message": {"role": "assistant", "content": "Hello there!"}})
        ))
        .mount(&server).await;
    let dir = tempdir().unwrap();
    let history_path = dir.path().join("chatlog.json");
    let app = app(&server.uri(), &history_path);

    app.clone().oneshot(chat_request(json!({"message": "Hi"}))).await.unwrap();
    assert_eq!(history_of(&app).await.len(), 3);

    let resp = app
        .clone()
        .oneshot(
            Request::builder().method("POST").uri("/api/reset").body(Body::empty()).unwrap()
        ).await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await, json!({"message": "Chat history has been reset."}));

    let history = history_of(&app).await;
    assert_eq!(history, vec![json!({"role": "system", "content": PROMPT})]);

    // Reset persists immediately; a fresh store restores the same state.
    let restored = ConversationStore::restore(&history_path, PROMPT);
    assert_eq!(restored.snapshot().len(), 1);
}
