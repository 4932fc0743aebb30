use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use secrecy::SecretString;
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::{build_router, AppState};
use crate::agent::{
    AssistantToolCall, Completion, CompletionDelta, CompletionRequest, CompletionStream, LlmProvider,
    Role,
};
use crate::config::Config;
use crate::error::Result;

const USER1: &str = "sk-test-key-1";
const USER2: &str = "sk-test-key-2";

/// Answers every request with the last user message
struct EchoProvider;

impl EchoProvider {
    fn answer(request: &CompletionRequest) -> Completion {
        let last = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .and_then(|m| m.content.clone())
            .unwrap_or_default();
        Completion {
            content: Some(format!("Echo: {}", last)),
            ..Default::default()
        }
    }
}

#[async_trait]
impl LlmProvider for EchoProvider {
    fn model(&self) -> &str {
        "echo"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion> {
        Ok(Self::answer(&request))
    }

    async fn complete_stream(&self, request: CompletionRequest) -> Result<CompletionStream> {
        let completion = Self::answer(&request);
        let content = completion.content.clone().unwrap_or_default();
        let deltas = vec![
            Ok(CompletionDelta::Content(content)),
            Ok(CompletionDelta::Done(completion)),
        ];
        Ok(Box::pin(futures::stream::iter(deltas)))
    }
}

/// Searches once, then answers from the tool result
struct SearchingProvider;

impl SearchingProvider {
    fn answer(request: &CompletionRequest) -> Completion {
        let searched = request.messages.iter().any(|m| m.role == Role::Tool);
        if request.tools.is_empty() || searched {
            Completion {
                content: Some("Found it.".to_string()),
                ..Default::default()
            }
        } else {
            Completion {
                tool_calls: vec![AssistantToolCall::function(
                    "c1",
                    "tavily_search",
                    r#"{"query":"q"}"#,
                )],
                finish_reason: Some("tool_calls".to_string()),
                ..Default::default()
            }
        }
    }
}

#[async_trait]
impl LlmProvider for SearchingProvider {
    fn model(&self) -> &str {
        "searching"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion> {
        Ok(Self::answer(&request))
    }

    async fn complete_stream(&self, request: CompletionRequest) -> Result<CompletionStream> {
        let deltas = vec![Ok(CompletionDelta::Done(Self::answer(&request)))];
        Ok(Box::pin(futures::stream::iter(deltas)))
    }
}

fn app_with(config: Config) -> Router {
    let state = AppState::new(config, Arc::new(EchoProvider)).unwrap();
    build_router(state)
}

fn app() -> Router {
    app_with(Config::default())
}

fn request(method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn health_needs_no_auth() {
    let (status, body) = send(&app(), request(Method::GET, "/health", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["model_info"]["model"], "echo");
    assert_eq!(body["search_enabled"], false);
    assert_eq!(body["active_sessions"], 0);
}

#[tokio::test]
async fn protected_routes_require_a_known_token() {
    let app = app();

    let response = app
        .clone()
        .oneshot(request(Method::GET, "/tools", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Bearer");

    let (status, body) = send(&app, request(Method::GET, "/tools", Some("sk-nope"), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["status_code"], 401);
}

#[tokio::test]
async fn lists_tools() {
    let (status, body) = send(&app(), request(Method::GET, "/tools", Some(USER1), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["tools"][0]["function"]["name"], "terminate");
}

#[tokio::test]
async fn one_shot_chat_returns_json() {
    let (status, body) = send(
        &app(),
        request(Method::POST, "/chat", Some(USER1), Some(json!({"message": "hello"}))),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Echo: hello");
    assert_eq!(body["tool_calls_count"], 0);
    assert_eq!(body["finish"], "completed");
    assert!(body["session_id"].is_null());
}

#[tokio::test]
async fn chat_creates_session_on_first_use() {
    let app = app();
    let chat = json!({"message": "first", "session_id": "conv-1"});

    let (status, body) = send(&app, request(Method::POST, "/chat", Some(USER1), Some(chat))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session_id"], "conv-1");

    let (status, body) = send(&app, request(Method::GET, "/session/conv-1", Some(USER1), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session"]["message_count"], 1);
    // system + user + assistant
    assert_eq!(body["session"]["history_length"], 3);

    let (status, _) = send(&app, request(Method::GET, "/session/conv-1", Some(USER2), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn other_users_cannot_chat_in_a_session() {
    let app = app();
    let (status, _) = send(
        &app,
        request(Method::POST, "/session", Some(USER1), Some(json!({"session_id": "mine"}))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = send(
        &app,
        request(
            Method::POST,
            "/chat",
            Some(USER2),
            Some(json!({"message": "hi", "session_id": "mine"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn session_lifecycle() {
    let app = app();

    let (status, body) = send(
        &app,
        request(
            Method::POST,
            "/session",
            Some(USER1),
            Some(json!({"session_id": "s1", "max_tool_calls": 3, "tool_mode": "never"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["session"]["settings"]["max_tool_calls"], 3);
    assert_eq!(body["session"]["settings"]["tool_mode"], "never");

    let (status, _) = send(
        &app,
        request(Method::POST, "/session", Some(USER1), Some(json!({"session_id": "s1"}))),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(
        &app,
        request(Method::PATCH, "/session/s1", Some(USER1), Some(json!({"temperature": 0.1}))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session"]["settings"]["max_tool_calls"], 3);

    send(
        &app,
        request(
            Method::POST,
            "/chat",
            Some(USER1),
            Some(json!({"message": "question", "session_id": "s1"})),
        ),
    )
    .await;

    let (status, body) = send(
        &app,
        request(Method::GET, "/session/s1/history?limit=2", Some(USER1), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_messages"], 3);
    assert_eq!(body["returned"], 2);
    assert_eq!(body["messages"][1]["content"], "Echo: question");

    let (_, body) = send(
        &app,
        request(Method::GET, "/session/s1/history?raw=true", Some(USER1), None),
    )
    .await;
    assert_eq!(body["messages"][0]["role"], "system");

    let (status, body) = send(&app, request(Method::POST, "/session/s1/reset", Some(USER1), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session"]["history_length"], 0);

    let (_, body) = send(&app, request(Method::GET, "/session", Some(USER1), None)).await;
    assert_eq!(body["total"], 1);

    let (status, _) = send(&app, request(Method::DELETE, "/session/s1", Some(USER1), None)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, request(Method::GET, "/session/s1", Some(USER1), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn session_create_accepts_empty_body() {
    let (status, body) = send(&app(), request(Method::POST, "/session", Some(USER1), None)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["session"]["session_id"].as_str().unwrap().len(), 36);
}

#[tokio::test]
async fn stream_route_emits_sse_events() {
    let response = app()
        .oneshot(request(
            Method::POST,
            "/chat/stream",
            Some(USER1),
            Some(json!({"message": "stream me"})),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    let session = text.find("event: session").unwrap();
    let content = text.find("event: content").unwrap();
    let done = text.find("event: done").unwrap();
    assert!(session < content && content < done);
    assert!(text.contains("Echo: stream me"));
}

#[tokio::test]
async fn rejects_invalid_chat_requests() {
    let app = app();

    let (status, body) = send(
        &app,
        request(Method::POST, "/chat", Some(USER1), Some(json!({"message": "  "}))),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["success"], false);

    let (status, _) = send(
        &app,
        request(
            Method::POST,
            "/chat",
            Some(USER1),
            Some(json!({"message": "hi", "temperature": 5.0})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = send(
        &app,
        request(Method::POST, "/chat", Some(USER1), Some(json!({"text": "hi"}))),
    )
    .await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn search_without_key_is_unavailable() {
    let (status, body) = send(
        &app(),
        request(Method::POST, "/search", Some(USER1), Some(json!({"query": "rust"}))),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "Web search is not configured");
}

#[tokio::test]
async fn rate_limits_per_user() {
    let mut config = Config::default();
    config.server.max_requests_per_minute = 2;
    let app = app_with(config);

    for _ in 0..2 {
        let (status, _) = send(&app, request(Method::GET, "/tools", Some(USER1), None)).await;
        assert_eq!(status, StatusCode::OK);
    }
    let response = app
        .clone()
        .oneshot(request(Method::GET, "/tools", Some(USER1), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));

    let (status, _) = send(&app, request(Method::GET, "/tools", Some(USER2), None)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn unknown_route_is_json_404() {
    let (status, body) = send(&app(), request(Method::GET, "/nope", None, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status_code"], 404);
}

#[tokio::test]
async fn caller_system_prompt_is_sent_verbatim() {
    let app = app();
    let prompt = r#"Reply as JSON like {{"a": 1}} for {{name}}"#;

    let (status, _) = send(
        &app,
        request(
            Method::POST,
            "/chat",
            Some(USER1),
            Some(json!({"message": "hi", "session_id": "braces", "system_prompt": prompt})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(
        &app,
        request(Method::GET, "/session/braces/history?raw=true", Some(USER1), None),
    )
    .await;
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(body["messages"][0]["content"], prompt);
}

#[tokio::test]
async fn timed_out_chat_still_completes_the_turn() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/search"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"query": "q", "results": [{"title": "T", "url": "https://t.example/", "content": "c"}]}))
                .set_delay(Duration::from_millis(800)),
        )
        .mount(&server)
        .await;

    let mut config = Config::default();
    config.search.api_key = SecretString::from("tvly-test".to_string());
    config.search.base_url = server.uri();
    config.server.request_timeout = Duration::from_millis(200);
    let state = AppState::new(config, Arc::new(SearchingProvider)).unwrap();
    let app = build_router(state);

    let (status, body) = send(
        &app,
        request(
            Method::POST,
            "/chat",
            Some(USER1),
            Some(json!({"message": "q", "session_id": "s1"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
    assert_eq!(body["success"], false);
    assert_eq!(body["status_code"], 408);

    // Outlive the delayed search so the history read does not wait on the turn
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let (status, body) = send(
        &app,
        request(Method::GET, "/session/s1/history?raw=true", Some(USER1), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let messages = body["messages"].as_array().unwrap();

    for (i, message) in messages.iter().enumerate() {
        if let Some(calls) = message["tool_calls"].as_array() {
            let next = &messages[i + 1];
            assert_eq!(next["role"], "tool");
            assert_eq!(next["tool_call_id"], calls[0]["id"]);
        }
    }
    let last = messages.last().unwrap();
    assert_eq!(last["role"], "assistant");
    assert_eq!(last["content"], "Found it.");
}
