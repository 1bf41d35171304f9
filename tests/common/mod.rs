//! Mock upstream backends and helpers shared by the integration tests.

#![allow(dead_code)]

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use chat_relay::config::Config;
use chat_relay::server::{build_router, AppState};
use chat_relay::upstream::HttpUpstream;

pub const DEEPSEEK_KEY: &str = "sk-deepseek";
pub const RAGFLOW_KEY: &str = "ragflow-key";

/// Fires when the mock's streaming body is dropped, i.e. the relay closed
/// the upstream connection.
#[derive(Default, Clone)]
pub struct MockState {
    pub closed: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

struct DropSignal(Option<oneshot::Sender<()>>);

impl Drop for DropSignal {
    fn drop(&mut self) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(());
        }
    }
}

pub async fn spawn(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

fn authorized(headers: &HeaderMap, key: &str) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("Bearer {key}"))
        .unwrap_or(false)
}

/// Body that sends each part as its own chunk with a short pause between.
fn chunked(parts: Vec<String>) -> Body {
    let stream = async_stream::stream! {
        for part in parts {
            tokio::time::sleep(Duration::from_millis(5)).await;
            yield Ok::<_, Infallible>(Bytes::from(part));
        }
    };
    Body::from_stream(stream)
}

/// Body that optionally sends one part and then goes silent while keeping
/// the connection open.
fn stalled(first: Option<String>) -> Body {
    let stream = async_stream::stream! {
        if let Some(part) = first {
            yield Ok::<_, Infallible>(Bytes::from(part));
        }
        tokio::time::sleep(Duration::from_secs(60)).await;
        yield Ok(Bytes::from_static(b"data:{\"code\":0,\"data\":false}\n\n"));
    };
    Body::from_stream(stream)
}

async fn deepseek_completions(headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if !authorized(&headers, DEEPSEEK_KEY) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": {"message": "Authentication Fails", "type": "authentication_error"}})),
        )
            .into_response();
    }

    let messages = body["messages"].as_array().cloned().unwrap_or_default();
    let last = messages
        .last()
        .and_then(|m| m["content"].as_str())
        .unwrap_or_default()
        .to_string();

    if body["stream"].as_bool().unwrap_or(false) {
        let parts = vec![
            ": keep-alive\n\n".to_string(),
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"\"}}]}\n\n".to_string(),
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\ndata: {\"choi".to_string(),
            "ces\":[{\"delta\":{\"content\":\"lo \"}}]}\n\n".to_string(),
            format!("data: {{\"choices\":[{{\"delta\":{{\"content\":\"{last}\"}}}}]}}\n\n"),
            "data: [DONE]\n\n".to_string(),
        ];
        return ([("content-type", "text/event-stream")], chunked(parts)).into_response();
    }

    let roles: Vec<&str> = messages.iter().filter_map(|m| m["role"].as_str()).collect();
    Json(json!({
        "id": "chatcmpl-1",
        "model": body["model"],
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": format!("echo[{}]: {last}", roles.join(","))},
            "finish_reason": "stop"
        }]
    }))
    .into_response()
}

async fn ragflow_completions(headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if !authorized(&headers, RAGFLOW_KEY) {
        return (StatusCode::UNAUTHORIZED, "bad key").into_response();
    }
    let question = body["question"].as_str().unwrap_or_default().to_string();

    if question == "explode" {
        return (StatusCode::INTERNAL_SERVER_ERROR, "ragflow exploded").into_response();
    }

    if body["stream"].as_bool().unwrap_or(true) {
        if question == "stall" || question == "stall-first" {
            let first = (question == "stall")
                .then(|| "data:{\"code\":0,\"data\":{\"answer\":\"first\"}}\n\n".to_string());
            return stalled(first).into_response();
        }
        if question == "cut" {
            let parts = vec![
                "data:{\"code\":0,\"data\":{\"answer\":\"first\"}}\n\n".to_string(),
                "data:{\"code\":0,\"data\":{\"answer\":\"partial".to_string(),
            ];
            return chunked(parts).into_response();
        }

        let mut parts: Vec<String> = (1..=5)
            .map(|i| format!("data:{{\"code\":0,\"data\":{{\"answer\":\"{question}:{i}\"}}}}\n\n"))
            .collect();
        parts.push("data:{\"code\":0,\"data\":false}\n\n".to_string());
        parts.push("data:{\"code\":0,\"data\":{\"answer\":\"after-marker\"}}\n\n".to_string());
        return chunked(parts).into_response();
    }

    Json(json!({
        "code": 0,
        "data": {
            "answer": format!("answer to {question}"),
            "reference": {},
            "id": "msg-1",
            "session_id": body["session_id"].as_str().unwrap_or("new-session"),
        }
    }))
    .into_response()
}

/// Endless stream; signals through `MockState` once the relay hangs up.
async fn ragflow_endless(State(state): State<MockState>) -> Response {
    let guard = DropSignal(state.closed.lock().unwrap().take());
    let stream = async_stream::stream! {
        let _guard = guard;
        let mut i = 0u64;
        loop {
            i += 1;
            yield Ok::<_, Infallible>(Bytes::from(format!("data:{{\"code\":0,\"data\":{{\"answer\":\"{i}\"}}}}\n\n")));
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };
    Body::from_stream(stream).into_response()
}

async fn local_chat(Json(body): Json<Value>) -> Response {
    let question = body["messages"][0]["content"].as_str().unwrap_or_default().to_string();
    if body["model"] == "missing-model" {
        return chunked(vec!["{\"error\":\"model 'missing-model' not found\"}\n".to_string()]).into_response();
    }
    let parts = vec![
        "{\"message\":{\"role\":\"assistant\",\"content\":\"You \"},\"done\":false}\n{\"message\":{\"content\":\"as".to_string(),
        format!("ked: {question}\"}},\"done\":false}}\n"),
        "{\"message\":{\"content\":\"\"},\"done\":true,\"eval_count\":3}\n".to_string(),
    ];
    ([("content-type", "application/x-ndjson")], chunked(parts)).into_response()
}

pub async fn spawn_mock_upstream(state: MockState) -> SocketAddr {
    let router = Router::new()
        .route("/chat/completions", post(deepseek_completions))
        .route("/api/v1/chats/c1/completions", post(ragflow_completions))
        .route("/api/v1/chats/endless/completions", post(ragflow_endless))
        .route("/api/chat", post(local_chat))
        .with_state(state);
    spawn(router).await
}

/// Relay config pointed at a mock upstream.
pub fn relay_config(upstream: SocketAddr) -> Config {
    let mut config = Config::default();
    config.upstream.request_timeout_secs = 5;
    config.upstream.stream_idle_timeout_secs = 5;
    config.deepseek.base_url = format!("http://{upstream}");
    config.deepseek.api_key = DEEPSEEK_KEY.to_string();
    config.ragflow.api_url = format!("http://{upstream}/api/v1/chats/c1/completions");
    config.ragflow.api_key = RAGFLOW_KEY.to_string();
    config.ollama.base_url = format!("http://{upstream}");
    config.ollama.model = "local-test".to_string();
    config
}

pub async fn spawn_relay(config: Config) -> String {
    let config = Arc::new(config);
    let upstream = Arc::new(HttpUpstream::new(&config.upstream).unwrap());
    let state = Arc::new(AppState::new(config, upstream));
    let addr = spawn(build_router(state)).await;
    format!("http://{addr}")
}

/// Read a response body chunk by chunk. Returns the text received and
/// whether the body ended cleanly.
pub async fn read_body(mut resp: reqwest::Response) -> (String, bool) {
    let mut text = Vec::new();
    loop {
        match resp.chunk().await {
            Ok(Some(chunk)) => text.extend_from_slice(&chunk),
            Ok(None) => return (String::from_utf8_lossy(&text).into_owned(), true),
            Err(_) => return (String::from_utf8_lossy(&text).into_owned(), false),
        }
    }
}
