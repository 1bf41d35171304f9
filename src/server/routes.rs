//! Route handlers.
//!
//! | Route | Backend | Mode | Failures |
//! |---|---|---|---|
//! | `GET /ai/chat` | local runtime | stream | HTTP status |
//! | `POST /api/deepseek/chat` | DeepSeek | once or stream | `deepseek.error_policy` |
//! | `GET /api/deepseek/chat/simple` | DeepSeek | once | `deepseek.error_policy` |
//! | `POST /api/ragflow/chat` | RagFlow | once, JSON | HTTP status |
//! | `POST /api/ragflow/chat/stream` | RagFlow | stream, raw lines | HTTP status |

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::RelayError;
use crate::normalize::{AnswerShape, RelayForm, StreamDialect};
use crate::relay::{relay_once, relay_stream, stream_response, ErrorPolicy};
use crate::server::AppState;
use crate::types::{ChatMessage, ChatRequest, RagflowChatRequest};
use crate::upstream::{Accept, UpstreamRequest};

/// Policy for the RagFlow and local endpoints. DeepSeek reads its own from config.
const STRUCTURED: ErrorPolicy = ErrorPolicy::HttpStatus;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct DeepSeekQuery {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
}

fn request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Streamed answer from the local model runtime.
pub async fn local_chat(
    State(state): State<Arc<AppState>>,
    Query(q): Query<MessageQuery>,
) -> Response {
    let request_id = request_id();
    let cfg = &state.config.ollama;
    info!(%request_id, backend = "local", model = %cfg.model, "Chat request");

    let chat = ChatRequest::new(cfg.model.clone(), vec![ChatMessage::user(q.message)], true);
    let body = match chat.to_body() {
        Ok(b) => b,
        Err(e) => return STRUCTURED.render_error(&e),
    };
    let req = UpstreamRequest::new(cfg.chat_url(), body)
        .bearer(cfg.api_key.as_deref())
        .accept(Accept::JsonLines);

    match relay_stream(
        state.upstream.as_ref(),
        req,
        StreamDialect::LocalJsonLines,
        RelayForm::Content,
        state.config.upstream.max_line_bytes,
        request_id,
    )
    .await
    {
        Ok(stream) => stream_response(stream),
        Err(e) => STRUCTURED.render_error(&e),
    }
}

/// DeepSeek chat with a caller-supplied conversation.
pub async fn deepseek_chat(
    State(state): State<Arc<AppState>>,
    Query(q): Query<DeepSeekQuery>,
    Json(messages): Json<Vec<ChatMessage>>,
) -> Response {
    let cfg = &state.config.deepseek;
    let model = q.model.unwrap_or_else(|| cfg.default_model.clone());
    let chat = ChatRequest::new(model, messages, q.stream);
    deepseek(&state, chat).await
}

/// DeepSeek chat with a synthesized system + user conversation.
pub async fn deepseek_simple_chat(
    State(state): State<Arc<AppState>>,
    Query(q): Query<MessageQuery>,
) -> Response {
    let cfg = &state.config.deepseek;
    let chat = ChatRequest::with_default_conversation(
        cfg.default_model.clone(),
        q.message,
        cfg.system_prompt.clone(),
    );
    deepseek(&state, chat).await
}

async fn deepseek(state: &AppState, chat: ChatRequest) -> Response {
    let request_id = request_id();
    let cfg = &state.config.deepseek;
    let policy = cfg.error_policy;
    info!(
        %request_id,
        backend = "deepseek",
        model = %chat.model,
        messages = chat.messages.len(),
        stream = chat.stream,
        "Chat request"
    );

    let body = match chat.validate().and_then(|_| chat.to_body()) {
        Ok(b) => b,
        Err(e) => return policy.render_error(&e),
    };
    let key = Some(cfg.api_key.as_str());

    if chat.stream {
        let req = UpstreamRequest::new(cfg.chat_url(), body)
            .bearer(key)
            .accept(Accept::EventStream);
        match relay_stream(
            state.upstream.as_ref(),
            req,
            StreamDialect::OpenAiSse,
            RelayForm::Content,
            state.config.upstream.max_line_bytes,
            request_id,
        )
        .await
        {
            Ok(stream) => stream_response(stream),
            Err(e) => policy.render_error(&e),
        }
    } else {
        let req = UpstreamRequest::new(cfg.chat_url(), body).bearer(key);
        let result = relay_once(state.upstream.as_ref(), req, AnswerShape::ChatCompletions).await;
        if let Err(e) = &result {
            info!(%request_id, kind = e.kind(), "DeepSeek call failed");
        }
        policy.render_text(result)
    }
}

fn ragflow_request(
    state: &AppState,
    mut chat: RagflowChatRequest,
    stream: bool,
) -> Result<UpstreamRequest, RelayError> {
    if chat.question.trim().is_empty() {
        return Err(RelayError::InvalidRequest("question must not be empty".into()));
    }
    chat.stream = stream;
    let body = serde_json::to_value(&chat).map_err(|e| RelayError::InvalidRequest(e.to_string()))?;
    let cfg = &state.config.ragflow;
    let accept = if stream { Accept::EventStream } else { Accept::Json };
    Ok(UpstreamRequest::new(cfg.api_url.clone(), body)
        .bearer(Some(cfg.api_key.as_str()))
        .accept(accept))
}

/// RagFlow chat returning a JSON [`crate::types::ChatResponse`].
pub async fn ragflow_chat(
    State(state): State<Arc<AppState>>,
    Json(chat): Json<RagflowChatRequest>,
) -> Response {
    let request_id = request_id();
    info!(%request_id, backend = "ragflow", session = ?chat.session_id, "Chat request");

    let req = match ragflow_request(&state, chat, false) {
        Ok(r) => r,
        Err(e) => return STRUCTURED.render_error(&e),
    };
    let result = relay_once(state.upstream.as_ref(), req, AnswerShape::Ragflow).await;
    STRUCTURED.render_json(result)
}

/// RagFlow chat relayed line by line as the upstream produces it.
pub async fn ragflow_chat_stream(
    State(state): State<Arc<AppState>>,
    Json(chat): Json<RagflowChatRequest>,
) -> Response {
    let request_id = request_id();
    info!(%request_id, backend = "ragflow", session = ?chat.session_id, stream = true, "Chat request");

    let req = match ragflow_request(&state, chat, true) {
        Ok(r) => r,
        Err(e) => return STRUCTURED.render_error(&e),
    };
    match relay_stream(
        state.upstream.as_ref(),
        req,
        StreamDialect::RagflowSse,
        RelayForm::RawLines,
        state.config.upstream.max_line_bytes,
        request_id,
    )
    .await
    {
        Ok(stream) => stream_response(stream),
        Err(e) => STRUCTURED.render_error(&e),
    }
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}
