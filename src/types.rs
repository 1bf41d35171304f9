//! Request/response types exchanged with callers and upstream backends.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{RelayError, Result};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant";

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Chat request in the OpenAI-compatible shape.
///
/// `extra` carries backend-specific fields (`session_id`, `user_id`, ...)
/// and is flattened into the outbound body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>, stream: bool) -> Self {
        Self {
            model: model.into(),
            messages,
            stream,
            extra: Map::new(),
        }
    }

    /// Minimal system + user conversation for single-message endpoints.
    pub fn with_default_conversation(
        model: impl Into<String>,
        user_message: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self::new(
            model,
            vec![ChatMessage::system(system_prompt), ChatMessage::user(user_message)],
            false,
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(RelayError::InvalidRequest("model must not be empty".into()));
        }
        if self.messages.is_empty() {
            return Err(RelayError::InvalidRequest(
                "messages must contain at least one message".into(),
            ));
        }
        Ok(())
    }

    pub fn to_body(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(|e| RelayError::InvalidRequest(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Failure,
}

/// Non-streaming response returned to callers of JSON endpoints.
///
/// Built only through [`ChatResponse::success`] and [`ChatResponse::failure`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    status: ResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    raw: Option<Value>,
}

impl ChatResponse {
    pub fn success(answer: String, raw: Option<Value>) -> Self {
        Self {
            status: ResponseStatus::Success,
            answer: Some(answer),
            error_code: None,
            error_message: None,
            raw,
        }
    }

    pub fn failure(error_code: u16, error_message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Failure,
            answer: None,
            error_code: Some(error_code),
            error_message: Some(error_message.into()),
            raw: None,
        }
    }

    pub fn status(&self) -> ResponseStatus {
        self.status
    }

    pub fn answer(&self) -> Option<&str> {
        self.answer.as_deref()
    }
}

/// One item of a normalized stream.
///
/// A terminal chunk carries no text and marks the logical end of the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChunk {
    pub text: String,
    pub is_terminal: bool,
}

impl StreamChunk {
    pub fn line(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_terminal: false,
        }
    }

    pub fn terminal() -> Self {
        Self {
            text: String::new(),
            is_terminal: true,
        }
    }
}

// ─── RagFlow ───────────────────────────────────────────────────────────────

fn default_true() -> bool {
    true
}

/// Caller-facing RagFlow request, forwarded as the upstream body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagflowChatRequest {
    pub question: String,
    #[serde(default = "default_true")]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// RagFlow response envelope. `code == 0` means success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagflowApiResponse {
    pub code: i64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<RagflowData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagflowData {
    pub answer: String,
    #[serde(default)]
    pub reference: Option<Value>,
    #[serde(default)]
    pub audio_binary: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}
