//! Answer extraction from complete (non-streaming) upstream bodies.
//!
//! Each backend shape is modelled as a typed struct; a missing or mistyped
//! field is a `MalformedResponse`, never an empty answer.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{RelayError, Result};
use crate::types::RagflowApiResponse;

/// Which response envelope the upstream body is expected to have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerShape {
    /// OpenAI-compatible `choices[0].message.content`.
    ChatCompletions,
    /// RagFlow `{code, message, data: {answer}}`.
    Ragflow,
    /// Local runtime `/api/chat`: `message.content`.
    LocalChat,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionBody {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct LocalChatBody {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct RagflowStatus {
    code: i64,
    #[serde(default)]
    message: Option<String>,
}

/// Error envelope some OpenAI-compatible servers return with a 2xx status.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Value,
}

/// An extracted answer plus the parsed upstream document.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub raw: Value,
}

/// Locate the answer text in a raw upstream body.
pub fn extract_answer(raw: &str, shape: AnswerShape) -> Result<String> {
    extract(raw, shape).map(|a| a.text)
}

/// Like [`extract_answer`] but also hands back the parsed document.
pub fn extract(raw: &str, shape: AnswerShape) -> Result<Answer> {
    let doc: Value = serde_json::from_str(raw)
        .map_err(|e| RelayError::MalformedResponse(format!("body is not JSON: {e}")))?;

    if let Ok(envelope) = ErrorEnvelope::deserialize(&doc) {
        if !envelope.error.is_null() {
            return Err(RelayError::UpstreamApi {
                status: 200,
                body: error_text(&envelope.error),
            });
        }
    }

    let text = match shape {
        AnswerShape::ChatCompletions => {
            let body = ChatCompletionBody::deserialize(&doc).map_err(malformed("choices[0].message.content"))?;
            body.choices
                .into_iter()
                .next()
                .map(|c| c.message.content)
                .ok_or_else(|| RelayError::MalformedResponse("choices is empty".into()))?
        }
        AnswerShape::Ragflow => {
            let status = RagflowStatus::deserialize(&doc).map_err(malformed("code"))?;
            if status.code != 0 {
                return Err(RelayError::UpstreamApi {
                    status: 200,
                    body: status
                        .message
                        .unwrap_or_else(|| format!("ragflow error code {}", status.code)),
                });
            }
            let body = RagflowApiResponse::deserialize(&doc).map_err(malformed("data.answer"))?;
            body.data
                .map(|d| d.answer)
                .ok_or_else(|| RelayError::MalformedResponse("missing data.answer".into()))?
        }
        AnswerShape::LocalChat => {
            LocalChatBody::deserialize(&doc)
                .map_err(malformed("message.content"))?
                .message
                .content
        }
    };

    Ok(Answer { text, raw: doc })
}

fn malformed(path: &'static str) -> impl Fn(serde_json::Error) -> RelayError {
    move |e| RelayError::MalformedResponse(format!("expected {path}: {e}"))
}

fn error_text(error: &Value) -> String {
    match error {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
        other => other.to_string(),
    }
}
