//! Relay: bridges normalized upstream output to the inbound HTTP caller.
//!
//! How failures reach the caller is an explicit, per-endpoint
//! [`ErrorPolicy`]:
//! - [`ErrorPolicy::EmbedInBody`]: always `200 text/plain`, the cause is the
//!   body. Kept for clients of the DeepSeek endpoints that expect a string.
//! - [`ErrorPolicy::HttpStatus`]: the upstream status (or a gateway status)
//!   with a JSON [`ChatResponse`] failure body.
//!
//! Streams are forwarded line by line with no extra buffering. Once the
//! first byte is out the status can no longer change, so a mid-stream
//! failure aborts the body and the caller sees a truncated response.

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::error::{RelayError, Result};
use crate::normalize::{extract, normalize_stream, Answer, AnswerShape, RelayForm, StreamDialect};
use crate::types::ChatResponse;
use crate::upstream::{Upstream, UpstreamRequest};

pub const TEXT_PLAIN_UTF8: &str = "text/plain; charset=utf-8";

/// Caller-visible representation of relay failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    EmbedInBody,
    HttpStatus,
}

impl ErrorPolicy {
    pub fn render_error(self, err: &RelayError) -> Response {
        match self {
            ErrorPolicy::EmbedInBody => {
                let text = match err {
                    RelayError::UpstreamApi { status, body } => {
                        format!("API call failed: {status} {body}")
                    }
                    other => format!("Call error: {other}"),
                };
                text_response(StatusCode::OK, text)
            }
            ErrorPolicy::HttpStatus => {
                let status = err.status_code();
                let message = match err {
                    RelayError::UpstreamApi { body, .. } => body.clone(),
                    other => other.to_string(),
                };
                (status, Json(ChatResponse::failure(status.as_u16(), message))).into_response()
            }
        }
    }

    /// Render a plain-text answer.
    pub fn render_text(self, result: Result<Answer>) -> Response {
        match result {
            Ok(answer) => text_response(StatusCode::OK, answer.text),
            Err(e) => self.render_error(&e),
        }
    }

    /// Render a JSON [`ChatResponse`] carrying the parsed upstream document.
    pub fn render_json(self, result: Result<Answer>) -> Response {
        match result {
            Ok(answer) => Json(ChatResponse::success(answer.text, Some(answer.raw))).into_response(),
            Err(e) => self.render_error(&e),
        }
    }
}

fn text_response(status: StatusCode, text: String) -> Response {
    (status, [(header::CONTENT_TYPE, TEXT_PLAIN_UTF8)], text).into_response()
}

/// Non-streaming relay: one upstream call, one extracted answer.
pub async fn relay_once(
    upstream: &dyn Upstream,
    req: UpstreamRequest,
    shape: AnswerShape,
) -> Result<Answer> {
    let raw = upstream.call_once(req).await?;
    let answer = extract(&raw, shape)?;
    debug!(answer_len = answer.text.len(), "Upstream answer extracted");
    Ok(answer)
}

/// Streaming relay: open the upstream stream and normalize it into the
/// bytes written to the caller.
///
/// Connection and status errors, and errors on the very first line, are
/// returned before any byte is produced.
/// Terminal chunks end the byte stream; errors end it with an `Err` item.
pub async fn relay_stream(
    upstream: &dyn Upstream,
    req: UpstreamRequest,
    dialect: StreamDialect,
    form: RelayForm,
    max_line_bytes: usize,
    request_id: String,
) -> Result<impl Stream<Item = Result<Bytes>> + Send + 'static> {
    let chunks = upstream.call_stream(req).await?;
    let mut lines = Box::pin(normalize_stream(chunks, dialect, form, max_line_bytes));

    // An error before the first line can still be reported with a status.
    let first = match lines.next().await {
        Some(Err(e)) => {
            warn!(%request_id, dialect = dialect.name(), kind = e.kind(), error = %e, "Stream failed before first line");
            return Err(e);
        }
        other => other,
    };

    Ok(async_stream::stream! {
        let mut forwarded = 0usize;
        let mut pending = first;
        loop {
            let item = match pending.take() {
                Some(item) => item,
                None => match lines.next().await {
                    Some(item) => item,
                    None => break,
                },
            };

            match item {
                Ok(chunk) if chunk.is_terminal => {
                    info!(%request_id, dialect = dialect.name(), forwarded, "Stream relayed");
                    return;
                }
                Ok(chunk) => {
                    forwarded += 1;
                    yield Ok(encode_line(chunk.text, form));
                }
                Err(e) => {
                    warn!(%request_id, dialect = dialect.name(), forwarded, kind = e.kind(), error = %e, "Stream relay failed");
                    yield Err(e);
                    return;
                }
            }
        }
    })
}

fn encode_line(text: String, form: RelayForm) -> Bytes {
    match form {
        RelayForm::RawLines => {
            let mut line = text.into_bytes();
            line.push(b'\n');
            Bytes::from(line)
        }
        RelayForm::Content => Bytes::from(text),
    }
}

/// Wrap a relayed byte stream as a chunked `text/plain` response.
pub fn stream_response<S>(stream: S) -> Response
where
    S: Stream<Item = Result<Bytes>> + Send + 'static,
{
    (
        [
            (header::CONTENT_TYPE, TEXT_PLAIN_UTF8),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}
