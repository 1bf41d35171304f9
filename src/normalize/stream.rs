//! Streaming normalization: raw chunks in, ordered text lines out.
//!
//! Every backend frames its stream differently (SSE `data:` lines, bare JSON
//! lines, in-band completion markers). [`normalize_stream`] reassembles
//! lines, applies the backend's [`StreamDialect`] and yields
//! [`StreamChunk`]s in arrival order, ending with exactly one terminal chunk
//! or one error.

use futures::Stream;
use serde::Deserialize;
use serde_json::Value;
use tokio_stream::StreamExt;
use tracing::debug;

use crate::error::{RelayError, Result};
use crate::normalize::lines::LineAssembler;
use crate::types::StreamChunk;
use crate::upstream::ChunkStream;

/// Upstream stream framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDialect {
    /// RagFlow: `data:{json}` lines, ends with `{"code":0,"data":false}`.
    RagflowSse,
    /// OpenAI-compatible SSE (DeepSeek): `data: {json}`, ends with `data: [DONE]`.
    OpenAiSse,
    /// Local runtime `/api/chat`: one JSON object per line, ends with `"done": true`.
    LocalJsonLines,
}

/// What is forwarded for each upstream line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayForm {
    /// The trimmed line exactly as the upstream sent it.
    RawLines,
    /// Only the text delta carried by the line.
    Content,
}

/// Result of interpreting one complete upstream line.
#[derive(Debug)]
pub enum LineOutcome {
    Emit(String),
    Skip,
    /// Logical end of stream, optionally carrying a last piece of text.
    End(Option<String>),
    Fail(RelayError),
}

#[derive(Debug, Deserialize)]
struct RagflowLine {
    code: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct SseDelta {
    #[serde(default)]
    choices: Vec<DeltaChoice>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct DeltaChoice {
    #[serde(default)]
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LocalLine {
    #[serde(default)]
    message: Option<LocalMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct LocalMessage {
    #[serde(default)]
    content: String,
}

/// Payload of an SSE `data:` field, or the whole line when unprefixed.
fn sse_payload(line: &str) -> &str {
    line.strip_prefix("data:").map(str::trim).unwrap_or(line)
}

fn is_sse_metadata(line: &str) -> bool {
    line.starts_with(':')
        || line.starts_with("event:")
        || line.starts_with("id:")
        || line.starts_with("retry:")
}

impl RagflowLine {
    /// `{"code":0,"data":false}` ends a RagFlow stream.
    fn is_marker(&self) -> bool {
        self.code == 0 && self.data == Value::Bool(false)
    }
}

fn is_done_payload(payload: &str) -> bool {
    payload == "[DONE]"
}

fn non_empty(text: String) -> Option<String> {
    (!text.is_empty()).then_some(text)
}

fn error_body(error: &Value) -> String {
    error
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string())
}

impl StreamDialect {
    pub fn name(self) -> &'static str {
        match self {
            StreamDialect::RagflowSse => "ragflow",
            StreamDialect::OpenAiSse => "openai",
            StreamDialect::LocalJsonLines => "local",
        }
    }

    /// Whether `line` is this dialect's in-band completion marker.
    pub fn is_terminal_marker(self, line: &str) -> bool {
        match self {
            StreamDialect::RagflowSse => serde_json::from_str::<RagflowLine>(sse_payload(line))
                .map(|l| l.is_marker())
                .unwrap_or(false),
            StreamDialect::OpenAiSse => is_done_payload(sse_payload(line)),
            StreamDialect::LocalJsonLines => serde_json::from_str::<LocalLine>(line)
                .map(|l| l.done)
                .unwrap_or(false),
        }
    }

    /// Interpret one trimmed, non-empty line.
    pub fn classify(self, line: &str, form: RelayForm) -> LineOutcome {
        match self {
            StreamDialect::RagflowSse => classify_ragflow(line, form),
            StreamDialect::OpenAiSse => classify_openai(line, form),
            StreamDialect::LocalJsonLines => classify_local(line, form),
        }
    }
}

fn classify_ragflow(line: &str, form: RelayForm) -> LineOutcome {
    let parsed = serde_json::from_str::<RagflowLine>(sse_payload(line));
    if let Ok(l) = &parsed {
        if l.is_marker() {
            return LineOutcome::End(None);
        }
        if l.code != 0 {
            return LineOutcome::Fail(RelayError::UpstreamApi {
                status: 200,
                body: l
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("ragflow error code {}", l.code)),
            });
        }
    }

    match form {
        RelayForm::RawLines => LineOutcome::Emit(line.to_string()),
        RelayForm::Content => match parsed {
            Ok(l) => match l.data.get("answer").and_then(Value::as_str) {
                Some(answer) if !answer.is_empty() => LineOutcome::Emit(answer.to_string()),
                _ => LineOutcome::Skip,
            },
            Err(_) if is_sse_metadata(line) => LineOutcome::Skip,
            Err(e) => LineOutcome::Fail(RelayError::MalformedResponse(format!(
                "ragflow stream line: {e}"
            ))),
        },
    }
}

fn classify_openai(line: &str, form: RelayForm) -> LineOutcome {
    if is_sse_metadata(line) {
        return match form {
            RelayForm::RawLines if !line.starts_with(':') => LineOutcome::Emit(line.to_string()),
            _ => LineOutcome::Skip,
        };
    }

    if StreamDialect::OpenAiSse.is_terminal_marker(line) {
        return LineOutcome::End(None);
    }
    let payload = sse_payload(line);

    if form == RelayForm::RawLines {
        return LineOutcome::Emit(line.to_string());
    }

    match serde_json::from_str::<SseDelta>(payload) {
        Ok(SseDelta { error: Some(error), .. }) if !error.is_null() => LineOutcome::Fail(RelayError::UpstreamApi {
            status: 200,
            body: error_body(&error),
        }),
        Ok(delta) => delta
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta)
            .and_then(|d| d.content)
            .and_then(non_empty)
            .map(LineOutcome::Emit)
            .unwrap_or(LineOutcome::Skip),
        Err(e) => LineOutcome::Fail(RelayError::MalformedResponse(format!("SSE data line: {e}"))),
    }
}

fn classify_local(line: &str, form: RelayForm) -> LineOutcome {
    let parsed = match serde_json::from_str::<LocalLine>(line) {
        Ok(l) => l,
        Err(e) => {
            return LineOutcome::Fail(RelayError::MalformedResponse(format!("JSON line: {e}")));
        }
    };

    if let Some(error) = parsed.error.filter(|e| !e.is_null()) {
        return LineOutcome::Fail(RelayError::UpstreamApi {
            status: 200,
            body: match error {
                Value::String(s) => s,
                other => error_body(&other),
            },
        });
    }

    let text = match form {
        RelayForm::RawLines => Some(line.to_string()),
        RelayForm::Content => parsed.message.map(|m| m.content).and_then(non_empty),
    };

    match (parsed.done, text) {
        (true, last) => LineOutcome::End(last),
        (false, Some(t)) => LineOutcome::Emit(t),
        (false, None) => LineOutcome::Skip,
    }
}

/// Turn raw upstream chunks into an ordered, one-shot sequence of lines.
///
/// The sequence ends after a terminal chunk (marker seen or upstream closed
/// on a line boundary) or after a single error. A partial trailing line is
/// never emitted; it ends the sequence with [`RelayError::IncompleteStream`].
pub fn normalize_stream(
    mut chunks: ChunkStream,
    dialect: StreamDialect,
    form: RelayForm,
    max_line_bytes: usize,
) -> impl Stream<Item = Result<StreamChunk>> + Send + 'static {
    async_stream::stream! {
        let mut assembler = LineAssembler::with_max_line(max_line_bytes);
        let mut emitted = 0usize;

        while let Some(item) = chunks.next().await {
            let bytes = match item {
                Ok(b) => b,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            let lines = match assembler.push(&bytes) {
                Ok(lines) => lines,
                Err(len) => {
                    yield Err(RelayError::MalformedResponse(format!(
                        "line exceeds {max_line_bytes} bytes ({len} buffered)"
                    )));
                    return;
                }
            };

            for line in lines {
                match dialect.classify(&line, form) {
                    LineOutcome::Emit(text) => {
                        emitted += 1;
                        yield Ok(StreamChunk::line(text));
                    }
                    LineOutcome::Skip => {}
                    LineOutcome::End(last) => {
                        if let Some(text) = last {
                            emitted += 1;
                            yield Ok(StreamChunk::line(text));
                        }
                        debug!(dialect = dialect.name(), emitted, "Terminal marker received");
                        yield Ok(StreamChunk::terminal());
                        return;
                    }
                    LineOutcome::Fail(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        }

        match assembler.finish() {
            Ok(()) => {
                debug!(dialect = dialect.name(), emitted, "Upstream closed");
                yield Ok(StreamChunk::terminal());
            }
            Err(discarded_bytes) => yield Err(RelayError::IncompleteStream { discarded_bytes }),
        }
    }
}
