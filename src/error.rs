//! Error taxonomy shared by the upstream client, normalizer and relay.

use axum::http::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    /// Connection, TLS or body read failure talking to the upstream.
    #[error("transport error: {0}")]
    Transport(String),

    /// The upstream did not answer (or went idle) within the configured timeout.
    #[error("upstream timed out: {0}")]
    Timeout(String),

    /// The upstream answered with a non-2xx status, or a 2xx body that
    /// carries an explicit error payload.
    #[error("upstream returned {status}: {body}")]
    UpstreamApi { status: u16, body: String },

    /// The upstream body did not have the expected shape.
    #[error("malformed upstream response: {0}")]
    MalformedResponse(String),

    /// The upstream closed the stream in the middle of a line.
    #[error("upstream stream ended mid-line ({discarded_bytes} bytes discarded)")]
    IncompleteStream { discarded_bytes: usize },

    /// The caller's request cannot be forwarded as-is.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;

impl RelayError {
    /// HTTP status used when the error is surfaced to a caller as a real
    /// HTTP error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::UpstreamApi { status, .. } => StatusCode::from_u16(*status)
                .ok()
                .filter(|s| s.is_client_error() || s.is_server_error())
                .unwrap_or(StatusCode::BAD_GATEWAY),
            RelayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            RelayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            RelayError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RelayError::Transport(_)
            | RelayError::MalformedResponse(_)
            | RelayError::IncompleteStream { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    /// Short machine-readable kind, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::Transport(_) => "transport",
            RelayError::Timeout(_) => "timeout",
            RelayError::UpstreamApi { .. } => "upstream_api",
            RelayError::MalformedResponse(_) => "malformed_response",
            RelayError::IncompleteStream { .. } => "incomplete_stream",
            RelayError::InvalidRequest(_) => "invalid_request",
            RelayError::Config(_) => "config",
        }
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RelayError::Timeout(e.to_string())
        } else {
            RelayError::Transport(e.to_string())
        }
    }
}
