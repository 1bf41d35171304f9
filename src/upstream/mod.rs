//! Outbound calls to chat backends.
//!
//! - [`client`]: reqwest-backed [`HttpUpstream`]
//! - [`chunks`]: channel-backed raw chunk stream with a close signal

pub mod chunks;
pub mod client;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
pub use chunks::{ChunkSender, ChunkStream, CloseReason};
pub use client::HttpUpstream;

/// Value of the outbound `Accept` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accept {
    Json,
    EventStream,
    JsonLines,
}

impl Accept {
    pub fn header_value(self) -> &'static str {
        match self {
            Accept::Json => "application/json",
            Accept::EventStream => "text/event-stream, application/json",
            Accept::JsonLines => "application/x-ndjson, application/json",
        }
    }
}

/// A single POST to a backend chat endpoint.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub url: String,
    pub bearer: Option<String>,
    pub body: Value,
    pub accept: Accept,
}

impl UpstreamRequest {
    pub fn new(url: impl Into<String>, body: Value) -> Self {
        Self {
            url: url.into(),
            bearer: None,
            body,
            accept: Accept::Json,
        }
    }

    /// Attach `Authorization: Bearer <key>`; blank keys are ignored.
    pub fn bearer(mut self, key: Option<&str>) -> Self {
        self.bearer = key
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string);
        self
    }

    pub fn accept(mut self, accept: Accept) -> Self {
        self.accept = accept;
        self
    }
}

/// A chat backend reachable over HTTP.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// One request, one complete response body.
    async fn call_once(&self, req: UpstreamRequest) -> Result<String>;

    /// One request, a lazy sequence of raw body chunks.
    async fn call_stream(&self, req: UpstreamRequest) -> Result<ChunkStream>;
}
