//! reqwest implementation of [`Upstream`].
//!
//! A single [`reqwest::Client`] is shared by every request; its connection
//! pool is the only cross-request state in the service.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response};
use tracing::{debug, warn};

use crate::config::UpstreamConfig;
use crate::error::{RelayError, Result};
use crate::upstream::chunks::{ChunkSender, ChunkStream, CloseReason};
use crate::upstream::{Upstream, UpstreamRequest};

pub struct HttpUpstream {
    client: Client,
    request_timeout: Duration,
    idle_timeout: Duration,
    channel_capacity: usize,
}

impl HttpUpstream {
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| RelayError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            request_timeout: config.request_timeout(),
            idle_timeout: config.stream_idle_timeout(),
            channel_capacity: config.channel_capacity,
        })
    }

    fn build(&self, req: &UpstreamRequest) -> RequestBuilder {
        let mut builder = self
            .client
            .post(&req.url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, req.accept.header_value())
            .json(&req.body);
        if let Some(key) = &req.bearer {
            builder = builder.bearer_auth(key);
        }
        builder
    }

    async fn send(&self, builder: RequestBuilder, url: &str) -> Result<Response> {
        let response = builder.send().await.map_err(|e| {
            warn!(url, error = %e, "Upstream request failed");
            RelayError::from(e)
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(url, status = status.as_u16(), "Upstream returned error status");
            return Err(RelayError::UpstreamApi {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn call_once(&self, req: UpstreamRequest) -> Result<String> {
        debug!(url = %req.url, "Calling upstream");
        let builder = self.build(&req).timeout(self.request_timeout);
        let response = self.send(builder, &req.url).await?;
        Ok(response.text().await?)
    }

    async fn call_stream(&self, req: UpstreamRequest) -> Result<ChunkStream> {
        debug!(url = %req.url, "Opening upstream stream");
        // Waiting for the response head counts as idle time.
        let response = tokio::time::timeout(self.idle_timeout, self.send(self.build(&req), &req.url))
            .await
            .map_err(|_| {
                warn!(url = %req.url, idle_timeout = ?self.idle_timeout, "Upstream sent no response head");
                RelayError::Timeout(format!(
                    "no response from upstream for {}s",
                    self.idle_timeout.as_secs()
                ))
            })??;

        let (tx, stream) = ChunkStream::channel(self.channel_capacity);
        tokio::spawn(read_body(response, tx, self.idle_timeout, req.url));
        Ok(stream)
    }
}

/// Pump body chunks into the channel until the upstream closes, an error
/// occurs or the consumer goes away. Dropping `response` on return closes
/// the connection.
async fn read_body(response: Response, mut tx: ChunkSender, idle_timeout: Duration, url: String) {
    let mut body = response.bytes_stream();
    let mut chunks = 0usize;

    let reason = loop {
        let next = tokio::select! {
            _ = tx.cancelled() => break CloseReason::Cancelled,
            next = tokio::time::timeout(idle_timeout, body.next()) => next,
        };

        match next {
            Ok(Some(Ok(bytes))) => {
                chunks += 1;
                if !tx.send(Ok(bytes)).await {
                    break CloseReason::Cancelled;
                }
            }
            Ok(Some(Err(e))) => {
                warn!(%url, error = %e, "Upstream stream read failed");
                tx.send(Err(RelayError::from(e))).await;
                break CloseReason::Failed;
            }
            Ok(None) => break CloseReason::Finished,
            Err(_) => {
                warn!(%url, ?idle_timeout, "Upstream stream went idle");
                tx.send(Err(RelayError::Timeout(format!(
                    "no data from upstream for {}s",
                    idle_timeout.as_secs()
                ))))
                .await;
                break CloseReason::Failed;
            }
        }
    };

    drop(body);
    debug!(%url, chunks, ?reason, "Upstream stream closed");
    tx.close(reason);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_sets_bearer_and_accept() {
        let upstream = HttpUpstream::new(&UpstreamConfig::default()).unwrap();
        let req = UpstreamRequest::new("http://localhost:1/chat", serde_json::json!({"a": 1}))
            .bearer(Some("sk-1"))
            .accept(crate::upstream::Accept::EventStream);

        let built = upstream.build(&req).build().unwrap();
        let headers = built.headers();
        assert_eq!(headers["authorization"], "Bearer sk-1");
        assert_eq!(headers["accept"], "text/event-stream, application/json");
        assert_eq!(headers["content-type"], "application/json");
    }

    #[test]
    fn test_blank_key_is_not_sent() {
        let upstream = HttpUpstream::new(&UpstreamConfig::default()).unwrap();
        let req = UpstreamRequest::new("http://localhost:1/chat", serde_json::json!({})).bearer(Some("  "));
        let built = upstream.build(&req).build().unwrap();
        assert!(built.headers().get("authorization").is_none());
    }

    /// Accepts connections and holds them open without ever answering.
    async fn silent_listener() -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        addr
    }

    fn short_timeouts() -> UpstreamConfig {
        UpstreamConfig {
            request_timeout_secs: 1,
            stream_idle_timeout_secs: 1,
            ..UpstreamConfig::default()
        }
    }

    #[tokio::test]
    async fn test_stream_times_out_waiting_for_response_head() {
        let addr = silent_listener().await;
        let upstream = HttpUpstream::new(&short_timeouts()).unwrap();
        let req = UpstreamRequest::new(format!("http://{addr}/chat"), serde_json::json!({}));

        let result = tokio::time::timeout(Duration::from_secs(5), upstream.call_stream(req))
            .await
            .expect("call_stream must give up on a silent upstream");
        match result {
            Err(e) => {
                assert!(matches!(e, RelayError::Timeout(_)), "unexpected {e:?}");
                assert_eq!(e.status_code(), axum::http::StatusCode::GATEWAY_TIMEOUT);
            }
            Ok(_) => panic!("silent upstream produced a stream"),
        }
    }

    #[tokio::test]
    async fn test_once_times_out_on_silent_upstream() {
        let addr = silent_listener().await;
        let upstream = HttpUpstream::new(&short_timeouts()).unwrap();
        let req = UpstreamRequest::new(format!("http://{addr}/chat"), serde_json::json!({}));

        let err = tokio::time::timeout(Duration::from_secs(5), upstream.call_once(req))
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, RelayError::Timeout(_)), "unexpected {err:?}");
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let upstream = HttpUpstream::new(&UpstreamConfig::default()).unwrap();
        // Port 9 (discard) on localhost is expected to refuse connections.
        let req = UpstreamRequest::new("http://127.0.0.1:9/chat", serde_json::json!({}));
        let err = upstream.call_once(req).await.unwrap_err();
        assert!(matches!(err, RelayError::Transport(_) | RelayError::Timeout(_)));
    }
}
