//! Raw chunk sequence produced by a streaming upstream call.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tokio::sync::{mpsc, oneshot};

use crate::error::RelayError;

/// Why the reader task behind a [`ChunkStream`] stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The upstream closed the body.
    Finished,
    /// The consumer dropped the stream before the upstream finished.
    Cancelled,
    /// A transport error or idle timeout ended the read.
    Failed,
}

pub type ChunkResult = Result<Bytes, RelayError>;

/// One-shot, ordered sequence of raw upstream chunks.
///
/// Dropping the stream closes the channel, which the reader task observes
/// and answers by dropping the upstream connection.
pub struct ChunkStream {
    rx: mpsc::Receiver<ChunkResult>,
    closed: Option<oneshot::Receiver<CloseReason>>,
}

impl ChunkStream {
    pub fn new(rx: mpsc::Receiver<ChunkResult>, closed: oneshot::Receiver<CloseReason>) -> Self {
        Self {
            rx,
            closed: Some(closed),
        }
    }

    /// Create a stream plus the producer side, for readers and tests.
    pub fn channel(capacity: usize) -> (ChunkSender, ChunkStream) {
        let (tx, rx) = mpsc::channel(capacity);
        let (closed_tx, closed_rx) = oneshot::channel();
        (
            ChunkSender {
                tx,
                closed: Some(closed_tx),
            },
            ChunkStream::new(rx, closed_rx),
        )
    }

    /// Take the connection-closed signal. Resolves once the reader task has
    /// released the upstream connection. Can only be taken once.
    pub fn take_close_signal(&mut self) -> Option<oneshot::Receiver<CloseReason>> {
        self.closed.take()
    }
}

impl Stream for ChunkStream {
    type Item = ChunkResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Producer half of a [`ChunkStream`].
pub struct ChunkSender {
    tx: mpsc::Sender<ChunkResult>,
    closed: Option<oneshot::Sender<CloseReason>>,
}

impl ChunkSender {
    /// Returns `false` once the consumer is gone.
    pub async fn send(&self, item: ChunkResult) -> bool {
        self.tx.send(item).await.is_ok()
    }

    /// Resolves when the consumer drops the stream.
    pub async fn cancelled(&self) {
        self.tx.closed().await
    }

    /// Report why the reader stopped. Called once; later calls are no-ops.
    pub fn close(&mut self, reason: CloseReason) {
        if let Some(closed) = self.closed.take() {
            let _ = closed.send(reason);
        }
    }
}

impl Drop for ChunkSender {
    fn drop(&mut self) {
        let reason = if self.tx.is_closed() {
            CloseReason::Cancelled
        } else {
            CloseReason::Finished
        };
        self.close(reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn test_chunks_arrive_in_order() {
        let (tx, mut stream) = ChunkStream::channel(4);
        tokio::spawn(async move {
            for part in ["a", "b", "c"] {
                tx.send(Ok(Bytes::from_static(part.as_bytes()))).await;
            }
        });

        let mut got = Vec::new();
        while let Some(item) = stream.next().await {
            got.push(item.unwrap());
        }
        assert_eq!(got, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_drop_reports_cancelled() {
        let (tx, mut stream) = ChunkStream::channel(1);
        let signal = stream.take_close_signal().unwrap();
        assert!(stream.take_close_signal().is_none());

        drop(stream);
        tx.cancelled().await;
        drop(tx);
        assert_eq!(signal.await.unwrap(), CloseReason::Cancelled);
    }

    #[tokio::test]
    async fn test_explicit_close_wins() {
        let (mut tx, mut stream) = ChunkStream::channel(1);
        let signal = stream.take_close_signal().unwrap();
        tx.close(CloseReason::Failed);
        drop(tx);
        assert_eq!(signal.await.unwrap(), CloseReason::Failed);
    }
}
