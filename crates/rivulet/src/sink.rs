use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::warn;

use crate::payload::InjectedPayload;

/// Append half of the ordered channel between concurrently settling
/// producers and the transport for one render pass.
///
/// Chunks reach the transport in the order `append` was called, regardless
/// of which task appended. Cloned handles share the same channel and the
/// same dropped-write counter.
#[derive(Clone)]
pub struct StreamSink {
    sender: mpsc::UnboundedSender<Bytes>,
    dropped_writes: Arc<AtomicU64>,
}

/// Consumption half, handed to the transport adapter. Yields chunks in
/// append order until every sink handle is dropped or the stream is closed.
pub struct SinkStream {
    receiver: mpsc::UnboundedReceiver<Bytes>,
}

impl StreamSink {
    pub fn channel() -> (Self, SinkStream) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender, dropped_writes: Arc::new(AtomicU64::new(0)) }, SinkStream { receiver })
    }

    /// Appends one chunk. Writes after the transport side is gone are
    /// absorbed and counted, never raised: late-resolving work must not
    /// crash a response that has already finished flushing.
    pub fn append(&self, chunk: impl Into<Bytes>) {
        if self.sender.send(chunk.into()).is_err() {
            self.dropped_writes.fetch_add(1, Ordering::Relaxed);
            warn!("append after stream close; chunk dropped");
        }
    }

    /// Encodes and appends one payload block.
    pub fn emit_payload(&self, payload: &InjectedPayload) {
        match payload.encode() {
            Ok(block) => self.append(block),
            Err(e) => warn!("payload for {} could not be encoded: {e}", payload.key),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Number of writes absorbed after closure, for diagnostics.
    pub fn dropped_writes(&self) -> u64 {
        self.dropped_writes.load(Ordering::Relaxed)
    }
}

impl SinkStream {
    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        self.receiver.recv().await
    }

    /// Stops accepting further appends; queued chunks remain readable.
    pub fn close(&mut self) {
        self.receiver.close();
    }

    /// Drains everything currently queued without waiting. Used by buffered
    /// passes that resolve everything first and flush once at the end.
    pub fn drain_now(&mut self) -> Vec<Bytes> {
        let mut chunks = Vec::new();
        while let Ok(chunk) = self.receiver.try_recv() {
            chunks.push(chunk);
        }
        chunks
    }
}

impl Stream for SinkStream {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;
    use smallvec::SmallVec;

    type ChunkList = SmallVec<[Bytes; 4]>;

    #[tokio::test]
    async fn test_chunks_arrive_in_append_order() {
        let (sink, mut stream) = StreamSink::channel();

        sink.append("first");
        sink.append("second");
        sink.append("third");
        drop(sink);

        let mut received = ChunkList::new();
        while let Some(chunk) = stream.next().await {
            received.push(chunk);
        }

        assert_eq!(received.len(), 3);
        assert_eq!(received[0], "first");
        assert_eq!(received[1], "second");
        assert_eq!(received[2], "third");
    }

    #[tokio::test]
    async fn test_appends_from_concurrent_tasks_are_serialized() {
        let (sink, mut stream) = StreamSink::channel();

        let mut handles = Vec::new();
        for i in 0..8 {
            let sink = sink.clone();
            handles.push(tokio::spawn(async move {
                sink.append(format!("chunk-{i}"));
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        drop(sink);

        let mut received = Vec::new();
        while let Some(chunk) = stream.next().await {
            received.push(chunk);
        }

        assert_eq!(received.len(), 8);
    }

    #[tokio::test]
    async fn test_late_write_after_close_is_absorbed() {
        let (sink, stream) = StreamSink::channel();
        drop(stream);

        assert!(sink.is_closed());
        sink.append("too late");
        sink.append("also too late");

        assert_eq!(sink.dropped_writes(), 2);
    }

    #[tokio::test]
    async fn test_writes_before_close_remain_readable() {
        let (sink, mut stream) = StreamSink::channel();

        sink.append("delivered");
        stream.close();
        sink.append("dropped");

        assert_eq!(stream.next_chunk().await.unwrap(), "delivered");
        assert_eq!(stream.next_chunk().await, None);
        assert_eq!(sink.dropped_writes(), 1);
    }

    #[tokio::test]
    async fn test_emit_payload_appends_one_block() {
        let (sink, mut stream) = StreamSink::channel();

        let payload = InjectedPayload::new("\"films\"", "el-1", json!(["a", "b"]));
        sink.emit_payload(&payload);
        drop(sink);

        let chunk = stream.next_chunk().await.unwrap();
        let text = String::from_utf8(chunk.to_vec()).unwrap();
        let decoded = crate::payload::extract_payloads(&text);
        assert_eq!(decoded, vec![payload]);
    }

    #[tokio::test]
    async fn test_drain_now_returns_everything_queued() {
        let (sink, mut stream) = StreamSink::channel();

        sink.append("a");
        sink.append("b");

        let drained = stream.drain_now();
        assert_eq!(drained, vec![Bytes::from("a"), Bytes::from("b")]);
        assert!(stream.drain_now().is_empty());
    }
}
