//! Streaming fan-out (§4.G).
//!
//! An adapter opens the upstream stream, spawns one reader task, and
//! returns a [`StreamHandle`] synchronously once the handshake succeeds.
//! Errors before the first chunk surface as a synchronous `Err` from the
//! call itself, never via the channel. From the moment [`StreamHandle`] is
//! returned, the channel belongs to the caller; closing it is the reader
//! task's duty (§9).

use std::time::{Duration, Instant};

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::schema::{StreamElement, StreamElementKind};

/// A cooperative cancellation signal threaded through every suspension
/// point named in §5. Cloning shares the same underlying flag.
#[derive(Clone, Default)]
pub struct CancellationToken(std::sync::Arc<tokio::sync::Notify>, std::sync::Arc<std::sync::atomic::AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.1.store(true, std::sync::atomic::Ordering::SeqCst);
        self.0.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.1.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.0.notified().await;
    }
}

/// The receiving half of a stream's fan-out channel.
pub struct StreamHandle {
    receiver: mpsc::Receiver<StreamElement>,
}

impl StreamHandle {
    pub fn new(receiver: mpsc::Receiver<StreamElement>) -> Self {
        Self { receiver }
    }

    pub async fn recv(&mut self) -> Option<StreamElement> {
        self.receiver.recv().await
    }

    pub fn into_stream(self) -> ReceiverStream<StreamElement> {
        ReceiverStream::new(self.receiver)
    }
}

/// Tracks the monotonically increasing `chunk_index` and per-chunk latency
/// every reader task must stamp (§4.G, §5, §8).
pub struct ChunkClock {
    started_at: Instant,
    last_emit: Instant,
    next_index: u64,
}

impl ChunkClock {
    pub fn start() -> Self {
        let now = Instant::now();
        Self {
            started_at: now,
            last_emit: now,
            next_index: 0,
        }
    }

    pub fn tick(&mut self) -> (u64, Duration) {
        let now = Instant::now();
        let latency = now.duration_since(self.last_emit);
        self.last_emit = now;
        let index = self.next_index;
        self.next_index += 1;
        (index, latency)
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Drives a reader task over an upstream byte stream of newline-delimited
/// Server-Sent-Events frames (`data: {...}\n\n`), handing each parsed JSON
/// event to `parse_event`, which returns zero or more stream element kinds
/// to emit for that event. Honors `cancel`: when signaled, the upstream
/// stream is dropped (closing the connection) and the channel closes
/// without sending pending elements.
pub fn spawn_sse_reader<S, F>(
    mut upstream: S,
    buffer_size: usize,
    cancel: CancellationToken,
    mut parse_event: F,
) -> StreamHandle
where
    S: Stream<Item = Result<bytes::Bytes, String>> + Unpin + Send + 'static,
    F: FnMut(&str) -> Vec<StreamElementKind> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(buffer_size.max(1));

    tokio::spawn(async move {
        let mut clock = ChunkClock::start();
        let mut buffer = String::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break;
                }
                chunk = upstream.next() => {
                    let Some(chunk) = chunk else { break };
                    let Ok(bytes) = chunk else { break };
                    buffer.push_str(&String::from_utf8_lossy(&bytes));

                    while let Some(pos) = buffer.find("\n\n") {
                        let frame: String = buffer.drain(..pos + 2).collect();
                        for line in frame.lines() {
                            let Some(data) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) else {
                                continue;
                            };
                            let data = data.trim();
                            if data == "[DONE]" {
                                return;
                            }
                            for kind in parse_event(data) {
                                let (index, latency) = clock.tick();
                                let element = StreamElement::new(index, latency, kind);
                                if tx.send(element).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                }
            }
        }
        let _ = clock.elapsed();
    });

    StreamHandle::new(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    #[tokio::test]
    async fn chunk_index_is_strictly_increasing_and_channel_closes() {
        let frames = vec![
            Ok(bytes::Bytes::from(
                "data: {\"t\":\"a\"}\n\ndata: {\"t\":\"b\"}\n\n",
            )),
            Ok(bytes::Bytes::from("data: [DONE]\n\n")),
        ];
        let upstream = stream::iter(frames);

        let handle = spawn_sse_reader(upstream, 8, CancellationToken::new(), |data| {
            vec![StreamElementKind::TextDelta {
                text: data.to_string(),
            }]
        });

        let mut indices = Vec::new();
        let mut handle = handle;
        while let Some(element) = handle.recv().await {
            indices.push(element.chunk_index);
        }

        assert_eq!(indices, vec![0, 1]);
    }

    #[tokio::test]
    async fn cancellation_closes_channel_without_pending_sends() {
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();

        let upstream = stream::unfold((), move |_| {
            let cancel = cancel_clone.clone();
            async move {
                cancel.cancel();
                futures_util::future::pending::<()>().await;
                Some((Ok(bytes::Bytes::from("data: {}\n\n")), ()))
            }
        });

        let mut handle = spawn_sse_reader(Box::pin(upstream), 8, cancel, |data| {
            vec![StreamElementKind::TextDelta {
                text: data.to_string(),
            }]
        });

        assert!(handle.recv().await.is_none());
    }
}
