//! SSE broadcast plumbing.
//!
//! Every connected `/stream` client owns a bounded queue (capacity 64).
//! [`Broadcaster::broadcast`] enqueues without blocking; a client whose
//! queue is full is dropped on the spot — a slow consumer must never stall
//! the poller or the mesh bridge. Closing the broadcaster drops every
//! sender, which releases the per-client generators within one poll.

use std::convert::Infallible;
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use futures::StreamExt;
use futures::stream::{self, Stream};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::state::AppState;

/// Per-client queue capacity.
pub const QUEUE_CAPACITY: usize = 64;

/// One formatted frame awaiting delivery to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// SSE event name (`health`, `service`, `mesh`, `config-changed`).
    pub event: String,
    /// JSON-encoded data line.
    pub data: String,
}

/// Fan-out hub for the `/stream` endpoint. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct Broadcaster {
    subscribers: Arc<Mutex<Vec<mpsc::Sender<Frame>>>>,
}

impl Broadcaster {
    /// A broadcaster with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new client; returns the queue to read frames from.
    #[must_use]
    pub fn subscribe(&self) -> mpsc::Receiver<Frame> {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(tx);
        }
        rx
    }

    /// Enqueue one event on every client queue, non-blocking.
    ///
    /// Clients with a full queue are dropped (slow-consumer policy), as
    /// are clients that already went away.
    pub fn broadcast(&self, event: &str, data: &serde_json::Value) {
        let frame = Frame {
            event: event.to_owned(),
            data: data.to_string(),
        };
        let Ok(mut subscribers) = self.subscribers.lock() else {
            return;
        };
        subscribers.retain(|tx| match tx.try_send(frame.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(event = %frame.event, "dropping slow SSE subscriber");
                false
            },
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    /// Drop every subscriber, releasing their streams.
    pub fn close_all(&self) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.clear();
        }
    }

    /// Number of connected subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map_or(0, |s| s.len())
    }
}

/// `GET /stream` — the append-only event stream.
///
/// Emits a single `connected` event, then frames as they are broadcast.
pub async fn sse_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.broadcaster.subscribe();

    let connected = stream::once(async { Ok(Event::default().event("connected").data("{}")) });
    let frames = ReceiverStream::new(receiver)
        .map(|frame| Ok(Event::default().event(frame.event).data(frame.data)));

    Sse::new(connected.chain(frames))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_broadcast_reaches_all_subscribers() {
        let broadcaster = Broadcaster::new();
        let mut a = broadcaster.subscribe();
        let mut b = broadcaster.subscribe();

        broadcaster.broadcast("health", &json!({"ok": true}));

        let frame = a.recv().await.unwrap();
        assert_eq!(frame.event, "health");
        assert_eq!(frame.data, r#"{"ok":true}"#);
        assert_eq!(b.recv().await.unwrap(), frame);
    }

    #[tokio::test]
    async fn test_frames_arrive_in_order() {
        let broadcaster = Broadcaster::new();
        let mut rx = broadcaster.subscribe();

        for i in 0..5 {
            broadcaster.broadcast("health", &json!({ "seq": i }));
        }
        for i in 0..5 {
            let frame = rx.recv().await.unwrap();
            assert_eq!(frame.data, json!({ "seq": i }).to_string());
        }
    }

    #[tokio::test]
    async fn test_full_queue_drops_subscriber_without_blocking() {
        let broadcaster = Broadcaster::new();
        let mut slow = broadcaster.subscribe();

        // Overflow the slow client's queue; broadcast must never block.
        for i in 0..=QUEUE_CAPACITY {
            broadcaster.broadcast("health", &json!({ "seq": i }));
        }
        assert_eq!(broadcaster.subscriber_count(), 0);

        // The dropped client still drains what it had queued, then ends.
        for _ in 0..QUEUE_CAPACITY {
            assert!(slow.recv().await.is_some());
        }
        assert!(slow.recv().await.is_none());

        // A fresh client is unaffected by the earlier drop.
        let mut healthy = broadcaster.subscribe();
        broadcaster.broadcast("mesh", &json!({}));
        assert_eq!(healthy.recv().await.unwrap().event, "mesh");
    }

    #[tokio::test]
    async fn test_close_all_releases_streams() {
        let broadcaster = Broadcaster::new();
        let mut rx = broadcaster.subscribe();
        broadcaster.close_all();
        assert!(rx.recv().await.is_none());
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_disconnected_subscriber_pruned_on_next_broadcast() {
        let broadcaster = Broadcaster::new();
        let rx = broadcaster.subscribe();
        drop(rx);
        broadcaster.broadcast("health", &json!({}));
        assert_eq!(broadcaster.subscriber_count(), 0);
    }
}
