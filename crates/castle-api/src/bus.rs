//! Webhook event bus.
//!
//! Components publish typed events to named topics; other components
//! subscribe with a callback URL. Delivery is one HTTP POST per
//! subscription, fanned out concurrently through the shared client —
//! fire-and-forget, no retry, no persistence. The delivered count
//! reflects successes only.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

/// Per-delivery timeout.
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// A subscription to a topic, unique by `(topic, callback_url)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subscription {
    /// Topic subscribed to.
    pub topic: String,
    /// Webhook URL events are POSTed to.
    pub callback_url: String,
    /// Optional label for debugging.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub subscriber: String,
}

/// In-memory subscription table with HTTP fan-out delivery.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    subscriptions: Arc<Mutex<IndexMap<String, Vec<Subscription>>>>,
}

impl EventBus {
    /// An empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription. Idempotent on `(topic, callback_url)`.
    pub fn subscribe(&self, topic: &str, callback_url: &str, subscriber: &str) {
        let Ok(mut subscriptions) = self.subscriptions.lock() else {
            return;
        };
        let entries = subscriptions.entry(topic.to_owned()).or_default();
        if entries.iter().any(|s| s.callback_url == callback_url) {
            return;
        }
        entries.push(Subscription {
            topic: topic.to_owned(),
            callback_url: callback_url.to_owned(),
            subscriber: subscriber.to_owned(),
        });
        info!(topic, callback_url, subscriber, "subscribed");
    }

    /// Remove a subscription. Returns whether one was removed; removing
    /// an absent subscription is not an error.
    pub fn unsubscribe(&self, topic: &str, callback_url: &str) -> bool {
        let Ok(mut subscriptions) = self.subscriptions.lock() else {
            return false;
        };
        let Some(entries) = subscriptions.get_mut(topic) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|s| s.callback_url != callback_url);
        let removed = entries.len() < before;
        if entries.is_empty() {
            subscriptions.shift_remove(topic);
        }
        removed
    }

    /// Deliver an event to every subscriber of `topic` concurrently.
    /// Returns the number of successful deliveries.
    pub async fn publish(
        &self,
        client: &reqwest::Client,
        topic: &str,
        payload: &serde_json::Value,
    ) -> usize {
        let subscribers: Vec<Subscription> = {
            let Ok(subscriptions) = self.subscriptions.lock() else {
                return 0;
            };
            subscriptions.get(topic).cloned().unwrap_or_default()
        };
        if subscribers.is_empty() {
            return 0;
        }

        let event = json!({
            "topic": topic,
            "payload": payload,
            "published_at": chrono::Utc::now().to_rfc3339(),
        });

        let deliveries = subscribers
            .iter()
            .map(|subscription| deliver(client, subscription, &event));
        let results = futures::future::join_all(deliveries).await;
        results.into_iter().filter(|ok| *ok).count()
    }

    /// All topics and their subscribers.
    #[must_use]
    pub fn list_topics(&self) -> IndexMap<String, Vec<Subscription>> {
        self.subscriptions
            .lock()
            .map_or_else(|_| IndexMap::new(), |subscriptions| subscriptions.clone())
    }
}

async fn deliver(
    client: &reqwest::Client,
    subscription: &Subscription,
    event: &serde_json::Value,
) -> bool {
    let outcome = client
        .post(&subscription.callback_url)
        .timeout(DELIVERY_TIMEOUT)
        .json(event)
        .send()
        .await;
    match outcome {
        Ok(response) if response.status().is_success() => true,
        Ok(response) => {
            warn!(
                callback_url = %subscription.callback_url,
                status = %response.status(),
                "delivery rejected"
            );
            false
        },
        Err(e) => {
            warn!(callback_url = %subscription.callback_url, error = %e, "delivery failed");
            false
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_is_idempotent() {
        let bus = EventBus::new();
        bus.subscribe("deploys", "http://localhost:9021/hook", "a");
        bus.subscribe("deploys", "http://localhost:9021/hook", "a");

        let topics = bus.list_topics();
        assert_eq!(topics["deploys"].len(), 1);
    }

    #[test]
    fn test_unsubscribe_removes_empty_topic() {
        let bus = EventBus::new();
        bus.subscribe("deploys", "http://localhost:9021/hook", "");
        assert!(bus.unsubscribe("deploys", "http://localhost:9021/hook"));
        assert!(bus.list_topics().is_empty());
    }

    #[test]
    fn test_unsubscribe_absent_is_false_not_error() {
        let bus = EventBus::new();
        assert!(!bus.unsubscribe("ghost", "http://localhost:9021/hook"));
        bus.subscribe("deploys", "http://localhost:9021/a", "");
        assert!(!bus.unsubscribe("deploys", "http://localhost:9021/b"));
        assert_eq!(bus.list_topics()["deploys"].len(), 1);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_delivers_zero() {
        let bus = EventBus::new();
        let client = reqwest::Client::new();
        let delivered = bus.publish(&client, "deploys", &serde_json::json!({})).await;
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_failed_delivery_not_counted() {
        // Nothing listens on the discard port; delivery fails, publish
        // still completes and reports zero successes.
        let bus = EventBus::new();
        bus.subscribe("deploys", "http://127.0.0.1:9/hook", "");
        let client = reqwest::Client::new();
        let delivered = bus.publish(&client, "deploys", &serde_json::json!({})).await;
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_successful_delivery_counted() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0_u8; 4096];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n")
                    .await;
            }
        });

        let bus = EventBus::new();
        bus.subscribe("deploys", &format!("http://127.0.0.1:{port}/hook"), "t");
        let client = reqwest::Client::new();
        let delivered = bus
            .publish(&client, "deploys", &serde_json::json!({"ok": true}))
            .await;
        assert_eq!(delivered, 1);
    }
}
