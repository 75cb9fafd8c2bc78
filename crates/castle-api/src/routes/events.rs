//! Webhook event bus endpoints.

use axum::Json;
use axum::extract::State;
use serde::Deserialize;
use serde_json::json;

use crate::state::AppState;

/// Body for `POST /events/publish`.
#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    /// Topic to publish to.
    pub topic: String,
    /// Event payload, forwarded verbatim.
    pub payload: serde_json::Value,
}

/// Body for `POST /events/subscribe`.
#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    /// Topic to subscribe to.
    pub topic: String,
    /// Webhook URL events are POSTed to.
    pub callback_url: String,
    /// Optional label for debugging.
    #[serde(default)]
    pub subscriber: String,
}

/// Body for `POST /events/unsubscribe`.
#[derive(Debug, Deserialize)]
pub struct UnsubscribeRequest {
    /// Topic to unsubscribe from.
    pub topic: String,
    /// The callback URL previously subscribed.
    pub callback_url: String,
}

/// `POST /events/publish` — fan out to subscribers; the count reflects
/// successful deliveries only.
pub async fn publish(
    State(state): State<AppState>,
    Json(request): Json<PublishRequest>,
) -> Json<serde_json::Value> {
    let delivered = state
        .bus
        .publish(&state.http, &request.topic, &request.payload)
        .await;
    Json(json!({
        "topic": request.topic,
        "subscribers_notified": delivered,
    }))
}

/// `POST /events/subscribe` — idempotent on `(topic, callback_url)`.
pub async fn subscribe(
    State(state): State<AppState>,
    Json(request): Json<SubscribeRequest>,
) -> Json<serde_json::Value> {
    state
        .bus
        .subscribe(&request.topic, &request.callback_url, &request.subscriber);
    Json(json!({
        "topic": request.topic,
        "callback_url": request.callback_url,
        "status": "subscribed",
    }))
}

/// `POST /events/unsubscribe` — idempotent.
pub async fn unsubscribe(
    State(state): State<AppState>,
    Json(request): Json<UnsubscribeRequest>,
) -> Json<serde_json::Value> {
    let removed = state.bus.unsubscribe(&request.topic, &request.callback_url);
    Json(json!({
        "topic": request.topic,
        "callback_url": request.callback_url,
        "status": if removed { "unsubscribed" } else { "not_found" },
    }))
}

/// `GET /events/topics`.
pub async fn list_topics(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "topics": state.bus.list_topics() }))
}
