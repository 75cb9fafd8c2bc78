//! HTTP route handlers.

/// Config editor endpoints (`/config`).
pub mod config_editor;
/// Catalog/registry views (`/programs`, `/services`, `/jobs`, `/gateway`).
pub mod dashboard;
/// Webhook event bus endpoints (`/events`).
pub mod events;
/// Journal tailing (`/logs`).
pub mod logs;
/// View models shared across endpoints.
pub mod models;
/// Mesh views (`/nodes`, `/mesh/status`).
pub mod nodes;
/// Secret management (`/secrets`).
pub mod secrets;
/// Service control actions (`/services/{id}/{action}`).
pub mod services;

use axum::Json;
use axum::Router;
use axum::routing::{get, post, put};
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::state::AppState;
use crate::stream;

/// `GET /health` — liveness of the daemon itself.
async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

/// Assemble the full application router.
///
/// CORS is permissive: the dashboard is a single-user LAN surface.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stream", get(stream::sse_stream))
        .route("/programs", get(dashboard::list_programs))
        .route("/programs/{id}", get(dashboard::get_program))
        .route("/services", get(dashboard::list_services))
        .route("/services/{id}", get(dashboard::get_service))
        .route("/services/{id}/{action}", post(services::service_action))
        .route("/jobs", get(dashboard::list_jobs))
        .route("/jobs/{id}", get(dashboard::get_job))
        .route("/status", get(dashboard::get_status))
        .route("/gateway", get(dashboard::get_gateway))
        .route("/gateway/caddyfile", get(dashboard::get_caddyfile))
        .route("/gateway/reload", post(dashboard::reload_gateway))
        .route("/logs/{id}", get(logs::get_logs))
        .route(
            "/config",
            get(config_editor::get_config).put(config_editor::put_config),
        )
        .route("/config/apply", post(config_editor::apply_config))
        .route(
            "/config/{kind}/{id}",
            put(config_editor::put_entry).delete(config_editor::delete_entry),
        )
        .route("/secrets", get(secrets::list_secrets))
        .route(
            "/secrets/{name}",
            get(secrets::get_secret)
                .put(secrets::set_secret)
                .delete(secrets::delete_secret),
        )
        .route("/nodes", get(nodes::list_nodes))
        .route("/nodes/{hostname}", get(nodes::get_node))
        .route("/mesh/status", get(nodes::mesh_status))
        .route("/events/publish", post(events::publish))
        .route("/events/subscribe", post(events::subscribe))
        .route("/events/unsubscribe", post(events::unsubscribe))
        .route("/events/topics", get(events::list_topics))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
