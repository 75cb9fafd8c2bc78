#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(unreachable_pub)]

//! Castle node daemon — HTTP API, SSE stream, and health poller.
//!
//! `castled` is the read-mostly surface over a node's compiled state: it
//! serves catalog/registry/mesh views, executes service control actions
//! against the systemd user instance, tails journals, and fans an
//! append-only event stream (health polls, service action results, mesh
//! membership changes) out to SSE subscribers with back-pressure-safe
//! per-client queues.
//!
//! Views are assembled from at most three sources — the local registry,
//! the catalog (when the repo is present on this node), and the mesh
//! state — with deployed state winning over catalog defaults on the same
//! id, and local state winning over remote.

/// Webhook event bus (publish/subscribe collaborator surface).
pub mod bus;
/// API error types and their HTTP mapping.
pub mod error;
/// Health checking and the periodic poll loop.
pub mod health;
/// HTTP route handlers.
pub mod routes;
/// Runtime settings from the environment.
pub mod settings;
/// Shared request state.
pub mod state;
/// SSE broadcast plumbing.
pub mod stream;
/// systemd and journalctl subprocess wrappers.
pub mod systemd_ctl;

pub use error::{ApiError, ApiResult};
pub use settings::ApiSettings;
pub use state::AppState;
pub use stream::Broadcaster;
