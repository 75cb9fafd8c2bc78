#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(unreachable_pub)]

//! Mesh coordination for Castle nodes.
//!
//! Nodes share a sanitized view of their registries over a retained-state
//! MQTT pub/sub layer:
//!
//! - `castle/<host>/registry` — retained JSON announcement of what the
//!   node deploys (never `env`, `run_cmd`, or `castle_root`).
//! - `castle/<host>/status` — retained `"online"`, with a broker-side
//!   last-will of `"offline"` covering unexpected drops.
//!
//! Each node is authoritative over its own topics; everyone else reads
//! the retained state snapshot-style. [`MeshState`] holds the assembled
//! cluster view, [`MeshCoordinator`] drives the broker connection, and
//! [`discovery`] adds advisory zero-config LAN discovery over mDNS.

/// The MQTT coordinator task.
pub mod coordinator;
/// Zero-config LAN discovery (mDNS).
pub mod discovery;
/// Mesh error types.
pub mod error;
/// Wire payloads and topic layout.
pub mod payload;
/// Assembled cluster state.
pub mod state;

pub use coordinator::{MeshCoordinator, MeshEvent, MeshOptions};
pub use discovery::{CastleDiscovery, PeerInfo};
pub use error::{MeshError, MeshResult};
pub use payload::{ComponentAnnouncement, NodeAnnouncement, RegistryAnnouncement};
pub use state::{MeshState, RemoteNode, STALE_TTL};
