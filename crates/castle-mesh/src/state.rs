//! Assembled cluster state.
//!
//! [`MeshState`] is the one shared write-through view in the system. The
//! coordinator's inbound task is the only writer; every other component
//! reads through snapshot-returning accessors so iteration never races a
//! broker message.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::payload::RegistryAnnouncement;

/// Peers whose last retained publish is older than this are stale.
pub const STALE_TTL: Duration = Duration::from_secs(300);

/// A remote node's announced registry and liveness metadata.
#[derive(Debug, Clone)]
pub struct RemoteNode {
    /// The peer's last announced registry.
    pub registry: RegistryAnnouncement,
    /// When the last announcement arrived (monotonic).
    pub last_seen: Instant,
    /// Whether the peer's retained status is `online`.
    pub online: bool,
}

impl RemoteNode {
    /// A freshly-announced node.
    #[must_use]
    pub fn new(registry: RegistryAnnouncement) -> Self {
        Self {
            registry,
            last_seen: Instant::now(),
            online: true,
        }
    }

    /// Whether the node's announcement has outlived the staleness TTL.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.last_seen.elapsed() > STALE_TTL
    }

    /// Age of the last announcement in whole seconds.
    #[must_use]
    pub fn last_seen_secs(&self) -> u64 {
        self.last_seen.elapsed().as_secs()
    }
}

/// Shared view of remote nodes discovered via the broker.
///
/// Cheap to clone; all clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MeshState {
    nodes: Arc<RwLock<HashMap<String, RemoteNode>>>,
}

impl MeshState {
    /// An empty mesh view.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a remote node's registry and mark it fresh and online.
    pub fn update_node(&self, hostname: &str, registry: RegistryAnnouncement) {
        let deployed = registry.deployed.len();
        if let Ok(mut nodes) = self.nodes.write() {
            nodes.insert(hostname.to_owned(), RemoteNode::new(registry));
        }
        info!(hostname, deployed, "mesh: updated node");
    }

    /// Mark a node offline (its last-will fired or it said goodbye).
    pub fn set_offline(&self, hostname: &str) {
        if let Ok(mut nodes) = self.nodes.write() {
            if let Some(node) = nodes.get_mut(hostname) {
                node.online = false;
                info!(hostname, "mesh: node went offline");
            }
        }
    }

    /// Remove a node entirely.
    pub fn remove_node(&self, hostname: &str) {
        if let Ok(mut nodes) = self.nodes.write() {
            if nodes.remove(hostname).is_some() {
                info!(hostname, "mesh: removed node");
            }
        }
    }

    /// Snapshot a specific remote node.
    #[must_use]
    pub fn get_node(&self, hostname: &str) -> Option<RemoteNode> {
        self.nodes.read().ok()?.get(hostname).cloned()
    }

    /// Snapshot all remote nodes, optionally filtering out stale ones.
    #[must_use]
    pub fn all_nodes(&self, include_stale: bool) -> HashMap<String, RemoteNode> {
        let Ok(nodes) = self.nodes.read() else {
            return HashMap::new();
        };
        nodes
            .iter()
            .filter(|(_, node)| include_stale || !node.is_stale())
            .map(|(hostname, node)| (hostname.clone(), node.clone()))
            .collect()
    }

    /// Drop stale nodes. Returns the pruned hostnames.
    pub fn prune_stale(&self) -> Vec<String> {
        let Ok(mut nodes) = self.nodes.write() else {
            return Vec::new();
        };
        let pruned: Vec<String> = nodes
            .iter()
            .filter(|(_, node)| node.is_stale())
            .map(|(hostname, _)| hostname.clone())
            .collect();
        for hostname in &pruned {
            nodes.remove(hostname);
            info!(hostname, "mesh: pruned stale node");
        }
        pruned
    }

    /// Count stale peers without mutating anything (used by the sweep).
    #[must_use]
    pub fn stale_count(&self) -> usize {
        self.nodes
            .read()
            .map_or(0, |nodes| nodes.values().filter(|n| n.is_stale()).count())
    }

    /// Number of known peers, stale or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.read().map_or(0, |nodes| nodes.len())
    }

    /// Whether no peers are known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn insert_with_age(&self, hostname: &str, registry: RegistryAnnouncement, age: Duration) {
        if let Ok(mut nodes) = self.nodes.write() {
            let mut node = RemoteNode::new(registry);
            if let Some(past) = Instant::now().checked_sub(age) {
                node.last_seen = past;
            }
            nodes.insert(hostname.to_owned(), node);
        }
    }
}

/// Log a debug line summarizing mesh liveness; the periodic sweep calls
/// this. Staleness never drops peers eagerly — only an explicit
/// [`MeshState::prune_stale`] does.
pub(crate) fn sweep(state: &MeshState) {
    let stale = state.stale_count();
    let total = state.len();
    debug!(total, stale, "mesh sweep");
}
