//! Mesh views — nodes and coordination status.

use axum::Json;
use axum::extract::{Path, State};
use serde::Serialize;

use castle_core::CastleError;
use castle_core::registry::NodeRegistry;
use castle_mesh::RemoteNode;

use crate::error::ApiResult;
use crate::routes::models::ComponentSummary;
use crate::state::AppState;

/// One known node.
#[derive(Debug, Serialize)]
pub struct NodeSummary {
    /// The node's hostname.
    pub hostname: String,
    /// The node's gateway port.
    pub gateway_port: u16,
    /// Total deployed components.
    pub deployed_count: usize,
    /// Components exposing a port.
    pub service_count: usize,
    /// Whether this is the local node.
    pub is_local: bool,
    /// Last known liveness.
    pub online: bool,
    /// Whether the last announcement outlived the staleness TTL.
    pub is_stale: bool,
    /// Seconds since the last announcement, for remote nodes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen_secs: Option<u64>,
}

/// A node plus its deployed components.
#[derive(Debug, Serialize)]
pub struct NodeDetail {
    /// Node summary fields.
    #[serde(flatten)]
    pub summary: NodeSummary,
    /// What the node deploys.
    pub deployed: Vec<ComponentSummary>,
}

/// Mesh coordination status.
#[derive(Debug, Serialize)]
pub struct MeshStatus {
    /// Whether mesh coordination is enabled at all.
    pub enabled: bool,
    /// Whether the broker connection is up.
    pub mqtt_connected: bool,
    /// Broker host, when a coordinator runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mqtt_broker_host: Option<String>,
    /// Broker port, when a coordinator runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mqtt_broker_port: Option<u16>,
    /// Whether mDNS runs.
    pub mdns_enabled: bool,
    /// Number of known peers (stale included).
    pub peer_count: usize,
    /// Known peer hostnames.
    pub peers: Vec<String>,
}

fn local_summary(registry: &NodeRegistry) -> NodeSummary {
    NodeSummary {
        hostname: registry.node.hostname.clone(),
        gateway_port: registry.node.gateway_port,
        deployed_count: registry.deployed.len(),
        service_count: registry
            .deployed
            .values()
            .filter(|d| d.port.is_some())
            .count(),
        is_local: true,
        online: true,
        is_stale: false,
        last_seen_secs: None,
    }
}

fn remote_summary(hostname: &str, remote: &RemoteNode) -> NodeSummary {
    NodeSummary {
        hostname: hostname.to_owned(),
        gateway_port: remote.registry.node.gateway_port,
        deployed_count: remote.registry.deployed.len(),
        service_count: remote
            .registry
            .deployed
            .values()
            .filter(|d| d.port.is_some())
            .count(),
        is_local: false,
        online: remote.online,
        is_stale: remote.is_stale(),
        last_seen_secs: Some(remote.last_seen_secs()),
    }
}

/// `GET /nodes` — the local node plus every discovered remote, stale
/// included (staleness is reported, never used to hide a peer here).
pub async fn list_nodes(State(state): State<AppState>) -> ApiResult<Json<Vec<NodeSummary>>> {
    let mut nodes = Vec::new();
    if let Ok(registry) = state.registry() {
        nodes.push(local_summary(&registry));
    }

    let mut remotes: Vec<(String, RemoteNode)> = state.mesh.all_nodes(true).into_iter().collect();
    remotes.sort_by(|a, b| a.0.cmp(&b.0));
    for (hostname, remote) in &remotes {
        nodes.push(remote_summary(hostname, remote));
    }

    Ok(Json(nodes))
}

/// `GET /nodes/{hostname}`.
pub async fn get_node(
    State(state): State<AppState>,
    Path(hostname): Path<String>,
) -> ApiResult<Json<NodeDetail>> {
    if let Ok(registry) = state.registry() {
        if registry.node.hostname == hostname {
            let deployed = registry
                .deployed
                .iter()
                .map(|(id, d)| ComponentSummary::from_deployed(id, d, Some(&hostname)))
                .collect();
            return Ok(Json(NodeDetail {
                summary: local_summary(&registry),
                deployed,
            }));
        }
    }

    let remote = state.mesh.get_node(&hostname).ok_or(CastleError::NotFound {
        kind: "node",
        name: hostname.clone(),
    })?;
    let deployed = remote
        .registry
        .deployed
        .iter()
        .map(|(id, component)| ComponentSummary::from_announcement(id, component, &hostname))
        .collect();
    Ok(Json(NodeDetail {
        summary: remote_summary(&hostname, &remote),
        deployed,
    }))
}

/// `GET /mesh/status`.
pub async fn mesh_status(State(state): State<AppState>) -> Json<MeshStatus> {
    let mut peers: Vec<String> = state.mesh.all_nodes(true).into_keys().collect();
    peers.sort();

    Json(MeshStatus {
        enabled: state.settings.mqtt_enabled,
        mqtt_connected: state.coordinator.as_ref().is_some_and(|c| c.connected()),
        mqtt_broker_host: state
            .coordinator
            .as_ref()
            .map(|c| c.broker_host().to_owned()),
        mqtt_broker_port: state.coordinator.as_ref().map(|c| c.broker_port()),
        mdns_enabled: state.settings.mdns_enabled,
        peer_count: peers.len(),
        peers,
    })
}
