//! Health checking and the periodic poll loop.
//!
//! Every deployed component with a port and a health path gets an HTTP
//! GET against `127.0.0.1` with a short timeout; 2xx means `up`,
//! everything else (including connect errors) means `down`. Checks fan
//! out concurrently so one hung service cannot delay the rest.

use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use castle_core::registry::NodeRegistry;

use crate::state::AppState;

/// Interval between poll rounds.
pub const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Per-request timeout for one health check.
pub const CHECK_TIMEOUT: Duration = Duration::from_secs(3);

/// One component's polled health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    /// Component id.
    pub id: String,
    /// `up` or `down`.
    pub status: String,
    /// Round-trip time, when a response (of any status) arrived.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl HealthStatus {
    /// A status forced from an external source of truth (no latency).
    #[must_use]
    pub fn forced(id: &str, up: bool) -> Self {
        Self {
            id: id.to_owned(),
            status: if up { "up" } else { "down" }.to_owned(),
            latency_ms: None,
        }
    }
}

/// Check every deployed component that exposes a health endpoint.
pub async fn check_all_health(
    client: &reqwest::Client,
    registry: &NodeRegistry,
) -> Vec<HealthStatus> {
    let targets: Vec<(String, String)> = registry
        .deployed
        .iter()
        .filter_map(|(name, deployed)| {
            let port = deployed.port?;
            let path = deployed.health_path.as_deref()?;
            Some((name.clone(), format!("http://127.0.0.1:{port}{path}")))
        })
        .collect();

    let checks = targets
        .into_iter()
        .map(|(name, url)| check_one(client, name, url));
    futures::future::join_all(checks).await
}

async fn check_one(client: &reqwest::Client, id: String, url: String) -> HealthStatus {
    let start = Instant::now();
    let outcome = client.get(&url).timeout(CHECK_TIMEOUT).send().await;
    let latency = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

    match outcome {
        Ok(response) if response.status().is_success() => HealthStatus {
            id,
            status: "up".to_owned(),
            latency_ms: Some(latency),
        },
        Ok(_) => HealthStatus {
            id,
            status: "down".to_owned(),
            latency_ms: Some(latency),
        },
        Err(_) => HealthStatus {
            id,
            status: "down".to_owned(),
            latency_ms: Some(latency),
        },
    }
}

/// The SSE payload for a health round.
#[must_use]
pub fn health_payload(statuses: &[HealthStatus]) -> serde_json::Value {
    json!({
        "statuses": statuses,
        "timestamp": chrono::Utc::now().timestamp(),
    })
}

/// Background loop: poll and broadcast every [`POLL_INTERVAL`].
///
/// Runs until the task is aborted at shutdown. A node without a compiled
/// registry just skips rounds.
pub async fn poll_loop(state: AppState) {
    loop {
        match state.registry() {
            Ok(registry) => {
                let statuses = check_all_health(&state.http, &registry).await;
                state.broadcaster.broadcast("health", &health_payload(&statuses));
                debug!(checked = statuses.len(), "health poll round");
            },
            Err(e) => warn!(error = %e, "health poll skipped"),
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Poll health, but take `name`'s status from systemd's answer instead of
/// the HTTP probe — the source of truth for a state that just transitioned.
pub async fn broadcast_with_override(state: &AppState, name: &str, unit_active: bool) {
    let mut statuses = match state.registry() {
        Ok(registry) => check_all_health(&state.http, &registry).await,
        Err(_) => Vec::new(),
    };

    let forced = HealthStatus::forced(name, unit_active);
    if let Some(existing) = statuses.iter_mut().find(|s| s.id == name) {
        *existing = forced;
    } else {
        statuses.push(forced);
    }

    state.broadcaster.broadcast("health", &health_payload(&statuses));
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::*;
    use castle_core::registry::{Behavior, DeployedComponent, NodeConfig, Runner};

    fn registry_with(port: Option<u16>, health_path: Option<&str>) -> NodeRegistry {
        let mut deployed = IndexMap::new();
        deployed.insert(
            "svc".to_owned(),
            DeployedComponent {
                runner: Runner::Python,
                run_cmd: vec!["svc".into()],
                env: IndexMap::new(),
                description: None,
                behavior: Behavior::Daemon,
                stack: None,
                port,
                health_path: health_path.map(str::to_owned),
                proxy_path: None,
                schedule: None,
                managed: true,
            },
        );
        NodeRegistry {
            node: NodeConfig {
                hostname: "keep".into(),
                castle_root: None,
                gateway_port: 9000,
            },
            deployed,
        }
    }

    #[tokio::test]
    async fn test_components_without_endpoint_skipped() {
        let client = reqwest::Client::new();
        let statuses = check_all_health(&client, &registry_with(None, None)).await;
        assert!(statuses.is_empty());

        let statuses = check_all_health(&client, &registry_with(Some(9001), None)).await;
        assert!(statuses.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_down() {
        // Port 9 (discard) on localhost is almost certainly closed; a
        // refused connection must read as "down", not an error.
        let client = reqwest::Client::new();
        let statuses = check_all_health(&client, &registry_with(Some(9), Some("/health"))).await;
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].id, "svc");
        assert_eq!(statuses[0].status, "down");
    }

    #[tokio::test]
    async fn test_live_endpoint_is_up() {
        use tokio::io::AsyncWriteExt;

        // A minimal HTTP responder on an ephemeral port.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0_u8; 1024];
                let _ = tokio::io::AsyncReadExt::read(&mut socket, &mut buf).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nok")
                    .await;
            }
        });

        let client = reqwest::Client::new();
        let statuses =
            check_all_health(&client, &registry_with(Some(port), Some("/health"))).await;
        assert_eq!(statuses[0].status, "up");
        assert!(statuses[0].latency_ms.is_some());
    }

    #[test]
    fn test_health_payload_shape() {
        let payload = health_payload(&[HealthStatus::forced("svc", true)]);
        assert_eq!(payload["statuses"][0]["id"], "svc");
        assert_eq!(payload["statuses"][0]["status"], "up");
        assert!(payload["timestamp"].is_i64());
    }

    #[tokio::test]
    async fn test_override_beats_probe_result() {
        use crate::settings::ApiSettings;
        use castle_core::CastleHome;
        use castle_core::registry::save_registry;

        let dir = tempfile::tempdir().unwrap();
        let home = CastleHome::from_path(dir.path());
        home.ensure().unwrap();
        // Nothing listens on the probe port, so the poll alone would say
        // "down" — but systemd just reported the unit active.
        save_registry(&registry_with(Some(9), Some("/health")), &home.registry_path()).unwrap();

        let state = crate::state::AppState::new(ApiSettings::default(), home, None);
        let mut rx = state.broadcaster.subscribe();

        broadcast_with_override(&state, "svc", true).await;

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.event, "health");
        let payload: serde_json::Value = serde_json::from_str(&frame.data).unwrap();
        let svc = payload["statuses"]
            .as_array()
            .unwrap()
            .iter()
            .find(|s| s["id"] == "svc")
            .unwrap();
        assert_eq!(svc["status"], "up");
        assert!(svc.get("latency_ms").is_none(), "forced status has no probe latency");
    }
}
