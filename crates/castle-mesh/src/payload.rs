//! Wire payloads and topic layout.
//!
//! The announcement types are deliberately narrower than the registry
//! types they mirror: there is no field for `env`, `run_cmd`, or
//! `castle_root`, so secrets and host-private paths cannot leak into a
//! retained broker message no matter what the publisher holds.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use castle_core::registry::{DeployedComponent, NodeRegistry};

/// Topic prefix for all castle mesh traffic.
pub const TOPIC_PREFIX: &str = "castle";

/// The retained registry topic for a host.
#[must_use]
pub fn registry_topic(hostname: &str) -> String {
    format!("{TOPIC_PREFIX}/{hostname}/registry")
}

/// The retained status topic for a host.
#[must_use]
pub fn status_topic(hostname: &str) -> String {
    format!("{TOPIC_PREFIX}/{hostname}/status")
}

/// What a mesh message is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// A registry announcement.
    Registry,
    /// An online/offline status flag.
    Status,
}

/// Parse `castle/<host>/<kind>` into its parts. Returns `None` for any
/// topic outside the castle namespace.
#[must_use]
pub fn parse_topic(topic: &str) -> Option<(&str, MessageKind)> {
    let mut parts = topic.split('/');
    if parts.next() != Some(TOPIC_PREFIX) {
        return None;
    }
    let hostname = parts.next()?;
    let kind = match parts.next()? {
        "registry" => MessageKind::Registry,
        "status" => MessageKind::Status,
        _ => return None,
    };
    if parts.next().is_some() || hostname.is_empty() {
        return None;
    }
    Some((hostname, kind))
}

/// Node identity as shared over the mesh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAnnouncement {
    /// The node's hostname.
    pub hostname: String,
    /// The node's gateway port.
    #[serde(default = "default_gateway_port")]
    pub gateway_port: u16,
}

fn default_gateway_port() -> u16 {
    9000
}

/// One deployed component as shared over the mesh — routing metadata only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentAnnouncement {
    /// Runner kind. Kept as a string so a newer peer's runner does not
    /// break parsing here.
    pub runner: String,
    /// `daemon` or `tool`.
    #[serde(default = "default_behavior", alias = "category")]
    pub behavior: String,
    /// Scaffold stack.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    /// Human description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Internal HTTP port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Health endpoint path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_path: Option<String>,
    /// Gateway route prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_path: Option<String>,
    /// Cron schedule, for jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    /// Whether systemd owns the deployment.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub managed: bool,
}

fn default_behavior() -> String {
    "daemon".to_owned()
}

impl From<&DeployedComponent> for ComponentAnnouncement {
    fn from(deployed: &DeployedComponent) -> Self {
        Self {
            runner: deployed.runner.to_string(),
            behavior: deployed.behavior.to_string(),
            stack: deployed.stack.clone(),
            description: deployed.description.clone(),
            port: deployed.port,
            health_path: deployed.health_path.clone(),
            proxy_path: deployed.proxy_path.clone(),
            schedule: deployed.schedule.clone(),
            managed: deployed.managed,
        }
    }
}

/// A node's sanitized registry as shared over the mesh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryAnnouncement {
    /// Node identity.
    pub node: NodeAnnouncement,
    /// Deployed components by id.
    #[serde(default)]
    pub deployed: IndexMap<String, ComponentAnnouncement>,
}

impl From<&NodeRegistry> for RegistryAnnouncement {
    fn from(registry: &NodeRegistry) -> Self {
        Self {
            node: NodeAnnouncement {
                hostname: registry.node.hostname.clone(),
                gateway_port: registry.node.gateway_port,
            },
            deployed: registry
                .deployed
                .iter()
                .map(|(name, deployed)| (name.clone(), ComponentAnnouncement::from(deployed)))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::*;
    use castle_core::registry::{Behavior, NodeConfig, Runner};

    fn sample_registry() -> NodeRegistry {
        let mut deployed = IndexMap::new();
        deployed.insert(
            "api".to_owned(),
            DeployedComponent {
                runner: Runner::Python,
                run_cmd: vec!["/usr/local/bin/api".into(), "--secret-flag".into()],
                env: [("API_KEY".to_owned(), "hunter2".to_owned())]
                    .into_iter()
                    .collect(),
                description: Some("api".into()),
                behavior: Behavior::Daemon,
                stack: Some("python-fastapi".into()),
                port: Some(9001),
                health_path: Some("/health".into()),
                proxy_path: Some("/api".into()),
                schedule: None,
                managed: true,
            },
        );
        NodeRegistry {
            node: NodeConfig {
                hostname: "keep".into(),
                castle_root: Some("/data/repos/castle".into()),
                gateway_port: 9000,
            },
            deployed,
        }
    }

    #[test]
    fn test_topic_helpers() {
        assert_eq!(registry_topic("keep"), "castle/keep/registry");
        assert_eq!(status_topic("keep"), "castle/keep/status");
    }

    #[test]
    fn test_parse_topic() {
        assert_eq!(
            parse_topic("castle/keep/registry"),
            Some(("keep", MessageKind::Registry))
        );
        assert_eq!(
            parse_topic("castle/den/status"),
            Some(("den", MessageKind::Status))
        );
        assert_eq!(parse_topic("castle/keep/other"), None);
        assert_eq!(parse_topic("castle/keep"), None);
        assert_eq!(parse_topic("castle/keep/registry/extra"), None);
        assert_eq!(parse_topic("zigbee/keep/registry"), None);
        assert_eq!(parse_topic("castle//registry"), None);
    }

    #[test]
    fn test_announcement_strips_private_fields() {
        let announcement = RegistryAnnouncement::from(&sample_registry());
        let json = serde_json::to_string(&announcement).unwrap();

        // The published payload must never carry secrets or private paths,
        // at any nesting level.
        assert!(!json.contains("env"));
        assert!(!json.contains("run_cmd"));
        assert!(!json.contains("castle_root"));
        assert!(!json.contains("hunter2"));
        assert!(!json.contains("--secret-flag"));
        assert!(!json.contains("/data/repos/castle"));

        // Routing metadata survives.
        assert!(json.contains("\"proxy_path\":\"/api\""));
        assert!(json.contains("\"port\":9001"));
        assert!(json.contains("\"behavior\":\"daemon\""));
    }

    #[test]
    fn test_announcement_roundtrip() {
        let announcement = RegistryAnnouncement::from(&sample_registry());
        let json = serde_json::to_vec(&announcement).unwrap();
        let parsed: RegistryAnnouncement = serde_json::from_slice(&json).unwrap();
        assert_eq!(parsed, announcement);
    }

    #[test]
    fn test_legacy_category_accepted() {
        let json = r#"{"node":{"hostname":"old"},"deployed":{"svc":{"runner":"python","category":"service"}}}"#;
        let parsed: RegistryAnnouncement = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.deployed["svc"].behavior, "service");
        assert_eq!(parsed.node.gateway_port, 9000);
    }

    #[test]
    fn test_unknown_runner_string_tolerated() {
        let json = r#"{"node":{"hostname":"new"},"deployed":{"x":{"runner":"wasm","behavior":"daemon","port":9100,"proxy_path":"/x"}}}"#;
        let parsed: RegistryAnnouncement = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.deployed["x"].runner, "wasm");
    }
}
