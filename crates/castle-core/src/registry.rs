//! Node registry types and persistence.
//!
//! The registry (`~/.castle/registry.yaml`) records what is deployed on
//! this node with every runtime detail resolved: command lines point at
//! absolute binaries, environment maps have secrets substituted, ports and
//! schedules are concrete. It is regenerated wholesale on every compile
//! and written atomically so readers see either the old file or the new
//! one, never a torn write.

use std::fmt;
use std::io::Write as _;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::error::{CastleError, CastleResult};
use crate::manifest::EnvMap;

pub use crate::manifest::Runner;

/// Per-node identity and settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// This node's hostname.
    #[serde(default)]
    pub hostname: String,
    /// Catalog repo path, present only on nodes that carry the repo.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub castle_root: Option<String>,
    /// Gateway listen port.
    #[serde(default = "default_gateway_port")]
    pub gateway_port: u16,
}

fn default_gateway_port() -> u16 {
    9000
}

impl NodeConfig {
    /// Node config for this machine, hostname taken from the OS.
    #[must_use]
    pub fn local(castle_root: Option<String>, gateway_port: u16) -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_default();
        Self {
            hostname,
            castle_root,
            gateway_port,
        }
    }
}

/// Whether a deployment runs continuously or to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// A long-running daemon.
    Daemon,
    /// A run-to-completion task.
    Tool,
}

impl Behavior {
    /// The wire/registry string for this behavior.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daemon => "daemon",
            Self::Tool => "tool",
        }
    }
}

impl fmt::Display for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Behavior {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Registries written before the `behavior` rename carry `category`
/// values; both vocabularies map onto the two behaviors.
impl<'de> Deserialize<'de> for Behavior {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            "daemon" | "service" => Ok(Self::Daemon),
            "tool" | "job" => Ok(Self::Tool),
            other => Err(serde::de::Error::custom(format!(
                "unknown behavior '{other}'"
            ))),
        }
    }
}

/// A component deployed on this node, with fully-resolved runtime config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployedComponent {
    /// Runner kind.
    pub runner: Runner,
    /// Fully resolved command line; empty for remote deployments.
    #[serde(default)]
    pub run_cmd: Vec<String>,
    /// Resolved environment (conventions merged, secrets substituted).
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub env: EnvMap,
    /// Human description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Daemon or tool.
    #[serde(alias = "category")]
    pub behavior: Behavior,
    /// Scaffold stack inherited from the referenced program.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    /// Internal HTTP port, if exposed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Health endpoint path, if exposed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_path: Option<String>,
    /// Gateway route prefix, if proxied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_path: Option<String>,
    /// Five-field cron schedule, for jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    /// Whether a systemd unit owns this deployment's lifecycle.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub managed: bool,
}

impl DeployedComponent {
    /// The systemd unit name, if this deployment is managed.
    #[must_use]
    pub fn unit_name(&self, id: &str) -> Option<String> {
        self.managed.then(|| crate::generators::unit_name(id))
    }
}

/// What is deployed on this node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRegistry {
    /// Node identity.
    pub node: NodeConfig,
    /// Deployed components by id.
    #[serde(default)]
    pub deployed: IndexMap<String, DeployedComponent>,
}

impl NodeRegistry {
    /// An empty registry for `node`.
    #[must_use]
    pub fn new(node: NodeConfig) -> Self {
        Self {
            node,
            deployed: IndexMap::new(),
        }
    }
}

/// Load the node registry from `path`.
///
/// # Errors
///
/// Returns an I/O error (with the path) if the file is missing or
/// unreadable, and a YAML error if it does not parse.
pub fn load_registry(path: &Path) -> CastleResult<NodeRegistry> {
    let text = std::fs::read_to_string(path).map_err(|e| CastleError::io(path, e))?;
    let registry: NodeRegistry =
        serde_yaml::from_str(&text).map_err(|e| CastleError::yaml(path, e))?;
    Ok(registry)
}

/// Write the node registry to `path` atomically.
///
/// The registry is written to a temporary file in the same directory,
/// fsynced, then renamed over the destination.
///
/// # Errors
///
/// Returns an error if serialization or any filesystem step fails.
pub fn save_registry(registry: &NodeRegistry, path: &Path) -> CastleResult<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|e| CastleError::io(parent, e))?;

    let text = serde_yaml::to_string(registry).map_err(|e| CastleError::yaml(path, e))?;

    let mut tmp =
        tempfile::NamedTempFile::new_in(parent).map_err(|e| CastleError::io(parent, e))?;
    tmp.write_all(text.as_bytes())
        .map_err(|e| CastleError::io(tmp.path().to_path_buf(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| CastleError::io(tmp.path().to_path_buf(), e))?;
    tmp.persist(path)
        .map_err(|e| CastleError::io(path, e.error))?;

    debug!(path = %path.display(), deployed = registry.deployed.len(), "wrote registry");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_registry() -> NodeRegistry {
        let mut deployed = IndexMap::new();
        deployed.insert(
            "api".to_owned(),
            DeployedComponent {
                runner: Runner::Python,
                run_cmd: vec!["/usr/local/bin/api".into()],
                env: [("API_PORT".to_owned(), "9001".to_owned())]
                    .into_iter()
                    .collect(),
                description: Some("Castle API".into()),
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
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.yaml");
        let registry = sample_registry();
        save_registry(&registry, &path).unwrap();
        let loaded = load_registry(&path).unwrap();
        assert_eq!(loaded, registry);
    }

    #[test]
    fn test_save_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("registry.yaml");
        save_registry(&sample_registry(), &path).unwrap();
        assert!(path.is_file());
    }

    #[test]
    fn test_load_missing_carries_path() {
        let err = load_registry(Path::new("/nonexistent/registry.yaml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/registry.yaml"));
    }

    #[test]
    fn test_legacy_category_maps_to_behavior() {
        let yaml = "\
node:
  hostname: old
  gateway_port: 9000
deployed:
  backup:
    runner: command
    run_cmd: [backup]
    category: job
    managed: true
  web:
    runner: python
    run_cmd: [web]
    category: service
";
        let registry: NodeRegistry = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(registry.deployed["backup"].behavior, Behavior::Tool);
        assert_eq!(registry.deployed["web"].behavior, Behavior::Daemon);
    }

    #[test]
    fn test_unmanaged_omitted_from_yaml() {
        let mut registry = sample_registry();
        registry.deployed["api"].managed = false;
        registry.deployed["api"].env.clear();
        let text = serde_yaml::to_string(&registry).unwrap();
        assert!(!text.contains("managed"));
        assert!(!text.contains("env"));
    }

    #[test]
    fn test_unit_name_only_when_managed() {
        let registry = sample_registry();
        let api = &registry.deployed["api"];
        assert_eq!(api.unit_name("api").as_deref(), Some("castle-api.service"));

        let mut unmanaged = api.clone();
        unmanaged.managed = false;
        assert_eq!(unmanaged.unit_name("api"), None);
    }
}
