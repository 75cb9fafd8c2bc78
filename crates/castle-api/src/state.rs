//! Shared request state.
//!
//! One [`AppState`] is built at startup and cloned into every handler.
//! The former process-wide singletons (mesh state, event bus, SSE
//! subscriber list) live here as explicitly constructed objects.

use std::path::PathBuf;
use std::sync::Arc;

use castle_core::generators::RemoteRoute;
use castle_core::registry::{NodeRegistry, load_registry};
use castle_core::{CastleConfig, CastleError, CastleHome};
use castle_mesh::{CastleDiscovery, MeshCoordinator, MeshState};

use crate::bus::EventBus;
use crate::error::ApiResult;
use crate::settings::ApiSettings;
use crate::stream::Broadcaster;

/// Shared state threaded through every request.
#[derive(Clone)]
pub struct AppState {
    /// Daemon settings.
    pub settings: ApiSettings,
    /// The `~/.castle` layout.
    pub home: CastleHome,
    /// Catalog root, when the repo is present on this node.
    pub castle_root: Option<PathBuf>,
    /// SSE fan-out hub.
    pub broadcaster: Broadcaster,
    /// Webhook event bus.
    pub bus: EventBus,
    /// Assembled mesh view.
    pub mesh: MeshState,
    /// Broker coordinator, when the mesh is enabled.
    pub coordinator: Option<Arc<MeshCoordinator>>,
    /// mDNS discovery, when enabled.
    pub discovery: Option<Arc<CastleDiscovery>>,
    /// Shared HTTP client (health checks, event-bus delivery).
    pub http: reqwest::Client,
}

impl AppState {
    /// State with no mesh components attached (they are wired in at
    /// startup once the coordinator is up).
    #[must_use]
    pub fn new(settings: ApiSettings, home: CastleHome, castle_root: Option<PathBuf>) -> Self {
        Self {
            settings,
            home,
            castle_root,
            broadcaster: Broadcaster::new(),
            bus: EventBus::new(),
            mesh: MeshState::new(),
            coordinator: None,
            discovery: None,
            http: reqwest::Client::new(),
        }
    }

    /// Load the node registry from disk.
    ///
    /// # Errors
    ///
    /// Propagates the core error (missing file, parse failure).
    pub fn registry(&self) -> ApiResult<NodeRegistry> {
        Ok(load_registry(&self.home.registry_path())?)
    }

    /// Load the catalog, failing with `RepoUnavailable` on repo-less nodes.
    ///
    /// # Errors
    ///
    /// [`CastleError::RepoUnavailable`] when this node has no catalog;
    /// otherwise whatever catalog load raises.
    pub fn config(&self) -> ApiResult<CastleConfig> {
        let root = self
            .castle_root
            .as_deref()
            .ok_or(CastleError::RepoUnavailable)?;
        Ok(CastleConfig::load(root)?)
    }

    /// Proxy routes advertised by live (non-stale) peers, for gateway
    /// generation. Local claims are filtered later by the generator.
    #[must_use]
    pub fn remote_routes(&self) -> Vec<RemoteRoute> {
        let mut routes = Vec::new();
        for (hostname, node) in self.mesh.all_nodes(false) {
            if !node.online {
                continue;
            }
            for component in node.registry.deployed.values() {
                if let (Some(path), Some(port)) = (&component.proxy_path, component.port) {
                    routes.push(RemoteRoute {
                        hostname: hostname.clone(),
                        proxy_path: path.clone(),
                        port,
                    });
                }
            }
        }
        routes
    }
}
