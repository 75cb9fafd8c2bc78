//! `castled` — the Castle node daemon.
//!
//! Serves the dashboard API and SSE stream, polls deployment health, and
//! (when enabled) joins the mesh: MQTT coordination plus mDNS discovery.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use castle_core::registry::{NodeConfig, NodeRegistry, load_registry};
use castle_core::{CastleHome, find_castle_root};
use castle_mesh::{CastleDiscovery, MeshCoordinator, MeshEvent, MeshOptions};

use castle_api::routes;
use castle_api::state::AppState;
use castle_api::{ApiSettings, health};

/// Castle node daemon — dashboard API and mesh coordination.
#[derive(Parser)]
#[command(name = "castled")]
#[command(author, version, about = "Castle node daemon")]
struct Args {
    /// Listen host (overrides CASTLE_API_HOST).
    #[arg(long)]
    host: Option<String>,

    /// Listen port (overrides CASTLE_API_PORT).
    #[arg(long)]
    port: Option<u16>,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut settings = ApiSettings::from_env();
    if let Some(host) = args.host {
        settings.host = host;
    }
    if let Some(port) = args.port {
        settings.port = port;
    }

    let home = CastleHome::resolve().context("resolving castle home")?;
    home.ensure().context("creating castle home directories")?;

    // The catalog repo is optional — worker nodes run from the registry
    // alone and serve 503 on catalog endpoints.
    let castle_root = find_castle_root().ok();
    match &castle_root {
        Some(root) => info!(root = %root.display(), "catalog repo found"),
        None => info!("no catalog repo on this node, registry-only mode"),
    }

    let mut state = AppState::new(settings.clone(), home.clone(), castle_root);

    // Registry for the mesh announcement; a node that has not compiled
    // yet announces an empty one.
    let registry = load_registry(&home.registry_path()).unwrap_or_else(|_| {
        NodeRegistry::new(NodeConfig::local(None, 9000))
    });
    let hostname = registry.node.hostname.clone();

    // --- Mesh coordination (opt-out via env) ---
    let (mesh_events_tx, mut mesh_events_rx) = tokio::sync::mpsc::unbounded_channel();

    if settings.mqtt_enabled {
        let coordinator = MeshCoordinator::start(
            MeshOptions {
                hostname: hostname.clone(),
                broker_host: settings.mqtt_host.clone(),
                broker_port: settings.mqtt_port,
            },
            &registry,
            state.mesh.clone(),
            mesh_events_tx,
        );
        state.coordinator = Some(Arc::new(coordinator));
    }

    if settings.mdns_enabled {
        match CastleDiscovery::start(&hostname, registry.node.gateway_port, settings.port) {
            Ok(discovery) => state.discovery = Some(Arc::new(discovery)),
            Err(e) => warn!(error = %e, "mdns discovery unavailable"),
        }
    }

    // Bridge mesh membership changes onto the SSE stream.
    let bridge_broadcaster = state.broadcaster.clone();
    let bridge = tokio::spawn(async move {
        while let Some(event) = mesh_events_rx.recv().await {
            let payload = match event {
                MeshEvent::NodeUpdated { hostname } => {
                    serde_json::json!({"event": "node_updated", "hostname": hostname})
                },
                MeshEvent::NodeOffline { hostname } => {
                    serde_json::json!({"event": "node_offline", "hostname": hostname})
                },
            };
            bridge_broadcaster.broadcast("mesh", &payload);
        }
    });

    let poller = tokio::spawn(health::poll_loop(state.clone()));

    let app = routes::router(state.clone());
    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot bind listen address {addr}"))?;
    info!(%addr, "castled listening");

    // On the shutdown signal, release SSE subscribers right away — their
    // open streams end once the queues close, letting the server drain.
    let shutdown_broadcaster = state.broadcaster.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown_broadcaster.close_all();
        })
        .await
        .context("server error")?;

    info!("shutting down");

    poller.abort();
    bridge.abort();

    if let Some(coordinator) = &state.coordinator {
        coordinator.stop().await;
    }
    if let Some(discovery) = &state.discovery {
        discovery.stop().await;
    }

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        warn!("failed to install ctrl-c handler");
    }
}
