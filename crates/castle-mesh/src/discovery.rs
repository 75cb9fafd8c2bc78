//! Zero-config LAN discovery over mDNS.
//!
//! Each node advertises `_castle._tcp.local.` on its gateway port with
//! TXT records naming its hostname and ports, and browses for peer nodes
//! and an `_mqtt._tcp.local.` broker. Discovery is strictly advisory: it
//! suggests which broker to dial and which peers exist, but registries
//! only ever arrive via the broker.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{MeshError, MeshResult};

/// Service type advertised and browsed for peer nodes.
pub const CASTLE_SERVICE_TYPE: &str = "_castle._tcp.local.";

/// Service type browsed to auto-locate an MQTT broker.
pub const MQTT_SERVICE_TYPE: &str = "_mqtt._tcp.local.";

/// A peer node discovered on the LAN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    /// The peer's gateway port.
    pub gateway_port: u16,
    /// The peer's API port.
    pub api_port: u16,
    /// Addresses the peer resolved to.
    pub addresses: Vec<IpAddr>,
}

/// Advertises this node and collects discovered peers and brokers.
pub struct CastleDiscovery {
    hostname: String,
    daemon: ServiceDaemon,
    fullname: String,
    peers: Arc<RwLock<HashMap<String, PeerInfo>>>,
    broker: Arc<RwLock<Option<(String, u16)>>>,
    cancel: CancellationToken,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl CastleDiscovery {
    /// Start advertising and browsing.
    ///
    /// # Errors
    ///
    /// Returns an error if the mDNS daemon cannot start, the service
    /// cannot be registered, or a browse cannot begin.
    pub fn start(hostname: &str, gateway_port: u16, api_port: u16) -> MeshResult<Self> {
        let daemon = ServiceDaemon::new().map_err(|e| MeshError::Discovery(e.to_string()))?;

        let mut properties = HashMap::new();
        properties.insert("hostname".to_owned(), hostname.to_owned());
        properties.insert("gateway_port".to_owned(), gateway_port.to_string());
        properties.insert("api_port".to_owned(), api_port.to_string());

        let service = ServiceInfo::new(
            CASTLE_SERVICE_TYPE,
            hostname,
            &format!("{hostname}.local."),
            "",
            gateway_port,
            properties,
        )
        .map_err(|e| MeshError::Discovery(e.to_string()))?
        .enable_addr_auto();
        let fullname = service.get_fullname().to_owned();

        daemon
            .register(service)
            .map_err(|e| MeshError::Discovery(e.to_string()))?;
        info!(hostname, gateway_port, "mdns: advertising castle service");

        let peers = Arc::new(RwLock::new(HashMap::new()));
        let broker = Arc::new(RwLock::new(None));
        let cancel = CancellationToken::new();

        let peer_events = daemon
            .browse(CASTLE_SERVICE_TYPE)
            .map_err(|e| MeshError::Discovery(e.to_string()))?;
        let broker_events = daemon
            .browse(MQTT_SERVICE_TYPE)
            .map_err(|e| MeshError::Discovery(e.to_string()))?;

        let peer_task = tokio::spawn(watch_peers(
            peer_events,
            hostname.to_owned(),
            Arc::clone(&peers),
            cancel.clone(),
        ));
        let broker_task = tokio::spawn(watch_broker(
            broker_events,
            Arc::clone(&broker),
            cancel.clone(),
        ));

        Ok(Self {
            hostname: hostname.to_owned(),
            daemon,
            fullname,
            peers,
            broker,
            cancel,
            tasks: std::sync::Mutex::new(vec![peer_task, broker_task]),
        })
    }

    /// Snapshot of discovered peers (never includes this node).
    #[must_use]
    pub fn peers(&self) -> HashMap<String, PeerInfo> {
        self.peers
            .read()
            .map_or_else(|_| HashMap::new(), |peers| peers.clone())
    }

    /// The discovered MQTT broker, if any.
    #[must_use]
    pub fn broker(&self) -> Option<(String, u16)> {
        self.broker.read().ok().and_then(|b| b.clone())
    }

    /// This node's advertised hostname.
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Unregister the advertisement and stop browsing.
    pub async fn stop(&self) {
        if let Err(e) = self.daemon.unregister(&self.fullname) {
            debug!(error = %e, "mdns unregister failed");
        }
        self.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = match self.tasks.lock() {
            Ok(mut guard) => guard.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for task in tasks {
            if tokio::time::timeout(Duration::from_secs(2), task)
                .await
                .is_err()
            {
                warn!("mdns task did not stop within the deadline");
            }
        }
        if let Err(e) = self.daemon.shutdown() {
            debug!(error = %e, "mdns shutdown failed");
        }
        info!("mdns: stopped");
    }
}

async fn watch_peers(
    events: mdns_sd::Receiver<ServiceEvent>,
    local_hostname: String,
    peers: Arc<RwLock<HashMap<String, PeerInfo>>>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            event = events.recv_async() => match event {
                Ok(event) => event,
                Err(_) => break,
            },
        };

        match event {
            ServiceEvent::ServiceResolved(service) => {
                let Some(hostname) = service.get_property_val_str("hostname") else {
                    continue;
                };
                if hostname == local_hostname {
                    continue;
                }
                let peer = PeerInfo {
                    gateway_port: service
                        .get_property_val_str("gateway_port")
                        .and_then(|p| p.parse().ok())
                        .unwrap_or(9000),
                    api_port: service
                        .get_property_val_str("api_port")
                        .and_then(|p| p.parse().ok())
                        .unwrap_or(9020),
                    addresses: service.get_addresses().iter().copied().collect(),
                };
                info!(peer = hostname, addresses = ?peer.addresses, "mdns: discovered peer");
                if let Ok(mut map) = peers.write() {
                    map.insert(hostname.to_owned(), peer);
                }
            },
            ServiceEvent::ServiceRemoved(_, fullname) => {
                let instance = fullname
                    .strip_suffix(&format!(".{CASTLE_SERVICE_TYPE}"))
                    .unwrap_or(&fullname);
                if instance != local_hostname {
                    if let Ok(mut map) = peers.write() {
                        if map.remove(instance).is_some() {
                            info!(peer = instance, "mdns: peer removed");
                        }
                    }
                }
            },
            _ => {},
        }
    }
}

async fn watch_broker(
    events: mdns_sd::Receiver<ServiceEvent>,
    broker: Arc<RwLock<Option<(String, u16)>>>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            event = events.recv_async() => match event {
                Ok(event) => event,
                Err(_) => break,
            },
        };

        if let ServiceEvent::ServiceResolved(service) = event {
            let Some(address) = service.get_addresses().iter().next().copied() else {
                continue;
            };
            let port = service.get_port();
            info!(%address, port, "mdns: discovered mqtt broker");
            if let Ok(mut slot) = broker.write() {
                *slot = Some((address.to_string(), port));
            }
        }
    }
}
