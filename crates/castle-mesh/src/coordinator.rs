//! The MQTT coordinator.
//!
//! One coordinator runs per node. It owns the broker connection and two
//! background tasks: the event-loop driver (network I/O plus inbound
//! message handling) and a periodic staleness sweep. Both exit promptly
//! when [`MeshCoordinator::stop`] cancels them; `stop` also publishes the
//! retained `offline` status so peers see a graceful goodbye — the
//! broker-side last-will only covers unexpected drops.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Packet, QoS};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use castle_core::registry::NodeRegistry;

use crate::error::MeshResult;
use crate::payload::{
    MessageKind, RegistryAnnouncement, parse_topic, registry_topic, status_topic,
};
use crate::state::{self, MeshState};

/// How long the coordinator's tasks may take to wind down.
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Interval of the staleness sweep.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Broker connection options.
#[derive(Debug, Clone)]
pub struct MeshOptions {
    /// This node's hostname (used in topics and the client id).
    pub hostname: String,
    /// Broker host.
    pub broker_host: String,
    /// Broker port.
    pub broker_port: u16,
}

/// A membership change observed on the mesh, handed off to the stream
/// layer for fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeshEvent {
    /// A peer (re-)announced its registry.
    NodeUpdated {
        /// The peer's hostname.
        hostname: String,
    },
    /// A peer's retained status flipped to offline.
    NodeOffline {
        /// The peer's hostname.
        hostname: String,
    },
}

/// Drives the broker connection for this node.
pub struct MeshCoordinator {
    hostname: String,
    broker_host: String,
    broker_port: u16,
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    announcement: Arc<std::sync::RwLock<RegistryAnnouncement>>,
    cancel: CancellationToken,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl MeshCoordinator {
    /// Connect to the broker and spawn the coordinator tasks.
    ///
    /// `registry` seeds the retained announcement published on connect;
    /// inbound membership changes go to `state` and are mirrored onto
    /// `events`.
    #[must_use]
    pub fn start(
        options: MeshOptions,
        registry: &NodeRegistry,
        state: MeshState,
        events: mpsc::UnboundedSender<MeshEvent>,
    ) -> Self {
        let mut mqtt_options = MqttOptions::new(
            format!("castle-{}", options.hostname),
            options.broker_host.clone(),
            options.broker_port,
        );
        mqtt_options.set_keep_alive(Duration::from_secs(30));
        mqtt_options.set_last_will(LastWill::new(
            status_topic(&options.hostname),
            "offline",
            QoS::AtLeastOnce,
            true,
        ));

        let (client, event_loop) = AsyncClient::new(mqtt_options, 64);
        let connected = Arc::new(AtomicBool::new(false));
        let announcement = Arc::new(std::sync::RwLock::new(RegistryAnnouncement::from(registry)));
        let cancel = CancellationToken::new();

        let driver = tokio::spawn(run_event_loop(
            event_loop,
            client.clone(),
            options.hostname.clone(),
            state.clone(),
            events,
            Arc::clone(&connected),
            Arc::clone(&announcement),
            cancel.clone(),
        ));
        let sweeper = tokio::spawn(run_sweep(state, cancel.clone()));

        info!(
            broker = %options.broker_host,
            port = options.broker_port,
            "mesh coordinator starting"
        );

        Self {
            hostname: options.hostname,
            broker_host: options.broker_host,
            broker_port: options.broker_port,
            client,
            connected,
            announcement,
            cancel,
            tasks: std::sync::Mutex::new(vec![driver, sweeper]),
        }
    }

    /// Whether the broker connection is currently up.
    #[must_use]
    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Broker host this coordinator talks to.
    #[must_use]
    pub fn broker_host(&self) -> &str {
        &self.broker_host
    }

    /// Broker port this coordinator talks to.
    #[must_use]
    pub fn broker_port(&self) -> u16 {
        self.broker_port
    }

    /// Re-publish the retained registry announcement (after a compile).
    ///
    /// # Errors
    ///
    /// Returns an error if the client rejects the publish.
    pub async fn publish_registry(&self, registry: &NodeRegistry) -> MeshResult<()> {
        let announcement = RegistryAnnouncement::from(registry);
        let payload = serde_json::to_vec(&announcement)?;
        if let Ok(mut current) = self.announcement.write() {
            *current = announcement;
        }
        self.client
            .publish(
                registry_topic(&self.hostname),
                QoS::AtLeastOnce,
                true,
                payload,
            )
            .await?;
        Ok(())
    }

    /// Publish the retained `offline` status, disconnect, and stop both
    /// tasks. Returns once the tasks have wound down (bounded by ~2 s).
    pub async fn stop(&self) {
        // Graceful goodbye; the LWT only covers crashes.
        if let Err(e) = self
            .client
            .publish(
                status_topic(&self.hostname),
                QoS::AtLeastOnce,
                true,
                "offline",
            )
            .await
        {
            warn!(error = %e, "failed to publish offline status");
        }
        if let Err(e) = self.client.disconnect().await {
            warn!(error = %e, "mqtt disconnect failed");
        }

        // publish/disconnect only enqueue; give the event loop one beat
        // to flush them before it is cancelled.
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = match self.tasks.lock() {
            Ok(mut guard) => guard.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for task in tasks {
            if tokio::time::timeout(STOP_TIMEOUT, task).await.is_err() {
                warn!("mesh task did not stop within the deadline");
            }
        }
        self.connected.store(false, Ordering::Relaxed);
        info!("mesh coordinator stopped");
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_event_loop(
    mut event_loop: EventLoop,
    client: AsyncClient,
    hostname: String,
    state: MeshState,
    events: mpsc::UnboundedSender<MeshEvent>,
    connected: Arc<AtomicBool>,
    announcement: Arc<std::sync::RwLock<RegistryAnnouncement>>,
    cancel: CancellationToken,
) {
    loop {
        let polled = tokio::select! {
            () = cancel.cancelled() => break,
            polled = event_loop.poll() => polled,
        };

        match polled {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                connected.store(true, Ordering::Relaxed);
                info!("connected to mqtt broker");
                on_connect(&client, &hostname, &announcement).await;
            },
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                handle_message(&hostname, &state, &events, &publish.topic, &publish.payload);
            },
            Ok(_) => {},
            Err(e) => {
                if connected.swap(false, Ordering::Relaxed) {
                    warn!(error = %e, "mqtt connection lost");
                }
                // Back off before the next poll retries the connection.
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(Duration::from_secs(1)) => {},
                }
            },
        }
    }
}

/// Publish retained state and subscribe to the mesh on (re)connect.
async fn on_connect(
    client: &AsyncClient,
    hostname: &str,
    announcement: &Arc<std::sync::RwLock<RegistryAnnouncement>>,
) {
    if let Err(e) = client
        .publish(status_topic(hostname), QoS::AtLeastOnce, true, "online")
        .await
    {
        warn!(error = %e, "failed to publish online status");
    }

    let payload = announcement
        .read()
        .ok()
        .and_then(|a| serde_json::to_vec(&*a).ok());
    if let Some(payload) = payload {
        if let Err(e) = client
            .publish(registry_topic(hostname), QoS::AtLeastOnce, true, payload)
            .await
        {
            warn!(error = %e, "failed to publish registry");
        }
    }

    for filter in ["castle/+/registry", "castle/+/status"] {
        if let Err(e) = client.subscribe(filter, QoS::AtLeastOnce).await {
            warn!(filter, error = %e, "subscribe failed");
        }
    }
}

/// Apply one inbound mesh message. Messages about this node are skipped;
/// malformed payloads are logged and leave peer state unchanged.
fn handle_message(
    local_hostname: &str,
    state: &MeshState,
    events: &mpsc::UnboundedSender<MeshEvent>,
    topic: &str,
    payload: &[u8],
) {
    let Some((hostname, kind)) = parse_topic(topic) else {
        return;
    };
    if hostname == local_hostname {
        return;
    }

    match kind {
        MessageKind::Registry => match serde_json::from_slice::<RegistryAnnouncement>(payload) {
            Ok(registry) => {
                state.update_node(hostname, registry);
                let _ = events.send(MeshEvent::NodeUpdated {
                    hostname: hostname.to_owned(),
                });
            },
            Err(e) => {
                warn!(topic, error = %e, "ignoring malformed registry payload");
            },
        },
        MessageKind::Status => {
            if payload == b"offline" {
                state.set_offline(hostname);
                let _ = events.send(MeshEvent::NodeOffline {
                    hostname: hostname.to_owned(),
                });
            }
        },
    }
}

async fn run_sweep(state: MeshState, cancel: CancellationToken) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(SWEEP_INTERVAL) => state::sweep(&state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{NodeAnnouncement, RegistryAnnouncement};

    fn announcement_json(hostname: &str) -> Vec<u8> {
        serde_json::to_vec(&RegistryAnnouncement {
            node: NodeAnnouncement {
                hostname: hostname.to_owned(),
                gateway_port: 9000,
            },
            deployed: indexmap::IndexMap::new(),
        })
        .unwrap()
    }

    fn channel() -> (
        mpsc::UnboundedSender<MeshEvent>,
        mpsc::UnboundedReceiver<MeshEvent>,
    ) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn test_registry_message_updates_state_and_emits_event() {
        let state = MeshState::new();
        let (tx, mut rx) = channel();

        handle_message(
            "keep",
            &state,
            &tx,
            "castle/den/registry",
            &announcement_json("den"),
        );

        assert!(state.get_node("den").is_some());
        assert_eq!(
            rx.try_recv().unwrap(),
            MeshEvent::NodeUpdated {
                hostname: "den".into()
            }
        );
    }

    #[test]
    fn test_own_messages_skipped() {
        let state = MeshState::new();
        let (tx, mut rx) = channel();

        handle_message(
            "keep",
            &state,
            &tx,
            "castle/keep/registry",
            &announcement_json("keep"),
        );

        assert!(state.get_node("keep").is_none());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_malformed_payload_leaves_state_unchanged() {
        let state = MeshState::new();
        let (tx, mut rx) = channel();
        handle_message("keep", &state, &tx, "castle/den/registry", b"not json");
        handle_message(
            "keep",
            &state,
            &tx,
            "castle/den/registry",
            &announcement_json("den"),
        );
        handle_message("keep", &state, &tx, "castle/den/registry", b"{broken");

        // The good payload stuck; the bad ones changed nothing.
        assert!(state.get_node("den").is_some());
        assert_eq!(rx.try_recv().ok(), Some(MeshEvent::NodeUpdated { hostname: "den".into() }));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_offline_status_marks_node() {
        let state = MeshState::new();
        let (tx, mut rx) = channel();

        handle_message(
            "keep",
            &state,
            &tx,
            "castle/den/registry",
            &announcement_json("den"),
        );
        let _ = rx.try_recv();

        handle_message("keep", &state, &tx, "castle/den/status", b"offline");
        assert!(!state.get_node("den").unwrap().online);
        assert_eq!(
            rx.try_recv().unwrap(),
            MeshEvent::NodeOffline {
                hostname: "den".into()
            }
        );
    }

    #[test]
    fn test_online_status_is_ignored() {
        let state = MeshState::new();
        let (tx, mut rx) = channel();
        handle_message("keep", &state, &tx, "castle/den/status", b"online");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_foreign_topics_ignored() {
        let state = MeshState::new();
        let (tx, mut rx) = channel();
        handle_message("keep", &state, &tx, "zigbee/den/registry", b"{}");
        handle_message("keep", &state, &tx, "castle/den/weird", b"{}");
        assert!(state.is_empty());
        assert!(rx.try_recv().is_err());
    }
}
