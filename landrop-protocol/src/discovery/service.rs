//! Async Discovery Service
//!
//! Maintains the local device's visibility and discovers peers. Three
//! tasks multiplexed on the runtime: a broadcaster announcing the local
//! device at a fixed interval, a listener ingesting peer announcements
//! into the registry, and a sweeper evicting devices that fell silent
//! past the staleness window.
//!
//! A failed broadcast is logged and ignored (the next interval retries
//! implicitly). A failed receive closes discovery as a whole: it trips
//! the shared shutdown, stopping all three tasks, and surfaces as a
//! [`DiscoveryEvent::Error`]; restarting is the owning process's call.

use super::announce::{current_millis, Announcement};
use super::events::DiscoveryEvent;
use crate::device::{DeviceRegistry, Platform};
use crate::Result;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Default UDP port for presence broadcasts
pub const DISCOVERY_PORT: u16 = 48391;

/// IPv4 broadcast address announcements are sent to
pub const BROADCAST_ADDR: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 255);

/// Default self-announcement interval
pub const DEFAULT_ANNOUNCE_INTERVAL: Duration = Duration::from_secs(3);

/// Default staleness window (must comfortably exceed the announce
/// interval to tolerate lost datagrams)
pub const DEFAULT_STALENESS_WINDOW: Duration = Duration::from_secs(10);

/// Default staleness check interval (at most half the window)
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(2);

/// Identity of the local device as announced to the network
#[derive(Debug, Clone)]
pub struct LocalDevice {
    /// Stable identifier, generated once and persisted by the caller
    pub device_id: String,

    /// Display name, typically the host name
    pub name: String,

    /// Coarse platform classification
    pub platform: Platform,

    /// TCP port the local transfer server listens on
    pub transfer_port: u16,
}

impl LocalDevice {
    /// Produce the announcement record for one broadcast
    pub fn announcement(&self) -> Announcement {
        Announcement::new(
            &self.device_id,
            &self.name,
            self.platform,
            self.transfer_port,
        )
    }
}

/// Configuration for the discovery service
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// UDP port to bind and broadcast on
    pub discovery_port: u16,

    /// How often to announce the local device
    pub announce_interval: Duration,

    /// Maximum silence before a peer is considered offline
    pub staleness_window: Duration,

    /// How often to check for stale peers
    pub sweep_interval: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            discovery_port: DISCOVERY_PORT,
            announce_interval: DEFAULT_ANNOUNCE_INTERVAL,
            staleness_window: DEFAULT_STALENESS_WINDOW,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// Async discovery service
///
/// Owns the broadcast socket. The registry is passed in explicitly and
/// is mutated only from here; collaborators read snapshots.
pub struct DiscoveryService {
    local: LocalDevice,
    config: DiscoveryConfig,
    socket: Arc<UdpSocket>,
    registry: Arc<RwLock<DeviceRegistry>>,
    event_tx: mpsc::UnboundedSender<DiscoveryEvent>,
    event_rx: Option<mpsc::UnboundedReceiver<DiscoveryEvent>>,
    shutdown_tx: Option<Arc<watch::Sender<bool>>>,
}

impl DiscoveryService {
    /// Bind the broadcast endpoint and prepare the service
    ///
    /// Binding is the one fatal step: if the discovery port is taken the
    /// caller gets the error instead of a half-alive service.
    pub async fn bind(
        local: LocalDevice,
        config: DiscoveryConfig,
        registry: Arc<RwLock<DeviceRegistry>>,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", config.discovery_port)).await?;
        socket.set_broadcast(true)?;
        info!(port = config.discovery_port, "Bound discovery socket");

        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Ok(Self {
            local,
            config,
            socket: Arc::new(socket),
            registry,
            event_tx,
            event_rx: Some(event_rx),
            shutdown_tx: None,
        })
    }

    /// UDP port the service is bound to
    pub fn local_port(&self) -> Result<u16> {
        Ok(self.socket.local_addr()?.port())
    }

    /// Take the event receiver
    ///
    /// There is exactly one consumer; the second call returns `None`.
    pub fn subscribe(&mut self) -> Option<mpsc::UnboundedReceiver<DiscoveryEvent>> {
        self.event_rx.take()
    }

    /// Send one immediate announcement outside the periodic schedule
    pub async fn announce_now(&self) -> Result<()> {
        Self::broadcast_announcement(&self.socket, &self.local, self.config.discovery_port).await
    }

    /// Start the broadcaster, listener and sweeper tasks
    pub fn start(&mut self) -> Result<()> {
        let port = self.local_port()?;
        info!(port, "Starting discovery service");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shutdown_tx = Arc::new(shutdown_tx);
        self.shutdown_tx = Some(shutdown_tx.clone());

        self.spawn_broadcaster(shutdown_rx.clone());
        self.spawn_listener(shutdown_rx.clone(), shutdown_tx);
        self.spawn_sweeper(shutdown_rx);

        let _ = self.event_tx.send(DiscoveryEvent::ServiceStarted { port });
        Ok(())
    }

    /// Stop the periodic tasks and release the endpoint
    ///
    /// In-flight sends are best-effort and may be dropped.
    pub fn stop(&mut self) {
        info!("Stopping discovery service");
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(true);
        }
        let _ = self.event_tx.send(DiscoveryEvent::ServiceStopped);
    }

    fn spawn_broadcaster(&self, mut shutdown_rx: watch::Receiver<bool>) {
        let socket = self.socket.clone();
        let local = self.local.clone();
        let target_port = self.config.discovery_port;
        let announce_interval = self.config.announce_interval;

        tokio::spawn(async move {
            let mut ticker = interval(announce_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) =
                            Self::broadcast_announcement(&socket, &local, target_port).await
                        {
                            // Next interval retries implicitly.
                            warn!("Failed to broadcast announcement: {}", e);
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("Broadcaster shutting down");
                        break;
                    }
                }
            }
        });
    }

    async fn broadcast_announcement(
        socket: &UdpSocket,
        local: &LocalDevice,
        target_port: u16,
    ) -> Result<()> {
        let bytes = local.announcement().to_bytes()?;
        let target = SocketAddr::new(IpAddr::V4(BROADCAST_ADDR), target_port);
        let sent = socket.send_to(&bytes, target).await?;
        debug!(bytes = sent, %target, "Broadcasted announcement");
        Ok(())
    }

    fn spawn_listener(
        &self,
        mut shutdown_rx: watch::Receiver<bool>,
        shutdown_tx: Arc<watch::Sender<bool>>,
    ) {
        let socket = self.socket.clone();
        let registry = self.registry.clone();
        let event_tx = self.event_tx.clone();
        let own_device_id = self.local.device_id.clone();

        tokio::spawn(async move {
            let mut buf = [0u8; 4096];
            loop {
                tokio::select! {
                    result = socket.recv_from(&mut buf) => {
                        match result {
                            Ok((size, src_addr)) => {
                                ingest_datagram(
                                    &buf[..size],
                                    src_addr,
                                    &own_device_id,
                                    &registry,
                                    &event_tx,
                                    current_millis(),
                                )
                                .await;
                            }
                            Err(e) => {
                                fail_discovery(&event_tx, &shutdown_tx, &e);
                                break;
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("Listener shutting down");
                        break;
                    }
                }
            }
        });
    }

    fn spawn_sweeper(&self, mut shutdown_rx: watch::Receiver<bool>) {
        let registry = self.registry.clone();
        let event_tx = self.event_tx.clone();
        let sweep_interval = self.config.sweep_interval;

        tokio::spawn(async move {
            let mut ticker = interval(sweep_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = registry.write().await.sweep(current_millis());
                        for device in evicted {
                            let _ = event_tx.send(DiscoveryEvent::DeviceOffline {
                                device_id: device.device_id,
                            });
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("Sweeper shutting down");
                        break;
                    }
                }
            }
        });
    }
}

/// Close discovery after a socket-level receive failure
///
/// Tripping the shared shutdown stops the broadcaster and sweeper
/// along with the listener, so the service is never half-alive on a
/// dead socket. Restarting is a caller policy decision.
fn fail_discovery(
    event_tx: &mpsc::UnboundedSender<DiscoveryEvent>,
    shutdown_tx: &watch::Sender<bool>,
    error: &std::io::Error,
) {
    warn!("Discovery socket failed: {}", error);
    let _ = event_tx.send(DiscoveryEvent::Error {
        message: error.to_string(),
    });
    let _ = shutdown_tx.send(true);
}

/// Feed one received datagram into the registry
///
/// Malformed payloads and self-announcements are discarded silently; the
/// protocol is datagram-based and has no negative acknowledgment. The
/// device address recorded is always the transport-observed source IP.
async fn ingest_datagram(
    data: &[u8],
    src_addr: SocketAddr,
    own_device_id: &str,
    registry: &Arc<RwLock<DeviceRegistry>>,
    event_tx: &mpsc::UnboundedSender<DiscoveryEvent>,
    now_millis: u64,
) {
    let ann = match Announcement::from_bytes(data) {
        Ok(ann) => ann,
        Err(e) => {
            debug!(%src_addr, "Dropping malformed datagram: {}", e);
            return;
        }
    };

    if ann.device_id == own_device_id {
        debug!("Ignoring our own broadcast");
        return;
    }

    let mut reg = registry.write().await;
    let newly_seen = reg.upsert(&ann, src_addr.ip(), now_millis);
    if newly_seen {
        if let Some(device) = reg.get(&ann.device_id).cloned() {
            drop(reg);
            let _ = event_tx.send(DiscoveryEvent::DeviceDiscovered { device });
        }
    }
}
