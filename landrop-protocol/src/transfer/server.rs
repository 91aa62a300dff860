//! Transfer Server
//!
//! Listens for inbound transfer connections, asks an [`AcceptPolicy`]
//! for the verdict, and runs one responder session per connection.
//! A single-permit gate serializes streaming: while one transfer is in
//! the data phase, further inbound requests are declined with a busy
//! reason before any file I/O happens.

use crate::transfer::events::TransferEvent;
use crate::transfer::session::{self, ActiveSessions};
use crate::transfer::wire::TransferRequest;
use crate::{ProtocolError, Result};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{watch, RwLock, Semaphore};
use tracing::{debug, error, info};

/// Default TCP port for transfer connections
pub const TRANSFER_PORT: u16 = 48392;

/// How many consecutive ports to try when the default is taken
pub const TRANSFER_PORT_RANGE: u16 = 8;

/// Verdict on an inbound transfer request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Proceed to the data phase
    Accept,
    /// Decline with a human-readable reason
    Reject(String),
}

/// Decides whether an inbound transfer request proceeds
///
/// The decision runs after wire validation and before any file I/O,
/// so an implementation may prompt the user and take its time; the
/// initiator waits out a generous verdict timeout.
#[async_trait]
pub trait AcceptPolicy: Send + Sync {
    async fn decide(&self, request: &TransferRequest, peer: SocketAddr) -> Decision;
}

/// Policy that accepts every request, for unattended receivers
pub struct AutoAccept;

#[async_trait]
impl AcceptPolicy for AutoAccept {
    async fn decide(&self, _request: &TransferRequest, _peer: SocketAddr) -> Decision {
        Decision::Accept
    }
}

/// Transfer server configuration
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// First TCP port to try
    pub port: u16,
    /// Number of consecutive ports to scan before giving up
    pub port_range: u16,
    /// Directory received files land in
    pub destination_root: PathBuf,
}

impl TransferConfig {
    pub fn new(destination_root: impl Into<PathBuf>) -> Self {
        Self {
            port: TRANSFER_PORT,
            port_range: TRANSFER_PORT_RANGE,
            destination_root: destination_root.into(),
        }
    }
}

/// TCP server accepting inbound transfers
pub struct TransferServer {
    listener: Option<TcpListener>,
    port: u16,
    destination_root: Arc<RwLock<PathBuf>>,
    policy: Arc<dyn AcceptPolicy>,
    gate: Arc<Semaphore>,
    active: ActiveSessions,
    event_tx: UnboundedSender<TransferEvent>,
    event_rx: Option<UnboundedReceiver<TransferEvent>>,
    shutdown_tx: Option<watch::Sender<bool>>,
}

impl TransferServer {
    /// Bind the listener, scanning forward from the configured port
    pub async fn bind(config: TransferConfig, policy: Arc<dyn AcceptPolicy>) -> Result<Self> {
        let mut last_error = None;
        let mut bound = None;
        for port in config.port..config.port.saturating_add(config.port_range) {
            match TcpListener::bind(("0.0.0.0", port)).await {
                Ok(listener) => {
                    let port = listener.local_addr()?.port();
                    bound = Some((listener, port));
                    break;
                }
                Err(e) => {
                    debug!(port, error = %e, "Transfer port unavailable, trying next");
                    last_error = Some(e);
                }
            }
        }
        let (listener, port) = match bound {
            Some(pair) => pair,
            None => {
                return Err(last_error
                    .map(ProtocolError::Io)
                    .unwrap_or_else(|| ProtocolError::InvalidMessage("empty port range".to_string())))
            }
        };
        info!(port, root = %config.destination_root.display(), "Transfer server bound");

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Ok(Self {
            listener: Some(listener),
            port,
            destination_root: Arc::new(RwLock::new(config.destination_root)),
            policy,
            gate: Arc::new(Semaphore::new(1)),
            active: ActiveSessions::default(),
            event_tx,
            event_rx: Some(event_rx),
            shutdown_tx: None,
        })
    }

    /// The port actually bound, after any fallback scan
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Take the event receiver; callable once
    pub fn subscribe(&mut self) -> Option<UnboundedReceiver<TransferEvent>> {
        self.event_rx.take()
    }

    /// The single-transfer gate, shared with outbound clients
    pub(crate) fn gate(&self) -> Arc<Semaphore> {
        self.gate.clone()
    }

    pub(crate) fn event_sender(&self) -> UnboundedSender<TransferEvent> {
        self.event_tx.clone()
    }

    pub(crate) fn active_sessions(&self) -> ActiveSessions {
        self.active.clone()
    }

    /// Where received files currently land
    pub async fn destination_root(&self) -> PathBuf {
        self.destination_root.read().await.clone()
    }

    /// Change the download directory for subsequent transfers
    pub async fn set_destination_root(&self, root: PathBuf) {
        info!(root = %root.display(), "Download directory changed");
        *self.destination_root.write().await = root;
    }

    /// Cancel a running session by task identifier
    ///
    /// Returns false when no session with that identifier is active.
    pub fn cancel(&self, task_id: &str) -> bool {
        let active = self.active.lock().expect("active session lock poisoned");
        match active.get(task_id) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Start the accept loop
    pub fn start(&mut self) -> Result<()> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| ProtocolError::InvalidMessage("server already started".to_string()))?;
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        self.shutdown_tx = Some(shutdown_tx);

        let destination_root = self.destination_root.clone();
        let policy = self.policy.clone();
        let gate = self.gate.clone();
        let active = self.active.clone();
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!("Transfer server stopping");
                            break;
                        }
                    }
                    accepted = listener.accept() => {
                        let (stream, peer_addr) = match accepted {
                            Ok(pair) => pair,
                            Err(e) => {
                                error!(error = %e, "Accept failed");
                                continue;
                            }
                        };
                        debug!(peer = %peer_addr, "Inbound transfer connection");

                        // A held permit means a transfer is streaming;
                        // the session declines before touching disk.
                        let permit = gate.clone().try_acquire_owned().ok();
                        let root = destination_root.read().await.clone();
                        tokio::spawn(session::run_responder(
                            stream,
                            peer_addr,
                            root,
                            policy.clone(),
                            permit,
                            event_tx.clone(),
                            active.clone(),
                        ));
                    }
                }
            }
        });
        Ok(())
    }

    /// Stop accepting connections; running sessions finish on their own
    pub fn stop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(true);
        }
    }
}

impl Drop for TransferServer {
    fn drop(&mut self) {
        self.stop();
    }
}
