//! Transfer Client
//!
//! Initiates outbound transfers to discovered devices. The client
//! shares the server's single-transfer gate and event channel, so
//! outbound and inbound sessions serialize against each other and all
//! transfer events arrive in one stream.

use crate::device::Device;
use crate::transfer::events::TransferEvent;
use crate::transfer::manifest::collect_entries;
use crate::transfer::server::TransferServer;
use crate::transfer::session::{self, ActiveSessions, CancelHandle};
use crate::transfer::task::TransferTask;
use crate::transfer::wire::FileEntry;
use crate::{ProtocolError, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Semaphore;
use tracing::{debug, info};

/// How long to wait for the TCP connection to a peer
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Initiator for outbound transfers
pub struct TransferClient {
    local_name: String,
    gate: Arc<Semaphore>,
    active: ActiveSessions,
    events: UnboundedSender<TransferEvent>,
}

impl TransferClient {
    /// A client wired to `server`'s gate, cancel registry, and events
    pub fn new(server: &TransferServer, local_name: impl Into<String>) -> Self {
        Self {
            local_name: local_name.into(),
            gate: server.gate(),
            active: server.active_sessions(),
            events: server.event_sender(),
        }
    }

    /// Send an already-collected manifest to a device
    ///
    /// Returns as soon as the session is launched; progress and the
    /// terminal outcome arrive as [`TransferEvent`]s. Fails with
    /// [`ProtocolError::Busy`] when another transfer is streaming.
    pub async fn send_entries(
        &self,
        device: &Device,
        files: Vec<FileEntry>,
    ) -> Result<(TransferTask, CancelHandle)> {
        if files.is_empty() {
            return Err(ProtocolError::InvalidMessage("empty manifest".to_string()));
        }
        let permit = self
            .gate
            .clone()
            .try_acquire_owned()
            .map_err(|_| ProtocolError::Busy)?;

        let addr = SocketAddr::new(device.address, device.transfer_port);
        debug!(peer = %addr, files = files.len(), "Connecting for outbound transfer");
        let stream = match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ProtocolError::Timeout(format!(
                    "connecting to {}",
                    addr
                )))
            }
        };

        let task = TransferTask::outbound(device, files);
        let (handle, cancel) = session::cancel_channel();
        self.active
            .lock()
            .expect("active session lock poisoned")
            .insert(task.id.clone(), handle.clone());
        info!(task_id = %task.id, peer = %device.name, total = task.total_size, "Outbound transfer starting");

        let launched = task.clone();
        let local_name = self.local_name.clone();
        let events = self.events.clone();
        let active = self.active.clone();
        tokio::spawn(async move {
            let finished =
                session::run_initiator(stream, task, local_name, events, cancel).await;
            active
                .lock()
                .expect("active session lock poisoned")
                .remove(&finished.id);
            drop(permit);
        });
        Ok((launched, handle))
    }

    /// Collect picked paths into a manifest and send it
    pub async fn send_paths(
        &self,
        device: &Device,
        paths: &[PathBuf],
    ) -> Result<(TransferTask, CancelHandle)> {
        let files = collect_entries(paths).await?;
        self.send_entries(device, files).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Platform;
    use crate::transfer::server::{AutoAccept, TransferConfig};
    use crate::transfer::task::TransferStatus;
    use std::net::{IpAddr, Ipv4Addr};
    use tempfile::TempDir;

    fn local_device(port: u16) -> Device {
        Device {
            device_id: "self-test".to_string(),
            name: "Loopback".to_string(),
            platform: Platform::Desktop,
            address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            transfer_port: port,
            online: true,
            last_seen: 0,
        }
    }

    async fn started_server(root: &std::path::Path) -> TransferServer {
        let mut config = TransferConfig::new(root);
        config.port = 0;
        config.port_range = 1;
        let mut server = TransferServer::bind(config, Arc::new(AutoAccept)).await.unwrap();
        server.start().unwrap();
        server
    }

    async fn next_terminal(
        events: &mut tokio::sync::mpsc::UnboundedReceiver<TransferEvent>,
    ) -> TransferEvent {
        loop {
            match tokio::time::timeout(Duration::from_secs(10), events.recv()).await {
                Ok(Some(event)) if event.is_terminal() => return event,
                Ok(Some(_)) => {}
                _ => panic!("event stream ended early"),
            }
        }
    }

    #[tokio::test]
    async fn test_send_paths_end_to_end() {
        let source = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        let payload = vec![42u8; 80_000];
        let path = source.path().join("photo.jpg");
        std::fs::write(&path, &payload).unwrap();

        // Two endpoints, as on two machines: the client shares the
        // sending side's gate, not the receiver's.
        let mut sender_side = started_server(source.path()).await;
        let mut receiver = started_server(dest.path()).await;
        let mut sender_events = sender_side.subscribe().unwrap();
        let mut receiver_events = receiver.subscribe().unwrap();

        let client = TransferClient::new(&sender_side, "Workstation");
        let (task, _handle) = client
            .send_paths(&local_device(receiver.port()), &[path])
            .await
            .unwrap();
        assert_eq!(task.total_size, 80_000);
        assert_eq!(task.status, TransferStatus::Pending);

        assert!(matches!(
            next_terminal(&mut sender_events).await,
            TransferEvent::Completed { .. }
        ));
        assert!(matches!(
            next_terminal(&mut receiver_events).await,
            TransferEvent::Completed { .. }
        ));
        assert_eq!(std::fs::read(dest.path().join("photo.jpg")).unwrap(), payload);
    }

    #[tokio::test]
    async fn test_empty_manifest_refused() {
        let dest = TempDir::new().unwrap();
        let server = started_server(dest.path()).await;
        let client = TransferClient::new(&server, "Workstation");

        let result = client
            .send_entries(&local_device(server.port()), Vec::new())
            .await;
        assert!(matches!(result, Err(ProtocolError::InvalidMessage(_))));
    }

    #[tokio::test]
    async fn test_busy_gate_refuses_second_outbound() {
        let dest = TempDir::new().unwrap();
        let server = started_server(dest.path()).await;
        let client = TransferClient::new(&server, "Workstation");

        let _held = server.gate().try_acquire_owned().unwrap();
        let result = client
            .send_entries(
                &local_device(server.port()),
                vec![FileEntry::file("x", 1, None)],
            )
            .await;
        assert!(matches!(result, Err(ProtocolError::Busy)));
    }
}
