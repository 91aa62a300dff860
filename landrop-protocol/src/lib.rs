//! Landrop Protocol Implementation
//!
//! This library implements LAN peer discovery and point-to-point file
//! transfer: devices announce themselves over UDP broadcast, maintain
//! a registry of live peers, and move files directly over TCP with an
//! accept/reject handshake and length-prefixed streaming.

pub mod device;
pub mod discovery;
pub mod transfer;

mod error;

pub use device::{Device, DeviceRegistry, Platform};
pub use discovery::{
    current_timestamp, Announcement, DiscoveryConfig, DiscoveryEvent, DiscoveryService,
    LocalDevice, DISCOVERY_PORT,
};
pub use error::{ProtocolError, Result};
pub use transfer::{
    AcceptPolicy, AutoAccept, CancelHandle, Decision, FileEntry, TransferClient, TransferConfig,
    TransferEvent, TransferRequest, TransferResponse, TransferServer, TransferStatus,
    TransferTask, TRANSFER_PORT,
};
