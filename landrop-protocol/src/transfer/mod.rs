//! Point-to-Point File Transfer
//!
//! Direct TCP transfers between two discovered devices. A transfer is
//! one conversation on one connection: a newline-JSON request/response
//! handshake, then, if accepted, length-prefixed data frames carrying
//! the manifest's file bytes in order, closed by a zero-length
//! sentinel frame.
//!
//! The [`TransferServer`] receives, the [`TransferClient`] sends, and
//! both report through [`TransferEvent`]s. One transfer streams at a
//! time per endpoint; concurrent requests are declined as busy.
//!
//! # Example
//!
//! ```rust,no_run
//! use landrop_protocol::transfer::{
//!     AutoAccept, TransferClient, TransferConfig, TransferServer,
//! };
//! use std::sync::Arc;
//!
//! # async fn example(device: landrop_protocol::Device) -> landrop_protocol::Result<()> {
//! let config = TransferConfig::new("/home/user/Downloads");
//! let mut server = TransferServer::bind(config, Arc::new(AutoAccept)).await?;
//! let events = server.subscribe();
//! server.start()?;
//!
//! let client = TransferClient::new(&server, "Workstation");
//! let (task, cancel) = client
//!     .send_paths(&device, &["/home/user/photo.jpg".into()])
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod events;
pub mod fs;
pub mod manifest;
pub mod server;
pub mod session;
pub mod task;
pub mod wire;

pub use client::{TransferClient, CONNECT_TIMEOUT};
pub use events::TransferEvent;
pub use fs::{sanitize_relative_path, unique_download_path, uniquify_top_level};
pub use manifest::collect_entries;
pub use server::{
    AcceptPolicy, AutoAccept, Decision, TransferConfig, TransferServer, TRANSFER_PORT,
    TRANSFER_PORT_RANGE,
};
pub use session::{CancelHandle, IO_TIMEOUT, RESPONSE_TIMEOUT};
pub use task::{Direction, ThroughputMeter, TransferStatus, TransferTask};
pub use wire::{
    FileEntry, TransferRequest, TransferResponse, CHUNK_SIZE, MAX_FRAME_LEN,
};
