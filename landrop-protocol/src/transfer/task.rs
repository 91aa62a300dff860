//! Transfer Task Tracking
//!
//! A [`TransferTask`] is the UI-facing record of one transfer. Both
//! endpoints hold one: the initiator builds it from the picked files,
//! the responder mirrors it from the incoming request with the same
//! identifier. Progress, throughput, and terminal status all hang off
//! this record.

use crate::device::Device;
use crate::discovery::current_millis;
use crate::transfer::wire::{manifest_total_size, FileEntry, TransferRequest};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Which way the bytes flow, from this endpoint's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// This endpoint is sending
    Outbound,
    /// This endpoint is receiving
    Inbound,
}

/// Lifecycle status of a transfer task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    /// Created, conversation not started
    Pending,
    /// Request sent or received, verdict outstanding
    AwaitingAcceptance,
    /// Data phase in progress
    Transferring,
    /// All bytes delivered and the sentinel observed
    Completed,
    /// Terminated by a protocol, I/O, or validation error
    Failed,
    /// Declined by the responder
    Rejected,
    /// Terminated by the local user
    Cancelled,
}

impl TransferStatus {
    /// Terminal states admit no further transition
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferStatus::Completed
                | TransferStatus::Failed
                | TransferStatus::Rejected
                | TransferStatus::Cancelled
        )
    }
}

/// One transfer, as surfaced to applications
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferTask {
    /// Unique task identifier, shared by both endpoints
    pub id: String,

    /// Display name of the remote device
    pub peer_name: String,

    /// Manifest for this transfer
    pub files: Vec<FileEntry>,

    /// Sum of declared sizes of all file entries
    pub total_size: u64,

    /// Bytes of file content moved so far
    pub transferred: u64,

    /// Current lifecycle status
    pub status: TransferStatus,

    /// Direction from this endpoint's point of view
    pub direction: Direction,

    /// Most recent throughput sample in bytes per second
    pub throughput_bps: f64,

    /// When the task was created (UNIX milliseconds)
    pub started_at: u64,
}

impl TransferTask {
    /// A new outbound task for files picked locally
    pub fn outbound(peer: &Device, files: Vec<FileEntry>) -> Self {
        let total_size = manifest_total_size(&files);
        Self {
            id: Uuid::new_v4().to_string(),
            peer_name: peer.name.clone(),
            files,
            total_size,
            transferred: 0,
            status: TransferStatus::Pending,
            direction: Direction::Outbound,
            throughput_bps: 0.0,
            started_at: current_millis(),
        }
    }

    /// The responder-side mirror of an incoming request
    pub fn inbound(request: &TransferRequest) -> Self {
        Self {
            id: request.task_id.clone(),
            peer_name: request.sender_name.clone(),
            files: request.files.clone(),
            total_size: request.total_size,
            transferred: 0,
            status: TransferStatus::AwaitingAcceptance,
            direction: Direction::Inbound,
            throughput_bps: 0.0,
            started_at: current_millis(),
        }
    }

    /// Fraction of bytes delivered, in `0.0..=1.0`
    ///
    /// Reaches 1.0 exactly when every file in the manifest has been
    /// fully streamed. A manifest of empty files and directories has
    /// nothing to stream, so it completes at 1.0 directly.
    pub fn progress(&self) -> f64 {
        if self.total_size == 0 {
            if self.status == TransferStatus::Completed {
                1.0
            } else {
                0.0
            }
        } else {
            (self.transferred as f64 / self.total_size as f64).min(1.0)
        }
    }
}

/// Throughput estimator over a bounded sampling window
///
/// Callers feed it the running byte total; it emits a fresh
/// bytes-per-second sample at most once per window, so UI numbers are
/// steady rather than jittering with every chunk.
#[derive(Debug)]
pub struct ThroughputMeter {
    window: Duration,
    last_instant: Instant,
    last_bytes: u64,
}

impl ThroughputMeter {
    /// Default sampling window
    pub const DEFAULT_WINDOW: Duration = Duration::from_millis(500);

    pub fn new() -> Self {
        Self::with_window(Self::DEFAULT_WINDOW)
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            last_instant: Instant::now(),
            last_bytes: 0,
        }
    }

    /// Record the running total; returns a sample once per window
    pub fn record(&mut self, total_bytes: u64) -> Option<f64> {
        let elapsed = self.last_instant.elapsed();
        if elapsed < self.window {
            return None;
        }
        let delta = total_bytes.saturating_sub(self.last_bytes);
        let bps = delta as f64 / elapsed.as_secs_f64();
        self.last_instant = Instant::now();
        self.last_bytes = total_bytes;
        Some(bps)
    }
}

impl Default for ThroughputMeter {
    fn default() -> Self {
        Self::new()
    }
}
