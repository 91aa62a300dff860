//! Transfer Events
//!
//! Sessions report their lifecycle through these events. Progress is
//! keyed by task identifier so applications can drive per-transfer UI
//! without holding a reference into the session.

use crate::transfer::task::TransferTask;

/// Events emitted by transfer sessions and the transfer server
#[derive(Debug, Clone)]
pub enum TransferEvent {
    /// An inbound request arrived and awaits a verdict
    RequestReceived { task: TransferTask },

    /// Bytes moved; emitted at bounded intervals during streaming
    Progress {
        task_id: String,
        transferred: u64,
        total: u64,
        throughput_bps: f64,
    },

    /// All bytes delivered and the end sentinel observed
    Completed { task: TransferTask },

    /// The responder declined the transfer
    Rejected { task_id: String, reason: String },

    /// The session terminated on a protocol, I/O, or validation error
    Failed { task_id: String, reason: String },

    /// The local user cancelled the session mid-flight
    Cancelled { task_id: String },
}

impl TransferEvent {
    /// The task identifier the event refers to
    pub fn task_id(&self) -> &str {
        match self {
            TransferEvent::RequestReceived { task } => &task.id,
            TransferEvent::Progress { task_id, .. } => task_id,
            TransferEvent::Completed { task } => &task.id,
            TransferEvent::Rejected { task_id, .. } => task_id,
            TransferEvent::Failed { task_id, .. } => task_id,
            TransferEvent::Cancelled { task_id } => task_id,
        }
    }

    /// Whether this event ends the task's lifecycle
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferEvent::Completed { .. }
                | TransferEvent::Rejected { .. }
                | TransferEvent::Failed { .. }
                | TransferEvent::Cancelled { .. }
        )
    }
}
