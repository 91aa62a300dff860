//! Error handling for the landrop protocol
//!
//! One error type covers both protocol engines. Transport and filesystem
//! failures convert automatically from `std::io::Error`, wire parsing
//! failures from `serde_json::Error`. Domain errors carry a reason string
//! that is also what travels in a `transfer_response` rejection or a
//! `Failed` event.
//!
//! ## Error Categories
//!
//! - **Transport**: `Io`, `Timeout` — fatal to the current session or
//!   service instance, never retried here.
//! - **Protocol**: `InvalidMessage`, `SizeMismatch`, `FrameTooLarge`,
//!   `PathTraversal` — abort the current session only.
//! - **Policy**: `Busy`, `Rejected` — the peer or local policy declined;
//!   not a transport fault.
//! - **Cancellation**: `Cancelled` — a deliberate local action, reported
//!   through the same channel with a distinct status.

use thiserror::Error;

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors that can occur during discovery or transfer operations
///
/// # Examples
///
/// ```rust
/// use landrop_protocol::ProtocolError;
///
/// let error = ProtocolError::InvalidMessage("missing kind field".to_string());
/// assert_eq!(error.to_string(), "Invalid message: missing kind field");
///
/// let error = ProtocolError::SizeMismatch { expected: 1536, actual: 1024 };
/// assert_eq!(
///     error.to_string(),
///     "Declared size mismatch: expected 1536 bytes, got 1024"
/// );
/// ```
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// I/O error (socket, file system)
    ///
    /// Automatically converted from `std::io::Error`.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    ///
    /// Automatically converted from `serde_json::Error`.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed or unexpected control message
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// The byte count received for a file disagrees with the manifest
    #[error("Declared size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    /// A manifest path would escape the destination root
    #[error("Path traversal rejected: {0}")]
    PathTraversal(String),

    /// A data frame exceeds the maximum allowed length (DoS prevention)
    #[error("Frame too large: {0} bytes (max: {1})")]
    FrameTooLarge(usize, usize),

    /// A network operation timed out
    #[error("Timeout: {0}")]
    Timeout(String),

    /// A transfer is already streaming; concurrent sessions are refused
    #[error("Another transfer is in progress")]
    Busy,

    /// The peer declined the transfer request
    #[error("Transfer rejected: {0}")]
    Rejected(String),

    /// The transfer was cancelled locally
    ///
    /// This is a deliberate terminal state, not a fault.
    #[error("Transfer cancelled")]
    Cancelled,
}

impl ProtocolError {
    /// True for errors that only abort the one affected session
    /// (protocol and filesystem faults), as opposed to service-fatal
    /// transport failures.
    pub fn is_session_local(&self) -> bool {
        !matches!(self, ProtocolError::Io(_))
    }

    /// Reason string suitable for a `transfer_response` or a `Failed`
    /// event payload.
    pub fn reason(&self) -> String {
        self.to_string()
    }
}
