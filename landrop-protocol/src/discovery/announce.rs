//! Presence Announcement Wire Format
//!
//! One compact, self-describing JSON record per broadcast datagram:
//!
//! ```json
//! { "kind": "announce", "deviceId": "...", "deviceName": "...",
//!   "platform": "desktop", "transferPort": 48392, "timestamp": 1700000000000 }
//! ```
//!
//! The record deliberately carries no address field: the source IP
//! observed on the datagram is authoritative, which blunts spoofed
//! payloads on the local segment. Unrecognized or malformed datagrams
//! are dropped without any error response.

use crate::device::Platform;
use crate::{ProtocolError, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Record discriminator for presence datagrams
pub const ANNOUNCE_KIND: &str = "announce";

/// One broadcast presence record, produced every announce interval and
/// consumed immediately. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Announcement {
    /// Always [`ANNOUNCE_KIND`]; anything else is dropped on receipt
    pub kind: String,

    /// Stable unique identifier of the announcing device
    pub device_id: String,

    /// Display name of the announcing device
    pub device_name: String,

    /// Coarse platform classification
    #[serde(default)]
    pub platform: Platform,

    /// TCP port the announcing device accepts transfers on
    pub transfer_port: u16,

    /// Send time, UNIX milliseconds (sender clock, informational only)
    pub timestamp: i64,
}

impl Announcement {
    /// Create an announcement stamped with the current time
    pub fn new(
        device_id: impl Into<String>,
        device_name: impl Into<String>,
        platform: Platform,
        transfer_port: u16,
    ) -> Self {
        Self {
            kind: ANNOUNCE_KIND.to_string(),
            device_id: device_id.into(),
            device_name: device_name.into(),
            platform,
            transfer_port,
            timestamp: current_timestamp(),
        }
    }

    /// Serialize to one datagram payload
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a datagram payload
    ///
    /// Tolerates trailing `\n` / `\r\n`. Returns `InvalidMessage` when
    /// the record is not an announcement or lacks an identifier; the
    /// caller drops such datagrams silently.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let trimmed = data
            .strip_suffix(b"\r\n")
            .or_else(|| data.strip_suffix(b"\n"))
            .unwrap_or(data);

        let ann: Announcement = serde_json::from_slice(trimmed)
            .map_err(|e| ProtocolError::InvalidMessage(format!("bad announcement: {}", e)))?;

        if ann.kind != ANNOUNCE_KIND {
            return Err(ProtocolError::InvalidMessage(format!(
                "unexpected kind: {}",
                ann.kind
            )));
        }
        if ann.device_id.is_empty() {
            return Err(ProtocolError::InvalidMessage("empty deviceId".to_string()));
        }

        Ok(ann)
    }
}

/// Current UNIX timestamp in milliseconds
pub fn current_timestamp() -> i64 {
    Utc::now().timestamp_millis()
}

/// Current UNIX timestamp in milliseconds as the registry's u64 clock
pub(crate) fn current_millis() -> u64 {
    current_timestamp().max(0) as u64
}
