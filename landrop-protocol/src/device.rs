//! Device Model and Registry
//!
//! This module tracks the peers currently visible on the local network.
//! The registry is pure data plus eviction logic: no sockets, no disk.
//! It is mutated only by the discovery engine; every other consumer takes
//! snapshots via [`DeviceRegistry::list`].
//!
//! ## Device Lifecycle
//!
//! 1. Created on the first announcement received for an identifier
//! 2. Address, port, name and last-seen refreshed on every later
//!    announcement (the most recent values always win)
//! 3. Removed by [`DeviceRegistry::sweep`] once the staleness window
//!    elapses with no announcement; a later announcement re-creates it

use crate::discovery::Announcement;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, info};

/// Coarse platform classification carried in announcements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Desktop,
    Laptop,
    Phone,
    Tablet,
    Other,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Desktop => "desktop",
            Platform::Laptop => "laptop",
            Platform::Phone => "phone",
            Platform::Tablet => "tablet",
            Platform::Other => "other",
        }
    }
}

/// A peer known to the registry
///
/// The identifier is immutable for the life of an installation; the
/// address and transfer port may change between announcements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Stable unique identifier (UUIDv4, generated once by the peer)
    pub device_id: String,

    /// Human-readable display name
    pub name: String,

    /// Coarse platform classification
    pub platform: Platform,

    /// Transport-observed source address of the last announcement
    pub address: IpAddr,

    /// TCP port the peer accepts transfer connections on
    pub transfer_port: u16,

    /// Liveness flag; only ever cleared by eviction
    pub online: bool,

    /// When the last announcement was seen (UNIX milliseconds, local clock)
    pub last_seen: u64,
}

impl Device {
    /// Build a device from a validated announcement and its observed
    /// source address. The address inside the payload, if any peer were
    /// to send one, is never consulted.
    pub fn from_announcement(ann: &Announcement, address: IpAddr, now_millis: u64) -> Self {
        Self {
            device_id: ann.device_id.clone(),
            name: ann.device_name.clone(),
            platform: ann.platform,
            address,
            transfer_port: ann.transfer_port,
            online: true,
            last_seen: now_millis,
        }
    }

    /// Milliseconds of silence since the last announcement
    pub fn silence(&self, now_millis: u64) -> u64 {
        now_millis.saturating_sub(self.last_seen)
    }
}

/// In-memory table of known peers, keyed by device identifier
///
/// Eviction is monotonic: a device only leaves via [`sweep`], never the
/// reverse except through a fresh [`upsert`]. No two devices ever share
/// an identifier.
///
/// [`sweep`]: DeviceRegistry::sweep
/// [`upsert`]: DeviceRegistry::upsert
#[derive(Debug)]
pub struct DeviceRegistry {
    devices: HashMap<String, Device>,
    staleness_window: Duration,
}

impl DeviceRegistry {
    /// Create a registry with the given staleness window
    ///
    /// The window should be at least 2-3x the announcement interval to
    /// tolerate lost packets.
    pub fn new(staleness_window: Duration) -> Self {
        Self {
            devices: HashMap::new(),
            staleness_window,
        }
    }

    /// Record or refresh a device from an announcement
    ///
    /// Returns `true` when the identifier was not present before (first
    /// sighting, or returning after eviction). Never panics on odd
    /// input; validation happens before this point.
    pub fn upsert(&mut self, ann: &Announcement, source: IpAddr, now_millis: u64) -> bool {
        match self.devices.get_mut(&ann.device_id) {
            Some(device) => {
                device.name = ann.device_name.clone();
                device.platform = ann.platform;
                device.address = source;
                device.transfer_port = ann.transfer_port;
                device.last_seen = now_millis;
                debug!(device_id = %ann.device_id, %source, "Refreshed device");
                false
            }
            None => {
                let device = Device::from_announcement(ann, source, now_millis);
                info!(
                    device_id = %device.device_id,
                    name = %device.name,
                    %source,
                    "New device"
                );
                self.devices.insert(ann.device_id.clone(), device);
                true
            }
        }
    }

    /// Evict every device whose silence exceeds the staleness window
    ///
    /// Returns the newly-offline devices so the caller can emit events.
    pub fn sweep(&mut self, now_millis: u64) -> Vec<Device> {
        let window = self.staleness_window.as_millis() as u64;
        let stale: Vec<String> = self
            .devices
            .values()
            .filter(|d| d.silence(now_millis) > window)
            .map(|d| d.device_id.clone())
            .collect();

        let mut evicted = Vec::with_capacity(stale.len());
        for id in stale {
            if let Some(mut device) = self.devices.remove(&id) {
                info!(device_id = %id, "Device offline");
                device.online = false;
                evicted.push(device);
            }
        }
        evicted
    }

    /// Snapshot of all currently-online devices
    pub fn list(&self) -> Vec<Device> {
        self.devices.values().cloned().collect()
    }

    /// Look up one device by identifier
    pub fn get(&self, device_id: &str) -> Option<&Device> {
        self.devices.get(device_id)
    }

    /// Number of known devices
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ann(id: &str, port: u16) -> Announcement {
        Announcement::new(id, "Test Device", Platform::Desktop, port)
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 168, 1, last))
    }

    #[test]
    fn test_upsert_new_then_refresh() {
        let mut reg = DeviceRegistry::new(Duration::from_secs(10));

        assert!(reg.upsert(&ann("dev-a", 48392), ip(10), 1_000));
        assert!(!reg.upsert(&ann("dev-a", 48392), ip(10), 2_000));
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get("dev-a").unwrap().last_seen, 2_000);
    }

    #[test]
    fn test_upsert_takes_most_recent_address_and_port() {
        let mut reg = DeviceRegistry::new(Duration::from_secs(10));
        reg.upsert(&ann("dev-a", 48392), ip(10), 1_000);
        reg.upsert(&ann("dev-a", 50000), ip(20), 2_000);

        let device = reg.get("dev-a").unwrap();
        assert_eq!(device.address, ip(20));
        assert_eq!(device.transfer_port, 50000);
    }

    #[test]
    fn test_no_duplicate_entries_for_same_identifier() {
        let mut reg = DeviceRegistry::new(Duration::from_secs(10));
        for t in 0..20 {
            reg.upsert(&ann("dev-a", 48392), ip(10), t * 100);
        }
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.list().len(), 1);
    }

    #[test]
    fn test_sweep_evicts_exactly_once() {
        let mut reg = DeviceRegistry::new(Duration::from_secs(10));
        reg.upsert(&ann("dev-a", 48392), ip(10), 0);

        // Announce interval 3000 ms, window 10000 ms: silent for 8000 ms
        // stays, silent for 11000 ms is evicted.
        assert!(reg.sweep(8_000).is_empty());
        let evicted = reg.sweep(11_000);
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].device_id, "dev-a");
        assert!(!evicted[0].online);

        // Second sweep finds nothing: the transition happened once.
        assert!(reg.sweep(12_000).is_empty());
        assert!(reg.is_empty());
    }

    #[test]
    fn test_announcements_within_window_keep_device_online() {
        let mut reg = DeviceRegistry::new(Duration::from_secs(10));
        let mut now = 0;
        reg.upsert(&ann("dev-a", 48392), ip(10), now);
        for _ in 0..5 {
            now += 3_000;
            assert!(reg.sweep(now).is_empty());
            reg.upsert(&ann("dev-a", 48392), ip(10), now);
        }
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_reappearance_after_eviction_is_newly_seen() {
        let mut reg = DeviceRegistry::new(Duration::from_secs(10));
        reg.upsert(&ann("dev-a", 48392), ip(10), 0);
        reg.sweep(20_000);
        assert!(reg.upsert(&ann("dev-a", 48392), ip(10), 21_000));
    }

    #[test]
    fn test_sweep_only_evicts_stale_devices() {
        let mut reg = DeviceRegistry::new(Duration::from_secs(10));
        reg.upsert(&ann("dev-a", 48392), ip(10), 0);
        reg.upsert(&ann("dev-b", 48392), ip(11), 9_000);

        let evicted = reg.sweep(11_000);
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].device_id, "dev-a");
        assert!(reg.get("dev-b").is_some());
    }
}
