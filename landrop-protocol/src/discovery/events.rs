//! Discovery Event System
//!
//! Events emitted by the discovery service. Besides registry state these
//! are the only externally visible effects of discovery.

use crate::device::Device;

/// Events emitted by the discovery service
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    /// A device was seen for the first time (or returned after eviction)
    DeviceDiscovered {
        /// Registry snapshot of the discovered device
        device: Device,
    },

    /// A device fell silent past the staleness window and was evicted
    DeviceOffline {
        /// Identifier of the evicted device
        device_id: String,
    },

    /// Discovery service started successfully
    ServiceStarted {
        /// UDP port the service is bound to
        port: u16,
    },

    /// Discovery service stopped
    ServiceStopped,

    /// A socket-level failure shut discovery down
    ///
    /// Discovery is not auto-restarted; whether to rebind is the owning
    /// process's decision.
    Error {
        /// Failure description
        message: String,
    },
}

impl DiscoveryEvent {
    /// Check if this is a device discovered event
    pub fn is_device_discovered(&self) -> bool {
        matches!(self, DiscoveryEvent::DeviceDiscovered { .. })
    }

    /// Check if this is a device offline event
    pub fn is_device_offline(&self) -> bool {
        matches!(self, DiscoveryEvent::DeviceOffline { .. })
    }

    /// Get the device ID if this event is device-related
    pub fn device_id(&self) -> Option<&str> {
        match self {
            DiscoveryEvent::DeviceDiscovered { device } => Some(&device.device_id),
            DiscoveryEvent::DeviceOffline { device_id } => Some(device_id),
            _ => None,
        }
    }
}
