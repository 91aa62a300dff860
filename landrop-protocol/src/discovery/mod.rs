//! Presence Discovery
//!
//! Periodic, loss-tolerant presence protocol over UDP broadcast. Every
//! device announces itself at a fixed interval on a well-known port and
//! ingests the announcements of others into the [`DeviceRegistry`],
//! evicting peers that fall silent past the staleness window.
//!
//! [`DeviceRegistry`]: crate::device::DeviceRegistry

mod announce;
mod events;
mod service;

pub use announce::{current_timestamp, Announcement, ANNOUNCE_KIND};
pub use events::DiscoveryEvent;
pub use service::{
    DiscoveryConfig, DiscoveryService, LocalDevice, BROADCAST_ADDR, DEFAULT_ANNOUNCE_INTERVAL,
    DEFAULT_STALENESS_WINDOW, DEFAULT_SWEEP_INTERVAL, DISCOVERY_PORT,
};

pub(crate) use announce::current_millis;
