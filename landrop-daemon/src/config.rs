//! Daemon Configuration
//!
//! TOML configuration for the landrop daemon, loaded from the user's
//! config directory (or an explicit `--config` path) with defaults
//! filled in for anything missing. The auto-generated device ID is
//! written back so the device keeps its identity across restarts.

use anyhow::{Context, Result};
use landrop_protocol::discovery::{
    DEFAULT_ANNOUNCE_INTERVAL, DEFAULT_STALENESS_WINDOW, DEFAULT_SWEEP_INTERVAL,
};
use landrop_protocol::transfer::{TRANSFER_PORT, TRANSFER_PORT_RANGE};
use landrop_protocol::{DiscoveryConfig, Platform, DISCOVERY_PORT};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Device identity
    #[serde(default)]
    pub device: DeviceConfig,

    /// Network ports and timing
    #[serde(default)]
    pub network: NetworkConfig,

    /// Transfer behavior
    #[serde(default)]
    pub transfer: TransferSettings,
}

/// Device identity configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Name shown to other devices
    #[serde(default = "default_device_name")]
    pub name: String,

    /// Platform tag (desktop, laptop, phone, tablet)
    #[serde(default = "default_platform")]
    pub platform: String,

    /// Stable device ID (auto-generated and persisted if not set)
    #[serde(default)]
    pub device_id: Option<String>,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// UDP discovery port
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,

    /// First TCP transfer port to try
    #[serde(default = "default_transfer_port")]
    pub transfer_port: u16,

    /// Number of consecutive transfer ports to scan
    #[serde(default = "default_transfer_port_range")]
    pub transfer_port_range: u16,

    /// Seconds between presence announcements
    #[serde(default = "default_announce_interval")]
    pub announce_interval_secs: u64,

    /// Seconds of silence before a device is considered offline
    #[serde(default = "default_staleness_window")]
    pub staleness_secs: u64,

    /// Seconds between staleness sweeps
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

/// Transfer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSettings {
    /// Directory received files land in
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
}

fn default_device_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "landrop-device".to_string())
}

fn default_platform() -> String {
    "desktop".to_string()
}

fn default_discovery_port() -> u16 {
    DISCOVERY_PORT
}

fn default_transfer_port() -> u16 {
    TRANSFER_PORT
}

fn default_transfer_port_range() -> u16 {
    TRANSFER_PORT_RANGE
}

fn default_announce_interval() -> u64 {
    DEFAULT_ANNOUNCE_INTERVAL.as_secs()
}

fn default_staleness_window() -> u64 {
    DEFAULT_STALENESS_WINDOW.as_secs()
}

fn default_sweep_interval() -> u64 {
    DEFAULT_SWEEP_INTERVAL.as_secs()
}

fn default_download_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join("Downloads")))
        .unwrap_or_else(|| PathBuf::from("downloads"))
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: default_device_name(),
            platform: default_platform(),
            device_id: None,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            discovery_port: default_discovery_port(),
            transfer_port: default_transfer_port(),
            transfer_port_range: default_transfer_port_range(),
            announce_interval_secs: default_announce_interval(),
            staleness_secs: default_staleness_window(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
        }
    }
}

impl Config {
    /// Default location: `<config dir>/landrop/daemon.toml`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("landrop")
            .join("daemon.toml")
    }

    /// Load from `path`, creating a default file if it is missing
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path).context("Failed to read config file")?;
            let config: Config = toml::from_str(&contents).context("Failed to parse config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            Ok(config)
        }
    }

    /// Save to `path`, creating parent directories as needed
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// The stable device ID, generating and persisting one on first run
    pub fn ensure_device_id(&mut self, path: &Path) -> Result<String> {
        if let Some(id) = &self.device.device_id {
            return Ok(id.clone());
        }
        let id = Uuid::new_v4().to_string();
        self.device.device_id = Some(id.clone());
        self.save(path).context("Failed to persist device ID")?;
        Ok(id)
    }

    /// The configured platform tag as a protocol value
    pub fn platform(&self) -> Platform {
        match self.device.platform.as_str() {
            "laptop" => Platform::Laptop,
            "phone" => Platform::Phone,
            "tablet" => Platform::Tablet,
            "desktop" => Platform::Desktop,
            _ => Platform::Other,
        }
    }

    /// Discovery service settings derived from this config
    pub fn discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            discovery_port: self.network.discovery_port,
            announce_interval: Duration::from_secs(self.network.announce_interval_secs),
            staleness_window: Duration::from_secs(self.network.staleness_secs),
            sweep_interval: Duration::from_secs(self.network.sweep_interval_secs),
        }
    }
}
