//! Landrop Daemon
//!
//! Headless endpoint that announces this device on the local network,
//! tracks the peers it hears, and receives files into the download
//! directory. Sending is driven by frontends through the
//! `landrop-protocol` library; the daemon's job is presence and
//! receipt.

mod config;

use anyhow::{Context, Result};
use clap::Parser;
use config::Config;
use landrop_protocol::transfer::{AutoAccept, TransferConfig, TransferServer};
use landrop_protocol::{
    DeviceRegistry, DiscoveryEvent, DiscoveryService, LocalDevice, TransferEvent,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::RwLock;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};

/// Landrop daemon command-line interface
#[derive(Parser, Debug)]
#[command(name = "landrop-daemon")]
#[command(about = "LAN discovery and file transfer daemon", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the advertised device name
    #[arg(long, value_name = "NAME")]
    name: Option<String>,

    /// Override the download directory
    #[arg(long, value_name = "PATH")]
    download_dir: Option<PathBuf>,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(short, long, value_name = "LEVEL", default_value = "info")]
    log_level: String,

    /// Enable JSON structured logging
    #[arg(long)]
    json_logs: bool,
}

fn init_logging(cli: &Cli) -> Result<()> {
    let log_level = cli.log_level.parse::<Level>().with_context(|| {
        format!(
            "Invalid log level '{}'. Valid levels: error, warn, info, debug, trace",
            cli.log_level
        )
    })?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level.as_str()))
        .context("Failed to create log filter")?;

    let subscriber = fmt().with_env_filter(filter).with_target(true);
    if cli.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
    Ok(())
}

struct Daemon {
    discovery: DiscoveryService,
    discovery_events: UnboundedReceiver<DiscoveryEvent>,
    server: TransferServer,
    transfer_events: UnboundedReceiver<TransferEvent>,
}

impl Daemon {
    async fn new(config: Config, device_id: String) -> Result<Self> {
        let download_dir = config.transfer.download_dir.clone();
        std::fs::create_dir_all(&download_dir).context("Failed to create download directory")?;

        let mut transfer_config = TransferConfig::new(download_dir);
        transfer_config.port = config.network.transfer_port;
        transfer_config.port_range = config.network.transfer_port_range;
        let mut server = TransferServer::bind(transfer_config, Arc::new(AutoAccept))
            .await
            .context("Failed to bind transfer server")?;
        let transfer_events = server.subscribe().expect("fresh server has its receiver");

        let local = LocalDevice {
            device_id,
            name: config.device.name.clone(),
            platform: config.platform(),
            transfer_port: server.port(),
        };
        let registry = Arc::new(RwLock::new(DeviceRegistry::new(
            config.discovery_config().staleness_window,
        )));
        let mut discovery = DiscoveryService::bind(local, config.discovery_config(), registry)
            .await
            .context("Failed to bind discovery socket")?;
        let discovery_events = discovery
            .subscribe()
            .expect("fresh discovery service has its receiver");

        Ok(Self {
            discovery,
            discovery_events,
            server,
            transfer_events,
        })
    }

    async fn run(&mut self) -> Result<()> {
        self.server.start()?;
        self.discovery.start()?;
        self.discovery.announce_now().await?;

        loop {
            tokio::select! {
                Some(event) = self.discovery_events.recv() => {
                    handle_discovery_event(event);
                }
                Some(event) = self.transfer_events.recv() => {
                    handle_transfer_event(event);
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        self.discovery.stop();
        self.server.stop();
        Ok(())
    }
}

fn handle_discovery_event(event: DiscoveryEvent) {
    match event {
        DiscoveryEvent::DeviceDiscovered { device } => {
            info!(
                device_id = %device.device_id,
                name = %device.name,
                address = %device.address,
                port = device.transfer_port,
                "Device discovered"
            );
        }
        DiscoveryEvent::DeviceOffline { device_id } => {
            info!(%device_id, "Device went offline");
        }
        DiscoveryEvent::ServiceStarted { port } => {
            debug!(port, "Discovery service started");
        }
        DiscoveryEvent::ServiceStopped => {
            debug!("Discovery service stopped");
        }
        DiscoveryEvent::Error { message } => {
            warn!(%message, "Discovery error");
        }
    }
}

fn handle_transfer_event(event: TransferEvent) {
    match event {
        TransferEvent::RequestReceived { task } => {
            info!(
                task_id = %task.id,
                from = %task.peer_name,
                files = task.files.len(),
                total = task.total_size,
                "Incoming transfer request"
            );
        }
        TransferEvent::Progress {
            task_id,
            transferred,
            total,
            throughput_bps,
        } => {
            debug!(%task_id, transferred, total, throughput_bps, "Transfer progress");
        }
        TransferEvent::Completed { task } => {
            info!(task_id = %task.id, bytes = task.transferred, "Transfer completed");
        }
        TransferEvent::Rejected { task_id, reason } => {
            info!(%task_id, %reason, "Transfer rejected");
        }
        TransferEvent::Failed { task_id, reason } => {
            warn!(%task_id, %reason, "Transfer failed");
        }
        TransferEvent::Cancelled { task_id } => {
            info!(%task_id, "Transfer cancelled");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli).context("Failed to initialize logging")?;

    info!("Starting landrop daemon...");

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load(&config_path).context("Failed to load configuration")?;
    let device_id = config
        .ensure_device_id(&config_path)
        .context("Failed to establish device ID")?;

    // CLI overrides apply to this run only; they are not written back.
    if let Some(name) = cli.name {
        config.device.name = name;
    }
    if let Some(download_dir) = cli.download_dir {
        config.transfer.download_dir = download_dir;
    }

    info!("Device name: {}", config.device.name);
    info!("Device ID: {}", device_id);
    info!("Download directory: {}", config.transfer.download_dir.display());

    let mut daemon = Daemon::new(config, device_id)
        .await
        .context("Failed to create daemon")?;
    daemon.run().await?;

    info!("Daemon stopped");
    Ok(())
}
