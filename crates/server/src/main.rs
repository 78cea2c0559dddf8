//! usbipd server binary
//!
//! Exports locally attached USB devices to remote USB/IP clients over TCP.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use common::setup_logging;
use server::config::ServerConfig;
use server::network;
use server::registry::{self, Registry};
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "usbipd")]
#[command(
    author,
    version,
    about = "USB/IP server - export local USB devices over TCP"
)]
#[command(long_about = "
Exports USB devices captured by the kernel monitor driver to remote USB/IP
clients such as the Linux vhci-hcd driver.

EXAMPLES:
    # Run with default config
    usbipd

    # Run with custom config
    usbipd --config /path/to/server.toml

    # Override the listen address
    usbipd --bind 0.0.0.0:3240

    # Run with debug logging
    usbipd --log-level debug

CONFIGURATION:
    The server looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/usbipd/server.toml
    3. /etc/usbipd/server.toml
    4. Built-in defaults

Exported devices are declared as [[export]] tables naming the bus id and
the monitor driver node.
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Listen address, overrides the configured one
    #[arg(short, long, value_name = "ADDR")]
    bind: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // --save-config writes the defaults and never starts the server
    if args.save_config {
        return write_default_config();
    }

    // an explicitly named config file must load; the implicit search may
    // come up empty and fall back to defaults
    let config = match args.config {
        Some(ref path) => {
            ServerConfig::load(Some(path.clone())).context("cannot load configuration")?
        }
        None => ServerConfig::load_or_default(),
    };

    // CLI flag wins over the configured log level
    setup_logging(args.log_level.as_deref().unwrap_or(&config.server.log_level))
        .context("cannot initialize logging")?;

    info!("usbipd v{}", env!("CARGO_PKG_VERSION"));

    // Probe every configured export; a device that cannot answer
    // GET_DESCRIPTOR is skipped rather than offered broken.
    let mut devices = Vec::new();
    for entry in &config.exports {
        match registry::probe_export(entry, config.driver.worker_threads).await {
            Ok(device) => {
                info!(
                    "exporting {} ({:04x}:{:04x})",
                    device.busid, device.identity.id_vendor, device.identity.id_product
                );
                devices.push(device);
            }
            Err(err) => warn!("skipping export {}: {:#}", entry.busid, err),
        }
    }
    if devices.is_empty() {
        warn!("no devices to export; serving an empty device list");
    }
    let registry = Arc::new(Registry::new(devices));

    let bind_addr = args.bind.unwrap_or_else(|| config.server.bind_addr.clone());

    tokio::select! {
        result = network::serve(&bind_addr, registry, config.driver.worker_threads) => result,
        _ = signal::ctrl_c() => {
            info!("received Ctrl+C, shutting down");
            Ok(())
        }
    }
}

fn write_default_config() -> Result<()> {
    let path = ServerConfig::default_path();
    ServerConfig::default().save(&path)?;
    println!("wrote default configuration to {}", path.display());
    Ok(())
}
