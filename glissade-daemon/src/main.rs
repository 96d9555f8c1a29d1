//! Glissade Daemon
//!
//! The daemon is the minimal host for the interceptor core: it loads
//! the settings snapshot, starts the device registry, runs the
//! interceptor, logs device hot-plug, and tears everything down on
//! SIGINT/SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use glissade_common::{Settings, SettingsStore};
use glissade_input::{DeviceRegistry, Interceptor};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "glissade-daemon")]
#[command(about = "Input transformer for external mice and keyboards", long_about = None)]
struct Args {
    /// Path to the JSON settings file
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Keep running even when accessibility permission is missing,
    /// retrying once it is granted
    #[arg(long)]
    wait_for_permission: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Glissade starting...");

    let settings = match &args.settings {
        Some(path) => Settings::load_json(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => Settings::default(),
    };
    let store = Arc::new(SettingsStore::new(settings));

    let mut registry = DeviceRegistry::new();
    registry
        .start()
        .context("starting the device registry")?;
    let registry = Arc::new(registry);

    for device in registry.connected_devices() {
        info!(
            "  {} {} ({:04x}:{:04x}, {:?}{})",
            device.vendor_name,
            device.product_name,
            device.vendor_id,
            device.product_id,
            device.kind,
            if device.first_party { ", first-party" } else { "" },
        );
    }

    if !glissade_input::has_accessibility_permission() {
        warn!("Accessibility permission not granted");
        glissade_input::request_accessibility_permission();
        if !args.wait_for_permission {
            anyhow::bail!(
                "accessibility permission required; grant it in System Settings > \
                 Privacy & Security > Accessibility and restart"
            );
        }
        info!("Waiting for accessibility permission...");
        while !glissade_input::has_accessibility_permission() {
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        }
    }

    let mut interceptor =
        Interceptor::new(store.clone(), registry.clone()).context("creating the interceptor")?;
    interceptor.start().context("starting the interceptor")?;
    info!("Interceptor running");

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("setting up SIGTERM handler")?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
        .context("setting up SIGINT handler")?;

    let changes = registry.change_receiver();
    let change_logger = tokio::task::spawn_blocking(move || {
        while let Ok(devices) = changes.recv() {
            let external_mice = devices
                .iter()
                .filter(|d| d.kind == glissade_input::DeviceKind::Mouse && !d.first_party)
                .count();
            let external_keyboards = devices
                .iter()
                .filter(|d| d.kind == glissade_input::DeviceKind::Keyboard && !d.first_party)
                .count();
            info!(
                devices = devices.len(),
                external_mice, external_keyboards, "device set changed"
            );
        }
    });

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        _ = sigint.recv() => info!("Received SIGINT, shutting down..."),
    }

    interceptor.stop();
    let stats = interceptor.stats();
    info!(
        "Session totals: {} events seen, {} suppressed, {} transformed",
        stats.seen, stats.suppressed, stats.transformed
    );

    change_logger.abort();
    // Dropping the last registry handle stops the enumeration thread.
    drop(interceptor);
    drop(registry);

    info!("Shutdown complete");
    Ok(())
}
