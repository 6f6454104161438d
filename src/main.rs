mod session;
mod transport;

use anyhow::{Context, Result};
use lbs_shared::Role;
use session::{CccdLocator, SessionConfig, SessionManager};
use std::future::Future;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::oneshot;
use transport::BluezConnector;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = SessionConfig {
        // BlueZ reports CCCDs as descriptor objects; handle + 1 is not guaranteed there
        cccd: CccdLocator::Discover,
        ..Default::default()
    };
    config
        .target_address
        .parse::<bluer::Address>()
        .with_context(|| format!("invalid target address {}", config.target_address))?;

    let manager = SessionManager::new(config, BluezConnector::new());
    info!("=== Connecting to {} ===", manager.config().display_name);
    info!("Press Ctrl+C to exit");

    // Registered before connecting so Ctrl+C during setup still disconnects
    let shutdown = shutdown_on_interrupt().context("Failed to listen for Ctrl+C")?;

    // A connection failure on both address types exits with status 1
    let report = manager
        .start(shutdown)
        .await
        .context("Unable to connect, exiting")?;

    for role in [Role::Button, Role::Led, Role::Sensor] {
        match report.roles.get(role) {
            Some(c) => info!("{} characteristic: {} ({:#06x})", role, c.uuid, c.handle),
            None => warn!("No {} characteristic found", role),
        }
    }
    for role in &report.disabled {
        warn!("{} updates were unavailable this run", role);
    }
    if let Some(e) = &report.disconnect_error {
        warn!("{}", e);
    }
    info!(
        "Session ended ({}): {} events, {} keep-alive reads ({} failed), {} LED toggles",
        report.stopped_by,
        report.events,
        report.keep_alive_reads,
        report.keep_alive_failures,
        report.led_toggles
    );

    match report.exit_code() {
        0 => Ok(()),
        code => std::process::exit(code),
    }
}

/// Resolves once SIGINT arrives; the handler is installed immediately
fn shutdown_on_interrupt() -> Result<impl Future<Output = ()>> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        if interrupt.recv().await.is_some() {
            let _ = tx.send(());
        } else {
            error!("Ctrl+C listener closed");
            // tx stays alive here so shutdown never fires spuriously
            std::future::pending::<()>().await;
        }
    });

    Ok(async move {
        if rx.await.is_err() {
            std::future::pending::<()>().await;
        }
    })
}
