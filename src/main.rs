//! macrokeyd: daemon that turns dedicated input devices into macro pads
//!
//! Each configured device is grabbed for exclusive access and polled on a
//! fixed tick. A per-device key ledger turns raw key transitions into
//! macro-key tokens: chords (`KEY_A+KEY_B`), held chords (`KEY_A+HELD`),
//! and timed sequences of chords (`KEY_A-KEY_B`). Completed tokens are
//! logged and written to stdout for the binding resolver downstream.
//!
//! `--capture` waits for the next macro key from any device, prints its
//! token, and exits.

mod config;
mod events;
mod ledger;
mod lifecycle;
mod session;
mod source;

use std::time::Duration;

use anyhow::{bail, Result};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, Settings};
use crate::events::DiagnosticEvent;
use crate::lifecycle::{ReloadSignal, ShutdownSignal};
use crate::session::{Aggregator, DeviceSession};
use crate::source::EvdevSource;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let capture_mode = std::env::args().any(|arg| arg == "--capture");

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "macrokeyd starting"
    );

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    let mut settings = Settings::load_or_default(&config.settings_path);
    debug!(?settings, "settings loaded");

    // Side channel for ledger/session diagnostics
    let (diag_tx, mut diag_rx) = broadcast::channel::<DiagnosticEvent>(64);

    let device_paths = config.device_paths()?;
    if device_paths.is_empty() {
        bail!(
            "no devices configured, add device node paths to {}",
            config.devices_path.display()
        );
    }

    // One session per configured device. A device that cannot be opened is
    // a per-device startup failure, the rest keep running.
    let mut aggregator = Aggregator::new(diag_tx.clone());
    for path in &device_paths {
        match EvdevSource::open_grabbed(path) {
            Ok(source) => {
                let name = source.device_name();
                aggregator.register(DeviceSession::new(name, source, diag_tx.clone()));
            }
            Err(err) => {
                error!(path = %path.display(), %err, "failed to open device, skipping");
            }
        }
    }
    if aggregator.is_empty() {
        bail!("none of the configured devices could be opened");
    }

    // One-shot capture: print the next macro key from any device and exit.
    if capture_mode {
        match aggregator.capture_next(&settings).await {
            Some(token) => println!("{token}"),
            None => bail!("all devices faulted before a macro key completed"),
        }
        return Ok(());
    }

    let shutdown = ShutdownSignal::new();
    let reload = ReloadSignal::new();
    let mut ticker = tokio::time::interval(Duration::from_secs_f64(settings.loop_delay));

    info!(devices = aggregator.len(), "daemon initialized, entering poll loop");

    loop {
        tokio::select! {
            // Poll every device once per tick
            _ = ticker.tick() => {
                let mut on_token = |device: &str, token: &str| {
                    info!(device, token, "macro key completed");
                    println!("{device}\t{token}");
                };
                aggregator.poll_all(&settings, Some(&mut on_token));
            }

            // SIGHUP: hot-reload settings, applied from the next tick on
            _ = reload.wait() => {
                let reloaded = Settings::load_or_default(&config.settings_path);
                if reloaded.loop_delay != settings.loop_delay {
                    ticker = tokio::time::interval(
                        Duration::from_secs_f64(reloaded.loop_delay),
                    );
                }
                settings = reloaded;
                info!(?settings, "settings reloaded");
            }

            // Surface side-channel diagnostics in the logs
            diag = diag_rx.recv() => {
                match diag {
                    Ok(event) => debug!(%event, "diagnostic"),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "diagnostic receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {}
                }
            }

            // Partial pending histories are simply dropped on shutdown
            _ = shutdown.wait() => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    info!("macrokeyd stopped");
    Ok(())
}
