//! TomoPrint display receiver: entry point.
//!
//! Runs on the machine driving the projector.  The controller connects to it
//! over WebSocket and pushes frames, alignment and calibration toggles; every
//! resulting display state is logged so a headless rig can be verified from
//! its journal.
//!
//! # Usage
//!
//! ```text
//! tomo-display [OPTIONS]
//!
//! Options:
//!   --bind <ADDR>   Interface to listen on [default: 0.0.0.0]
//!   --port <PORT>   WebSocket port [default: 8765]
//! ```
//!
//! | Variable             | Default   |
//! |----------------------|-----------|
//! | `TOMO_DISPLAY_BIND`  | `0.0.0.0` |
//! | `TOMO_DISPLAY_PORT`  | `8765`    |

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tomo_display::domain::config::DEFAULT_PORT;
use tomo_display::domain::DisplayConfig;
use tomo_display::infrastructure::DisplayServer;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// TomoPrint projection display receiver.
#[derive(Debug, Parser)]
#[command(
    name = "tomo-display",
    about = "Projection channel receiver for TomoPrint",
    version
)]
struct Cli {
    /// IP address to bind the WebSocket listener to.
    #[arg(long, default_value = "0.0.0.0", env = "TOMO_DISPLAY_BIND")]
    bind: String,

    /// TCP port for the WebSocket listener.
    #[arg(long, default_value_t = DEFAULT_PORT, env = "TOMO_DISPLAY_PORT")]
    port: u16,
}

impl Cli {
    /// Converts the parsed arguments into a [`DisplayConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error if `--bind` is not a valid IP address.
    fn into_display_config(self) -> anyhow::Result<DisplayConfig> {
        let bind_addr: SocketAddr = format!("{}:{}", self.bind, self.port)
            .parse()
            .with_context(|| format!("invalid bind address: '{}:{}'", self.bind, self.port))?;
        Ok(DisplayConfig { bind_addr })
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_display_config()?;
    info!("TomoPrint display receiver starting on {}", config.bind_addr);

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    let server = DisplayServer::bind(&config).await?;

    // Headless renderer: report every state change.
    let mut updates = server.subscribe();
    tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let summary = updates.borrow_and_update().summary();
            info!("display: {summary}");
        }
    });

    server.run(running).await?;

    info!("TomoPrint display receiver stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
