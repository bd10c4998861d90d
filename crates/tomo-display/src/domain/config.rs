//! Receiver configuration.

use std::net::{Ipv4Addr, SocketAddr};

/// Default WebSocket port of the display receiver.
pub const DEFAULT_PORT: u16 = 8765;

/// Runtime configuration for the display receiver.
///
/// Built once at startup from CLI arguments (see `main.rs`).
#[derive(Debug, Clone)]
pub struct DisplayConfig {
    /// Address the WebSocket listener binds to.
    ///
    /// `0.0.0.0` accepts a controller on another machine; `127.0.0.1` keeps
    /// the receiver local.
    pub bind_addr: SocketAddr,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
