//! WebSocket server: accept loop and per-session frame reader.
//!
//! Responsibilities:
//!
//! 1. Bind a TCP listener on the configured address.
//! 2. Upgrade each accepted connection to a WebSocket session.
//! 3. Decode every text frame and fold it into the shared [`DisplayState`].
//! 4. Publish each change on a `watch` channel so renderers only ever see the
//!    latest state.
//! 5. Stop accepting when the `running` flag is cleared.
//!
//! Sessions from more than one controller are accepted, but the controller
//! keeps only one channel open at a time, so in practice there is one.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use futures_util::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_tungstenite::{
    accept_async,
    tungstenite::{Error as WsError, Message as WsMessage},
};
use tracing::{debug, error, info, warn};

use crate::domain::{DisplayConfig, DisplayState};

/// How often the accept loop re-checks the shutdown flag.
const ACCEPT_POLL: Duration = Duration::from_millis(200);

/// A bound, not-yet-running display receiver.
pub struct DisplayServer {
    listener: TcpListener,
    state: Arc<watch::Sender<DisplayState>>,
}

impl DisplayServer {
    /// Binds the listener.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound (port in use, missing
    /// permission).
    pub async fn bind(config: &DisplayConfig) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .with_context(|| format!("failed to bind display listener on {}", config.bind_addr))?;
        let (tx, _rx) = watch::channel(DisplayState::default());
        Ok(Self {
            listener,
            state: Arc::new(tx),
        })
    }

    /// Address actually bound (useful with port 0).
    ///
    /// # Errors
    ///
    /// Returns an error if the OS cannot report the socket address.
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("failed to read display listener address")
    }

    /// Subscribes to display state changes.
    pub fn subscribe(&self) -> watch::Receiver<DisplayState> {
        self.state.subscribe()
    }

    /// Runs the accept loop until `running` is cleared.
    ///
    /// # Errors
    ///
    /// Currently never fails after a successful bind; accept errors are logged
    /// and the loop continues.
    pub async fn run(self, running: Arc<AtomicBool>) -> anyhow::Result<()> {
        info!("display receiver listening on {}", self.local_addr()?);

        loop {
            if !running.load(Ordering::Relaxed) {
                info!("shutdown flag set; stopping accept loop");
                break;
            }

            match timeout(ACCEPT_POLL, self.listener.accept()).await {
                Ok(Ok((stream, peer_addr))) => {
                    info!("controller connected from {peer_addr}");
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        handle_session(stream, peer_addr, state).await;
                    });
                }
                Ok(Err(e)) => {
                    error!("accept error: {e}");
                }
                Err(_) => {
                    // No connection within the poll interval.
                }
            }
        }

        Ok(())
    }
}

// ── Per-session handler ───────────────────────────────────────────────────────

async fn handle_session(
    raw_stream: TcpStream,
    peer_addr: SocketAddr,
    state: Arc<watch::Sender<DisplayState>>,
) {
    match run_session(raw_stream, peer_addr, state).await {
        Ok(()) => info!("session {peer_addr} closed"),
        Err(e) => warn!("session {peer_addr} closed with error: {e:#}"),
    }
}

async fn run_session(
    raw_stream: TcpStream,
    peer_addr: SocketAddr,
    state: Arc<watch::Sender<DisplayState>>,
) -> anyhow::Result<()> {
    let mut ws = accept_async(raw_stream)
        .await
        .with_context(|| format!("WebSocket handshake failed with {peer_addr}"))?;

    debug!("session {peer_addr}: WebSocket established");

    while let Some(frame) = ws.next().await {
        let msg = match frame {
            Ok(msg) => msg,
            Err(WsError::ConnectionClosed | WsError::Protocol(_)) => {
                debug!("session {peer_addr}: closed by peer");
                break;
            }
            Err(e) => return Err(e).context("WebSocket read failed"),
        };

        match msg {
            WsMessage::Text(text) => {
                state.send_if_modified(|s| s.apply_text(&text));
            }
            WsMessage::Binary(data) => {
                warn!(
                    "session {peer_addr}: ignoring binary frame ({} bytes)",
                    data.len()
                );
            }
            WsMessage::Close(_) => {
                debug!("session {peer_addr}: Close frame received");
                break;
            }
            WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {}
        }
    }

    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
