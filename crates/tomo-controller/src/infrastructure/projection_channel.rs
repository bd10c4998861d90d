//! Projection channel: the WebSocket connection to the display receiver.
//!
//! ```text
//! Disconnected ──open──► Connecting ──ok──► Connected ──toggle──► Terminated
//!       ▲                    │                 │
//!       │                    └──error──► Error ◄┘ read/send failure
//!       └──────────── peer closed ─────────────┘
//! ```
//!
//! Every transition out of `Connected` pushes
//! [`ControllerEvent::ChannelClosed`] so the controller can stop sessions
//! that depend on the display.  Outbound frames are JSON text; inbound text
//! frames are decoded and forwarded as [`ControllerEvent::ChannelInbound`],
//! malformed ones are logged and dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message as WsMessage},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use tomo_core::{ChannelError, ChannelMessage};

use crate::application::{ControllerEvent, ProjectionSink};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;

/// Channel lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    Error(String),
    /// Closed by the user.
    Terminated,
}

/// Owns the display connection and implements [`ProjectionSink`].
pub struct ProjectionChannelManager {
    url: String,
    state: Arc<Mutex<ChannelState>>,
    sink: Arc<AsyncMutex<Option<WsSink>>>,
    /// Bumped whenever a connection is replaced or terminated.
    generation: Arc<AtomicU64>,
    reader: Mutex<Option<JoinHandle<()>>>,
    controller: mpsc::Sender<ControllerEvent>,
}

impl ProjectionChannelManager {
    pub fn new(url: impl Into<String>, controller: mpsc::Sender<ControllerEvent>) -> Self {
        Self {
            url: url.into(),
            state: Arc::new(Mutex::new(ChannelState::Disconnected)),
            sink: Arc::new(AsyncMutex::new(None)),
            generation: Arc::new(AtomicU64::new(0)),
            reader: Mutex::new(None),
            controller,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> ChannelState {
        lock(&self.state).clone()
    }

    /// Opens the channel, or terminates it when already connected.
    ///
    /// # Errors
    ///
    /// Returns the open error; see [`open`](Self::open).
    pub async fn toggle(&self) -> Result<ChannelState, ChannelError> {
        if self.is_connected() {
            self.terminate().await;
        } else {
            self.open().await?;
        }
        Ok(self.state())
    }

    /// Connects to the receiver.
    ///
    /// # Errors
    ///
    /// [`ChannelError::PermissionDenied`] if the receiver refuses the
    /// handshake with 401/403, otherwise [`ChannelError::StartFailed`].
    pub async fn open(&self) -> Result<(), ChannelError> {
        *lock(&self.state) = ChannelState::Connecting;
        info!("opening projection channel to {}", self.url);

        let ws = match connect_async(self.url.as_str()).await {
            Ok((ws, _response)) => ws,
            Err(e) => {
                let error = map_connect_error(e);
                warn!("projection channel failed to open: {error}");
                *lock(&self.state) = ChannelState::Error(error.to_string());
                return Err(error);
            }
        };

        let (sink, stream) = ws.split();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.sink.lock().await = Some(sink);
        *lock(&self.state) = ChannelState::Connected;

        let task = tokio::spawn(read_loop(
            stream,
            generation,
            Arc::clone(&self.generation),
            Arc::clone(&self.state),
            Arc::clone(&self.sink),
            self.controller.clone(),
        ));
        if let Some(old) = lock(&self.reader).replace(task) {
            old.abort();
        }
        info!("projection channel connected");
        Ok(())
    }

    /// Closes the channel at the user's request.
    pub async fn terminate(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let was_connected = {
            let mut state = lock(&self.state);
            let was = *state == ChannelState::Connected;
            *state = ChannelState::Terminated;
            was
        };
        if let Some(task) = lock(&self.reader).take() {
            task.abort();
        }
        if let Some(mut sink) = self.sink.lock().await.take() {
            if let Err(e) = sink.close().await {
                debug!("error closing projection channel: {e}");
            }
        }
        info!("projection channel terminated");
        if was_connected {
            let _ = self
                .controller
                .send(ControllerEvent::ChannelClosed { error: None })
                .await;
        }
    }
}

#[async_trait]
impl ProjectionSink for ProjectionChannelManager {
    async fn send(&self, message: ChannelMessage) -> Result<(), ChannelError> {
        let text = message
            .to_json()
            .map_err(|e| ChannelError::Encode(e.to_string()))?;
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(ChannelError::NotConnected)?;
        if let Err(e) = sink.send(WsMessage::Text(text)).await {
            // The read loop reports the closure to the controller.
            guard.take();
            let error = ChannelError::Lost(e.to_string());
            *lock(&self.state) = ChannelState::Error(error.to_string());
            return Err(error);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        *lock(&self.state) == ChannelState::Connected
    }
}

async fn read_loop(
    mut stream: SplitStream<WsStream>,
    generation: u64,
    current: Arc<AtomicU64>,
    state: Arc<Mutex<ChannelState>>,
    sink: Arc<AsyncMutex<Option<WsSink>>>,
    controller: mpsc::Sender<ControllerEvent>,
) {
    let mut error = None;
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => match ChannelMessage::from_json(&text) {
                Ok(message) => {
                    let _ = controller
                        .send(ControllerEvent::ChannelInbound(message))
                        .await;
                }
                Err(e) => warn!("dropping projection channel frame: {e}"),
            },
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => break,
            Err(e) => {
                error = Some(ChannelError::Lost(e.to_string()));
                break;
            }
        }
    }

    if current.load(Ordering::SeqCst) != generation {
        return;
    }
    sink.lock().await.take();
    {
        let mut state = lock(&state);
        if let Some(e) = &error {
            *state = ChannelState::Error(e.to_string());
        } else if !matches!(*state, ChannelState::Error(_)) {
            *state = ChannelState::Disconnected;
        }
    }
    warn!("projection channel closed by receiver");
    let _ = controller
        .send(ControllerEvent::ChannelClosed { error })
        .await;
}

fn map_connect_error(e: WsError) -> ChannelError {
    match e {
        WsError::Http(response) if matches!(response.status().as_u16(), 401 | 403) => {
            ChannelError::PermissionDenied
        }
        other => ChannelError::StartFailed(other.to_string()),
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
