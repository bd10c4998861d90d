//! In-memory rig used by tests and by `--mock-device` bench runs.
//!
//! Records every command written and lets the caller fire trigger
//! notifications or drop the link on demand.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

use tomo_core::{DeviceCommand, LinkError};

use super::{BleTransport, LinkEvent, LinkHandle, PairedDevice};

const MOCK_DEVICE_SUFFIX: &str = "-MOCK";

#[derive(Default)]
struct MockRig {
    writes: Mutex<Vec<Vec<u8>>>,
    events: Mutex<Option<mpsc::Sender<LinkEvent>>>,
    next_connect_error: Mutex<Option<LinkError>>,
    disconnects: AtomicUsize,
}

/// Recording transport.  Cloning shares the same rig.
#[derive(Clone, Default)]
pub struct MockTransport {
    rig: Arc<MockRig>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `connect` fail with `error`.
    pub fn fail_next_connect(&self, error: LinkError) {
        *self.rig.next_connect_error.lock().unwrap_or_else(|p| p.into_inner()) = Some(error);
    }

    /// Raw bytes of every write, in order.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.rig
            .writes
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Every write decoded back into a command.
    pub fn written_commands(&self) -> Vec<DeviceCommand> {
        self.written()
            .iter()
            .filter_map(|bytes| DeviceCommand::decode(bytes))
            .collect()
    }

    pub fn disconnect_count(&self) -> usize {
        self.rig.disconnects.load(Ordering::SeqCst)
    }

    /// Fires one trigger notification.  Ignored when no link is open.
    pub async fn trigger(&self) {
        if let Some(tx) = self.sender() {
            let _ = tx.send(LinkEvent::Trigger).await;
        }
    }

    /// Simulates link loss (device powered off, out of range).
    pub async fn drop_link(&self) {
        let tx = self
            .rig
            .events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(tx) = tx {
            let _ = tx.send(LinkEvent::Disconnected).await;
        }
    }

    fn sender(&self) -> Option<mpsc::Sender<LinkEvent>> {
        self.rig
            .events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

#[async_trait]
impl BleTransport for MockTransport {
    async fn connect(&self, name_prefix: &str) -> Result<PairedDevice, LinkError> {
        if let Some(e) = self
            .rig
            .next_connect_error
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
        {
            return Err(e);
        }
        let (tx, rx) = mpsc::channel(32);
        *self.rig.events.lock().unwrap_or_else(|p| p.into_inner()) = Some(tx);
        Ok(PairedDevice {
            name: format!("{name_prefix}{MOCK_DEVICE_SUFFIX}"),
            handle: Arc::new(MockHandle {
                rig: Arc::clone(&self.rig),
            }),
            events: rx,
        })
    }
}

struct MockHandle {
    rig: Arc<MockRig>,
}

#[async_trait]
impl LinkHandle for MockHandle {
    async fn write_command(&self, bytes: &[u8]) -> Result<(), LinkError> {
        if let Some(cmd) = DeviceCommand::decode(bytes) {
            info!("mock device: command {:?}", cmd.fields());
        }
        self.rig
            .writes
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(bytes.to_vec());
        Ok(())
    }

    async fn disconnect(&self) {
        self.rig.disconnects.fetch_add(1, Ordering::SeqCst);
        // Dropping the sender ends the event stream.
        self.rig
            .events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
