//! Device link: the Bluetooth LE command connection to the rig.
//!
//! The [`DeviceLinkManager`] owns at most one paired device.  It writes
//! 24-byte commands to the command characteristic and relays notifications
//! from the trigger characteristic to the controller as
//! [`ControllerEvent::DeviceTrigger`].
//!
//! When the link drops (user disconnect or link loss) the handle is
//! invalidated first and only then is [`ControllerEvent::DeviceDisconnected`]
//! pushed, so the controller never observes a dead handle as connected.
//!
//! The radio itself sits behind [`BleTransport`]:
//!
//! - `ble` (feature `ble`) – btleplug over the platform Bluetooth stack.
//! - `mock` – in-memory rig for tests and bench runs.
//! - [`UnavailableTransport`] – builds without Bluetooth support.

pub mod mock;

#[cfg(feature = "ble")]
pub mod ble;

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use tomo_core::{DeviceCommand, LinkError};

use crate::application::{CommandLink, ControllerEvent};

/// Notification from a paired device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// The trigger characteristic notified.
    Trigger,
    /// The GATT connection is gone.
    Disconnected,
}

/// An open connection to one device.
#[async_trait]
pub trait LinkHandle: Send + Sync {
    /// Writes `bytes` to the command characteristic.
    async fn write_command(&self, bytes: &[u8]) -> Result<(), LinkError>;

    /// Closes the connection.  Never fails; errors are logged.
    async fn disconnect(&self);
}

/// Result of a successful connect.
pub struct PairedDevice {
    pub name: String,
    pub handle: Arc<dyn LinkHandle>,
    /// Ends (or yields [`LinkEvent::Disconnected`]) when the link drops.
    pub events: mpsc::Receiver<LinkEvent>,
}

/// Discovers and connects to a device.
#[async_trait]
pub trait BleTransport: Send + Sync {
    /// Connects to the first device whose advertised name starts with
    /// `name_prefix`, subscribes to its trigger characteristic and resolves
    /// the command characteristic.
    async fn connect(&self, name_prefix: &str) -> Result<PairedDevice, LinkError>;
}

/// Transport for builds or hosts without Bluetooth LE.
pub struct UnavailableTransport;

#[async_trait]
impl BleTransport for UnavailableTransport {
    async fn connect(&self, _name_prefix: &str) -> Result<PairedDevice, LinkError> {
        Err(LinkError::Unavailable)
    }
}

/// Awaits `setup`; when it fails, awaits `release` before returning the
/// error.  Transports wrap everything after a successful GATT connect in
/// this so a half-opened device is disconnected again and keeps
/// advertising.
#[cfg_attr(not(feature = "ble"), allow(dead_code))]
pub(crate) async fn release_on_error<T, S, R>(setup: S, release: R) -> Result<T, LinkError>
where
    S: Future<Output = Result<T, LinkError>>,
    R: Future<Output = ()>,
{
    match setup.await {
        Ok(value) => Ok(value),
        Err(e) => {
            release.await;
            Err(e)
        }
    }
}

/// Connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceLinkState {
    Disconnected,
    Connecting,
    Connected,
}

struct LinkSlot {
    state: DeviceLinkState,
    handle: Option<Arc<dyn LinkHandle>>,
    device_name: Option<String>,
    /// Bumped on every connect and disconnect; pumps from older links stop
    /// reporting.
    generation: u64,
}

/// Owns the device link and implements [`CommandLink`] for the controller.
pub struct DeviceLinkManager {
    transport: Arc<dyn BleTransport>,
    name_prefix: String,
    slot: Arc<Mutex<LinkSlot>>,
    controller: mpsc::Sender<ControllerEvent>,
}

impl DeviceLinkManager {
    pub fn new(
        transport: Arc<dyn BleTransport>,
        name_prefix: impl Into<String>,
        controller: mpsc::Sender<ControllerEvent>,
    ) -> Self {
        Self {
            transport,
            name_prefix: name_prefix.into(),
            slot: Arc::new(Mutex::new(LinkSlot {
                state: DeviceLinkState::Disconnected,
                handle: None,
                device_name: None,
                generation: 0,
            })),
            controller,
        }
    }

    pub fn state(&self) -> DeviceLinkState {
        lock(&self.slot).state
    }

    /// Name of the paired device, if any.
    pub fn device_name(&self) -> Option<String> {
        lock(&self.slot).device_name.clone()
    }

    /// Discovers and pairs a device, replacing any current link.
    ///
    /// Returns the paired device's name.
    ///
    /// # Errors
    ///
    /// Returns the transport's [`LinkError`]; the manager is left
    /// `Disconnected`.
    pub async fn connect(&self) -> Result<String, LinkError> {
        if self.is_connected() {
            self.disconnect().await;
        }
        lock(&self.slot).state = DeviceLinkState::Connecting;
        info!("scanning for device '{}*'", self.name_prefix);

        let paired = match self.transport.connect(&self.name_prefix).await {
            Ok(paired) => paired,
            Err(e) => {
                lock(&self.slot).state = DeviceLinkState::Disconnected;
                warn!("device connect failed: {e}");
                return Err(e);
            }
        };

        let generation = {
            let mut slot = lock(&self.slot);
            slot.generation += 1;
            slot.state = DeviceLinkState::Connected;
            slot.handle = Some(paired.handle);
            slot.device_name = Some(paired.name.clone());
            slot.generation
        };
        info!("connected to device {}", paired.name);

        tokio::spawn(pump_events(
            paired.events,
            generation,
            Arc::clone(&self.slot),
            self.controller.clone(),
        ));
        Ok(paired.name)
    }

    /// Closes the link and tells the controller.  No-op when not connected.
    pub async fn disconnect(&self) {
        let handle = {
            let mut slot = lock(&self.slot);
            slot.generation += 1;
            slot.state = DeviceLinkState::Disconnected;
            slot.device_name = None;
            slot.handle.take()
        };
        if let Some(handle) = handle {
            handle.disconnect().await;
            info!("device disconnected by user");
            let _ = self.controller.send(ControllerEvent::DeviceDisconnected).await;
        }
    }
}

#[async_trait]
impl CommandLink for DeviceLinkManager {
    async fn send_command(&self, command: DeviceCommand) -> Result<(), LinkError> {
        let handle = lock(&self.slot)
            .handle
            .clone()
            .ok_or(LinkError::NotConnected)?;
        debug!("writing device command {:?}", command.fields());
        handle.write_command(&command.encode()).await
    }

    fn is_connected(&self) -> bool {
        lock(&self.slot).handle.is_some()
    }
}

/// Relays link events until the link drops, then invalidates the handle
/// (if it still belongs to this link) before notifying the controller.
async fn pump_events(
    mut events: mpsc::Receiver<LinkEvent>,
    generation: u64,
    slot: Arc<Mutex<LinkSlot>>,
    controller: mpsc::Sender<ControllerEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            LinkEvent::Trigger => {
                if lock(&slot).generation != generation {
                    break;
                }
                if controller.send(ControllerEvent::DeviceTrigger).await.is_err() {
                    return;
                }
            }
            LinkEvent::Disconnected => break,
        }
    }

    let lost = {
        let mut slot = lock(&slot);
        if slot.generation == generation {
            slot.generation += 1;
            slot.state = DeviceLinkState::Disconnected;
            slot.device_name = None;
            slot.handle.take().is_some()
        } else {
            false
        }
    };
    if lost {
        warn!("device link lost");
        let _ = controller.send(ControllerEvent::DeviceDisconnected).await;
    }
}

fn lock(slot: &Mutex<LinkSlot>) -> MutexGuard<'_, LinkSlot> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::mock::MockTransport;
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    use tomo_core::ProjectionParams;

    fn manager(transport: Arc<MockTransport>) -> (DeviceLinkManager, mpsc::Receiver<ControllerEvent>) {
        let (tx, rx) = mpsc::channel(16);
        (DeviceLinkManager::new(transport, "ESP32", tx), rx)
    }

    async fn next_event(rx: &mut mpsc::Receiver<ControllerEvent>) -> ControllerEvent {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("event in time")
            .expect("queue open")
    }

    #[tokio::test]
    async fn test_failed_setup_releases_connection() {
        // Arrange
        let released = std::sync::atomic::AtomicBool::new(false);

        // Act
        let result: Result<(), LinkError> = release_on_error(
            async { Err(LinkError::CharacteristicNotFound("trigger".into())) },
            async { released.store(true, std::sync::atomic::Ordering::SeqCst) },
        )
        .await;

        // Assert
        assert_eq!(
            result,
            Err(LinkError::CharacteristicNotFound("trigger".into()))
        );
        assert!(released.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_successful_setup_keeps_connection() {
        let released = std::sync::atomic::AtomicBool::new(false);
        let result = release_on_error(
            async { Ok(7) },
            async { released.store(true, std::sync::atomic::Ordering::SeqCst) },
        )
        .await;
        assert_eq!(result, Ok(7));
        assert!(!released.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_send_without_device_is_not_connected() {
        let (mgr, _rx) = manager(Arc::new(MockTransport::new()));
        let result = mgr.send_command(DeviceCommand::STOP).await;
        assert_eq!(result, Err(LinkError::NotConnected));
    }

    #[tokio::test]
    async fn test_connect_and_write_encoded_command() {
        // Arrange
        let transport = Arc::new(MockTransport::new());
        let (mgr, _rx) = manager(Arc::clone(&transport));

        // Act
        let name = mgr.connect().await.unwrap();
        let cmd = DeviceCommand::print(&ProjectionParams::default());
        mgr.send_command(cmd).await.unwrap();

        // Assert
        assert!(name.starts_with("ESP32"));
        assert_eq!(mgr.state(), DeviceLinkState::Connected);
        assert_eq!(transport.written_commands(), vec![cmd]);
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_manager_disconnected() {
        let transport = Arc::new(MockTransport::new());
        transport.fail_next_connect(LinkError::NoDeviceSelected);
        let (mgr, _rx) = manager(transport);

        let result = mgr.connect().await;

        assert_eq!(result, Err(LinkError::NoDeviceSelected));
        assert_eq!(mgr.state(), DeviceLinkState::Disconnected);
    }

    #[tokio::test]
    async fn test_trigger_notification_reaches_controller() {
        let transport = Arc::new(MockTransport::new());
        let (mgr, mut rx) = manager(Arc::clone(&transport));
        mgr.connect().await.unwrap();

        transport.trigger().await;

        assert!(matches!(next_event(&mut rx).await, ControllerEvent::DeviceTrigger));
    }

    #[tokio::test]
    async fn test_link_loss_invalidates_handle_before_notifying() {
        // Arrange
        let transport = Arc::new(MockTransport::new());
        let (mgr, mut rx) = manager(Arc::clone(&transport));
        mgr.connect().await.unwrap();

        // Act
        transport.drop_link().await;
        let event = next_event(&mut rx).await;

        // Assert
        assert!(matches!(event, ControllerEvent::DeviceDisconnected));
        assert!(!mgr.is_connected(), "handle cleared before the event");
        assert_eq!(
            mgr.send_command(DeviceCommand::STOP).await,
            Err(LinkError::NotConnected)
        );
    }

    #[tokio::test]
    async fn test_user_disconnect_notifies_once() {
        // Arrange
        let transport = Arc::new(MockTransport::new());
        let (mgr, mut rx) = manager(Arc::clone(&transport));
        mgr.connect().await.unwrap();

        // Act
        mgr.disconnect().await;
        mgr.disconnect().await;

        // Assert
        assert!(matches!(next_event(&mut rx).await, ControllerEvent::DeviceDisconnected));
        assert!(
            timeout(Duration::from_millis(100), rx.recv()).await.is_err(),
            "the old pump must not report a second disconnect"
        );
        assert_eq!(transport.disconnect_count(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_transport_reports_unavailable() {
        let (tx, _rx) = mpsc::channel(1);
        let mgr = DeviceLinkManager::new(Arc::new(UnavailableTransport), "ESP32", tx);
        assert_eq!(mgr.connect().await, Err(LinkError::Unavailable));
    }
}
