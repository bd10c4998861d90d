//! Bluetooth LE transport built on btleplug.
//!
//! Connect sequence:
//!
//! 1. Take the first adapter reported by the platform manager.
//! 2. Scan for [`SCAN_WINDOW`], filtered to the control service.
//! 3. Pick the first peripheral whose local name starts with the prefix.
//! 4. Connect, discover services, resolve the command and trigger
//!    characteristics, subscribe to the trigger.
//! 5. Spawn a task that turns trigger notifications and the adapter's
//!    `DeviceDisconnected` event into [`LinkEvent`]s.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter,
    ValueNotification, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tomo_core::protocol::device::{
    COMMAND_CHARACTERISTIC_UUID, CONTROL_SERVICE_UUID, TRIGGER_CHARACTERISTIC_UUID,
};
use tomo_core::LinkError;

use super::{release_on_error, BleTransport, LinkEvent, LinkHandle, PairedDevice};

type Notifications = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;
type CentralEvents = Pin<Box<dyn Stream<Item = CentralEvent> + Send>>;

/// How long to listen for advertisements before picking a device.
pub const SCAN_WINDOW: Duration = Duration::from_secs(4);

/// Transport over the platform Bluetooth stack.
pub struct BtleTransport {
    scan_window: Duration,
}

impl BtleTransport {
    pub fn new() -> Self {
        Self {
            scan_window: SCAN_WINDOW,
        }
    }
}

impl Default for BtleTransport {
    fn default() -> Self {
        Self::new()
    }
}

async fn first_adapter() -> Result<Adapter, LinkError> {
    let manager = Manager::new().await.map_err(|e| {
        warn!("Bluetooth manager unavailable: {e}");
        LinkError::Unavailable
    })?;
    manager
        .adapters()
        .await
        .map_err(|_| LinkError::Unavailable)?
        .into_iter()
        .next()
        .ok_or(LinkError::Unavailable)
}

async fn find_peripheral(
    adapter: &Adapter,
    name_prefix: &str,
) -> Result<Option<(Peripheral, String)>, LinkError> {
    let peripherals = adapter
        .peripherals()
        .await
        .map_err(|e| LinkError::ConnectFailed(e.to_string()))?;
    for peripheral in peripherals {
        let Ok(Some(props)) = peripheral.properties().await else {
            continue;
        };
        if let Some(name) = props.local_name {
            if name.starts_with(name_prefix) {
                return Ok(Some((peripheral, name)));
            }
            debug!("skipping peripheral {name}");
        }
    }
    Ok(None)
}

fn characteristic(
    peripheral: &Peripheral,
    uuid: Uuid,
    label: &str,
) -> Result<Characteristic, LinkError> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == uuid)
        .ok_or_else(|| LinkError::CharacteristicNotFound(label.to_string()))
}

/// Everything after the GATT connect: service and characteristic lookup,
/// trigger subscription, event streams.
async fn open_control_surface(
    adapter: &Adapter,
    peripheral: &Peripheral,
) -> Result<(Characteristic, Notifications, CentralEvents), LinkError> {
    peripheral
        .discover_services()
        .await
        .map_err(|e| LinkError::ConnectFailed(e.to_string()))?;

    if !peripheral
        .services()
        .iter()
        .any(|s| s.uuid == CONTROL_SERVICE_UUID)
    {
        return Err(LinkError::ServiceNotFound);
    }
    let command = characteristic(peripheral, COMMAND_CHARACTERISTIC_UUID, "command")?;
    let trigger = characteristic(peripheral, TRIGGER_CHARACTERISTIC_UUID, "trigger")?;

    peripheral
        .subscribe(&trigger)
        .await
        .map_err(|e| LinkError::ConnectFailed(e.to_string()))?;
    let notifications = peripheral
        .notifications()
        .await
        .map_err(|e| LinkError::ConnectFailed(e.to_string()))?;
    let central_events = adapter
        .events()
        .await
        .map_err(|e| LinkError::ConnectFailed(e.to_string()))?;
    Ok((command, notifications, central_events))
}

#[async_trait]
impl BleTransport for BtleTransport {
    async fn connect(&self, name_prefix: &str) -> Result<PairedDevice, LinkError> {
        let adapter = first_adapter().await?;

        adapter
            .start_scan(ScanFilter {
                services: vec![CONTROL_SERVICE_UUID],
            })
            .await
            .map_err(|e| LinkError::ConnectFailed(e.to_string()))?;
        tokio::time::sleep(self.scan_window).await;
        let found = find_peripheral(&adapter, name_prefix).await;
        if let Err(e) = adapter.stop_scan().await {
            debug!("stop_scan failed: {e}");
        }
        let (peripheral, name) = found?.ok_or(LinkError::NoDeviceSelected)?;

        info!("connecting to {name}");
        peripheral
            .connect()
            .await
            .map_err(|e| LinkError::ConnectFailed(e.to_string()))?;
        let (command, notifications, central_events) = release_on_error(
            open_control_surface(&adapter, &peripheral),
            async {
                if let Err(e) = peripheral.disconnect().await {
                    warn!("Bluetooth disconnect after failed setup: {e}");
                }
            },
        )
        .await?;

        let (tx, rx) = mpsc::channel(32);
        let peripheral_id = peripheral.id();
        let pump: JoinHandle<()> = tokio::spawn(async move {
            let mut notifications = notifications;
            let mut central_events = central_events;
            loop {
                tokio::select! {
                    n = notifications.next() => match n {
                        Some(n) if n.uuid == TRIGGER_CHARACTERISTIC_UUID => {
                            if tx.send(LinkEvent::Trigger).await.is_err() {
                                return;
                            }
                        }
                        Some(_) => {}
                        None => break,
                    },
                    ev = central_events.next() => match ev {
                        Some(CentralEvent::DeviceDisconnected(id)) if id == peripheral_id => break,
                        Some(_) => {}
                        None => break,
                    },
                }
            }
            let _ = tx.send(LinkEvent::Disconnected).await;
        });

        Ok(PairedDevice {
            name,
            handle: Arc::new(BtleHandle {
                peripheral,
                command,
                pump,
            }),
            events: rx,
        })
    }
}

struct BtleHandle {
    peripheral: Peripheral,
    command: Characteristic,
    pump: JoinHandle<()>,
}

#[async_trait]
impl LinkHandle for BtleHandle {
    async fn write_command(&self, bytes: &[u8]) -> Result<(), LinkError> {
        self.peripheral
            .write(&self.command, bytes, WriteType::WithResponse)
            .await
            .map_err(|e| LinkError::WriteFailed(e.to_string()))
    }

    async fn disconnect(&self) {
        self.pump.abort();
        if let Err(e) = self.peripheral.disconnect().await {
            warn!("Bluetooth disconnect failed: {e}");
        }
    }
}
