//! Device command codec for the rotation-stage microcontroller.
//!
//! Wire format (24 bytes, little-endian IEEE-754 `f32`):
//! ```text
//! [total_rotation:4][tomographic_delay_ms:4][pause_seconds:4]
//! [vertical_steps:4][vertical_delay_us:4][vertical_direction:4]
//! ```
//! A stop command uses the same layout filled with zeros.
//!
//! The command is written to a single GATT characteristic of the control
//! service; a second characteristic sends empty trigger notifications back
//! (presence of a notification is the signal).

use uuid::Uuid;

use crate::domain::params::ProjectionParams;
use crate::domain::timing::tomographic_delay_ms;

/// Number of `f32` fields in a command.
pub const COMMAND_FIELDS: usize = 6;

/// Encoded command length in bytes.
pub const COMMAND_LEN: usize = COMMAND_FIELDS * 4;

/// Advertised name prefix used to filter discovery results.
pub const DEVICE_NAME_PREFIX: &str = "ESP32";

/// GATT service exposing the command and trigger characteristics.
pub const CONTROL_SERVICE_UUID: Uuid = Uuid::from_u128(0x4fafc201_1fb5_459e_8fcc_c5c9c331914b);

/// Write characteristic receiving the 24-byte command.
pub const COMMAND_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xbeb5483e_36e1_4688_b7f5_ea07361b26a8);

/// Notify characteristic emitting trigger notifications.
pub const TRIGGER_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x1c95d5e3_d8f7_413a_bf3d_7a2e5d7be87e);

/// A print or stop command in engineering units, ready for encoding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceCommand {
    pub total_rotation: f32,
    pub tomographic_delay_ms: f32,
    pub pause_seconds: f32,
    pub vertical_steps: f32,
    pub vertical_delay_us: f32,
    pub vertical_direction: f32,
}

impl DeviceCommand {
    /// The all-zero stop command.
    pub const STOP: DeviceCommand = DeviceCommand {
        total_rotation: 0.0,
        tomographic_delay_ms: 0.0,
        pause_seconds: 0.0,
        vertical_steps: 0.0,
        vertical_delay_us: 0.0,
        vertical_direction: 0.0,
    };

    /// Builds the print command for `params`.
    ///
    /// `pause_after_rotation` is entered in milliseconds but transmitted
    /// divided by 1000: the firmware multiplies the received value by 1000
    /// before using it as milliseconds.  Keep this conversion as long as the
    /// deployed firmware does.
    pub fn print(params: &ProjectionParams) -> Self {
        Self {
            total_rotation: params.total_rotation as f32,
            tomographic_delay_ms: tomographic_delay_ms(params.rotation_speed) as f32,
            pause_seconds: (params.pause_after_rotation / 1000.0) as f32,
            vertical_steps: params.vertical_steps as f32,
            vertical_delay_us: params.vertical_delay as f32,
            vertical_direction: f32::from(params.vertical_direction),
        }
    }

    /// Returns `true` for the all-zero stop command.
    pub fn is_stop(&self) -> bool {
        *self == Self::STOP
    }

    /// Fields in wire order.
    pub fn fields(&self) -> [f32; COMMAND_FIELDS] {
        [
            self.total_rotation,
            self.tomographic_delay_ms,
            self.pause_seconds,
            self.vertical_steps,
            self.vertical_delay_us,
            self.vertical_direction,
        ]
    }

    /// Encodes the command into its 24-byte wire form.
    pub fn encode(&self) -> [u8; COMMAND_LEN] {
        let mut buf = [0u8; COMMAND_LEN];
        for (i, value) in self.fields().iter().enumerate() {
            buf[i * 4..i * 4 + 4].copy_from_slice(&value.to_le_bytes());
        }
        buf
    }

    /// Decodes a 24-byte payload.  Returns `None` for any other length.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != COMMAND_LEN {
            return None;
        }
        let f = |i: usize| {
            f32::from_le_bytes([bytes[i * 4], bytes[i * 4 + 1], bytes[i * 4 + 2], bytes[i * 4 + 3]])
        };
        Some(Self {
            total_rotation: f(0),
            tomographic_delay_ms: f(1),
            pause_seconds: f(2),
            vertical_steps: f(3),
            vertical_delay_us: f(4),
            vertical_direction: f(5),
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
