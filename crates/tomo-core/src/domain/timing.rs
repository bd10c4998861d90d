//! Frame timing formulas.
//!
//! Two numbers govern how fast frames change:
//!
//! - The **tomographic delay** sent to the rig: how long the stepper waits per
//!   microstep so the stage turns at `rotationSpeed`.  The rig's step angle is
//!   fixed at 0.1125°, so `delay_ms = 0.1125 / speed * 1000`.
//! - The **simulated frame delay** used when the controller paces frames itself
//!   (simulated prints and test playback).

use std::time::Duration;

use crate::domain::params::{PrintMode, ProjectionParams};

/// Angle in degrees the rig turns per step.  Fixed by the hardware.
pub const STEP_ANGLE_DEG: f64 = 0.1125;

/// Milliseconds per rig step at `rotation_speed` degrees per second.
///
/// Returns `0.0` for a non-positive (or non-finite) speed.
pub fn tomographic_delay_ms(rotation_speed: f64) -> f64 {
    if rotation_speed.is_finite() && rotation_speed > 0.0 {
        (STEP_ANGLE_DEG / rotation_speed) * 1000.0
    } else {
        0.0
    }
}

/// Delay between frames when the controller drives the frame loop itself.
///
/// - `TimePerFrame(ms)` holds each frame for `ms`.
/// - `Velocity` and `Hops` (no physical trigger in simulation) spread
///   `total_rotation` evenly over the frames at `rotation_speed`:
///   `(total_rotation / frame_count) / rotation_speed * 1000` ms.
///
/// Degenerate inputs (zero frames, non-positive speed) yield
/// [`Duration::ZERO`]; callers validate parameters before starting a loop.
pub fn simulated_frame_delay(
    mode: &PrintMode,
    params: &ProjectionParams,
    frame_count: usize,
) -> Duration {
    let ms = match *mode {
        PrintMode::TimePerFrame { ms } => ms,
        PrintMode::Velocity | PrintMode::Hops { .. } => {
            if frame_count == 0 || !(params.rotation_speed > 0.0) {
                0.0
            } else {
                (params.total_rotation / frame_count as f64) / params.rotation_speed * 1000.0
            }
        }
    };
    millis_to_duration(ms)
}

/// Converts fractional milliseconds to a [`Duration`], clamping negative or
/// non-finite values to zero.
pub fn millis_to_duration(ms: f64) -> Duration {
    if ms.is_finite() && ms > 0.0 {
        Duration::from_nanos((ms * 1_000_000.0).round() as u64)
    } else {
        Duration::ZERO
    }
}

/// Converts fractional seconds to a [`Duration`], clamping like
/// [`millis_to_duration`].
pub fn secs_to_duration(secs: f64) -> Duration {
    millis_to_duration(secs * 1000.0)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
