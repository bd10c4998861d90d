//! User-editable parameter structs and the print mode.
//!
//! Three independent parameter groups travel through the system:
//!
//! - [`SlicingParams`] – sent to the slicing service with the mesh.  Frozen
//!   while a job is in flight.
//! - [`ProjectionParams`] – motion parameters; read when the device command
//!   is encoded and when simulated frame timing is computed.
//! - [`AlignmentParams`] – the geometric/photometric transform applied by the
//!   display receiver.  Only the translate pair is persisted.
//!
//! All three serialise with camelCase field names; the job package
//! `settings.json` nests each under its own key (`slicing`, `projection`,
//! `alignment`) next to the `printMode` record.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation failure for a parameter group.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ParamError {
    #[error("voxel size must be a positive number, got {0}")]
    VoxelSize(f64),
    #[error("number of projections must be at least 1")]
    NumProjections,
    #[error("rotation speed must be a positive number, got {0}")]
    RotationSpeed(f64),
    #[error("{field} must be zero or positive, got {value}")]
    Negative { field: &'static str, value: f64 },
    #[error("vertical direction must be 0 or 1, got {0}")]
    VerticalDirection(u8),
    #[error("time per frame must be a positive number of milliseconds, got {0}")]
    FrameTime(f64),
    #[error("hops per trigger must be at least 1")]
    HopsPerTrigger,
    #[error("scale must be a positive percentage, got {0}")]
    Scale(f64),
    #[error("{0} must be a finite number")]
    NotFinite(&'static str),
}

// ── Slicing ───────────────────────────────────────────────────────────────────

/// Parameters submitted with a slicing job.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlicingParams {
    /// Voxel pitch in mesh units (`pitch` on the wire).
    pub voxel_size: f64,
    /// Number of projection angles spread over 360° (`num_angles`).
    pub num_projections: u32,
    /// Pre-rotation about X in degrees.
    pub rot_x: i32,
    /// Pre-rotation about Y in degrees.
    pub rot_y: i32,
    /// Pre-rotation about Z in degrees.
    pub rot_z: i32,
}

impl Default for SlicingParams {
    fn default() -> Self {
        Self {
            voxel_size: 1.0,
            num_projections: 360,
            rot_x: 0,
            rot_y: 0,
            rot_z: 0,
        }
    }
}

impl SlicingParams {
    /// Checks the invariants required before a job can be submitted.
    ///
    /// # Errors
    ///
    /// Returns [`ParamError`] if the voxel size is not positive or no
    /// projections were requested.
    pub fn validate(&self) -> Result<(), ParamError> {
        if !(self.voxel_size.is_finite() && self.voxel_size > 0.0) {
            return Err(ParamError::VoxelSize(self.voxel_size));
        }
        if self.num_projections == 0 {
            return Err(ParamError::NumProjections);
        }
        Ok(())
    }
}

// ── Projection / motion ───────────────────────────────────────────────────────

/// Motion parameters for the rotation stage and the vertical axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionParams {
    /// Total rotation per print in degrees.
    pub total_rotation: f64,
    /// Rotation speed in degrees per second.
    pub rotation_speed: f64,
    /// Pause after each rotation, in milliseconds.
    pub pause_after_rotation: f64,
    /// Number of vertical steps after the rotation.
    pub vertical_steps: u32,
    /// Delay between vertical steps, in microseconds.
    pub vertical_delay: f64,
    /// Vertical direction: `0` down, `1` up.
    pub vertical_direction: u8,
}

impl Default for ProjectionParams {
    fn default() -> Self {
        Self {
            total_rotation: 360.0,
            rotation_speed: 30.0,
            pause_after_rotation: 0.0,
            vertical_steps: 0,
            vertical_delay: 0.0,
            vertical_direction: 0,
        }
    }
}

impl ProjectionParams {
    /// Checks the invariants the device command and frame timing rely on.
    ///
    /// # Errors
    ///
    /// Returns [`ParamError`] for a non-positive speed, a negative pause or
    /// delay, or a direction other than 0/1.
    pub fn validate(&self) -> Result<(), ParamError> {
        if !(self.rotation_speed.is_finite() && self.rotation_speed > 0.0) {
            return Err(ParamError::RotationSpeed(self.rotation_speed));
        }
        if self.pause_after_rotation < 0.0 {
            return Err(ParamError::Negative {
                field: "pause after rotation",
                value: self.pause_after_rotation,
            });
        }
        if self.vertical_delay < 0.0 {
            return Err(ParamError::Negative {
                field: "vertical delay",
                value: self.vertical_delay,
            });
        }
        if self.vertical_direction > 1 {
            return Err(ParamError::VerticalDirection(self.vertical_direction));
        }
        Ok(())
    }
}

// ── Print mode ────────────────────────────────────────────────────────────────

/// How frames are paced during a print.
///
/// Exactly one mode is active at a time.  The mode decides which timing
/// formula the simulated print uses and whether the real print waits for
/// trigger notifications from the rig.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PrintMode {
    /// Frames follow the continuous rotation speed.
    #[default]
    Velocity,
    /// Every frame is held for a fixed number of milliseconds.
    TimePerFrame { ms: f64 },
    /// The rig advances in hops; each trigger releases `hops_per_trigger`
    /// frames spaced `hop_delay` seconds apart.
    #[serde(rename_all = "camelCase")]
    Hops { hops_per_trigger: u32, hop_delay: f64 },
}

impl PrintMode {
    /// Checks the mode-specific fields.
    ///
    /// # Errors
    ///
    /// Returns [`ParamError`] for a non-positive frame time, zero hops per
    /// trigger, or a negative hop delay.
    pub fn validate(&self) -> Result<(), ParamError> {
        match *self {
            PrintMode::Velocity => Ok(()),
            PrintMode::TimePerFrame { ms } => {
                if ms.is_finite() && ms > 0.0 {
                    Ok(())
                } else {
                    Err(ParamError::FrameTime(ms))
                }
            }
            PrintMode::Hops {
                hops_per_trigger,
                hop_delay,
            } => {
                if hops_per_trigger == 0 {
                    return Err(ParamError::HopsPerTrigger);
                }
                if !(hop_delay.is_finite() && hop_delay >= 0.0) {
                    return Err(ParamError::Negative {
                        field: "hop delay",
                        value: hop_delay,
                    });
                }
                Ok(())
            }
        }
    }

    /// Returns `true` for [`PrintMode::Hops`].
    pub fn is_hops(&self) -> bool {
        matches!(self, PrintMode::Hops { .. })
    }
}

// ── Alignment ─────────────────────────────────────────────────────────────────

/// Transform applied by the display receiver to every projected frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlignmentParams {
    /// Scale in percent (100 = unscaled, 50–200 typical).
    pub scale: f64,
    /// Horizontal offset in pixels.
    pub translate_x: f64,
    /// Vertical offset in pixels.
    pub translate_y: f64,
    /// Contrast in percent (100 = unchanged).
    pub contrast: f64,
}

impl Default for AlignmentParams {
    fn default() -> Self {
        Self {
            scale: 100.0,
            translate_x: 0.0,
            translate_y: 0.0,
            contrast: 100.0,
        }
    }
}

impl AlignmentParams {
    /// Checks that every field is finite, the scale is positive and the
    /// contrast is not negative.
    ///
    /// # Errors
    ///
    /// Returns the first [`ParamError`] found.
    pub fn validate(&self) -> Result<(), ParamError> {
        for (field, value) in [
            ("scale", self.scale),
            ("translate x", self.translate_x),
            ("translate y", self.translate_y),
            ("contrast", self.contrast),
        ] {
            if !value.is_finite() {
                return Err(ParamError::NotFinite(field));
            }
        }
        if self.scale <= 0.0 {
            return Err(ParamError::Scale(self.scale));
        }
        if self.contrast < 0.0 {
            return Err(ParamError::Negative {
                field: "contrast",
                value: self.contrast,
            });
        }
        Ok(())
    }

    /// Moves the translate pair one step in `direction`.
    ///
    /// Screen coordinates: up decreases `translate_y`, left decreases
    /// `translate_x`.
    pub fn nudge(&mut self, direction: NudgeDirection, step: NudgeStep) {
        let amount = step.amount();
        match direction {
            NudgeDirection::Up => self.translate_y -= amount,
            NudgeDirection::Down => self.translate_y += amount,
            NudgeDirection::Left => self.translate_x -= amount,
            NudgeDirection::Right => self.translate_x += amount,
        }
    }
}

/// Arrow-key direction for an alignment nudge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NudgeDirection {
    Up,
    Down,
    Left,
    Right,
}

impl std::str::FromStr for NudgeDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "up" => Ok(NudgeDirection::Up),
            "down" => Ok(NudgeDirection::Down),
            "left" => Ok(NudgeDirection::Left),
            "right" => Ok(NudgeDirection::Right),
            other => Err(format!("unknown direction '{other}'")),
        }
    }
}

/// Size of a nudge, selected by keyboard modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NudgeStep {
    /// No modifier: 1 px.
    #[default]
    Normal,
    /// Coarse modifier (Shift): 10 px.
    Coarse,
    /// Fine modifier (Alt): 0.1 px.
    Fine,
}

impl NudgeStep {
    /// Picks the step from the modifier keys held during the key press.
    ///
    /// The fine modifier wins when both are held.
    pub fn from_modifiers(coarse: bool, fine: bool) -> Self {
        if fine {
            NudgeStep::Fine
        } else if coarse {
            NudgeStep::Coarse
        } else {
            NudgeStep::Normal
        }
    }

    /// Pixel distance of one nudge.
    pub fn amount(self) -> f64 {
        match self {
            NudgeStep::Normal => 1.0,
            NudgeStep::Coarse => 10.0,
            NudgeStep::Fine => 0.1,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
