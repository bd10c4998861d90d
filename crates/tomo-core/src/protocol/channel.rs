//! JSON message types for the projection channel.
//!
//! The controller and the display receiver exchange text frames, each a JSON
//! object whose `"type"` field names the variant:
//!
//! ```json
//! {"type":"UPDATE_IMAGE","imageUrl":"data:image/png;base64,iVBOR..."}
//! {"type":"CLEAR_IMAGE"}
//! {"type":"TOGGLE_CALIBRATION","show":true}
//! {"type":"UPDATE_ALIGNMENT","scale":100.0,"translateX":2.5,"translateY":-1.0,"contrast":120.0}
//! ```
//!
//! Within one channel, frames are delivered in send order, so a later
//! `UPDATE_ALIGNMENT` always supersedes an earlier one on the receiver.

use serde::{Deserialize, Serialize};

use crate::domain::params::AlignmentParams;

/// A message on the projection channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelMessage {
    /// Replace the displayed frame.
    #[serde(rename_all = "camelCase")]
    UpdateImage { image_url: String },
    /// Blank the display.
    ClearImage,
    /// Switch the receiver into (or out of) the calibration crosshair view.
    ToggleCalibration { show: bool },
    /// Live-apply a geometric/photometric transform.
    UpdateAlignment(AlignmentParams),
}

/// Why an inbound frame was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelDecodeError {
    /// Not valid JSON, or not an object.
    InvalidJson(String),
    /// A JSON object whose `type` is missing or unknown, or whose fields do
    /// not match the named variant.
    UnrecognizedMessage(String),
}

impl std::fmt::Display for ChannelDecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelDecodeError::InvalidJson(e) => write!(f, "invalid JSON: {e}"),
            ChannelDecodeError::UnrecognizedMessage(e) => write!(f, "unrecognized message: {e}"),
        }
    }
}

impl std::error::Error for ChannelDecodeError {}

impl ChannelMessage {
    /// Serialises the message to a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if serialisation fails (non-finite
    /// floats are written as `null` by `serde_json`, so this is rare).
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parses a JSON text frame.
    ///
    /// Distinguishes text that is not JSON at all from JSON that does not
    /// match any known variant, so receivers can log the right thing.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelDecodeError`] for malformed or unknown frames.
    pub fn from_json(text: &str) -> Result<Self, ChannelDecodeError> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| ChannelDecodeError::InvalidJson(e.to_string()))?;
        if !value.is_object() {
            return Err(ChannelDecodeError::InvalidJson("expected a JSON object".into()));
        }
        serde_json::from_value(value)
            .map_err(|e| ChannelDecodeError::UnrecognizedMessage(e.to_string()))
    }

    /// Short name used in log lines (image payloads are too large to log).
    pub fn kind(&self) -> &'static str {
        match self {
            ChannelMessage::UpdateImage { .. } => "UPDATE_IMAGE",
            ChannelMessage::ClearImage => "CLEAR_IMAGE",
            ChannelMessage::ToggleCalibration { .. } => "TOGGLE_CALIBRATION",
            ChannelMessage::UpdateAlignment(_) => "UPDATE_ALIGNMENT",
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
