//! What the second display is currently showing.
//!
//! [`DisplayState`] is the receiver-side half of the projection channel
//! protocol.  It is a plain value updated by [`DisplayState::apply`]; the
//! infrastructure layer publishes each new value to the renderer.
//!
//! # Rules
//!
//! | Message              | Effect                                                   |
//! |----------------------|----------------------------------------------------------|
//! | `UPDATE_IMAGE`       | show the image, leave calibration view                   |
//! | `CLEAR_IMAGE`        | blank the display, leave calibration view                |
//! | `TOGGLE_CALIBRATION` | show/hide the calibration crosshair                      |
//! | `UPDATE_ALIGNMENT`   | recompute `transform` and `filter`                       |
//!
//! Malformed frames are logged and leave the state untouched.

use tomo_core::protocol::channel::{ChannelDecodeError, ChannelMessage};
use tomo_core::AlignmentParams;
use tracing::{debug, warn};

/// Receiver display state.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayState {
    /// Currently displayed frame, if any.
    pub image_url: Option<String>,
    /// Geometric transform, e.g. `scale(1.1) translate(3px, -2px)`.
    pub transform: String,
    /// Photometric filter, e.g. `contrast(120%)`.
    pub filter: String,
    /// `true` while the calibration crosshair replaces the image.
    pub calibration_visible: bool,
    /// Last alignment received.
    pub alignment: AlignmentParams,
}

impl Default for DisplayState {
    fn default() -> Self {
        let alignment = AlignmentParams::default();
        Self {
            image_url: None,
            transform: transform_for(&alignment),
            filter: filter_for(&alignment),
            calibration_visible: false,
            alignment,
        }
    }
}

/// `scale(s/100) translate(tx px, ty px)`.
pub fn transform_for(a: &AlignmentParams) -> String {
    format!(
        "scale({}) translate({}px, {}px)",
        a.scale / 100.0,
        a.translate_x,
        a.translate_y
    )
}

/// `contrast(c%)`.
pub fn filter_for(a: &AlignmentParams) -> String {
    format!("contrast({}%)", a.contrast)
}

impl DisplayState {
    /// Applies one decoded message.
    pub fn apply(&mut self, msg: &ChannelMessage) {
        match msg {
            ChannelMessage::UpdateImage { image_url } => {
                self.image_url = Some(image_url.clone());
                self.calibration_visible = false;
            }
            ChannelMessage::ClearImage => {
                self.image_url = None;
                self.calibration_visible = false;
            }
            ChannelMessage::ToggleCalibration { show } => {
                self.calibration_visible = *show;
            }
            ChannelMessage::UpdateAlignment(a) => {
                self.alignment = *a;
                self.transform = transform_for(a);
                self.filter = filter_for(a);
            }
        }
    }

    /// Decodes and applies a text frame.
    ///
    /// Returns `true` if the state changed.  Undecodable frames are logged at
    /// `warn` and ignored.
    pub fn apply_text(&mut self, text: &str) -> bool {
        match ChannelMessage::from_json(text) {
            Ok(msg) => {
                debug!("applying {}", msg.kind());
                let before = self.clone();
                self.apply(&msg);
                *self != before
            }
            Err(ChannelDecodeError::InvalidJson(e)) => {
                warn!("ignoring non-JSON frame: {e}");
                false
            }
            Err(ChannelDecodeError::UnrecognizedMessage(e)) => {
                warn!("ignoring unrecognized frame: {e}");
                false
            }
        }
    }

    /// One-line description for logs.
    pub fn summary(&self) -> String {
        let content = if self.calibration_visible {
            "calibration crosshair".to_string()
        } else {
            match &self.image_url {
                Some(url) => format!("image ({} chars)", url.len()),
                None => "blank".to_string(),
            }
        };
        format!("{content}; transform={}; filter={}", self.transform, self.filter)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_blank_and_identity() {
        let s = DisplayState::default();
        assert_eq!(s.image_url, None);
        assert_eq!(s.transform, "scale(1) translate(0px, 0px)");
        assert_eq!(s.filter, "contrast(100%)");
        assert!(!s.calibration_visible);
    }

    #[test]
    fn test_update_alignment_recomputes_transform_and_filter() {
        // Arrange
        let mut s = DisplayState::default();

        // Act
        s.apply(&ChannelMessage::UpdateAlignment(AlignmentParams {
            scale: 110.0,
            translate_x: 3.0,
            translate_y: -2.5,
            contrast: 120.0,
        }));

        // Assert
        assert_eq!(s.transform, "scale(1.1) translate(3px, -2.5px)");
        assert_eq!(s.filter, "contrast(120%)");
    }

    #[test]
    fn test_update_image_exits_calibration() {
        let mut s = DisplayState::default();
        s.apply(&ChannelMessage::ToggleCalibration { show: true });
        assert!(s.calibration_visible);

        s.apply(&ChannelMessage::UpdateImage {
            image_url: "data:image/png;base64,AAAA".into(),
        });

        assert!(!s.calibration_visible);
        assert_eq!(s.image_url.as_deref(), Some("data:image/png;base64,AAAA"));
    }

    #[test]
    fn test_clear_image_blanks_and_exits_calibration() {
        let mut s = DisplayState::default();
        s.apply(&ChannelMessage::UpdateImage {
            image_url: "data:x".into(),
        });
        s.apply(&ChannelMessage::ToggleCalibration { show: true });

        s.apply(&ChannelMessage::ClearImage);

        assert_eq!(s.image_url, None);
        assert!(!s.calibration_visible);
    }

    #[test]
    fn test_malformed_frames_leave_state_untouched() {
        let mut s = DisplayState::default();
        s.apply(&ChannelMessage::UpdateImage {
            image_url: "data:keep".into(),
        });
        let before = s.clone();

        assert!(!s.apply_text("{broken"));
        assert!(!s.apply_text(r#"{"type":"FORMAT_DISK"}"#));
        assert!(!s.apply_text(r#"{"type":"TOGGLE_CALIBRATION"}"#));

        assert_eq!(s, before);
    }

    #[test]
    fn test_apply_text_reports_change() {
        let mut s = DisplayState::default();
        assert!(s.apply_text(r#"{"type":"TOGGLE_CALIBRATION","show":true}"#));
        // Same message again changes nothing.
        assert!(!s.apply_text(r#"{"type":"TOGGLE_CALIBRATION","show":true}"#));
    }

    #[test]
    fn test_summary_mentions_calibration() {
        let mut s = DisplayState::default();
        s.apply(&ChannelMessage::ToggleCalibration { show: true });
        assert!(s.summary().starts_with("calibration crosshair"));
    }
}
