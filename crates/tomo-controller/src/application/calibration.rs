//! Projector alignment and the persisted calibration offset.
//!
//! [`CalibrationManager`] owns the live [`AlignmentParams`].  Only the
//! translate pair survives restarts: it is stored as `{"x": .., "y": ..}`
//! under [`OFFSET_KEY`] in a [`KeyValueStore`].  Scale and contrast reset to
//! their defaults on every launch.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use tomo_core::{AlignmentParams, NudgeDirection, NudgeStep};

/// Storage key of the persisted offset.
pub const OFFSET_KEY: &str = "projector_calibration_offset";

/// Errors from the key-value store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("stored data is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// String-keyed persistent storage.
#[cfg_attr(test, mockall::automock)]
pub trait KeyValueStore: Send + Sync {
    /// Value stored under `key`, or `None` if absent.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Removes `key`.  Removing an absent key succeeds.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredOffset {
    x: f64,
    y: f64,
}

/// Live alignment plus its persistence.
pub struct CalibrationManager {
    store: Arc<dyn KeyValueStore>,
    alignment: AlignmentParams,
}

impl CalibrationManager {
    /// Creates a manager with default alignment.  Call [`load`](Self::load)
    /// to apply the persisted offset.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            alignment: AlignmentParams::default(),
        }
    }

    pub fn alignment(&self) -> AlignmentParams {
        self.alignment
    }

    pub fn set_alignment(&mut self, alignment: AlignmentParams) {
        self.alignment = alignment;
    }

    /// Applies the stored offset to the translate pair.
    ///
    /// Returns `true` when an offset was applied.  Missing, unreadable or
    /// malformed data keeps the current values and is only logged.
    pub fn load(&mut self) -> bool {
        let raw = match self.store.get(OFFSET_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!("no saved calibration offset");
                return false;
            }
            Err(e) => {
                warn!("could not read calibration offset: {e}");
                return false;
            }
        };
        match serde_json::from_str::<StoredOffset>(&raw) {
            Ok(offset) if offset.x.is_finite() && offset.y.is_finite() => {
                self.alignment.translate_x = offset.x;
                self.alignment.translate_y = offset.y;
                info!("loaded calibration offset ({}, {})", offset.x, offset.y);
                true
            }
            Ok(_) => {
                warn!("ignoring non-finite calibration offset");
                false
            }
            Err(e) => {
                warn!("ignoring malformed calibration offset: {e}");
                false
            }
        }
    }

    /// Persists the current translate pair.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the store rejects the write.
    pub fn save(&self) -> Result<(), StorageError> {
        let offset = StoredOffset {
            x: self.alignment.translate_x,
            y: self.alignment.translate_y,
        };
        let json = serde_json::to_string(&offset)?;
        self.store.set(OFFSET_KEY, &json)?;
        info!("saved calibration offset ({}, {})", offset.x, offset.y);
        Ok(())
    }

    /// Zeroes the translate pair and deletes the stored offset.
    ///
    /// The in-memory reset happens even when the delete fails.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the stored offset could not be removed.
    pub fn reset(&mut self) -> Result<(), StorageError> {
        self.alignment.translate_x = 0.0;
        self.alignment.translate_y = 0.0;
        self.store.remove(OFFSET_KEY)
    }

    /// Moves the translate pair one step and returns the new alignment.
    pub fn apply_nudge(&mut self, direction: NudgeDirection, step: NudgeStep) -> AlignmentParams {
        self.alignment.nudge(direction, step);
        self.alignment
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
