//! Slicing job state machine.
//!
//! One [`SlicingJobState`] value tracks one slicing attempt:
//!
//! ```text
//! Idle ──begin_submit──► Submitting ──accepted──► Streaming ──Complete──► Complete
//!                            │                        │  ▲
//!                            │ submit_failed          │  └─ Progress (last write wins)
//!                            ▼                        ├──Failed frame──► Failed(BackendFailed)
//!                          Failed                     └──stream_lost───► Failed(StreamLost)
//! ```
//!
//! A failed submission never enters `Streaming`.  Terminal states ignore any
//! further updates; starting a new attempt goes back through `Submitting`.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::domain::image_set::ImageSet;
use crate::error::JobError;

/// Stage reported by the slicing backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStage {
    Idle,
    Loading,
    Voxelizing,
    Projecting,
    Encoding,
    Complete,
    Failed,
    /// A stage name this build does not know.  Kept for display.
    Other(String),
}

impl JobStage {
    /// Parses the backend's upper-case stage name.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "IDLE" => JobStage::Idle,
            "LOADING" => JobStage::Loading,
            "VOXELIZING" => JobStage::Voxelizing,
            "PROJECTING" => JobStage::Projecting,
            "ENCODING" => JobStage::Encoding,
            "COMPLETE" => JobStage::Complete,
            "FAILED" => JobStage::Failed,
            other => JobStage::Other(other.to_string()),
        }
    }

    /// Backend spelling of the stage.
    pub fn as_str(&self) -> &str {
        match self {
            JobStage::Idle => "IDLE",
            JobStage::Loading => "LOADING",
            JobStage::Voxelizing => "VOXELIZING",
            JobStage::Projecting => "PROJECTING",
            JobStage::Encoding => "ENCODING",
            JobStage::Complete => "COMPLETE",
            JobStage::Failed => "FAILED",
            JobStage::Other(s) => s,
        }
    }
}

/// One parsed event from the progress stream.
#[derive(Debug, Clone, PartialEq)]
pub enum JobUpdate {
    /// Non-terminal progress report.
    Progress {
        /// 0–100.
        progress: f64,
        stage: JobStage,
        /// Human-readable status line, e.g. "Generating projection 12/120".
        detail: Option<String>,
    },
    /// Terminal success with the decoded images in arrival order.
    Complete { images: ImageSet },
    /// Terminal failure reported by the backend.
    Failed { reason: String },
}

/// State of the current (or last) slicing attempt.
#[derive(Debug, Clone, Default)]
pub enum SlicingJobState {
    #[default]
    Idle,
    Submitting,
    Streaming {
        job_id: String,
        progress: f64,
        stage: JobStage,
        detail: Option<String>,
    },
    Complete {
        images: Arc<ImageSet>,
        elapsed: Duration,
        count: usize,
    },
    Failed {
        error: JobError,
    },
}

impl SlicingJobState {
    /// Starts a new attempt.  Any previous state is discarded.
    pub fn begin_submit(&mut self) {
        *self = SlicingJobState::Submitting;
    }

    /// The backend accepted the job and returned `job_id`.
    ///
    /// Ignored unless the state is `Submitting`.
    pub fn accepted(&mut self, job_id: String) {
        if matches!(self, SlicingJobState::Submitting) {
            *self = SlicingJobState::Streaming {
                job_id,
                progress: 0.0,
                stage: JobStage::Idle,
                detail: None,
            };
        } else {
            debug!("ignoring job acceptance outside Submitting");
        }
    }

    /// The submission request failed.  Transitions straight to `Failed`.
    pub fn submit_failed(&mut self, error: JobError) {
        if matches!(self, SlicingJobState::Submitting) {
            *self = SlicingJobState::Failed { error };
        }
    }

    /// Applies one stream update.
    ///
    /// Returns the shared image set when the update completes the job.
    /// Updates outside `Streaming` are ignored.
    pub fn apply(&mut self, update: JobUpdate, elapsed: Duration) -> Option<Arc<ImageSet>> {
        if !matches!(self, SlicingJobState::Streaming { .. }) {
            debug!("ignoring job update outside Streaming");
            return None;
        }
        match update {
            JobUpdate::Progress {
                progress: p,
                stage: s,
                detail: d,
            } => {
                if let SlicingJobState::Streaming {
                    progress,
                    stage,
                    detail,
                    ..
                } = self
                {
                    *progress = p.clamp(0.0, 100.0);
                    *stage = s;
                    *detail = d;
                }
                None
            }
            JobUpdate::Complete { images } => {
                let count = images.len();
                let images = Arc::new(images);
                *self = SlicingJobState::Complete {
                    images: Arc::clone(&images),
                    elapsed,
                    count,
                };
                Some(images)
            }
            JobUpdate::Failed { reason } => {
                *self = SlicingJobState::Failed {
                    error: JobError::BackendFailed(reason),
                };
                None
            }
        }
    }

    /// The stream dropped without a terminal frame.
    pub fn stream_lost(&mut self) {
        if matches!(self, SlicingJobState::Streaming { .. }) {
            *self = SlicingJobState::Failed {
                error: JobError::StreamLost,
            };
        }
    }

    /// The stream delivered a terminal frame that could not be used.
    pub fn malformed(&mut self, error: JobError) {
        if matches!(self, SlicingJobState::Streaming { .. }) {
            *self = SlicingJobState::Failed { error };
        }
    }

    /// Marks an imported image set as a completed job so it can be exported again.
    pub fn imported(&mut self, images: Arc<ImageSet>) {
        let count = images.len();
        *self = SlicingJobState::Complete {
            images,
            elapsed: Duration::ZERO,
            count,
        };
    }

    /// `true` while a submission or stream is outstanding.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            SlicingJobState::Submitting | SlicingJobState::Streaming { .. }
        )
    }

    /// Completed image set, if the last attempt succeeded.
    pub fn images(&self) -> Option<&Arc<ImageSet>> {
        match self {
            SlicingJobState::Complete { images, .. } => Some(images),
            _ => None,
        }
    }

    /// Short label for status displays.
    pub fn label(&self) -> String {
        match self {
            SlicingJobState::Idle => "idle".to_string(),
            SlicingJobState::Submitting => "submitting".to_string(),
            SlicingJobState::Streaming {
                progress, stage, ..
            } => format!("{} {:.0}%", stage.as_str(), progress),
            SlicingJobState::Complete { count, elapsed, .. } => {
                format!("complete ({count} images in {:.1}s)", elapsed.as_secs_f64())
            }
            SlicingJobState::Failed { error } => format!("failed: {error}"),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
