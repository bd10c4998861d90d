//! Messages into and out of the print session controller.
//!
//! Everything that can change the session arrives as a [`ControllerEvent`] on
//! one `mpsc` queue and is processed strictly in arrival order:
//!
//! - user commands (with an optional reply channel),
//! - device link notifications (trigger, disconnect),
//! - projection channel lifecycle (closed, inbound frames),
//! - slicing job progress, tagged with the submission attempt.
//!
//! Outbound, the controller pushes one human-readable [`SessionNotice`] per
//! completion or terminal error.

use std::fmt;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use tomo_core::{
    AlignmentParams, ChannelError, ChannelMessage, ImportedJob, JobError, JobPackage, JobStage,
    JobUpdate, NudgeDirection, NudgeStep, PrintMode, ProjectionParams, SlicingParams,
};

use crate::application::print_session::SessionError;
use crate::application::session::SessionSnapshot;

/// Mesh file handed to the slicing service.
#[derive(Debug, Clone)]
pub struct MeshUpload {
    /// Original file name, sent as the multipart file name.
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// A user-initiated operation.
#[derive(Debug)]
pub enum Command {
    StartPrint,
    /// Stops whatever activity is running.  No-op when idle.
    Stop,
    StartTest,
    /// Stops test playback only.
    StopTest,
    /// Enters calibration, or leaves it when already calibrating.
    ToggleCalibration,
    SetSimulation(bool),
    SetPrintMode(PrintMode),
    SetProjection(ProjectionParams),
    SetSlicing(SlicingParams),
    SetAlignment(AlignmentParams),
    Nudge {
        direction: NudgeDirection,
        step: NudgeStep,
    },
    SaveOffset,
    ResetOffset,
    /// Submits a mesh for slicing.  Aborts any previous job.
    Slice(MeshUpload),
    /// Replaces parameters and images with an already-parsed job package.
    Import(Box<ImportedJob>),
}

/// Progress of the slicing job, reported by the job client.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Accepted { job_id: String },
    SubmitFailed(JobError),
    Update(JobUpdate),
    /// A terminal frame that could not be used.
    Malformed(JobError),
    /// The progress stream ended without a terminal frame.
    StreamLost,
}

/// One entry on the controller's inbound queue.
#[derive(Debug)]
pub enum ControllerEvent {
    Command {
        command: Command,
        reply: Option<oneshot::Sender<Result<(), SessionError>>>,
    },
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Export {
        suggested_name: String,
        reply: oneshot::Sender<Result<JobPackage, SessionError>>,
    },
    /// The rig sent a trigger notification.
    DeviceTrigger,
    /// The device link handle has been invalidated.
    DeviceDisconnected,
    /// The projection channel left the connected state.
    ChannelClosed { error: Option<ChannelError> },
    /// A frame received from the display receiver.
    ChannelInbound(ChannelMessage),
    Job { attempt: u64, event: JobEvent },
    Shutdown,
}

/// Human-readable outcome pushed to the front end.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotice {
    PrintStarted { simulated: bool },
    PrintFinished,
    /// A running session was stopped because of an error.
    SessionAborted { reason: String },
    DeviceDisconnected { print_stopped: bool },
    ChannelLost { reason: Option<String>, session_stopped: bool },
    SliceProgress { progress: f64, stage: JobStage, detail: Option<String> },
    SliceComplete { count: usize, elapsed: Duration },
    SliceFailed { reason: String },
    Imported { count: usize },
    /// Imported jobs carry no mesh; previews have nothing to show.
    MeshUnavailable,
    OffsetNotSaved { reason: String },
}

impl fmt::Display for SessionNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionNotice::PrintStarted { simulated: true } => write!(f, "Simulated print started"),
            SessionNotice::PrintStarted { simulated: false } => write!(f, "Print started"),
            SessionNotice::PrintFinished => write!(f, "Print finished"),
            SessionNotice::SessionAborted { reason } => write!(f, "Session stopped: {reason}"),
            SessionNotice::DeviceDisconnected { print_stopped: true } => {
                write!(f, "Device disconnected; print stopped")
            }
            SessionNotice::DeviceDisconnected { print_stopped: false } => {
                write!(f, "Device disconnected")
            }
            SessionNotice::ChannelLost {
                reason,
                session_stopped,
            } => {
                write!(f, "Projection display disconnected")?;
                if let Some(r) = reason {
                    write!(f, " ({r})")?;
                }
                if *session_stopped {
                    write!(f, "; session stopped")?;
                }
                Ok(())
            }
            SessionNotice::SliceProgress {
                progress,
                stage,
                detail,
            } => {
                write!(f, "Slicing {progress:.0}% [{}]", stage.as_str())?;
                if let Some(d) = detail {
                    write!(f, " {d}")?;
                }
                Ok(())
            }
            SessionNotice::SliceComplete { count, elapsed } => write!(
                f,
                "Slicing complete: {count} images in {:.1}s",
                elapsed.as_secs_f64()
            ),
            SessionNotice::SliceFailed { reason } => write!(f, "Slicing failed: {reason}"),
            SessionNotice::Imported { count } => write!(f, "Imported job with {count} images"),
            SessionNotice::MeshUnavailable => {
                write!(f, "No mesh available for preview (imported job)")
            }
            SessionNotice::OffsetNotSaved { reason } => {
                write!(f, "Calibration offset not saved: {reason}")
            }
        }
    }
}

// ── Handle ────────────────────────────────────────────────────────────────────

/// Cloneable front-end handle to a running controller.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    tx: mpsc::Sender<ControllerEvent>,
}

impl ControllerHandle {
    pub fn new(tx: mpsc::Sender<ControllerEvent>) -> Self {
        Self { tx }
    }

    /// Raw queue sender, for infrastructure that pushes notifications.
    pub fn sender(&self) -> mpsc::Sender<ControllerEvent> {
        self.tx.clone()
    }

    /// Runs `command` and waits for its result.
    ///
    /// # Errors
    ///
    /// Returns the command's [`SessionError`], or
    /// [`SessionError::ControllerGone`] if the controller has stopped.
    pub async fn execute(&self, command: Command) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ControllerEvent::Command {
                command,
                reply: Some(reply),
            })
            .await
            .map_err(|_| SessionError::ControllerGone)?;
        rx.await.map_err(|_| SessionError::ControllerGone)?
    }

    /// Current session state.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ControllerGone`] if the controller has stopped.
    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ControllerEvent::Snapshot(reply))
            .await
            .map_err(|_| SessionError::ControllerGone)?;
        rx.await.map_err(|_| SessionError::ControllerGone)
    }

    /// Builds a job package from the current job.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Package`] when no completed job exists, or
    /// [`SessionError::ControllerGone`].
    pub async fn export(&self, suggested_name: &str) -> Result<JobPackage, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ControllerEvent::Export {
                suggested_name: suggested_name.to_string(),
                reply,
            })
            .await
            .map_err(|_| SessionError::ControllerGone)?;
        rx.await.map_err(|_| SessionError::ControllerGone)?
    }

    /// Asks the controller to stop its session and exit.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(ControllerEvent::Shutdown).await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
