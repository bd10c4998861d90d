//! Session state: which activity currently owns the projector and its timer.
//!
//! At most one of a print run, test playback or calibration is active.  The
//! timed activities (simulated prints, hop units, test playback) share a
//! single optional deadline, so there is never more than one pending frame
//! timer; stopping clears activity and deadline together.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use tomo_core::{AlignmentParams, PrintMode, ProjectionParams, SlicingParams};

/// Print status visible to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrintState {
    Idle,
    Printing,
    /// A hops print is parked until the rig's next trigger.
    WaitingForTrigger,
}

/// Where a print run is within its frame sequence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PrintProgress {
    /// Real velocity or time-per-frame print.  The rig paces itself and the
    /// controller shows nothing until stopped.
    Free,
    /// Controller-paced frames; `next_index` is shown when the timer fires.
    Frames { next_index: usize, delay: Duration },
    /// Inside a hop unit: frame `index` is on screen and `shown_in_unit`
    /// frames of the unit have been shown.
    Hopping { index: usize, shown_in_unit: u32 },
    /// Waiting for a trigger that will show `next_index`.
    WaitingForTrigger { next_index: usize },
}

/// One print run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrintRun {
    pub simulated: bool,
    /// Mode captured at start; later edits apply to the next run.
    pub mode: PrintMode,
    pub progress: PrintProgress,
}

/// The activity that currently owns the projector.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Activity {
    #[default]
    Idle,
    Printing(PrintRun),
    /// Loops through the image set; `next_index` is shown on the next tick.
    TestPlaying {
        next_index: usize,
        interval: Duration,
    },
    Calibrating,
}

impl Activity {
    /// Summary kind for snapshots.
    pub fn kind(&self) -> ActivityKind {
        match self {
            Activity::Idle => ActivityKind::Idle,
            Activity::Printing(run) if run.simulated => ActivityKind::Simulating,
            Activity::Printing(_) => ActivityKind::Printing,
            Activity::TestPlaying { .. } => ActivityKind::TestPlaying,
            Activity::Calibrating => ActivityKind::Calibrating,
        }
    }

    /// `true` when the activity writes to the projection channel and cannot
    /// outlive it.
    pub fn uses_channel(&self) -> bool {
        match self {
            Activity::Idle => false,
            Activity::Printing(run) => run.simulated || run.mode.is_hops(),
            Activity::TestPlaying { .. } | Activity::Calibrating => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Idle,
    Printing,
    Simulating,
    TestPlaying,
    Calibrating,
}

/// Current activity plus its single pending timer.
#[derive(Debug, Default)]
pub struct SessionState {
    activity: Activity,
    deadline: Option<Instant>,
}

impl SessionState {
    pub fn activity(&self) -> Activity {
        self.activity
    }

    /// When the pending timer fires, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.activity, Activity::Idle)
    }

    pub fn print_state(&self) -> PrintState {
        match self.activity {
            Activity::Printing(PrintRun {
                progress: PrintProgress::WaitingForTrigger { .. },
                ..
            }) => PrintState::WaitingForTrigger,
            Activity::Printing(_) => PrintState::Printing,
            _ => PrintState::Idle,
        }
    }

    /// Replaces the activity and its timer in one step.
    pub fn set(&mut self, activity: Activity, deadline: Option<Instant>) {
        self.activity = activity;
        self.deadline = deadline;
    }

    /// Clears activity and timer, returning what was running.
    pub fn stop(&mut self) -> Activity {
        self.deadline = None;
        std::mem::take(&mut self.activity)
    }

    /// Consumes the pending timer.  Returns `None` when nothing was armed.
    pub fn take_deadline(&mut self) -> Option<Instant> {
        self.deadline.take()
    }
}

/// Point-in-time view of the controller for front ends.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub activity: ActivityKind,
    pub print_state: PrintState,
    pub frame_index: Option<usize>,
    pub image_count: usize,
    pub job: String,
    pub device_connected: bool,
    pub channel_connected: bool,
    pub simulation: bool,
    pub mesh_available: bool,
    pub print_mode: PrintMode,
    pub slicing: SlicingParams,
    pub projection: ProjectionParams,
    pub alignment: AlignmentParams,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
