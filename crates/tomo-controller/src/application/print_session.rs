//! The print session controller.
//!
//! [`PrintSessionController`] is the single owner of mutable session state:
//! parameters, the current image set, the slicing job, the alignment and the
//! active [`Activity`].  It runs as one task that consumes
//! [`ControllerEvent`]s in order and fires at most one frame timer, so every
//! transition (a command, a trigger, a disconnect, a job update) is atomic
//! with respect to the others.
//!
//! The controller never touches sockets or radios directly.  It talks to the
//! outside world through three seams:
//!
//! - [`CommandLink`] – writes device commands to the rig.
//! - [`ProjectionSink`] – sends frames and alignment to the display receiver.
//! - [`JobSubmitter`] – runs slicing jobs and feeds their progress back into
//!   the event queue.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use tomo_core::domain::params::ParamError;
use tomo_core::domain::timing::{millis_to_duration, secs_to_duration, simulated_frame_delay};
use tomo_core::{
    export_package, ChannelError, ChannelMessage, DeviceCommand, ImageSet, ImportedJob, JobPackage,
    JobSettings, JobUpdate, LinkError, PackageError, PrintMode, ProjectionParams, SlicingJobState,
    SlicingParams,
};

use crate::application::calibration::{CalibrationManager, StorageError};
use crate::application::events::{Command, ControllerEvent, JobEvent, MeshUpload, SessionNotice};
use crate::application::session::{
    Activity, PrintProgress, PrintRun, SessionSnapshot, SessionState,
};

// ── Seams ─────────────────────────────────────────────────────────────────────

/// Writes commands to the rig.
#[async_trait]
pub trait CommandLink: Send + Sync {
    /// Writes one encoded command.
    ///
    /// # Errors
    ///
    /// [`LinkError::NotConnected`] without a paired device, or
    /// [`LinkError::WriteFailed`] if the transport rejects the write.
    async fn send_command(&self, command: DeviceCommand) -> Result<(), LinkError>;

    fn is_connected(&self) -> bool;
}

/// Sends messages to the display receiver.
#[async_trait]
pub trait ProjectionSink: Send + Sync {
    /// # Errors
    ///
    /// [`ChannelError::NotConnected`] while closed, or another
    /// [`ChannelError`] if the write fails.
    async fn send(&self, message: ChannelMessage) -> Result<(), ChannelError>;

    fn is_connected(&self) -> bool;
}

/// Starts and cancels slicing jobs.
///
/// Results come back as [`ControllerEvent::Job`] tagged with `attempt`.
pub trait JobSubmitter: Send + Sync {
    /// Starts a job.  Any previous job is cancelled first.
    fn submit(&self, attempt: u64, mesh: MeshUpload, params: SlicingParams);

    /// Cancels the running job, if any.
    fn cancel(&self);
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Why a command was refused or failed.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no images loaded; slice a mesh or import a job first")]
    NoImages,

    #[error("device is not connected")]
    DeviceNotConnected,

    #[error("projection display is not connected")]
    ChannelNotConnected,

    #[error("parameters cannot change while a slicing job is running")]
    JobInFlight,

    #[error("calibration mode is not active")]
    NotCalibrating,

    #[error("invalid parameters: {0}")]
    InvalidParams(#[from] ParamError),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Package(#[from] PackageError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("controller is not running")]
    ControllerGone,
}

// ── Controller ────────────────────────────────────────────────────────────────

/// Adapters the controller drives.
pub struct ControllerPorts {
    pub link: Arc<dyn CommandLink>,
    pub channel: Arc<dyn ProjectionSink>,
    pub jobs: Arc<dyn JobSubmitter>,
}

/// Owns all session state.  See the module docs.
pub struct PrintSessionController {
    ports: ControllerPorts,
    calibration: CalibrationManager,
    notices: mpsc::UnboundedSender<SessionNotice>,
    session: SessionState,
    /// Frame currently on the display, if a session has shown one.
    frame_index: Option<usize>,
    images: Arc<ImageSet>,
    job: SlicingJobState,
    job_attempt: u64,
    job_started: Option<Instant>,
    mesh_available: bool,
    slicing: SlicingParams,
    projection: ProjectionParams,
    print_mode: PrintMode,
    simulation: bool,
    test_interval: Duration,
}

impl PrintSessionController {
    /// Creates an idle controller and applies the persisted calibration
    /// offset.
    ///
    /// `test_interval` paces test playback unless the print mode is
    /// time-per-frame.
    pub fn new(
        ports: ControllerPorts,
        mut calibration: CalibrationManager,
        test_interval: Duration,
        notices: mpsc::UnboundedSender<SessionNotice>,
    ) -> Self {
        calibration.load();
        Self {
            ports,
            calibration,
            notices,
            session: SessionState::default(),
            frame_index: None,
            images: Arc::new(ImageSet::default()),
            job: SlicingJobState::default(),
            job_attempt: 0,
            job_started: None,
            mesh_available: false,
            slicing: SlicingParams::default(),
            projection: ProjectionParams::default(),
            print_mode: PrintMode::default(),
            simulation: false,
            test_interval,
        }
    }

    /// Processes events until the queue closes or [`ControllerEvent::Shutdown`]
    /// arrives.  Any running activity is stopped on the way out.
    pub async fn run(mut self, mut events: mpsc::Receiver<ControllerEvent>) {
        info!("print session controller started");
        loop {
            let deadline = self.session.deadline();
            tokio::select! {
                biased;
                event = events.recv() => match event {
                    Some(ControllerEvent::Shutdown) | None => break,
                    Some(event) => self.handle(event).await,
                },
                _ = wait_for(deadline) => self.on_timer().await,
            }
        }
        self.stop_activity().await;
        self.ports.jobs.cancel();
        info!("print session controller stopped");
    }

    /// Applies one event.
    pub async fn handle(&mut self, event: ControllerEvent) {
        match event {
            ControllerEvent::Command { command, reply } => {
                let result = self.execute(command).await;
                if let Err(e) = &result {
                    debug!("command refused: {e}");
                }
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            ControllerEvent::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            ControllerEvent::Export {
                suggested_name,
                reply,
            } => {
                let _ = reply.send(self.export(&suggested_name));
            }
            ControllerEvent::DeviceTrigger => self.on_trigger().await,
            ControllerEvent::DeviceDisconnected => self.on_device_disconnected().await,
            ControllerEvent::ChannelClosed { error } => self.on_channel_closed(error).await,
            ControllerEvent::ChannelInbound(message) => {
                debug!("ignoring inbound {} from display", message.kind());
            }
            ControllerEvent::Job { attempt, event } => self.on_job_event(attempt, event).await,
            ControllerEvent::Shutdown => {
                self.stop_activity().await;
            }
        }
    }

    /// Runs one user command.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when the command's preconditions are not met
    /// or a send fails.  A refused command leaves state unchanged.
    pub async fn execute(&mut self, command: Command) -> Result<(), SessionError> {
        match command {
            Command::StartPrint => self.start_print().await,
            Command::Stop => {
                self.stop_activity().await;
                Ok(())
            }
            Command::StartTest => self.start_test().await,
            Command::StopTest => {
                if matches!(self.session.activity(), Activity::TestPlaying { .. }) {
                    self.stop_activity().await;
                }
                Ok(())
            }
            Command::ToggleCalibration => self.toggle_calibration().await,
            Command::SetSimulation(on) => {
                self.simulation = on;
                Ok(())
            }
            Command::SetPrintMode(mode) => {
                mode.validate()?;
                self.print_mode = mode;
                Ok(())
            }
            Command::SetProjection(params) => {
                params.validate()?;
                self.projection = params;
                Ok(())
            }
            Command::SetSlicing(params) => {
                if self.job.is_in_flight() {
                    return Err(SessionError::JobInFlight);
                }
                params.validate()?;
                self.slicing = params;
                Ok(())
            }
            Command::SetAlignment(alignment) => {
                alignment.validate()?;
                self.calibration.set_alignment(alignment);
                self.broadcast_alignment().await;
                Ok(())
            }
            Command::Nudge { direction, step } => {
                if !matches!(self.session.activity(), Activity::Calibrating) {
                    return Err(SessionError::NotCalibrating);
                }
                self.calibration.apply_nudge(direction, step);
                self.broadcast_alignment().await;
                Ok(())
            }
            Command::SaveOffset => self.calibration.save().map_err(|e| {
                warn!("failed to save calibration offset: {e}");
                self.notify(SessionNotice::OffsetNotSaved {
                    reason: e.to_string(),
                });
                SessionError::Storage(e)
            }),
            Command::ResetOffset => {
                let result = self.calibration.reset();
                self.broadcast_alignment().await;
                result.map_err(|e| {
                    warn!("failed to clear calibration offset: {e}");
                    SessionError::Storage(e)
                })
            }
            Command::Slice(mesh) => self.submit_job(mesh),
            Command::Import(job) => self.import(*job).await,
        }
    }

    /// Current state for front ends.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            activity: self.session.activity().kind(),
            print_state: self.session.print_state(),
            frame_index: self.frame_index,
            image_count: self.images.len(),
            job: self.job.label(),
            device_connected: self.ports.link.is_connected(),
            channel_connected: self.ports.channel.is_connected(),
            simulation: self.simulation,
            mesh_available: self.mesh_available,
            print_mode: self.print_mode,
            slicing: self.slicing,
            projection: self.projection,
            alignment: self.calibration.alignment(),
        }
    }

    /// Pending frame timer, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.session.deadline()
    }

    // ── Print ─────────────────────────────────────────────────────────────────

    async fn start_print(&mut self) -> Result<(), SessionError> {
        if !self.images.is_ready() {
            return Err(SessionError::NoImages);
        }
        self.projection.validate()?;
        self.print_mode.validate()?;

        let simulated = self.simulation;
        let needs_channel = simulated || self.print_mode.is_hops();
        if !simulated && !self.ports.link.is_connected() {
            return Err(SessionError::DeviceNotConnected);
        }
        if needs_channel && !self.ports.channel.is_connected() {
            return Err(SessionError::ChannelNotConnected);
        }

        self.stop_activity().await;

        let mode = self.print_mode;
        if simulated {
            let delay = simulated_frame_delay(&mode, &self.projection, self.images.len());
            self.show_frame(0).await?;
            self.session.set(
                Activity::Printing(PrintRun {
                    simulated,
                    mode,
                    progress: PrintProgress::Frames {
                        next_index: 1,
                        delay,
                    },
                }),
                Some(Instant::now() + delay),
            );
            info!(
                "simulated print started: {} frames every {:?}",
                self.images.len(),
                delay
            );
        } else {
            self.ports
                .link
                .send_command(DeviceCommand::print(&self.projection))
                .await?;
            let progress = if mode.is_hops() {
                PrintProgress::WaitingForTrigger { next_index: 0 }
            } else {
                PrintProgress::Free
            };
            self.session.set(
                Activity::Printing(PrintRun {
                    simulated,
                    mode,
                    progress,
                }),
                None,
            );
            info!("print started on device ({mode:?})");
        }
        self.notify(SessionNotice::PrintStarted { simulated });
        Ok(())
    }

    /// Last frame shown: stop the run and tell the user.
    async fn finish_print(&mut self) {
        self.stop_activity().await;
        info!("print finished");
        self.notify(SessionNotice::PrintFinished);
    }

    /// Shows `index` inside a hop unit and decides what comes next.
    async fn show_hop(&mut self, run: PrintRun, index: usize, shown_in_unit: u32) {
        if let Err(e) = self.show_frame(index).await {
            self.abort_session(e.into()).await;
            return;
        }
        let (hops_per_trigger, hop_delay) = match run.mode {
            PrintMode::Hops {
                hops_per_trigger,
                hop_delay,
            } => (hops_per_trigger, hop_delay),
            _ => (1, 0.0),
        };
        if shown_in_unit >= hops_per_trigger {
            self.session.set(
                Activity::Printing(PrintRun {
                    progress: PrintProgress::WaitingForTrigger {
                        next_index: index + 1,
                    },
                    ..run
                }),
                None,
            );
        } else {
            self.session.set(
                Activity::Printing(PrintRun {
                    progress: PrintProgress::Hopping {
                        index,
                        shown_in_unit,
                    },
                    ..run
                }),
                Some(Instant::now() + secs_to_duration(hop_delay)),
            );
        }
    }

    async fn on_trigger(&mut self) {
        match self.session.activity() {
            Activity::Printing(
                run @ PrintRun {
                    progress: PrintProgress::WaitingForTrigger { next_index },
                    ..
                },
            ) => {
                if next_index >= self.images.len() {
                    self.finish_print().await;
                } else {
                    debug!("trigger: showing frame {next_index}");
                    self.show_hop(run, next_index, 1).await;
                }
            }
            Activity::Printing(PrintRun {
                progress: PrintProgress::Hopping { .. },
                ..
            }) => debug!("trigger arrived mid hop unit; ignored"),
            _ => debug!("trigger ignored: no hops print waiting"),
        }
    }

    // ── Test playback ─────────────────────────────────────────────────────────

    async fn start_test(&mut self) -> Result<(), SessionError> {
        if !self.images.is_ready() {
            return Err(SessionError::NoImages);
        }
        if !self.ports.channel.is_connected() {
            return Err(SessionError::ChannelNotConnected);
        }
        self.print_mode.validate()?;
        self.stop_activity().await;

        let interval = match self.print_mode {
            PrintMode::TimePerFrame { ms } => millis_to_duration(ms),
            _ => self.test_interval,
        };
        self.show_frame(0).await?;
        self.session.set(
            Activity::TestPlaying {
                next_index: 1 % self.images.len(),
                interval,
            },
            Some(Instant::now() + interval),
        );
        info!("test playback started every {interval:?}");
        Ok(())
    }

    // ── Calibration ───────────────────────────────────────────────────────────

    async fn toggle_calibration(&mut self) -> Result<(), SessionError> {
        if matches!(self.session.activity(), Activity::Calibrating) {
            self.stop_activity().await;
            return Ok(());
        }
        if !self.ports.channel.is_connected() {
            return Err(SessionError::ChannelNotConnected);
        }
        self.stop_activity().await;
        self.ports
            .channel
            .send(ChannelMessage::ToggleCalibration { show: true })
            .await?;
        self.session.set(Activity::Calibrating, None);
        self.broadcast_alignment().await;
        info!("calibration mode on");
        Ok(())
    }

    /// Sends the current alignment when the channel is up.
    async fn broadcast_alignment(&mut self) {
        if !self.ports.channel.is_connected() {
            return;
        }
        let message = ChannelMessage::UpdateAlignment(self.calibration.alignment());
        if let Err(e) = self.ports.channel.send(message).await {
            warn!("failed to send alignment: {e}");
            if self.session.activity().uses_channel() {
                self.abort_session(e.into()).await;
            }
        }
    }

    // ── Timer ─────────────────────────────────────────────────────────────────

    /// Advances the timed activity.  Called when the deadline passes.
    pub async fn on_timer(&mut self) {
        if self.session.take_deadline().is_none() {
            return;
        }
        match self.session.activity() {
            Activity::Printing(
                run @ PrintRun {
                    progress: PrintProgress::Frames { next_index, delay },
                    ..
                },
            ) => {
                if next_index >= self.images.len() {
                    self.finish_print().await;
                    return;
                }
                if let Err(e) = self.show_frame(next_index).await {
                    self.abort_session(e.into()).await;
                    return;
                }
                self.session.set(
                    Activity::Printing(PrintRun {
                        progress: PrintProgress::Frames {
                            next_index: next_index + 1,
                            delay,
                        },
                        ..run
                    }),
                    Some(Instant::now() + delay),
                );
            }
            Activity::Printing(
                run @ PrintRun {
                    progress:
                        PrintProgress::Hopping {
                            index,
                            shown_in_unit,
                        },
                    ..
                },
            ) => {
                let next = index + 1;
                if next >= self.images.len() {
                    self.finish_print().await;
                } else {
                    self.show_hop(run, next, shown_in_unit + 1).await;
                }
            }
            Activity::TestPlaying {
                next_index,
                interval,
            } => {
                if let Err(e) = self.show_frame(next_index).await {
                    self.abort_session(e.into()).await;
                    return;
                }
                self.session.set(
                    Activity::TestPlaying {
                        next_index: (next_index + 1) % self.images.len(),
                        interval,
                    },
                    Some(Instant::now() + interval),
                );
            }
            other => debug!("timer fired with no timed activity ({:?})", other.kind()),
        }
    }

    // ── Stop paths ────────────────────────────────────────────────────────────

    /// Stops the running activity.  Returns `false` if nothing was running.
    ///
    /// Clean-up sends go only to connected endpoints and their failures are
    /// logged; the session always ends up idle.
    async fn stop_activity(&mut self) -> bool {
        self.frame_index = None;
        match self.session.stop() {
            Activity::Idle => false,
            Activity::Printing(run) => {
                if !run.simulated && self.ports.link.is_connected() {
                    if let Err(e) = self.ports.link.send_command(DeviceCommand::STOP).await {
                        warn!("failed to send stop command: {e}");
                    }
                }
                self.clear_display().await;
                info!("print stopped");
                true
            }
            Activity::TestPlaying { .. } => {
                self.clear_display().await;
                info!("test playback stopped");
                true
            }
            Activity::Calibrating => {
                if self.ports.channel.is_connected() {
                    if let Err(e) = self
                        .ports
                        .channel
                        .send(ChannelMessage::ToggleCalibration { show: false })
                        .await
                    {
                        warn!("failed to leave calibration on display: {e}");
                    }
                }
                info!("calibration mode off");
                true
            }
        }
    }

    async fn clear_display(&self) {
        if self.ports.channel.is_connected() {
            if let Err(e) = self.ports.channel.send(ChannelMessage::ClearImage).await {
                warn!("failed to clear display: {e}");
            }
        }
    }

    /// Stops the session because of `error` and reports it.
    async fn abort_session(&mut self, error: SessionError) {
        warn!("stopping session: {error}");
        self.stop_activity().await;
        self.notify(SessionNotice::SessionAborted {
            reason: error.to_string(),
        });
    }

    async fn on_device_disconnected(&mut self) {
        let real_print = matches!(
            self.session.activity(),
            Activity::Printing(PrintRun { simulated: false, .. })
        );
        if real_print {
            self.stop_activity().await;
        }
        warn!("device disconnected");
        self.notify(SessionNotice::DeviceDisconnected {
            print_stopped: real_print,
        });
    }

    async fn on_channel_closed(&mut self, error: Option<ChannelError>) {
        let stopped = if self.session.activity().uses_channel() {
            self.stop_activity().await
        } else {
            false
        };
        let reason = error.map(|e| e.to_string());
        warn!(
            "projection channel closed{}",
            reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default()
        );
        self.notify(SessionNotice::ChannelLost {
            reason,
            session_stopped: stopped,
        });
    }

    // ── Slicing job ───────────────────────────────────────────────────────────

    fn submit_job(&mut self, mesh: MeshUpload) -> Result<(), SessionError> {
        self.slicing.validate()?;
        self.job_attempt += 1;
        self.job.begin_submit();
        self.job_started = Some(Instant::now());
        self.mesh_available = true;
        info!(
            "submitting {} ({} bytes) as job attempt {}",
            mesh.file_name,
            mesh.bytes.len(),
            self.job_attempt
        );
        self.ports.jobs.submit(self.job_attempt, mesh, self.slicing);
        Ok(())
    }

    async fn on_job_event(&mut self, attempt: u64, event: JobEvent) {
        if attempt != self.job_attempt {
            debug!(
                "discarding event from job attempt {attempt} (current {})",
                self.job_attempt
            );
            return;
        }
        match event {
            JobEvent::Accepted { job_id } => {
                info!("slicing job {job_id} accepted");
                self.job.accepted(job_id);
            }
            JobEvent::SubmitFailed(e) => {
                warn!("{e}");
                self.job.submit_failed(e.clone());
                self.notify(SessionNotice::SliceFailed {
                    reason: e.to_string(),
                });
            }
            JobEvent::Update(update) => self.on_job_update(update).await,
            JobEvent::Malformed(e) => {
                warn!("{e}");
                self.job.malformed(e.clone());
                self.notify(SessionNotice::SliceFailed {
                    reason: e.to_string(),
                });
            }
            JobEvent::StreamLost => {
                if self.job.is_in_flight() {
                    self.job.stream_lost();
                    warn!("slicing progress stream lost");
                    self.notify(SessionNotice::SliceFailed {
                        reason: tomo_core::JobError::StreamLost.to_string(),
                    });
                }
            }
        }
    }

    async fn on_job_update(&mut self, update: JobUpdate) {
        let progress = match &update {
            JobUpdate::Progress {
                progress,
                stage,
                detail,
            } => Some(SessionNotice::SliceProgress {
                progress: *progress,
                stage: stage.clone(),
                detail: detail.clone(),
            }),
            _ => None,
        };
        let elapsed = self
            .job_started
            .map(|t| t.elapsed())
            .unwrap_or_default();

        if let Some(images) = self.job.apply(update, elapsed) {
            self.stop_activity().await;
            let count = images.len();
            self.images = images;
            info!("slicing complete: {count} images in {elapsed:?}");
            self.notify(SessionNotice::SliceComplete { count, elapsed });
        } else if let SlicingJobState::Failed { error } = &self.job {
            let reason = error.to_string();
            warn!("{reason}");
            self.notify(SessionNotice::SliceFailed { reason });
        } else if let Some(notice) = progress {
            self.notify(notice);
        }
    }

    // ── Import / export ───────────────────────────────────────────────────────

    async fn import(&mut self, job: ImportedJob) -> Result<(), SessionError> {
        // Nothing changes unless every record is in range.
        job.settings.validate()?;
        self.ports.jobs.cancel();
        self.job_attempt += 1;
        self.stop_activity().await;

        let ImportedJob {
            settings,
            images,
            mesh_available,
        } = job;
        self.slicing = settings.slicing;
        self.projection = settings.projection;
        self.print_mode = settings.print_mode;
        self.calibration.set_alignment(settings.alignment);
        self.images = Arc::clone(&images);
        self.job.imported(images);
        self.mesh_available = mesh_available;

        self.broadcast_alignment().await;
        let count = self.images.len();
        info!("imported job with {count} images");
        self.notify(SessionNotice::Imported { count });
        if !mesh_available {
            self.notify(SessionNotice::MeshUnavailable);
        }
        Ok(())
    }

    fn export(&self, suggested_name: &str) -> Result<JobPackage, SessionError> {
        let settings = JobSettings {
            slicing: self.slicing,
            projection: self.projection,
            alignment: self.calibration.alignment(),
            print_mode: self.print_mode,
        };
        let package = export_package(&self.job, &settings, suggested_name)?;
        info!(
            "exported {} ({} bytes)",
            package.file_name,
            package.bytes.len()
        );
        Ok(package)
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    async fn show_frame(&mut self, index: usize) -> Result<(), ChannelError> {
        match self.images.get(index) {
            Some(image) => {
                self.ports
                    .channel
                    .send(ChannelMessage::UpdateImage {
                        image_url: image.data_url(),
                    })
                    .await?;
                self.frame_index = Some(index);
                Ok(())
            }
            None => {
                debug!("frame {index} out of range");
                Ok(())
            }
        }
    }

    fn notify(&self, notice: SessionNotice) {
        let _ = self.notices.send(notice);
    }
}

/// Sleeps until `deadline`, or forever when there is none.
async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use tomo_core::{JobStage, NudgeDirection, NudgeStep};

    use crate::application::calibration::KeyValueStore;
    use crate::application::session::{ActivityKind, PrintState};

    // ── Test doubles ──────────────────────────────────────────────────────────

    #[derive(Default)]
    struct RecordingLink {
        commands: Mutex<Vec<DeviceCommand>>,
        connected: AtomicBool,
    }

    impl RecordingLink {
        fn connected() -> Arc<Self> {
            let link = Self::default();
            link.connected.store(true, Ordering::SeqCst);
            Arc::new(link)
        }

        fn sent(&self) -> Vec<DeviceCommand> {
            self.commands.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandLink for RecordingLink {
        async fn send_command(&self, command: DeviceCommand) -> Result<(), LinkError> {
            if !self.connected.load(Ordering::SeqCst) {
                return Err(LinkError::NotConnected);
            }
            self.commands.lock().unwrap().push(command);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        messages: Mutex<Vec<ChannelMessage>>,
        connected: AtomicBool,
        should_fail: AtomicBool,
    }

    impl RecordingSink {
        fn connected() -> Arc<Self> {
            let sink = Self::default();
            sink.connected.store(true, Ordering::SeqCst);
            Arc::new(sink)
        }

        fn sent(&self) -> Vec<ChannelMessage> {
            self.messages.lock().unwrap().clone()
        }

        fn clear(&self) {
            self.messages.lock().unwrap().clear();
        }

        /// Indices of the frames sent, decoded from their data URLs.
        fn frames(&self) -> Vec<String> {
            self.sent()
                .into_iter()
                .filter_map(|m| match m {
                    ChannelMessage::UpdateImage { image_url } => Some(image_url),
                    _ => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl ProjectionSink for RecordingSink {
        async fn send(&self, message: ChannelMessage) -> Result<(), ChannelError> {
            if !self.connected.load(Ordering::SeqCst) {
                return Err(ChannelError::NotConnected);
            }
            if self.should_fail.load(Ordering::SeqCst) {
                return Err(ChannelError::Lost("broken pipe".into()));
            }
            self.messages.lock().unwrap().push(message);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct RecordingJobs {
        submits: Mutex<Vec<(u64, String, SlicingParams)>>,
        cancels: AtomicUsize,
    }

    impl JobSubmitter for RecordingJobs {
        fn submit(&self, attempt: u64, mesh: MeshUpload, params: SlicingParams) {
            self.submits
                .lock()
                .unwrap()
                .push((attempt, mesh.file_name, params));
        }

        fn cancel(&self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        values: Mutex<HashMap<String, String>>,
    }

    impl KeyValueStore for MemoryStore {
        fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
            Ok(self.values.lock().unwrap().get(key).cloned())
        }

        fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
            self.values
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_string());
            Ok(())
        }

        fn remove(&self, key: &str) -> Result<(), StorageError> {
            self.values.lock().unwrap().remove(key);
            Ok(())
        }
    }

    struct Rig {
        controller: PrintSessionController,
        link: Arc<RecordingLink>,
        sink: Arc<RecordingSink>,
        jobs: Arc<RecordingJobs>,
        store: Arc<MemoryStore>,
        notices: mpsc::UnboundedReceiver<SessionNotice>,
    }

    impl Rig {
        fn notices(&mut self) -> Vec<SessionNotice> {
            let mut out = Vec::new();
            while let Ok(n) = self.notices.try_recv() {
                out.push(n);
            }
            out
        }
    }

    fn rig_with(link: Arc<RecordingLink>, sink: Arc<RecordingSink>) -> Rig {
        let jobs = Arc::new(RecordingJobs::default());
        let store = Arc::new(MemoryStore::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let ports = ControllerPorts {
            link: Arc::clone(&link) as Arc<dyn CommandLink>,
            channel: Arc::clone(&sink) as Arc<dyn ProjectionSink>,
            jobs: Arc::clone(&jobs) as Arc<dyn JobSubmitter>,
        };
        let calibration = CalibrationManager::new(Arc::clone(&store) as Arc<dyn KeyValueStore>);
        let controller =
            PrintSessionController::new(ports, calibration, Duration::from_millis(100), tx);
        Rig {
            controller,
            link,
            sink,
            jobs,
            store,
            notices: rx,
        }
    }

    fn rig() -> Rig {
        rig_with(RecordingLink::connected(), RecordingSink::connected())
    }

    fn images(n: usize) -> Arc<ImageSet> {
        Arc::new(ImageSet::from_buffers(
            (0..n).map(|i| vec![i as u8; 3]).collect(),
        ))
    }

    fn url(i: u8) -> String {
        tomo_core::protocol::base64::png_data_url(&[i; 3])
    }

    async fn load_images(r: &mut Rig, n: usize) {
        let job = ImportedJob {
            settings: JobSettings::default(),
            images: images(n),
            mesh_available: false,
        };
        r.controller.execute(Command::Import(Box::new(job))).await.unwrap();
        r.sink.clear();
        r.notices();
    }

    // ── Stop ──────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_stop_when_idle_is_silent_and_idempotent() {
        // Arrange
        let mut r = rig();

        // Act
        r.controller.execute(Command::Stop).await.unwrap();
        r.controller.execute(Command::Stop).await.unwrap();

        // Assert
        assert!(r.link.sent().is_empty());
        assert!(r.sink.sent().is_empty());
        assert!(r.notices().is_empty());
    }

    // ── Real print ────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn test_real_velocity_print_sends_one_command_and_arms_no_timer() {
        // Arrange
        let mut r = rig();
        load_images(&mut r, 4).await;

        // Act
        r.controller.execute(Command::StartPrint).await.unwrap();

        // Assert
        let sent = r.link.sent();
        assert_eq!(sent, vec![DeviceCommand::print(&ProjectionParams::default())]);
        assert!(r.sink.frames().is_empty(), "rig paces a real print");
        assert_eq!(r.controller.deadline(), None);
        assert_eq!(r.controller.snapshot().print_state, PrintState::Printing);
    }

    #[tokio::test]
    async fn test_real_print_requires_device() {
        let mut r = rig_with(Arc::new(RecordingLink::default()), RecordingSink::connected());
        load_images(&mut r, 2).await;

        let result = r.controller.execute(Command::StartPrint).await;

        assert!(matches!(result, Err(SessionError::DeviceNotConnected)));
        assert_eq!(r.controller.snapshot().activity, ActivityKind::Idle);
    }

    #[tokio::test]
    async fn test_print_requires_images() {
        let mut r = rig();
        let result = r.controller.execute(Command::StartPrint).await;
        assert!(matches!(result, Err(SessionError::NoImages)));
    }

    #[tokio::test]
    async fn test_stopping_real_print_sends_zero_command_then_clear() {
        // Arrange
        let mut r = rig();
        load_images(&mut r, 2).await;
        r.controller.execute(Command::StartPrint).await.unwrap();

        // Act
        r.controller.execute(Command::Stop).await.unwrap();

        // Assert
        let sent = r.link.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[1].is_stop());
        assert_eq!(r.sink.sent(), vec![ChannelMessage::ClearImage]);
        assert_eq!(r.controller.snapshot().print_state, PrintState::Idle);
    }

    #[tokio::test]
    async fn test_device_disconnect_stops_real_print_without_zero_command() {
        // Arrange
        let mut r = rig();
        load_images(&mut r, 2).await;
        r.controller.execute(Command::StartPrint).await.unwrap();
        r.notices();
        r.link.connected.store(false, Ordering::SeqCst);

        // Act
        r.controller.handle(ControllerEvent::DeviceDisconnected).await;

        // Assert
        assert_eq!(r.link.sent().len(), 1, "only the start command");
        assert_eq!(r.controller.snapshot().print_state, PrintState::Idle);
        assert_eq!(
            r.notices(),
            vec![SessionNotice::DeviceDisconnected { print_stopped: true }]
        );
    }

    // ── Simulated print ───────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn test_simulated_velocity_print_of_120_frames_ticks_every_100ms() {
        // Arrange
        let mut r = rig_with(Arc::new(RecordingLink::default()), RecordingSink::connected());
        load_images(&mut r, 120).await;
        r.controller
            .execute(Command::SetProjection(ProjectionParams {
                total_rotation: 360.0,
                rotation_speed: 30.0,
                ..ProjectionParams::default()
            }))
            .await
            .unwrap();
        r.controller.execute(Command::SetSimulation(true)).await.unwrap();

        // Act
        let start = Instant::now();
        r.controller.execute(Command::StartPrint).await.unwrap();

        // Assert
        assert_eq!(r.sink.frames(), vec![url(0)], "frame 0 is shown immediately");
        assert_eq!(
            r.controller.deadline(),
            Some(start + Duration::from_millis(100))
        );
        assert!(r.link.sent().is_empty(), "simulation never touches the rig");
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_print_runs_to_completion_then_clears() {
        // Arrange
        let mut r = rig_with(Arc::new(RecordingLink::default()), RecordingSink::connected());
        load_images(&mut r, 3).await;
        r.controller.execute(Command::SetSimulation(true)).await.unwrap();
        r.controller.execute(Command::StartPrint).await.unwrap();

        // Act
        for _ in 0..3 {
            r.controller.on_timer().await;
        }

        // Assert
        let sent = r.sink.sent();
        assert_eq!(sent.len(), 4);
        assert_eq!(r.sink.frames(), vec![url(0), url(1), url(2)]);
        assert_eq!(sent[3], ChannelMessage::ClearImage);
        assert_eq!(r.controller.deadline(), None);
        assert!(r.notices().contains(&SessionNotice::PrintFinished));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_simulation_cancels_timer_and_skips_device() {
        // Arrange
        let mut r = rig();
        load_images(&mut r, 5).await;
        r.controller.execute(Command::SetSimulation(true)).await.unwrap();
        r.controller.execute(Command::StartPrint).await.unwrap();

        // Act
        r.controller.execute(Command::Stop).await.unwrap();
        r.controller.on_timer().await;

        // Assert
        assert!(r.link.sent().is_empty());
        assert_eq!(r.sink.frames().len(), 1, "no frame after stop");
        assert_eq!(r.sink.sent().last(), Some(&ChannelMessage::ClearImage));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failure_mid_print_aborts_session() {
        // Arrange
        let mut r = rig_with(Arc::new(RecordingLink::default()), RecordingSink::connected());
        load_images(&mut r, 5).await;
        r.controller.execute(Command::SetSimulation(true)).await.unwrap();
        r.controller.execute(Command::StartPrint).await.unwrap();
        r.notices();
        r.sink.should_fail.store(true, Ordering::SeqCst);

        // Act
        r.controller.on_timer().await;

        // Assert
        assert_eq!(r.controller.snapshot().activity, ActivityKind::Idle);
        assert_eq!(r.controller.deadline(), None);
        assert!(matches!(
            r.notices().as_slice(),
            [SessionNotice::SessionAborted { .. }]
        ));
    }

    // ── Hops ──────────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn test_hops_print_shows_one_unit_per_trigger() {
        // Arrange
        let mut r = rig();
        load_images(&mut r, 4).await;
        r.controller
            .execute(Command::SetPrintMode(PrintMode::Hops {
                hops_per_trigger: 2,
                hop_delay: 0.5,
            }))
            .await
            .unwrap();
        r.controller.execute(Command::StartPrint).await.unwrap();
        assert_eq!(
            r.controller.snapshot().print_state,
            PrintState::WaitingForTrigger
        );
        assert!(r.sink.frames().is_empty());

        // Act: first trigger shows frame 0, the hop timer shows frame 1.
        let t0 = Instant::now();
        r.controller.handle(ControllerEvent::DeviceTrigger).await;
        assert_eq!(r.controller.deadline(), Some(t0 + Duration::from_millis(500)));
        r.controller.handle(ControllerEvent::DeviceTrigger).await;
        r.controller.on_timer().await;

        // Assert
        assert_eq!(r.sink.frames(), vec![url(0), url(1)]);
        assert_eq!(r.controller.snapshot().frame_index, Some(1));
        assert_eq!(r.controller.deadline(), None);
        assert_eq!(
            r.controller.snapshot().print_state,
            PrintState::WaitingForTrigger
        );

        // Second unit, then a trigger past the end finishes the print.
        r.controller.handle(ControllerEvent::DeviceTrigger).await;
        r.controller.on_timer().await;
        r.controller.handle(ControllerEvent::DeviceTrigger).await;
        assert_eq!(r.sink.frames(), vec![url(0), url(1), url(2), url(3)]);
        assert_eq!(r.controller.snapshot().print_state, PrintState::Idle);
        assert!(r.link.sent().last().unwrap().is_stop());
    }

    #[tokio::test]
    async fn test_hops_print_requires_channel() {
        let mut r = rig_with(RecordingLink::connected(), Arc::new(RecordingSink::default()));
        load_images(&mut r, 2).await;
        r.controller
            .execute(Command::SetPrintMode(PrintMode::Hops {
                hops_per_trigger: 1,
                hop_delay: 0.0,
            }))
            .await
            .unwrap();

        let result = r.controller.execute(Command::StartPrint).await;

        assert!(matches!(result, Err(SessionError::ChannelNotConnected)));
        assert!(r.link.sent().is_empty());
    }

    #[tokio::test]
    async fn test_trigger_outside_print_is_ignored() {
        let mut r = rig();
        load_images(&mut r, 2).await;

        r.controller.handle(ControllerEvent::DeviceTrigger).await;

        assert!(r.sink.sent().is_empty());
        assert!(r.link.sent().is_empty());
    }

    // ── Test playback ─────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn test_test_playback_wraps_around() {
        // Arrange
        let mut r = rig();
        load_images(&mut r, 2).await;

        // Act
        r.controller.execute(Command::StartTest).await.unwrap();
        r.controller.on_timer().await;
        r.controller.on_timer().await;

        // Assert
        assert_eq!(r.sink.frames(), vec![url(0), url(1), url(0)]);
        assert!(r.controller.deadline().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_test_playback_uses_time_per_frame_interval() {
        let mut r = rig();
        load_images(&mut r, 3).await;
        r.controller
            .execute(Command::SetPrintMode(PrintMode::TimePerFrame { ms: 40.0 }))
            .await
            .unwrap();

        let start = Instant::now();
        r.controller.execute(Command::StartTest).await.unwrap();

        assert_eq!(
            r.controller.deadline(),
            Some(start + Duration::from_millis(40))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_entering_calibration_stops_test_playback() {
        // Arrange
        let mut r = rig();
        load_images(&mut r, 3).await;
        r.controller.execute(Command::StartTest).await.unwrap();
        r.sink.clear();

        // Act
        r.controller.execute(Command::ToggleCalibration).await.unwrap();

        // Assert
        assert_eq!(r.controller.deadline(), None);
        assert_eq!(r.controller.snapshot().activity, ActivityKind::Calibrating);
        assert_eq!(
            r.sink.sent(),
            vec![
                ChannelMessage::ClearImage,
                ChannelMessage::ToggleCalibration { show: true },
                ChannelMessage::UpdateAlignment(r.controller.calibration.alignment()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_close_stops_test_but_not_real_velocity_print() {
        // Arrange
        let mut r = rig();
        load_images(&mut r, 3).await;
        r.controller.execute(Command::StartTest).await.unwrap();
        r.sink.connected.store(false, Ordering::SeqCst);

        // Act
        r.controller
            .handle(ControllerEvent::ChannelClosed { error: None })
            .await;

        // Assert
        assert_eq!(r.controller.snapshot().activity, ActivityKind::Idle);
        assert!(r.notices().contains(&SessionNotice::ChannelLost {
            reason: None,
            session_stopped: true,
        }));

        r.controller.execute(Command::StartPrint).await.unwrap();
        r.controller
            .handle(ControllerEvent::ChannelClosed { error: None })
            .await;
        assert_eq!(r.controller.snapshot().activity, ActivityKind::Printing);
    }

    // ── Calibration ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_nudge_requires_calibration_mode() {
        let mut r = rig();
        let result = r
            .controller
            .execute(Command::Nudge {
                direction: NudgeDirection::Left,
                step: NudgeStep::Normal,
            })
            .await;
        assert!(matches!(result, Err(SessionError::NotCalibrating)));
    }

    #[tokio::test]
    async fn test_nudge_broadcasts_and_save_persists_offset() {
        // Arrange
        let mut r = rig();
        r.controller.execute(Command::ToggleCalibration).await.unwrap();
        r.sink.clear();

        // Act
        r.controller
            .execute(Command::Nudge {
                direction: NudgeDirection::Left,
                step: NudgeStep::Coarse,
            })
            .await
            .unwrap();
        r.controller.execute(Command::SaveOffset).await.unwrap();

        // Assert
        let expected = tomo_core::AlignmentParams {
            translate_x: -10.0,
            ..Default::default()
        };
        assert_eq!(r.sink.sent(), vec![ChannelMessage::UpdateAlignment(expected)]);
        let stored = r
            .store
            .get(crate::application::calibration::OFFSET_KEY)
            .unwrap();
        assert_eq!(stored.as_deref(), Some(r#"{"x":-10.0,"y":0.0}"#));
    }

    #[tokio::test]
    async fn test_toggle_calibration_twice_exits() {
        let mut r = rig();
        r.controller.execute(Command::ToggleCalibration).await.unwrap();
        r.sink.clear();

        r.controller.execute(Command::ToggleCalibration).await.unwrap();

        assert_eq!(
            r.sink.sent(),
            vec![ChannelMessage::ToggleCalibration { show: false }]
        );
        assert_eq!(r.controller.snapshot().activity, ActivityKind::Idle);
    }

    #[tokio::test]
    async fn test_alignment_not_sent_while_channel_down() {
        let mut r = rig_with(RecordingLink::connected(), Arc::new(RecordingSink::default()));
        r.controller
            .execute(Command::SetAlignment(tomo_core::AlignmentParams {
                scale: 150.0,
                ..Default::default()
            }))
            .await
            .unwrap();
        assert!(r.sink.sent().is_empty());
        assert_eq!(r.controller.snapshot().alignment.scale, 150.0);
    }

    // ── Slicing job ───────────────────────────────────────────────────────────

    fn mesh() -> MeshUpload {
        MeshUpload {
            file_name: "part.stl".into(),
            bytes: b"solid part".to_vec(),
        }
    }

    #[tokio::test]
    async fn test_slicing_params_frozen_while_job_in_flight() {
        let mut r = rig();
        r.controller.execute(Command::Slice(mesh())).await.unwrap();

        let result = r
            .controller
            .execute(Command::SetSlicing(SlicingParams::default()))
            .await;

        assert!(matches!(result, Err(SessionError::JobInFlight)));
        assert_eq!(r.jobs.submits.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_job_completion_replaces_images_and_stops_session() {
        // Arrange
        let mut r = rig();
        load_images(&mut r, 2).await;
        r.controller.execute(Command::StartTest).await.unwrap();
        r.controller.execute(Command::Slice(mesh())).await.unwrap();
        let attempt = r.jobs.submits.lock().unwrap()[0].0;
        r.notices();

        // Act
        for event in [
            JobEvent::Accepted {
                job_id: "j1".into(),
            },
            JobEvent::Update(JobUpdate::Progress {
                progress: 50.0,
                stage: JobStage::Projecting,
                detail: None,
            }),
            JobEvent::Update(JobUpdate::Complete {
                images: (*images(5)).clone(),
            }),
        ] {
            r.controller
                .handle(ControllerEvent::Job { attempt, event })
                .await;
        }

        // Assert
        let snap = r.controller.snapshot();
        assert_eq!(snap.image_count, 5);
        assert_eq!(snap.activity, ActivityKind::Idle);
        let notices = r.notices();
        assert!(matches!(
            notices.as_slice(),
            [
                SessionNotice::SliceProgress { .. },
                SessionNotice::SliceComplete { count: 5, .. }
            ]
        ));
    }

    #[tokio::test]
    async fn test_stale_job_events_are_discarded() {
        // Arrange
        let mut r = rig();
        r.controller.execute(Command::Slice(mesh())).await.unwrap();
        r.controller.execute(Command::Slice(mesh())).await.unwrap();

        // Act
        r.controller
            .handle(ControllerEvent::Job {
                attempt: 1,
                event: JobEvent::Accepted {
                    job_id: "old".into(),
                },
            })
            .await;

        // Assert
        assert_eq!(r.controller.snapshot().job, "submitting");
    }

    #[tokio::test]
    async fn test_backend_failure_is_reported() {
        let mut r = rig();
        r.controller.execute(Command::Slice(mesh())).await.unwrap();
        for event in [
            JobEvent::Accepted {
                job_id: "j".into(),
            },
            JobEvent::Update(JobUpdate::Failed {
                reason: "mesh not watertight".into(),
            }),
        ] {
            r.controller
                .handle(ControllerEvent::Job { attempt: 1, event })
                .await;
        }

        assert_eq!(
            r.notices(),
            vec![SessionNotice::SliceFailed {
                reason: "slicing failed: mesh not watertight".into()
            }]
        );
        assert!(!r.controller.snapshot().job.contains("submitting"));
    }

    #[tokio::test]
    async fn test_submit_failure_leaves_job_failed() {
        let mut r = rig();
        r.controller.execute(Command::Slice(mesh())).await.unwrap();

        r.controller
            .handle(ControllerEvent::Job {
                attempt: 1,
                event: JobEvent::SubmitFailed(tomo_core::JobError::SubmitFailed(
                    "connection refused".into(),
                )),
            })
            .await;

        assert!(r.controller.snapshot().job.starts_with("failed"));
        assert_eq!(r.notices().len(), 1);
    }

    // ── Import / export ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_import_cancels_job_and_applies_settings() {
        // Arrange
        let mut r = rig();
        r.controller.execute(Command::Slice(mesh())).await.unwrap();
        let settings = JobSettings {
            print_mode: PrintMode::TimePerFrame { ms: 25.0 },
            alignment: tomo_core::AlignmentParams {
                contrast: 80.0,
                ..Default::default()
            },
            ..JobSettings::default()
        };
        let job = ImportedJob {
            settings,
            images: images(3),
            mesh_available: false,
        };

        // Act
        r.controller.execute(Command::Import(Box::new(job))).await.unwrap();

        // Assert
        assert_eq!(r.jobs.cancels.load(Ordering::SeqCst), 1);
        let snap = r.controller.snapshot();
        assert_eq!(snap.image_count, 3);
        assert_eq!(snap.print_mode, PrintMode::TimePerFrame { ms: 25.0 });
        assert!(!snap.mesh_available);
        assert!(matches!(
            r.sink.sent().as_slice(),
            [ChannelMessage::UpdateAlignment(a)] if a.contrast == 80.0
        ));
        assert_eq!(
            r.notices(),
            vec![
                SessionNotice::Imported { count: 3 },
                SessionNotice::MeshUnavailable
            ]
        );

        // A late event from the cancelled job is discarded.
        r.controller
            .handle(ControllerEvent::Job {
                attempt: 1,
                event: JobEvent::StreamLost,
            })
            .await;
        assert!(r.controller.snapshot().job.starts_with("complete"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_import_with_zero_frame_time_changes_nothing() {
        // Arrange
        let mut r = rig();
        let job = ImportedJob {
            settings: JobSettings {
                print_mode: PrintMode::TimePerFrame { ms: 0.0 },
                ..JobSettings::default()
            },
            images: images(3),
            mesh_available: false,
        };

        // Act
        let result = r.controller.execute(Command::Import(Box::new(job))).await;

        // Assert
        assert!(matches!(
            result,
            Err(SessionError::InvalidParams(ParamError::FrameTime(_)))
        ));
        assert_eq!(r.jobs.cancels.load(Ordering::SeqCst), 0);
        let snap = r.controller.snapshot();
        assert_eq!(snap.image_count, 0);
        assert_eq!(snap.print_mode, PrintMode::Velocity);
        assert!(r.sink.sent().is_empty());
        assert!(r.notices().is_empty());
        assert!(matches!(
            r.controller.execute(Command::StartTest).await,
            Err(SessionError::NoImages)
        ));
    }

    #[tokio::test]
    async fn test_set_alignment_rejects_zero_scale() {
        let mut r = rig();
        let result = r
            .controller
            .execute(Command::SetAlignment(tomo_core::AlignmentParams {
                scale: 0.0,
                ..Default::default()
            }))
            .await;
        assert!(matches!(
            result,
            Err(SessionError::InvalidParams(ParamError::Scale(_)))
        ));
        assert!(r.sink.sent().is_empty());
    }

    #[tokio::test]
    async fn test_export_requires_completed_job() {
        let r = rig();
        assert!(matches!(
            r.controller.export("part.stl"),
            Err(SessionError::Package(PackageError::NotReady))
        ));
    }

    #[tokio::test]
    async fn test_export_after_import_round_trips() {
        let mut r = rig();
        load_images(&mut r, 2).await;

        let package = r.controller.export("part.stl").unwrap();
        let back = tomo_core::import_package(&package.bytes).unwrap();

        assert_eq!(package.file_name, "part_job.zip");
        assert_eq!(back.images.len(), 2);
    }

    // ── Run loop ──────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_paces_simulated_frames() {
        // Arrange
        let mut r = rig_with(Arc::new(RecordingLink::default()), RecordingSink::connected());
        load_images(&mut r, 3).await;
        r.controller
            .execute(Command::SetPrintMode(PrintMode::TimePerFrame { ms: 10.0 }))
            .await
            .unwrap();
        r.controller.execute(Command::SetSimulation(true)).await.unwrap();
        let sink = Arc::clone(&r.sink);
        let (tx, rx) = mpsc::channel(8);
        let handle = crate::application::events::ControllerHandle::new(tx);
        let task = tokio::spawn(r.controller.run(rx));

        // Act
        handle.execute(Command::StartPrint).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Assert
        assert_eq!(sink.frames().len(), 3);
        assert_eq!(sink.sent().last(), Some(&ChannelMessage::ClearImage));
        let snap = handle.snapshot().await.unwrap();
        assert_eq!(snap.activity, ActivityKind::Idle);

        handle.shutdown().await;
        task.await.unwrap();
    }
}
