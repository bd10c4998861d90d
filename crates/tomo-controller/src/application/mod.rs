//! Application layer for the controller.
//!
//! Use cases here orchestrate the `tomo_core` domain against the rig, the
//! display receiver and the slicing service, but reach them only through the
//! traits declared in [`print_session`] and [`calibration`].  No sockets,
//! radios or files are touched in this layer.
//!
//! # Sub-modules
//!
//! - **`print_session`** – The controller task: print runs, test playback,
//!   calibration mode, slicing job lifecycle, import/export.
//! - **`session`** – Which activity owns the projector, plus the single frame
//!   timer.
//! - **`calibration`** – Live alignment and the persisted calibration offset.
//! - **`events`** – The controller's inbound event queue, outbound notices
//!   and the front-end handle.

pub mod calibration;
pub mod events;
pub mod print_session;
pub mod session;

pub use calibration::{CalibrationManager, KeyValueStore, StorageError};
pub use events::{Command, ControllerEvent, ControllerHandle, JobEvent, MeshUpload, SessionNotice};
pub use print_session::{
    CommandLink, ControllerPorts, JobSubmitter, PrintSessionController, ProjectionSink,
    SessionError,
};
pub use session::{ActivityKind, PrintState, SessionSnapshot};
