//! # tomo-core
//!
//! Shared library for TomoPrint containing the parameter model, the wire
//! protocols spoken by the controller, and the job package codec.
//!
//! This crate is used by both the controller and the display receiver.
//! It has zero dependencies on OS APIs, async runtimes, or network sockets.
//!
//! # Architecture overview
//!
//! TomoPrint drives a rotating volumetric-projection rig.  A remote slicing
//! service turns a mesh into an ordered set of cross-section images; the
//! controller then rotates the resin vial (through a microcontroller reached
//! over Bluetooth LE) while a second display projects the image matching the
//! current angle.
//!
//! This crate (`tomo-core`) is the shared foundation.  It defines:
//!
//! - **`domain`** – Parameter structs, print modes and their frame timing,
//!   the ordered [`ImageSet`], and the slicing job state machine.
//!
//! - **`protocol`** – How bytes travel: the 24-byte device command, the JSON
//!   projection channel messages, the slicing progress frames, and the
//!   base64 helpers used to move PNG bytes through JSON.
//!
//! - **`package`** – The portable job archive (`settings.json` plus
//!   `projections/slice_NNNN.png`).

pub mod domain;
pub mod error;
pub mod package;
pub mod protocol;

pub use domain::image_set::{ImageSet, SliceImage};
pub use domain::job_state::{JobStage, JobUpdate, SlicingJobState};
pub use domain::params::{
    AlignmentParams, NudgeDirection, NudgeStep, PrintMode, ProjectionParams, SlicingParams,
};
pub use error::{ChannelError, JobError, LinkError, PackageError};
pub use package::codec::{export_package, import_package, ImportedJob, JobPackage, JobSettings};
pub use protocol::channel::ChannelMessage;
pub use protocol::device::DeviceCommand;
