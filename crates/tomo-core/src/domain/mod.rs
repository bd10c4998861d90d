//! Domain entities for TomoPrint.
//!
//! Pure data and rules with no I/O: parameter groups, print-mode timing, the
//! image set, and the slicing job state machine.  Everything here can be
//! compiled and tested without a rig, a display, or a slicing server.

pub mod image_set;
pub mod job_state;
pub mod params;
pub mod timing;
