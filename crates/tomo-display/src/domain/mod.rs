//! Domain layer for tomo-display.
//!
//! Pure types with no sockets or async code: the display state machine and
//! the receiver configuration.

pub mod config;
pub mod display_state;

pub use config::DisplayConfig;
pub use display_state::DisplayState;
