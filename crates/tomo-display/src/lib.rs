//! tomo-display library crate.
//!
//! The receiving end of the projection channel.  The controller connects over
//! WebSocket and pushes JSON frames (`UPDATE_IMAGE`, `CLEAR_IMAGE`,
//! `TOGGLE_CALIBRATION`, `UPDATE_ALIGNMENT`); this crate folds them into a
//! [`domain::DisplayState`] that a presentation surface renders.
//!
//! ```text
//! tomo-controller (WebSocket client)
//!         │  JSON text frames
//!         ▼
//! [tomo-display]
//!   ├── domain/           DisplayState (pure), DisplayConfig
//!   └── infrastructure/
//!         └── ws_server/  accept loop, per-session reader, watch channel
//! ```
//!
//! `domain` does no I/O.  `infrastructure` owns the sockets and publishes
//! every state change on a `tokio::sync::watch` channel.

/// Domain layer: display state and configuration (no I/O).
pub mod domain;

/// Infrastructure layer: WebSocket server.
pub mod infrastructure;
