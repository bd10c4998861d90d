//! Error taxonomy shared by every TomoPrint component.
//!
//! Each external channel has its own error enum so that a failure can always
//! be traced back to the connection that produced it:
//!
//! | enum             | channel                                  |
//! |------------------|------------------------------------------|
//! | [`LinkError`]    | Bluetooth command link to the rig        |
//! | [`ChannelError`] | projection channel to the second display |
//! | [`JobError`]     | slicing service (HTTP + event stream)    |
//! | [`PackageError`] | job package archive import/export        |
//!
//! Every variant renders a single human-readable message through
//! `thiserror`, which is what the controller surfaces to the user.

use thiserror::Error;

/// Errors raised by the device command link.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LinkError {
    /// The platform has no usable Bluetooth LE adapter.
    #[error("Bluetooth LE is not available on this system")]
    Unavailable,

    /// Discovery finished without a matching device (or the user aborted it).
    #[error("no device was selected")]
    NoDeviceSelected,

    /// The GATT connection to the selected device could not be established.
    #[error("could not connect to device: {0}")]
    ConnectFailed(String),

    /// The device does not expose the control service.
    #[error("control service not found on device")]
    ServiceNotFound,

    /// The control service lacks the write or notify characteristic.
    #[error("characteristic {0} not found on device")]
    CharacteristicNotFound(String),

    /// A command write was rejected by the transport.
    #[error("command write failed: {0}")]
    WriteFailed(String),

    /// The device disconnected (user-initiated or link loss).
    #[error("device disconnected")]
    Disconnected,

    /// A send was attempted while no device is paired.
    #[error("no device connected")]
    NotConnected,
}

/// Errors raised by the projection channel.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    /// The channel could not be opened (receiver unreachable, handshake failed).
    #[error("failed to start projection channel: {0}")]
    StartFailed(String),

    /// The receiver refused the connection.
    #[error("projection channel permission denied")]
    PermissionDenied,

    /// An open channel dropped.
    #[error("projection channel lost: {0}")]
    Lost(String),

    /// A send was attempted while the channel is not connected.
    #[error("projection channel is not connected")]
    NotConnected,

    /// A message could not be serialised.
    #[error("failed to encode channel message: {0}")]
    Encode(String),
}

/// Errors raised by the slicing job client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobError {
    /// The submission request failed (network error or HTTP error status).
    #[error("slicing job submission failed: {0}")]
    SubmitFailed(String),

    /// The progress stream dropped before a terminal frame arrived.
    #[error("connection to slicing server lost")]
    StreamLost,

    /// The backend reported `status = failed`.
    #[error("slicing failed: {0}")]
    BackendFailed(String),

    /// A terminal frame was missing its required payload.
    #[error("malformed progress frame: {0}")]
    Malformed(String),
}

/// Errors raised by the job package codec.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PackageError {
    /// The archive has no `settings.json` entry.
    #[error("job package is missing settings.json")]
    MissingSettings,

    /// The archive has no `projections/slice_NNNN.png` entries.
    #[error("job package contains no projection images")]
    MissingImages,

    /// The archive or its settings record could not be parsed.
    #[error("job package is malformed: {0}")]
    Malformed(String),

    /// Export was requested without a completed slicing job.
    #[error("no completed slicing job to export")]
    NotReady,

    /// The archive writer failed.
    #[error("failed to write job package: {0}")]
    Archive(String),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
