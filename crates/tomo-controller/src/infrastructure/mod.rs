//! Infrastructure layer for the controller.
//!
//! Contains the adapters behind the application-layer ports: the Bluetooth
//! LE device link, the WebSocket projection channel, the HTTP slicing job
//! client and file-system storage.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `tomo_core`, but MUST NOT be imported by the `application` layer.

pub mod console;
pub mod device_link;
pub mod projection_channel;
pub mod slicing_client;
pub mod storage;
