//! Infrastructure layer for tomo-display: the WebSocket listener.

pub mod ws_server;

pub use ws_server::DisplayServer;
