//! Storage infrastructure: files under the platform config directory.
//!
//! - `config` – the TOML configuration file, with defaults on first run.
//! - `offset_store` – the JSON key-value file behind
//!   [`KeyValueStore`](crate::application::KeyValueStore), used for the
//!   persisted calibration offset.

pub mod config;
pub mod offset_store;

pub use offset_store::FileKeyValueStore;
