//! TOML-based configuration for the controller.
//!
//! Reads and writes [`AppConfig`] at the platform-appropriate path:
//! - Windows:  `%APPDATA%\TomoPrint\config.toml`
//! - Linux:    `~/.config/tomoprint/config.toml`
//! - macOS:    `~/Library/Application Support/TomoPrint/config.toml`
//!
//! ```toml
//! [controller]
//! log_level = "info"
//!
//! [slicer]
//! base_url = "http://localhost:5000"
//!
//! [device]
//! name_prefix = "ESP32"
//!
//! [display]
//! url = "ws://localhost:8765"
//!
//! [playback]
//! test_interval_ms = 100
//! ```
//!
//! Every field has a `#[serde(default = "..")]`, so a missing file, a missing
//! section or a missing key all fall back to the values above.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of the config file inside the config directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level controller configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub slicer: SlicerConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
}

/// General controller behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControllerConfig {
    /// `tracing` log level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Slicing service location.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlicerConfig {
    /// Base URL; `/api/slice/...` is appended.
    #[serde(default = "default_slicer_url")]
    pub base_url: String,
}

/// Rig discovery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    /// Advertised-name prefix matched during the Bluetooth scan.
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,
}

/// Display receiver location.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DisplayConfig {
    /// WebSocket URL of the projection channel.
    #[serde(default = "default_display_url")]
    pub url: String,
}

/// Test playback timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlaybackConfig {
    /// Interval between frames during test playback.
    #[serde(default = "default_test_interval_ms")]
    pub test_interval_ms: u64,
}

impl PlaybackConfig {
    pub fn test_interval(&self) -> Duration {
        Duration::from_millis(self.test_interval_ms.max(1))
    }
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_slicer_url() -> String {
    "http://localhost:5000".to_string()
}
fn default_name_prefix() -> String {
    "ESP32".to_string()
}
fn default_display_url() -> String {
    "ws://localhost:8765".to_string()
}
fn default_test_interval_ms() -> u64 {
    100
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for SlicerConfig {
    fn default() -> Self {
        Self {
            base_url: default_slicer_url(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name_prefix: default_name_prefix(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            url: default_display_url(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            test_interval_ms: default_test_interval_ms(),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for controller files.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Loads `AppConfig` from the platform path, or defaults if the file does
/// not yet exist.
///
/// # Errors
///
/// See [`load_config_from`].
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Persists `config` to `path`, creating the parent directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolves the platform config base directory plus the `TomoPrint`
/// subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("TomoPrint"))
    }

    #[cfg(target_os = "linux")]
    {
        // XDG_CONFIG_HOME or ~/.config
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("tomoprint"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("TomoPrint")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
