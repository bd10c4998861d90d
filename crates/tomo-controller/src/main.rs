//! TomoPrint controller: entry point.
//!
//! Wires the print session controller to its adapters and runs one of two
//! front ends:
//!
//! ```text
//! tomo-controller [OPTIONS] [console]            interactive line console
//! tomo-controller [OPTIONS] slice <STL> [--out]  slice a mesh, write the job package
//! ```
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load config.toml, apply CLI/env overrides
//!  └─ build adapters
//!       ├─ DeviceLinkManager        (Bluetooth LE, or --mock-device)
//!       ├─ ProjectionChannelManager (WebSocket to tomo-display)
//!       └─ SlicingJobClient         (HTTP + server-sent events)
//!  └─ PrintSessionController::run   (Tokio task, owns all session state)
//!  └─ front end
//!       ├─ console: stdin lines → Console::dispatch, notices → stdout
//!       └─ slice:   submit, wait for completion, export
//! ```
//!
//! | Variable            | Overrides              |
//! |---------------------|------------------------|
//! | `TOMO_CONFIG`       | config file path       |
//! | `TOMO_SLICER_URL`   | `[slicer] base_url`    |
//! | `TOMO_DISPLAY_URL`  | `[display] url`        |
//! | `TOMO_DEVICE_NAME`  | `[device] name_prefix` |

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tomo_core::SlicingParams;
use tomo_controller::application::{
    CalibrationManager, Command, ControllerHandle, ControllerPorts, PrintSessionController,
    SessionNotice,
};
use tomo_controller::infrastructure::console::{parse_line, read_mesh, Console, Reply};
use tomo_controller::infrastructure::device_link::mock::MockTransport;
use tomo_controller::infrastructure::device_link::{BleTransport, DeviceLinkManager};
use tomo_controller::infrastructure::projection_channel::ProjectionChannelManager;
use tomo_controller::infrastructure::slicing_client::SlicingJobClient;
use tomo_controller::infrastructure::storage::config::{config_file_path, load_config_from, AppConfig};
use tomo_controller::infrastructure::storage::offset_store::STATE_FILE_NAME;
use tomo_controller::infrastructure::storage::FileKeyValueStore;

/// Capacity of the controller's inbound event queue.
const EVENT_QUEUE: usize = 64;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// TomoPrint print/projection controller.
#[derive(Debug, Parser)]
#[command(
    name = "tomo-controller",
    about = "Print and projection controller for TomoPrint",
    version
)]
struct Cli {
    /// Config file [default: platform config dir]/config.toml.
    #[arg(long, env = "TOMO_CONFIG")]
    config: Option<PathBuf>,

    /// Base URL of the slicing service.
    #[arg(long, env = "TOMO_SLICER_URL")]
    slicer_url: Option<String>,

    /// WebSocket URL of the display receiver.
    #[arg(long, env = "TOMO_DISPLAY_URL")]
    display_url: Option<String>,

    /// Advertised-name prefix of the rig.
    #[arg(long, env = "TOMO_DEVICE_NAME")]
    device_name: Option<String>,

    /// Use an in-memory rig instead of Bluetooth LE.
    #[arg(long)]
    mock_device: bool,

    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(Debug, Subcommand)]
enum Mode {
    /// Interactive line console (default).
    Console,
    /// Slice a mesh and write the resulting job package.
    Slice {
        /// Mesh file to upload.
        stl: PathBuf,
        /// Output archive [default: <stl stem>.zip].
        #[arg(long, short)]
        out: Option<PathBuf>,
        /// Voxel pitch in mesh units.
        #[arg(long, default_value_t = 1.0)]
        voxel_size: f64,
        /// Number of projection angles.
        #[arg(long, default_value_t = 360)]
        projections: u32,
        /// Pre-rotation about X in degrees.
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        rot_x: i32,
        /// Pre-rotation about Y in degrees.
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        rot_y: i32,
        /// Pre-rotation about Z in degrees.
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        rot_z: i32,
    },
}

impl Cli {
    fn config_path(&self) -> anyhow::Result<PathBuf> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => config_file_path().context("no --config given and no platform config dir"),
        }
    }

    /// Command-line and environment values win over the file.
    fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(url) = &self.slicer_url {
            config.slicer.base_url = url.clone();
        }
        if let Some(url) = &self.display_url {
            config.display.url = url.clone();
        }
        if let Some(name) = &self.device_name {
            config.device.name_prefix = name.clone();
        }
    }
}

/// The calibration offset lives next to the config file.
fn state_path(config_path: &Path) -> PathBuf {
    config_path.with_file_name(STATE_FILE_NAME)
}

// ── Wiring ────────────────────────────────────────────────────────────────────

struct Runtime {
    handle: ControllerHandle,
    device: Arc<DeviceLinkManager>,
    channel: Arc<ProjectionChannelManager>,
    notices: mpsc::UnboundedReceiver<SessionNotice>,
    controller: JoinHandle<()>,
}

fn transport(mock_device: bool) -> Arc<dyn BleTransport> {
    if mock_device {
        info!("using the in-memory mock rig");
        return Arc::new(MockTransport::new());
    }
    #[cfg(feature = "ble")]
    {
        Arc::new(tomo_controller::infrastructure::device_link::ble::BtleTransport::new())
    }
    #[cfg(not(feature = "ble"))]
    {
        warn!("built without the `ble` feature; pairing is unavailable");
        Arc::new(tomo_controller::infrastructure::device_link::UnavailableTransport)
    }
}

fn start(config: &AppConfig, state_file: PathBuf, mock_device: bool) -> Runtime {
    let (tx, rx) = mpsc::channel(EVENT_QUEUE);
    let (notice_tx, notices) = mpsc::unbounded_channel();

    let device = Arc::new(DeviceLinkManager::new(
        transport(mock_device),
        config.device.name_prefix.clone(),
        tx.clone(),
    ));
    let channel = Arc::new(ProjectionChannelManager::new(
        config.display.url.clone(),
        tx.clone(),
    ));
    let jobs = Arc::new(SlicingJobClient::new(
        config.slicer.base_url.clone(),
        tx.clone(),
    ));
    info!(
        "slicer {}, display {}, device '{}*'",
        jobs.base_url(),
        channel.url(),
        config.device.name_prefix
    );

    let calibration = CalibrationManager::new(Arc::new(FileKeyValueStore::new(state_file)));
    let controller = PrintSessionController::new(
        ControllerPorts {
            link: device.clone(),
            channel: channel.clone(),
            jobs,
        },
        calibration,
        config.playback.test_interval(),
        notice_tx,
    );

    Runtime {
        handle: ControllerHandle::new(tx),
        device,
        channel,
        notices,
        controller: tokio::spawn(controller.run(rx)),
    }
}

async fn shut_down(
    handle: ControllerHandle,
    controller: JoinHandle<()>,
    device: &DeviceLinkManager,
    channel: &ProjectionChannelManager,
) {
    handle.shutdown().await;
    if let Err(e) = controller.await {
        warn!("controller task ended abnormally: {e}");
    }
    channel.terminate().await;
    device.disconnect().await;
}

// ── Front ends ────────────────────────────────────────────────────────────────

async fn run_console(runtime: Runtime) -> anyhow::Result<()> {
    let Runtime {
        handle,
        device,
        channel,
        mut notices,
        controller,
    } = runtime;

    tokio::spawn(async move {
        while let Some(notice) = notices.recv().await {
            println!("* {notice}");
        }
    });

    let console = Console::new(handle.clone(), device.clone(), channel.clone());
    println!("TomoPrint controller ready; type 'help' for commands");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("could not read stdin")?,
            _ = tokio::signal::ctrl_c() => {
                info!("received Ctrl+C, shutting down");
                break;
            }
        };
        let Some(line) = line else {
            break;
        };
        match parse_line(&line) {
            Ok(None) => {}
            Ok(Some(command)) => match console.dispatch(command).await {
                Ok(Reply::Text(text)) => println!("{text}"),
                Ok(Reply::Quit) => break,
                Err(e) => println!("error: {e:#}"),
            },
            Err(e) => println!("{e}"),
        }
    }

    shut_down(handle, controller, &device, &channel).await;
    Ok(())
}

async fn run_slice(
    runtime: &mut Runtime,
    stl: &Path,
    out: Option<PathBuf>,
    params: SlicingParams,
) -> anyhow::Result<PathBuf> {
    runtime
        .handle
        .execute(Command::SetSlicing(params))
        .await
        .context("invalid slicing parameters")?;
    let mesh = read_mesh(stl).await?;
    runtime
        .handle
        .execute(Command::Slice(mesh))
        .await
        .context("could not submit the mesh")?;

    loop {
        match runtime.notices.recv().await {
            Some(notice @ SessionNotice::SliceComplete { .. }) => {
                info!("{notice}");
                break;
            }
            Some(notice @ SessionNotice::SliceFailed { .. }) => bail!("{notice}"),
            Some(notice) => info!("{notice}"),
            None => bail!("controller stopped before slicing finished"),
        }
    }

    let stem = stl
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("tomoprint-job");
    let package = runtime.handle.export(stem).await?;
    let out = out.unwrap_or_else(|| PathBuf::from(&package.file_name));
    tokio::fs::write(&out, &package.bytes)
        .await
        .with_context(|| format!("could not write {}", out.display()))?;
    Ok(out)
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config_path()?;
    let mut config = load_config_from(&config_path)
        .with_context(|| format!("could not load {}", config_path.display()))?;
    cli.apply_overrides(&mut config);

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.controller.log_level)),
        )
        .init();

    info!("TomoPrint controller starting (config {})", config_path.display());
    let mut runtime = start(&config, state_path(&config_path), cli.mock_device);

    match cli.mode.unwrap_or(Mode::Console) {
        Mode::Console => run_console(runtime).await?,
        Mode::Slice {
            stl,
            out,
            voxel_size,
            projections,
            rot_x,
            rot_y,
            rot_z,
        } => {
            let params = SlicingParams {
                voxel_size,
                num_projections: projections,
                rot_x,
                rot_y,
                rot_z,
            };
            let result = tokio::select! {
                result = run_slice(&mut runtime, &stl, out, params) => result,
                _ = tokio::signal::ctrl_c() => Err(anyhow::anyhow!("interrupted")),
            };
            let Runtime {
                handle,
                device,
                channel,
                controller,
                ..
            } = runtime;
            shut_down(handle, controller, &device, &channel).await;
            let out = result?;
            println!("wrote {}", out.display());
        }
    }

    info!("TomoPrint controller stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults_to_console() {
        let cli = Cli::parse_from(["tomo-controller"]);
        assert!(cli.mode.is_none());
        assert!(!cli.mock_device);
    }

    #[test]
    fn test_overrides_replace_config_values() {
        // Arrange
        let cli = Cli::parse_from([
            "tomo-controller",
            "--slicer-url",
            "http://10.0.0.5:5000",
            "--display-url",
            "ws://10.0.0.6:8765",
            "--device-name",
            "TOMO",
        ]);
        let mut config = AppConfig::default();

        // Act
        cli.apply_overrides(&mut config);

        // Assert
        assert_eq!(config.slicer.base_url, "http://10.0.0.5:5000");
        assert_eq!(config.display.url, "ws://10.0.0.6:8765");
        assert_eq!(config.device.name_prefix, "TOMO");
        assert_eq!(config.playback.test_interval_ms, 100);
    }

    #[test]
    fn test_slice_subcommand_parses_negative_rotation() {
        let cli = Cli::parse_from([
            "tomo-controller",
            "slice",
            "part.stl",
            "--out",
            "part.zip",
            "--projections",
            "120",
            "--rot-z",
            "-90",
        ]);
        match cli.mode {
            Some(Mode::Slice {
                stl,
                out,
                projections,
                rot_z,
                voxel_size,
                ..
            }) => {
                assert_eq!(stl, PathBuf::from("part.stl"));
                assert_eq!(out, Some(PathBuf::from("part.zip")));
                assert_eq!(projections, 120);
                assert_eq!(rot_z, -90);
                assert_eq!(voxel_size, 1.0);
            }
            other => panic!("expected slice, got {other:?}"),
        }
    }

    #[test]
    fn test_explicit_config_path_is_used() {
        let cli = Cli::parse_from(["tomo-controller", "--config", "/tmp/tomo/config.toml"]);
        assert_eq!(cli.config_path().unwrap(), PathBuf::from("/tmp/tomo/config.toml"));
    }

    #[test]
    fn test_state_file_sits_next_to_config() {
        let path = state_path(Path::new("/etc/tomo/config.toml"));
        assert_eq!(path, PathBuf::from("/etc/tomo/state.json"));
    }
}
