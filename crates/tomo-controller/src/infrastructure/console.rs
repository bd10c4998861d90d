//! Line-command console: the terminal front end of the controller.
//!
//! Each input line parses into a [`ConsoleCommand`]; [`Console::dispatch`]
//! routes it either to the [`ControllerHandle`] (session commands) or to the
//! adapters that own a connection (pairing the device, opening the display
//! channel).  File I/O for `load`, `slice` and `export` also happens here so
//! the application layer never touches the file system.
//!
//! ```text
//! pair                              scan for and pair the rig
//! unpair                            disconnect the rig
//! display                           open or close the projection channel
//! load <zip>                        import a job package
//! slice <stl>                       submit a mesh for slicing
//! slicing <voxel> <angles> [rx ry rz]
//! motion <total> <speed> <pause-ms> <v-steps> <v-delay-us> <v-dir>
//! print | stop | test | stop-test | calibrate
//! nudge <up|down|left|right> [coarse|fine]
//! align <scale> <tx> <ty> <contrast>
//! mode velocity | mode tpf <ms> | mode hops <per-trigger> <delay-s>
//! simulate on|off
//! save-offset | reset-offset
//! export <zip>
//! status | help | quit
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use thiserror::Error;

use tomo_core::{
    import_package, AlignmentParams, NudgeDirection, NudgeStep, PrintMode, ProjectionParams,
    SlicingParams,
};

use crate::application::{Command, ControllerHandle, MeshUpload};
use crate::infrastructure::device_link::DeviceLinkManager;
use crate::infrastructure::projection_channel::{ChannelState, ProjectionChannelManager};

pub const HELP: &str = "\
commands:
  pair                                 pair the rig over Bluetooth LE
  unpair                               disconnect the rig
  display                              open/close the projection display
  load <zip>                           import a job package
  slice <stl>                          slice a mesh with the current parameters
  slicing <voxel> <angles> [rx ry rz]  set slicing parameters
  motion <total-deg> <speed-deg/s> <pause-ms> <v-steps> <v-delay-us> <v-dir 0|1>
  print | stop | test | stop-test | calibrate
  nudge <up|down|left|right> [coarse|fine]
  align <scale> <tx> <ty> <contrast>
  mode velocity | mode tpf <ms> | mode hops <per-trigger> <delay-s>
  simulate on|off
  save-offset | reset-offset
  export <zip>
  status | help | quit";

/// One parsed console line.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Pair,
    Unpair,
    Display,
    Load(PathBuf),
    Slice(PathBuf),
    Slicing(SlicingParams),
    Motion(ProjectionParams),
    Print,
    Stop,
    Test,
    StopTest,
    Calibrate,
    Nudge {
        direction: NudgeDirection,
        step: NudgeStep,
    },
    Align {
        scale: f64,
        translate_x: f64,
        translate_y: f64,
        contrast: f64,
    },
    Mode(PrintMode),
    Simulate(bool),
    SaveOffset,
    ResetOffset,
    Export(PathBuf),
    Status,
    Help,
    Quit,
}

/// Why a line could not be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown command '{0}' (try 'help')")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),
}

/// Parses one line.  Blank lines and `#` comments yield `Ok(None)`.
///
/// # Errors
///
/// Returns [`ParseError`] for unknown commands or bad arguments.
pub fn parse_line(line: &str) -> Result<Option<ConsoleCommand>, ParseError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();

    let command = match verb.to_ascii_lowercase().as_str() {
        "pair" => ConsoleCommand::Pair,
        "unpair" => ConsoleCommand::Unpair,
        "display" => ConsoleCommand::Display,
        "load" => ConsoleCommand::Load(path_arg(&args, "load <zip>")?),
        "slice" => ConsoleCommand::Slice(path_arg(&args, "slice <stl>")?),
        "slicing" => ConsoleCommand::Slicing(parse_slicing(&args)?),
        "motion" => ConsoleCommand::Motion(parse_motion(&args)?),
        "print" => ConsoleCommand::Print,
        "stop" => ConsoleCommand::Stop,
        "test" => ConsoleCommand::Test,
        "stop-test" => ConsoleCommand::StopTest,
        "calibrate" => ConsoleCommand::Calibrate,
        "nudge" => parse_nudge(&args)?,
        "align" => {
            const USAGE: &str = "align <scale> <tx> <ty> <contrast>";
            if args.len() != 4 {
                return Err(ParseError::Usage(USAGE));
            }
            ConsoleCommand::Align {
                scale: number(args[0], USAGE)?,
                translate_x: number(args[1], USAGE)?,
                translate_y: number(args[2], USAGE)?,
                contrast: number(args[3], USAGE)?,
            }
        }
        "mode" => ConsoleCommand::Mode(parse_mode(&args)?),
        "simulate" => match args.as_slice() {
            ["on"] => ConsoleCommand::Simulate(true),
            ["off"] => ConsoleCommand::Simulate(false),
            _ => return Err(ParseError::Usage("simulate on|off")),
        },
        "save-offset" => ConsoleCommand::SaveOffset,
        "reset-offset" => ConsoleCommand::ResetOffset,
        "export" => ConsoleCommand::Export(path_arg(&args, "export <zip>")?),
        "status" => ConsoleCommand::Status,
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => return Err(ParseError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

fn path_arg(args: &[&str], usage: &'static str) -> Result<PathBuf, ParseError> {
    match args {
        [path] => Ok(PathBuf::from(path)),
        _ => Err(ParseError::Usage(usage)),
    }
}

fn number<T: FromStr>(raw: &str, usage: &'static str) -> Result<T, ParseError> {
    raw.parse().map_err(|_| ParseError::Usage(usage))
}

fn parse_slicing(args: &[&str]) -> Result<SlicingParams, ParseError> {
    const USAGE: &str = "slicing <voxel> <angles> [rx ry rz]";
    let (voxel, angles, rotation) = match args {
        [v, a] => (v, a, None),
        [v, a, x, y, z] => (v, a, Some((x, y, z))),
        _ => return Err(ParseError::Usage(USAGE)),
    };
    let mut params = SlicingParams {
        voxel_size: number(voxel, USAGE)?,
        num_projections: number(angles, USAGE)?,
        ..SlicingParams::default()
    };
    if let Some((x, y, z)) = rotation {
        params.rot_x = number(x, USAGE)?;
        params.rot_y = number(y, USAGE)?;
        params.rot_z = number(z, USAGE)?;
    }
    Ok(params)
}

fn parse_motion(args: &[&str]) -> Result<ProjectionParams, ParseError> {
    const USAGE: &str = "motion <total> <speed> <pause-ms> <v-steps> <v-delay-us> <v-dir>";
    let [total, speed, pause, steps, delay, direction] = args else {
        return Err(ParseError::Usage(USAGE));
    };
    Ok(ProjectionParams {
        total_rotation: number(total, USAGE)?,
        rotation_speed: number(speed, USAGE)?,
        pause_after_rotation: number(pause, USAGE)?,
        vertical_steps: number(steps, USAGE)?,
        vertical_delay: number(delay, USAGE)?,
        vertical_direction: number(direction, USAGE)?,
    })
}

fn parse_nudge(args: &[&str]) -> Result<ConsoleCommand, ParseError> {
    const USAGE: &str = "nudge <up|down|left|right> [coarse|fine]";
    let (direction, modifier) = match args {
        [d] => (d, None),
        [d, m] => (d, Some(*m)),
        _ => return Err(ParseError::Usage(USAGE)),
    };
    let direction = NudgeDirection::from_str(direction).map_err(|_| ParseError::Usage(USAGE))?;
    let step = match modifier {
        None => NudgeStep::Normal,
        Some("coarse") => NudgeStep::Coarse,
        Some("fine") => NudgeStep::Fine,
        Some(_) => return Err(ParseError::Usage(USAGE)),
    };
    Ok(ConsoleCommand::Nudge { direction, step })
}

fn parse_mode(args: &[&str]) -> Result<PrintMode, ParseError> {
    const USAGE: &str = "mode velocity | mode tpf <ms> | mode hops <per-trigger> <delay-s>";
    match args {
        ["velocity"] => Ok(PrintMode::Velocity),
        ["tpf", ms] => Ok(PrintMode::TimePerFrame {
            ms: number(ms, USAGE)?,
        }),
        ["hops", per_trigger, delay] => Ok(PrintMode::Hops {
            hops_per_trigger: number(per_trigger, USAGE)?,
            hop_delay: number(delay, USAGE)?,
        }),
        _ => Err(ParseError::Usage(USAGE)),
    }
}

// ── Dispatch ──────────────────────────────────────────────────────────────────

/// What the caller should do after a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Print this line and keep reading.
    Text(String),
    Quit,
}

/// Routes console commands to the controller and its adapters.
pub struct Console {
    handle: ControllerHandle,
    device: Arc<DeviceLinkManager>,
    channel: Arc<ProjectionChannelManager>,
}

impl Console {
    pub fn new(
        handle: ControllerHandle,
        device: Arc<DeviceLinkManager>,
        channel: Arc<ProjectionChannelManager>,
    ) -> Self {
        Self {
            handle,
            device,
            channel,
        }
    }

    /// Runs one command.
    ///
    /// # Errors
    ///
    /// Returns the refusal or I/O failure with context.  The console stays
    /// usable after an error.
    pub async fn dispatch(&self, command: ConsoleCommand) -> anyhow::Result<Reply> {
        let text = match command {
            ConsoleCommand::Pair => {
                let name = self.device.connect().await.context("pairing failed")?;
                format!("paired with {name}")
            }
            ConsoleCommand::Unpair => match self.device.device_name() {
                Some(name) => {
                    self.device.disconnect().await;
                    format!("disconnected {name}")
                }
                None => "no device paired".to_string(),
            },
            ConsoleCommand::Display => match self.channel.toggle().await {
                Ok(ChannelState::Connected) => format!("display connected ({})", self.channel.url()),
                Ok(state) => format!("display {state:?}").to_lowercase(),
                Err(e) => return Err(e).context("could not open the display"),
            },
            ConsoleCommand::Load(path) => {
                let bytes = read_file(&path).await?;
                let job = import_package(&bytes)
                    .with_context(|| format!("could not import {}", path.display()))?;
                let count = job.images.len();
                self.run(Command::Import(Box::new(job))).await?;
                format!("loaded {count} images from {}", path.display())
            }
            ConsoleCommand::Slice(path) => {
                let mesh = read_mesh(&path).await?;
                self.run(Command::Slice(mesh)).await?;
                format!("submitted {}", path.display())
            }
            ConsoleCommand::Slicing(params) => {
                self.run(Command::SetSlicing(params)).await?;
                "slicing parameters updated".to_string()
            }
            ConsoleCommand::Motion(params) => {
                self.run(Command::SetProjection(params)).await?;
                "motion parameters updated".to_string()
            }
            ConsoleCommand::Print => {
                self.run(Command::StartPrint).await?;
                "print running".to_string()
            }
            ConsoleCommand::Stop => {
                self.run(Command::Stop).await?;
                "stopped".to_string()
            }
            ConsoleCommand::Test => {
                self.run(Command::StartTest).await?;
                "test playback running".to_string()
            }
            ConsoleCommand::StopTest => {
                self.run(Command::StopTest).await?;
                "test playback stopped".to_string()
            }
            ConsoleCommand::Calibrate => {
                self.run(Command::ToggleCalibration).await?;
                let snapshot = self.handle.snapshot().await?;
                format!("calibration: {:?}", snapshot.activity).to_lowercase()
            }
            ConsoleCommand::Nudge { direction, step } => {
                self.run(Command::Nudge { direction, step }).await?;
                let a = self.handle.snapshot().await?.alignment;
                format!("offset ({:.1}, {:.1})", a.translate_x, a.translate_y)
            }
            ConsoleCommand::Align {
                scale,
                translate_x,
                translate_y,
                contrast,
            } => {
                self.run(Command::SetAlignment(AlignmentParams {
                    scale,
                    translate_x,
                    translate_y,
                    contrast,
                }))
                .await?;
                "alignment updated".to_string()
            }
            ConsoleCommand::Mode(mode) => {
                self.run(Command::SetPrintMode(mode)).await?;
                format!("print mode {mode:?}")
            }
            ConsoleCommand::Simulate(on) => {
                self.run(Command::SetSimulation(on)).await?;
                format!("simulation {}", if on { "on" } else { "off" })
            }
            ConsoleCommand::SaveOffset => {
                self.run(Command::SaveOffset).await?;
                "calibration offset saved".to_string()
            }
            ConsoleCommand::ResetOffset => {
                self.run(Command::ResetOffset).await?;
                "calibration offset reset".to_string()
            }
            ConsoleCommand::Export(path) => {
                let name = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("tomoprint-job");
                let package = self.handle.export(name).await?;
                tokio::fs::write(&path, &package.bytes)
                    .await
                    .with_context(|| format!("could not write {}", path.display()))?;
                format!("wrote {} ({} bytes)", path.display(), package.bytes.len())
            }
            ConsoleCommand::Status => {
                let snapshot = self.handle.snapshot().await?;
                serde_json::to_string_pretty(&snapshot).context("could not render status")?
            }
            ConsoleCommand::Help => HELP.to_string(),
            ConsoleCommand::Quit => return Ok(Reply::Quit),
        };
        Ok(Reply::Text(text))
    }

    async fn run(&self, command: Command) -> anyhow::Result<()> {
        self.handle.execute(command).await?;
        Ok(())
    }
}

async fn read_file(path: &Path) -> anyhow::Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("could not read {}", path.display()))
}

/// Reads a mesh file for upload, keeping its file name.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub async fn read_mesh(path: &Path) -> anyhow::Result<MeshUpload> {
    let bytes = read_file(path).await?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("mesh.stl")
        .to_string();
    Ok(MeshUpload { file_name, bytes })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
