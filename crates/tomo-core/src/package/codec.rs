//! Job package archive: settings plus the projection image set.
//!
//! # Layout
//!
//! ```text
//! settings.json                 all parameter structs, one JSON object
//! projections/slice_0000.png
//! projections/slice_0001.png
//! ...
//! ```
//!
//! Image entry names carry a zero-padded index so that the archive sorts in
//! projection order.  Import never trusts container order: images are ordered
//! by the index parsed from each entry name.
//!
//! The source mesh is never embedded.  An [`ImportedJob`] therefore reports
//! `mesh_available == false`, which callers treat as informational.

use std::io::{Cursor, Read, Write};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::domain::image_set::ImageSet;
use crate::domain::job_state::SlicingJobState;
use crate::domain::params::{
    AlignmentParams, ParamError, PrintMode, ProjectionParams, SlicingParams,
};
use crate::error::PackageError;

/// Name of the settings entry at the archive root.
pub const SETTINGS_ENTRY: &str = "settings.json";

/// Directory holding the projection images.
pub const PROJECTIONS_DIR: &str = "projections/";

const SLICE_PREFIX: &str = "projections/slice_";
const SLICE_SUFFIX: &str = ".png";

/// Everything the settings entry records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSettings {
    pub slicing: SlicingParams,
    pub projection: ProjectionParams,
    pub alignment: AlignmentParams,
    /// Older archives may predate print modes; they import as `Velocity`.
    #[serde(default)]
    pub print_mode: PrintMode,
}

impl JobSettings {
    /// Validates every record.
    ///
    /// # Errors
    ///
    /// Returns the first [`ParamError`] found.
    pub fn validate(&self) -> Result<(), ParamError> {
        self.slicing.validate()?;
        self.projection.validate()?;
        self.alignment.validate()?;
        self.print_mode.validate()
    }
}

/// A built archive ready to be written to disk.
#[derive(Debug, Clone)]
pub struct JobPackage {
    /// Suggested file name, always ending in `.zip`.
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Result of a successful import.  Nothing is partially applied: callers
/// receive either this whole value or an error.
#[derive(Debug, Clone)]
pub struct ImportedJob {
    pub settings: JobSettings,
    pub images: Arc<ImageSet>,
    /// Always `false`: archives do not carry the source mesh.
    pub mesh_available: bool,
}

/// Entry name for image `index`.
pub fn slice_entry_name(index: usize) -> String {
    format!("{SLICE_PREFIX}{index:04}{SLICE_SUFFIX}")
}

/// Parses the index out of `projections/slice_NNNN.png`.
fn parse_slice_entry(name: &str) -> Option<usize> {
    let digits = name.strip_prefix(SLICE_PREFIX)?.strip_suffix(SLICE_SUFFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Archive file name derived from the mesh file name (extension dropped).
fn package_file_name(suggested: &str) -> String {
    let stem = suggested
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(suggested)
        .trim();
    let stem = stem
        .rsplit_once('.')
        .map(|(s, _)| s)
        .filter(|s| !s.is_empty())
        .unwrap_or(stem);
    let clean: String = stem
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if clean.is_empty() {
        "tomoprint_job.zip".to_string()
    } else {
        format!("{clean}_job.zip")
    }
}

fn archive_err(e: impl std::fmt::Display) -> PackageError {
    PackageError::Archive(e.to_string())
}

/// Builds a job package.
///
/// # Errors
///
/// - [`PackageError::NotReady`] unless `state` is `Complete` with a nonempty
///   image set.
/// - [`PackageError::Archive`] if the archive writer fails.
pub fn export_package(
    state: &SlicingJobState,
    settings: &JobSettings,
    suggested_name: &str,
) -> Result<JobPackage, PackageError> {
    let images = match state.images() {
        Some(images) if images.is_ready() => images,
        _ => return Err(PackageError::NotReady),
    };

    let settings_json =
        serde_json::to_vec_pretty(settings).map_err(|e| PackageError::Malformed(e.to_string()))?;

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    // PNG data is already compressed.
    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

    writer
        .start_file(SETTINGS_ENTRY, deflated)
        .map_err(archive_err)?;
    writer.write_all(&settings_json).map_err(archive_err)?;

    writer
        .add_directory(PROJECTIONS_DIR, stored)
        .map_err(archive_err)?;
    for (position, image) in images.iter().enumerate() {
        writer
            .start_file(slice_entry_name(position), stored)
            .map_err(archive_err)?;
        writer.write_all(&image.bytes).map_err(archive_err)?;
    }

    let bytes = writer.finish().map_err(archive_err)?.into_inner();
    let file_name = package_file_name(suggested_name);
    debug!("exported {} images into {file_name} ({} bytes)", images.len(), bytes.len());

    Ok(JobPackage { file_name, bytes })
}

/// Reads a job package.
///
/// Entries outside `settings.json` and `projections/slice_NNNN.png` are
/// ignored.
///
/// # Errors
///
/// - [`PackageError::Archive`] if the bytes are not a readable archive.
/// - [`PackageError::MissingSettings`] without a `settings.json` entry.
/// - [`PackageError::Malformed`] if settings do not parse or hold values
///   outside their valid ranges, or two entries claim the same index.
/// - [`PackageError::MissingImages`] without any correctly named image.
pub fn import_package(bytes: &[u8]) -> Result<ImportedJob, PackageError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(archive_err)?;

    let mut settings_raw: Option<Vec<u8>> = None;
    let mut slices: Vec<(usize, Vec<u8>)> = Vec::new();

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(archive_err)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();

        if name == SETTINGS_ENTRY {
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf).map_err(archive_err)?;
            settings_raw = Some(buf);
        } else if let Some(index) = parse_slice_entry(&name) {
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf).map_err(archive_err)?;
            slices.push((index, buf));
        } else {
            warn!("ignoring unexpected archive entry '{name}'");
        }
    }

    let settings_raw = settings_raw.ok_or(PackageError::MissingSettings)?;
    let settings: JobSettings = serde_json::from_slice(&settings_raw)
        .map_err(|e| PackageError::Malformed(format!("{SETTINGS_ENTRY}: {e}")))?;
    settings
        .validate()
        .map_err(|e| PackageError::Malformed(format!("{SETTINGS_ENTRY}: {e}")))?;

    if slices.is_empty() {
        return Err(PackageError::MissingImages);
    }
    slices.sort_by_key(|(index, _)| *index);
    if let Some(pair) = slices.windows(2).find(|w| w[0].0 == w[1].0) {
        return Err(PackageError::Malformed(format!(
            "duplicate image entry {}",
            slice_entry_name(pair[0].0)
        )));
    }

    let images = ImageSet::from_buffers(slices.into_iter().map(|(_, b)| b).collect());
    debug!("imported {} images", images.len());

    Ok(ImportedJob {
        settings,
        images: Arc::new(images),
        mesh_available: false,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
