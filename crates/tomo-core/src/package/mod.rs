//! Portable job packages (settings + projection images in one archive).

pub mod codec;

pub use codec::{export_package, import_package, ImportedJob, JobPackage, JobSettings};
