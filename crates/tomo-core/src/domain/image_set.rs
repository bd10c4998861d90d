//! The ordered set of cross-section images produced by one slicing job.
//!
//! Insertion order is projection-angle order: image `i` is shown when the
//! vial has rotated `i * totalRotation / len` degrees.  An `ImageSet` is
//! immutable once built; the controller shares it behind an `Arc` with the
//! print loop, the test loop and the package exporter, and replaces it
//! wholesale when a new slice or import arrives.

use crate::protocol::base64;

/// One encoded cross-section image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceImage {
    /// Zero-based sequence index (arrival order from the slicer, or the
    /// numeric suffix of the archive entry name).
    pub index: usize,
    /// PNG bytes.
    pub bytes: Vec<u8>,
}

impl SliceImage {
    /// Builds a `data:image/png;base64,...` URL for the projection channel.
    pub fn data_url(&self) -> String {
        base64::png_data_url(&self.bytes)
    }
}

/// Ordered, read-only collection of cross-section images.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageSet {
    images: Vec<SliceImage>,
}

impl ImageSet {
    /// Builds a set from raw image buffers, assigning indices in order.
    pub fn from_buffers(buffers: Vec<Vec<u8>>) -> Self {
        let images = buffers
            .into_iter()
            .enumerate()
            .map(|(index, bytes)| SliceImage { index, bytes })
            .collect();
        Self { images }
    }

    /// Number of images.
    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// Returns `true` when the set holds no images.
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// A set is ready to print once it holds at least one image.
    pub fn is_ready(&self) -> bool {
        !self.images.is_empty()
    }

    /// Image at `index`, if any.
    pub fn get(&self, index: usize) -> Option<&SliceImage> {
        self.images.get(index)
    }

    /// Iterates images in projection order.
    pub fn iter(&self) -> impl Iterator<Item = &SliceImage> {
        self.images.iter()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
