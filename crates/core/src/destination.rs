//! Final destination of a transferred series.

use crate::{Category, SeriesIndex};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Payload extension written by the converter when compression succeeds.
pub const PAYLOAD_EXT: &str = ".nii.gz";
/// Payload extension when the converter did not compress.
pub const PAYLOAD_EXT_PLAIN: &str = ".nii";
/// Metadata sidecar extension.
pub const SIDECAR_EXT: &str = ".json";
/// Diffusion auxiliary files.
pub const DIFFUSION_EXTS: &[&str] = &[".bval", ".bvec"];

/// Relative folder and filename stem for one series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DestinationEntry {
    /// Canonical index of the series
    pub index: SeriesIndex,

    /// Destination category
    pub category: Category,

    /// Folder relative to the dataset root, e.g. `sub-003/func`
    pub folder: PathBuf,

    /// Filename without extension
    pub stem: String,
}

impl DestinationEntry {
    /// Filename with an extension such as `.json`.
    pub fn file_name(&self, extension: &str) -> String {
        format!("{}{}", self.stem, extension)
    }

    /// Path relative to the dataset root.
    pub fn relative_path(&self, extension: &str) -> PathBuf {
        self.folder.join(self.file_name(extension))
    }

    /// Absolute path below `root`.
    pub fn path_in(&self, root: &Path, extension: &str) -> PathBuf {
        root.join(self.relative_path(extension))
    }

    /// Extensions expected for this series.
    pub fn expected_extensions(&self) -> Vec<&'static str> {
        let mut exts = vec![PAYLOAD_EXT, SIDECAR_EXT];
        if self.category == Category::Diffusion {
            exts.extend_from_slice(DIFFUSION_EXTS);
        }
        exts
    }
}
