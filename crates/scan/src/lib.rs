//! Acquisition discovery and series aggregation.
//!
//! [`MetadataExtractor`] walks a source directory and reads one
//! [`ImageRecord`](bidsconv_core::ImageRecord) per DICOM file;
//! [`aggregate`] groups those records into series in first-seen order.

#![warn(missing_docs)]

pub mod extractor;
pub mod aggregator;

pub use extractor::{MetadataExtractor, TagSource, record_from_tags, read_record};
pub use aggregator::{aggregate, patient_info};

use std::path::PathBuf;

/// Result alias for scanning.
pub type Result<T> = std::result::Result<T, ScanError>;

/// Errors raised while reading acquisition files.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// Source path does not exist
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    /// Source path is not a directory
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    /// Nothing matched the acquisition extensions
    #[error("No acquisition files found in {0}")]
    NoFiles(PathBuf),

    /// File could not be parsed as DICOM
    #[error("Cannot read {path}: {message}")]
    Unreadable {
        /// Offending file
        path: PathBuf,
        /// Parser message
        message: String,
    },

    /// Neither SeriesNumber nor SeriesInstanceUID present
    #[error("No series identifier in {0}")]
    MissingSeries(PathBuf),
}
