//! Transfer errors.

use bidsconv_core::SeriesIndex;
use bidsconv_naming::{LabelWarning, NamingError};
use bidsconv_rules::RuleError;
use bidsconv_scan::ScanError;
use bidsconv_storage::StorageError;
use std::path::PathBuf;

/// Result alias for planning and transfer.
pub type Result<T> = std::result::Result<T, TransferError>;

/// Errors that stop a plan or a whole batch.
///
/// Failures of a single series are reported through
/// [`SeriesFailure`] instead and never abort sibling series.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// Source scan failed
    #[error(transparent)]
    Scan(#[from] ScanError),

    /// Rule or configuration table failed to load
    #[error(transparent)]
    Rules(#[from] RuleError),

    /// Batch failed the naming check
    #[error(transparent)]
    Naming(#[from] NamingError),

    /// Dataset write failed
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// I/O error outside the dataset
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Pipeline configuration file is invalid
    #[error("Invalid pipeline configuration {path}: {source}")]
    Config {
        /// Configuration path
        path: PathBuf,
        /// Parser error
        source: toml::de::Error,
    },

    /// Plan document could not be parsed
    #[error("Invalid plan: {0}")]
    Plan(#[from] serde_json::Error),

    /// Nothing is marked for transfer
    #[error("No series selected for transfer")]
    NothingSelected,

    /// Plan refers to a series it does not contain
    #[error("Series {0} is not part of the plan")]
    UnknownSeries(SeriesIndex),

    /// Labels outside the vocabulary were not confirmed
    #[error("Labels not confirmed: {}", format_labels(.0))]
    UnconfirmedLabels(Vec<LabelWarning>),

    /// Subject uses sessions but none was given
    #[error("{subject} has session folders ({}); a session is required", .sessions.join(", "))]
    SessionRequired {
        /// Subject folder name
        subject: String,
        /// Existing session folders
        sessions: Vec<String>,
    },

    /// Operator declined to replace existing data
    #[error("Transfer aborted: {0} already exists")]
    Declined(PathBuf),
}

fn format_labels(labels: &[LabelWarning]) -> String {
    labels
        .iter()
        .map(|l| format!("series {} {} {:?}", l.index, l.category, l.label))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Why one series could not be transferred.
#[derive(Debug, thiserror::Error)]
pub enum SeriesFailure {
    /// Converter could not be started
    #[error("converter failed to run: {0}")]
    Launch(anyhow::Error),

    /// Converter exited with an error
    #[error("converter exited with code {code}: {stderr}")]
    Exit {
        /// Exit code
        code: i32,
        /// Trimmed standard error
        stderr: String,
    },

    /// Converter wrote nothing usable
    #[error("converter produced no sidecar")]
    NoOutput,

    /// Several outputs without distinct echo markers
    #[error("unexpected converter output: {}", .0.join(", "))]
    UnexpectedOutput(Vec<String>),

    /// Sidecar without a matching image
    #[error("no image for {0}")]
    MissingPayload(String),

    /// Raw file staging failed
    #[error("staging failed: {0}")]
    Io(#[from] std::io::Error),

    /// Move or sidecar update failed
    #[error(transparent)]
    Storage(#[from] StorageError),
}
