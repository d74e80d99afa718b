//! Dataset store abstraction.

use crate::description::{DatasetDescription, DescriptionUpdate};
use async_trait::async_trait;
use bidsconv_core::{PatientInfo, SubjectSpec};
use chrono::NaiveDateTime;
use std::path::{Path, PathBuf};

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Item not found
    #[error("Not found: {0}")]
    NotFound(PathBuf),

    /// Destination file already present
    #[error("Refusing to overwrite {0}")]
    Exists(PathBuf),

    /// Change log first line has no version tag
    #[error("CHANGES: cannot read version from {0:?}")]
    ChangesVersion(String),

    /// Dataset description misses a required value
    #[error("dataset_description.json: {0}")]
    InvalidDescription(String),

    /// Sidecar is not a JSON object
    #[error("{0}: sidecar is not a JSON object")]
    NotAnObject(PathBuf),
}

/// What is already on disk for a subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectState {
    /// No subject folder
    Absent,
    /// Subject folder exists
    Present {
        /// `ses-*` folder names below it
        sessions: Vec<String>,
    },
}

/// Outcome of a participants index update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantUpdate {
    /// New row appended
    Added,
    /// Existing row replaced
    Replaced,
    /// Existing row left untouched
    Kept,
}

/// Output dataset operations used by a transfer.
///
/// All paths are relative to the dataset root.
#[async_trait]
pub trait DatasetStore: Send + Sync {
    /// Dataset root.
    fn root(&self) -> &Path;

    // === Subject folders ===

    /// Subject folder state.
    async fn subject_state(&self, subject: &SubjectSpec) -> Result<SubjectState>;

    /// Delete a folder recursively.
    async fn remove_dir(&mut self, relative: &Path) -> Result<()>;

    /// Move a file into the dataset, creating parent folders. Never overwrites.
    async fn install_file(&mut self, source: &Path, relative: &Path) -> Result<()>;

    // === Dataset description ===

    /// Load `dataset_description.json`.
    async fn load_description(&self) -> Result<Option<DatasetDescription>>;

    /// Create `dataset_description.json` if absent. Returns true when created.
    async fn ensure_description(&mut self, name: &str, bids_version: &str) -> Result<bool>;

    /// Apply edits to `dataset_description.json`.
    async fn update_description(&mut self, update: DescriptionUpdate) -> Result<DatasetDescription>;

    // === Index files ===

    /// Whether the participants index has a row for `participant_id`.
    async fn has_participant(&self, participant_id: &str) -> Result<bool>;

    /// Add a participants row; an existing row is replaced only when `replace` is set.
    async fn upsert_participant(
        &mut self,
        participant_id: &str,
        info: &PatientInfo,
        replace: bool,
    ) -> Result<ParticipantUpdate>;

    /// Append rows to the subject's scans index, creating it with a header.
    async fn append_scans(&mut self, subject: &SubjectSpec, rows: &[String]) -> Result<PathBuf>;

    /// Version tag the next [`prepend_changes`](Self::prepend_changes) would write.
    async fn next_changes_version(&self) -> Result<String>;

    /// Prepend a version-tagged block to CHANGES. Returns the version tag.
    async fn prepend_changes(&mut self, entries: &[String], at: NaiveDateTime) -> Result<String>;

    /// Whether a README exists at the root.
    async fn has_readme(&self) -> bool;

    // === Sidecars ===

    /// Set and remove keys of a JSON sidecar, keeping every other key.
    async fn update_sidecar(
        &mut self,
        relative: &Path,
        set: serde_json::Map<String, serde_json::Value>,
        remove: &[&str],
    ) -> Result<()>;
}
