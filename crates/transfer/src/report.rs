//! Transfer report.

use bidsconv_core::{RunId, SeriesIndex, SubjectSpec};
use bidsconv_storage::ParticipantUpdate;
use serde::Serialize;
use std::path::PathBuf;

/// Result of one series.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SeriesStatus {
    /// Every output was installed
    Transferred,
    /// Conversion or move failed
    Failed {
        /// Reason
        reason: String,
    },
}

/// Per-series entry of a report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesOutcome {
    /// Canonical index
    pub index: SeriesIndex,

    /// Destination stem
    pub stem: String,

    /// Result
    pub status: SeriesStatus,

    /// Installed files relative to the dataset root
    pub files: Vec<PathBuf>,

    /// Non-fatal findings, e.g. an uncompressed image
    pub warnings: Vec<String>,
}

impl SeriesOutcome {
    /// Whether the series made it into the dataset.
    pub fn is_transferred(&self) -> bool {
        self.status == SeriesStatus::Transferred
    }
}

/// What a transfer did.
#[derive(Debug, Clone, Serialize)]
pub struct TransferReport {
    /// Run identifier
    pub run_id: RunId,

    /// Subject
    pub subject: SubjectSpec,

    /// Folder deleted before the transfer
    pub replaced: Option<PathBuf>,

    /// Per-series results in canonical order
    pub series: Vec<SeriesOutcome>,

    /// Participants index result
    pub participant: Option<ParticipantUpdate>,

    /// CHANGES version written
    pub changes_version: Option<String>,

    /// Scans index written, relative to the root
    pub scans_file: Option<PathBuf>,

    /// Dataset-level files that could not be written after series were installed
    pub problems: Vec<String>,

    /// Things left for the operator
    pub follow_ups: Vec<String>,
}

impl TransferReport {
    /// Series that were transferred.
    pub fn transferred(&self) -> impl Iterator<Item = &SeriesOutcome> {
        self.series.iter().filter(|s| s.is_transferred())
    }

    /// Series that failed.
    pub fn failed(&self) -> impl Iterator<Item = &SeriesOutcome> {
        self.series.iter().filter(|s| !s.is_transferred())
    }

    /// Whether every requested series was transferred and every index
    /// file was written.
    pub fn is_complete(&self) -> bool {
        self.failed().next().is_none() && self.problems.is_empty()
    }
}

impl std::fmt::Display for TransferReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Transfer {} for {}", self.run_id, self.subject)?;
        if let Some(dir) = &self.replaced {
            writeln!(f, "  replaced {}", dir.display())?;
        }
        for s in &self.series {
            match &s.status {
                SeriesStatus::Transferred => writeln!(f, "  [{}] {} ok", s.index, s.stem)?,
                SeriesStatus::Failed { reason } => {
                    writeln!(f, "  [{}] {} FAILED: {}", s.index, s.stem, reason)?
                }
            }
            for w in &s.warnings {
                writeln!(f, "      warning: {}", w)?;
            }
        }
        for problem in &self.problems {
            writeln!(f, "  ERROR: {}", problem)?;
        }
        if !self.follow_ups.is_empty() {
            writeln!(f, "Still to do:")?;
            for item in &self.follow_ups {
                writeln!(f, "  - {}", item)?;
            }
        }
        Ok(())
    }
}
