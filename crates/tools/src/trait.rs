//! Converter abstraction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// An external DICOM to NIfTI converter.
#[async_trait]
pub trait Converter: Send + Sync {
    /// Get converter name.
    fn name(&self) -> &str;

    /// Command line recorded in the change log.
    fn command_line(&self, input: &ConvertInput) -> String {
        format!("{} {}", self.name(), input.source_dir.display())
    }

    /// Convert the files in `input.source_dir` into `input.output_dir`.
    ///
    /// A non-zero exit code is reported in the output, not as an error.
    async fn convert(&self, input: &ConvertInput) -> Result<ConvertOutput, anyhow::Error>;
}

/// Input to a conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertInput {
    /// Folder holding the raw files of one series
    pub source_dir: PathBuf,

    /// Folder the converter writes into
    pub output_dir: PathBuf,

    /// Output filename stem without extension
    pub stem: String,
}

/// Output from a conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertOutput {
    /// Exit code
    pub exit_code: i32,

    /// Standard output
    pub stdout: String,

    /// Standard error
    pub stderr: String,

    /// Execution duration
    pub duration: std::time::Duration,
}

impl ConvertOutput {
    /// Whether the converter exited cleanly.
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}
