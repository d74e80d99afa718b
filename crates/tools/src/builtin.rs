//! Built-in converters.

use super::r#trait::*;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

/// Converter settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    /// Executable name or path
    pub binary: String,

    /// Write gzip-compressed images
    pub compress: bool,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            binary: "dcm2niix".to_string(),
            compress: true,
        }
    }
}

/// dcm2niix with sidecar and anonymised sidecar output.
#[derive(Debug, Clone, Default)]
pub struct Dcm2NiixTool {
    config: ConverterConfig,
}

impl Dcm2NiixTool {
    /// Converter with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Converter with custom settings.
    pub fn with_config(config: ConverterConfig) -> Self {
        Self { config }
    }

    /// Command-line arguments for one conversion.
    pub fn args(&self, input: &ConvertInput) -> Vec<String> {
        vec![
            "-b".to_string(),
            "y".to_string(),
            "-ba".to_string(),
            "y".to_string(),
            "-z".to_string(),
            if self.config.compress { "i" } else { "n" }.to_string(),
            "-f".to_string(),
            input.stem.clone(),
            "-o".to_string(),
            input.output_dir.display().to_string(),
            input.source_dir.display().to_string(),
        ]
    }
}

#[async_trait]
impl Converter for Dcm2NiixTool {
    fn name(&self) -> &str {
        &self.config.binary
    }

    fn command_line(&self, input: &ConvertInput) -> String {
        format!("{} {}", self.config.binary, self.args(input).join(" "))
    }

    async fn convert(&self, input: &ConvertInput) -> Result<ConvertOutput, anyhow::Error> {
        let start = std::time::Instant::now();

        let mut cmd = Command::new(&self.config.binary);
        cmd.args(self.args(input));
        debug!("Running {} for {}", self.config.binary, input.stem);

        let output = cmd.output().await?;

        Ok(ConvertOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration: start.elapsed(),
        })
    }
}
