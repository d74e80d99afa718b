//! Configuration table: reconstruction markers, phase markers and exclusions.

use crate::{Result, RuleError};
use serde::{Deserialize, Serialize};
use std::path::Path;

const TEMPLATE: &str = r#"# bidsconv configuration table
#
# Every list is matched in order. Matching against series descriptions is
# case-insensitive.

# Substrings of ImageType values. A match sets the rec- entity.
reconstruction_markers = ["NORM", "MOCO"]

# Substrings of fieldmap descriptions. A match sets the acq- entity to the
# marker without its first character, e.g. "_AP" -> "AP".
phase_markers = ["_ap", "_pa"]

# Descriptions containing any of these are never transferred.
exclude_containing = ["localizer", "scout"]

# Descriptions ending with any of these are never transferred.
exclude_ending_with = ["_nd"]
"#;

/// Four ordered substring lists applied after rule matching.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigTable {
    /// Matched against image type values
    #[serde(default)]
    pub reconstruction_markers: Vec<String>,

    /// Matched against fieldmap descriptions; first character is a sentinel
    #[serde(default)]
    pub phase_markers: Vec<String>,

    /// Description "contains" exclusions
    #[serde(default)]
    pub exclude_containing: Vec<String>,

    /// Description "ends with" exclusions
    #[serde(default)]
    pub exclude_ending_with: Vec<String>,
}

impl ConfigTable {
    /// Parse TOML text and validate entries.
    pub fn parse(text: &str) -> Result<Self> {
        let table: ConfigTable = toml::from_str(text)?;
        table.validate()?;
        Ok(table)
    }

    /// Load and parse a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| RuleError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Commented starting point for a new configuration file.
    pub fn template() -> &'static str {
        TEMPLATE
    }

    fn validate(&self) -> Result<()> {
        let lists: [(&'static str, &Vec<String>); 4] = [
            ("reconstruction_markers", &self.reconstruction_markers),
            ("phase_markers", &self.phase_markers),
            ("exclude_containing", &self.exclude_containing),
            ("exclude_ending_with", &self.exclude_ending_with),
        ];
        for (list, values) in lists {
            if let Some(value) = values.iter().find(|v| v.trim().is_empty()) {
                return Err(RuleError::InvalidEntry {
                    list,
                    value: value.clone(),
                    reason: "is empty",
                });
            }
        }

        if let Some(value) = self.phase_markers.iter().find(|v| v.chars().count() < 2) {
            return Err(RuleError::InvalidEntry {
                list: "phase_markers",
                value: value.clone(),
                reason: "needs a sentinel character followed by the tag",
            });
        }
        Ok(())
    }
}
