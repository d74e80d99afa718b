//! `dataset_description.json` model.

use crate::{Result, StorageError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default `BIDSVersion` written to new datasets.
pub const DEFAULT_BIDS_VERSION: &str = "1.1.0";

/// Dataset description. Keys other than `Name` and `BIDSVersion` are kept
/// as they were found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetDescription {
    /// Dataset name
    #[serde(rename = "Name")]
    pub name: String,

    /// Standard version
    #[serde(rename = "BIDSVersion")]
    pub bids_version: String,

    /// Every other key
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl DatasetDescription {
    /// Description with the two required keys.
    pub fn new(name: impl Into<String>, bids_version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bids_version: bids_version.into(),
            extra: serde_json::Map::new(),
        }
    }

    /// Apply an edit. `Name` and `BIDSVersion` may not become empty.
    pub fn apply(&mut self, update: DescriptionUpdate) -> Result<()> {
        if update.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(StorageError::InvalidDescription("Name cannot be empty".into()));
        }
        if update.bids_version.as_deref().is_some_and(|v| v.trim().is_empty()) {
            return Err(StorageError::InvalidDescription("BIDSVersion cannot be empty".into()));
        }

        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(version) = update.bids_version {
            self.bids_version = version;
        }

        set_text(&mut self.extra, "License", update.license);
        set_list(&mut self.extra, "Authors", update.authors);
        set_text(&mut self.extra, "Acknowledgements", update.acknowledgements);
        set_text(&mut self.extra, "HowToAcknowledge", update.how_to_acknowledge);
        set_list(&mut self.extra, "Funding", update.funding);
        set_list(&mut self.extra, "ReferencesAndLinks", update.references_and_links);
        set_text(&mut self.extra, "DatasetDOI", update.dataset_doi);
        Ok(())
    }
}

/// Edit of the description. `None` leaves a key alone; an empty value removes it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptionUpdate {
    /// Name
    pub name: Option<String>,
    /// BIDSVersion
    pub bids_version: Option<String>,
    /// License
    pub license: Option<String>,
    /// Authors
    pub authors: Option<Vec<String>>,
    /// Acknowledgements
    pub acknowledgements: Option<String>,
    /// HowToAcknowledge
    pub how_to_acknowledge: Option<String>,
    /// Funding sources
    pub funding: Option<Vec<String>>,
    /// ReferencesAndLinks
    pub references_and_links: Option<Vec<String>>,
    /// DatasetDOI
    pub dataset_doi: Option<String>,
}

fn set_text(map: &mut serde_json::Map<String, Value>, key: &str, value: Option<String>) {
    match value {
        None => {}
        Some(v) if v.trim().is_empty() => {
            map.remove(key);
        }
        Some(v) => {
            map.insert(key.to_string(), Value::String(v));
        }
    }
}

fn set_list(map: &mut serde_json::Map<String, Value>, key: &str, value: Option<Vec<String>>) {
    match value {
        None => {}
        Some(v) if v.is_empty() => {
            map.remove(key);
        }
        Some(v) => {
            map.insert(key.to_string(), Value::from(v));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_keys_survive_roundtrip() {
        let text = r#"{"Name": "study", "BIDSVersion": "1.1.0", "EthicsApprovals": ["x"]}"#;
        let d: DatasetDescription = serde_json::from_str(text).unwrap();
        let back = serde_json::to_value(&d).unwrap();
        assert_eq!(back["EthicsApprovals"][0], "x");
    }

    #[test]
    fn test_apply_sets_and_clears() {
        let mut d = DatasetDescription::new("study", DEFAULT_BIDS_VERSION);
        d.apply(DescriptionUpdate {
            authors: Some(vec!["A. Author".into()]),
            license: Some("CC0".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(d.extra["Authors"][0], "A. Author");

        d.apply(DescriptionUpdate {
            license: Some(String::new()),
            ..Default::default()
        })
        .unwrap();
        assert!(!d.extra.contains_key("License"));
        assert!(d.extra.contains_key("Authors"));
    }

    #[test]
    fn test_required_keys_cannot_be_emptied() {
        let mut d = DatasetDescription::new("study", DEFAULT_BIDS_VERSION);
        let err = d
            .apply(DescriptionUpdate {
                bids_version: Some(" ".into()),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidDescription(_)));
        assert_eq!(d.bids_version, DEFAULT_BIDS_VERSION);
    }
}
