//! Editable subject plan.
//!
//! A plan is what classification hands to the operator: one entry per
//! series with its classification and a transfer flag. It round-trips
//! through JSON so a presentation layer can edit it before transfer.

use crate::{Result, TransferError};
use bidsconv_core::{Classification, PatientInfo, SeriesIndex, SubjectSpec};
use bidsconv_naming::{NamingEngine, NamingInput, NamingPlan};
use bidsconv_rules::MatchOutcome;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One series of a subject plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedSeries {
    /// Canonical index
    pub index: SeriesIndex,

    /// Scanner series identifier
    pub series_id: String,

    /// Series description
    pub description: String,

    /// Number of images
    pub volume_count: usize,

    /// Distinct echo times in milliseconds, ascending
    #[serde(default)]
    pub echo_times: Vec<f64>,

    /// Acquisition timestamp of the first image
    #[serde(default)]
    pub acquired_at: Option<NaiveDateTime>,

    /// Vendor diffusion tags present
    #[serde(default)]
    pub diffusion_weighted: bool,

    /// Raw files in discovery order
    pub files: Vec<PathBuf>,

    /// Current classification
    pub classification: Classification,

    /// How rule narrowing ended
    pub outcome: MatchOutcome,

    /// Requested for transfer
    pub transfer: bool,
}

impl PlannedSeries {
    /// Number of payloads the converter is expected to write.
    pub fn echo_count(&self) -> usize {
        self.echo_times.len().max(1)
    }
}

/// Classified series of one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectPlan {
    /// Destination subject
    pub subject: SubjectSpec,

    /// Source directory that was scanned
    pub source: PathBuf,

    /// Participant metadata from the images
    #[serde(default)]
    pub patient: PatientInfo,

    /// Series in canonical order
    pub series: Vec<PlannedSeries>,
}

impl SubjectPlan {
    /// Parse a plan document.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Pretty plan document.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Series at a canonical index.
    pub fn get(&self, index: SeriesIndex) -> Option<&PlannedSeries> {
        self.series.iter().find(|s| s.index == index)
    }

    /// Mutable series at a canonical index.
    pub fn get_mut(&mut self, index: SeriesIndex) -> Result<&mut PlannedSeries> {
        self.series
            .iter_mut()
            .find(|s| s.index == index)
            .ok_or(TransferError::UnknownSeries(index))
    }

    /// Series requested for transfer, in canonical order.
    pub fn selected(&self) -> impl Iterator<Item = &PlannedSeries> {
        self.series.iter().filter(|s| s.transfer)
    }

    /// Naming inputs of the selected series.
    pub fn naming_inputs(&self) -> Vec<NamingInput<'_>> {
        self.selected()
            .map(|s| NamingInput {
                index: s.index,
                classification: &s.classification,
                echo_count: s.echo_count(),
            })
            .collect()
    }

    /// Naming dry run for the selected series.
    pub fn check(&self) -> Result<NamingPlan> {
        let engine = NamingEngine::new(self.subject.clone());
        Ok(engine.check(&self.naming_inputs())?)
    }

    /// Destination paths of the selected series, relative to the dataset root.
    pub fn destination_names(&self) -> Result<Vec<String>> {
        let plan = self.check()?;
        Ok(plan
            .entries
            .iter()
            .map(|e| e.folder.join(&e.stem).display().to_string())
            .collect())
    }
}
