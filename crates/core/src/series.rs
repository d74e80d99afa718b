//! Per-image and per-series acquisition records.

use crate::SeriesIndex;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Tags read from one raw acquisition file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Source file
    pub path: PathBuf,

    /// Scanner-assigned series identifier
    pub series_id: String,

    /// Series description (0008,103E)
    pub description: String,

    /// Sequence name (0018,0024), empty when absent
    pub sequence_name: String,

    /// MR acquisition type (0018,0023), empty when absent
    pub acquisition_type: String,

    /// Image type values (0008,0008) in tag order
    pub image_type: Vec<String>,

    /// Echo time in milliseconds
    pub echo_time: Option<f64>,

    /// Echo number
    pub echo_number: Option<u32>,

    /// Acquisition date and time
    pub acquired_at: Option<NaiveDateTime>,

    /// Manufacturer string as written by the scanner
    pub manufacturer: String,

    /// Vendor-specific diffusion tag presence
    pub diffusion: DiffusionFlags,

    /// Patient age and sex
    pub patient: PatientInfo,
}

/// Presence of the vendor-private tags that mark diffusion-weighted data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffusionFlags {
    /// SIEMENS (0019,100C)
    pub siemens: bool,

    /// PHILIPS (0018,9089) or (2001,1004)
    pub philips: bool,

    /// GE (0019,10BC)
    pub ge: bool,
}

impl DiffusionFlags {
    /// Whether any vendor marker was found.
    pub fn any(&self) -> bool {
        self.siemens || self.philips || self.ge
    }
}

/// Demographics for the participants index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientInfo {
    /// Age in years
    pub age: Option<u32>,

    /// Sex code (M, F, O)
    pub sex: Option<String>,
}

impl PatientInfo {
    /// Both fields are known.
    pub fn is_complete(&self) -> bool {
        self.age.is_some() && self.sex.is_some()
    }
}

/// One logical series, built from every image sharing a series identifier.
///
/// Representative values come from the first image of the series in
/// discovery order. Records are never mutated after aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRecord {
    /// Canonical index
    pub index: SeriesIndex,

    /// Scanner-assigned series identifier
    pub series_id: String,

    /// Series description
    pub description: String,

    /// Sequence name
    pub sequence_name: String,

    /// MR acquisition type
    pub acquisition_type: String,

    /// Image type values of the first image
    pub image_type: Vec<String>,

    /// Number of images sharing the identifier
    pub volume_count: usize,

    /// Distinct echo times, ascending
    pub echo_times: Vec<f64>,

    /// Acquisition timestamp of the first image
    pub acquired_at: Option<NaiveDateTime>,

    /// Manufacturer of the first image
    pub manufacturer: String,

    /// First image carries a diffusion marker
    pub diffusion_weighted: bool,

    /// Raw files owned by this series, in discovery order
    pub files: Vec<PathBuf>,
}

impl SeriesRecord {
    /// Image type value at a position, if present.
    pub fn image_type_at(&self, position: usize) -> Option<&str> {
        self.image_type.get(position).map(|s| s.as_str())
    }

    /// More than one distinct echo time.
    pub fn is_multi_echo(&self) -> bool {
        self.echo_times.len() > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_type_at() {
        let series = SeriesRecord {
            index: SeriesIndex(0),
            series_id: "5".into(),
            description: "field_map".into(),
            sequence_name: "fm2d2r".into(),
            acquisition_type: "2D".into(),
            image_type: vec!["ORIGINAL".into(), "PRIMARY".into(), "M".into()],
            volume_count: 2,
            echo_times: vec![4.92, 7.38],
            acquired_at: None,
            manufacturer: "SIEMENS".into(),
            diffusion_weighted: false,
            files: vec![],
        };

        assert_eq!(series.image_type_at(2), Some("M"));
        assert_eq!(series.image_type_at(5), None);
        assert!(series.is_multi_echo());
    }

    #[test]
    fn test_diffusion_flags_any() {
        assert!(!DiffusionFlags::default().any());
        assert!(DiffusionFlags { ge: true, ..Default::default() }.any());
    }
}
