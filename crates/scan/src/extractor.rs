//! Reads DICOM files into flat per-image records.

use crate::{Result, ScanError};
use bidsconv_core::{DiffusionFlags, ImageRecord, PatientInfo};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use dicom_object::{open_file, DefaultDicomObject, Tag};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const SERIES_NUMBER: Tag = Tag(0x0020, 0x0011);
const SERIES_INSTANCE_UID: Tag = Tag(0x0020, 0x000E);
const SERIES_DESCRIPTION: Tag = Tag(0x0008, 0x103E);
const SEQUENCE_NAME: Tag = Tag(0x0018, 0x0024);
const MR_ACQUISITION_TYPE: Tag = Tag(0x0018, 0x0023);
const IMAGE_TYPE: Tag = Tag(0x0008, 0x0008);
const ECHO_TIME: Tag = Tag(0x0018, 0x0081);
const ECHO_NUMBER: Tag = Tag(0x0018, 0x0086);
const ACQUISITION_DATE: Tag = Tag(0x0008, 0x0022);
const ACQUISITION_TIME: Tag = Tag(0x0008, 0x0032);
const MANUFACTURER: Tag = Tag(0x0008, 0x0070);
const PATIENT_AGE: Tag = Tag(0x0010, 0x1010);
const PATIENT_SEX: Tag = Tag(0x0010, 0x0040);

const SIEMENS_DIFFUSION: Tag = Tag(0x0019, 0x100C);
const PHILIPS_DIFFUSION: Tag = Tag(0x0018, 0x9089);
const PHILIPS_DIFFUSION_PRIVATE: Tag = Tag(0x2001, 0x1004);
const GE_DIFFUSION: Tag = Tag(0x0019, 0x10BC);

/// Read access to the tags of one acquisition file.
pub trait TagSource {
    /// Trimmed string value. Multi-valued elements are joined by `\`.
    fn string(&self, tag: Tag) -> Option<String>;

    /// Floating point value.
    fn float(&self, tag: Tag) -> Option<f64>;

    /// Integer value.
    fn int(&self, tag: Tag) -> Option<i32>;

    /// Whether the element exists at all.
    fn contains(&self, tag: Tag) -> bool;
}

impl TagSource for DefaultDicomObject {
    fn string(&self, tag: Tag) -> Option<String> {
        self.element(tag)
            .ok()
            .and_then(|elem| elem.to_str().ok())
            .map(|s| s.trim().to_string())
    }

    fn float(&self, tag: Tag) -> Option<f64> {
        self.element(tag).ok().and_then(|elem| elem.to_float64().ok())
    }

    fn int(&self, tag: Tag) -> Option<i32> {
        self.element(tag).ok().and_then(|elem| elem.to_int::<i32>().ok())
    }

    fn contains(&self, tag: Tag) -> bool {
        self.element(tag).is_ok()
    }
}

/// Finds acquisition files and reads them in a stable order.
#[derive(Debug, Clone)]
pub struct MetadataExtractor {
    extensions: Vec<String>,
}

impl MetadataExtractor {
    /// Extractor matching the `dcm` extension.
    pub fn new() -> Self {
        Self {
            extensions: vec!["dcm".to_string()],
        }
    }

    /// Match these extensions instead, compared case-insensitively.
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extensions = extensions
            .into_iter()
            .map(|e| e.as_ref().trim_start_matches('.').to_lowercase())
            .collect();
        self
    }

    /// List acquisition files below `root`, sorted by name within each directory.
    pub fn discover(&self, root: &Path) -> Result<Vec<PathBuf>> {
        if !root.exists() {
            return Err(ScanError::PathNotFound(root.to_path_buf()));
        }
        if !root.is_dir() {
            return Err(ScanError::NotADirectory(root.to_path_buf()));
        }

        let mut files = Vec::new();
        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name();

        for entry in walker {
            match entry {
                Ok(entry) => {
                    if entry.file_type().is_file() && self.matches(entry.path()) {
                        files.push(entry.into_path());
                    }
                }
                Err(e) => {
                    warn!("Error accessing entry: {}", e);
                }
            }
        }

        if files.is_empty() {
            return Err(ScanError::NoFiles(root.to_path_buf()));
        }

        info!("Found {} acquisition files in {}", files.len(), root.display());
        Ok(files)
    }

    /// Read every acquisition file below `root` in discovery order.
    pub fn extract(&self, root: &Path) -> Result<Vec<ImageRecord>> {
        self.discover(root)?
            .iter()
            .map(|path| read_record(path))
            .collect()
    }

    fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }
}

impl Default for MetadataExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse one DICOM file.
pub fn read_record(path: &Path) -> Result<ImageRecord> {
    let obj = open_file(path).map_err(|e| ScanError::Unreadable {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    record_from_tags(path, &obj)
}

/// Build a record from any tag source.
///
/// Optional tags that are missing become empty strings or `None`. Only a
/// missing series identifier is an error.
pub fn record_from_tags(path: &Path, tags: &impl TagSource) -> Result<ImageRecord> {
    let series_id = tags
        .string(SERIES_NUMBER)
        .filter(|s| !s.is_empty())
        .or_else(|| tags.string(SERIES_INSTANCE_UID).filter(|s| !s.is_empty()))
        .ok_or_else(|| ScanError::MissingSeries(path.to_path_buf()))?;

    let manufacturer = tags.string(MANUFACTURER).unwrap_or_default();

    let record = ImageRecord {
        path: path.to_path_buf(),
        series_id,
        description: tags.string(SERIES_DESCRIPTION).unwrap_or_default(),
        sequence_name: tags.string(SEQUENCE_NAME).unwrap_or_default(),
        acquisition_type: tags.string(MR_ACQUISITION_TYPE).unwrap_or_default(),
        image_type: tags
            .string(IMAGE_TYPE)
            .map(|s| s.split('\\').map(|v| v.trim().to_string()).collect())
            .unwrap_or_default(),
        echo_time: tags.float(ECHO_TIME),
        echo_number: tags.int(ECHO_NUMBER).and_then(|n| u32::try_from(n).ok()),
        acquired_at: acquisition_timestamp(
            tags.string(ACQUISITION_DATE).as_deref(),
            tags.string(ACQUISITION_TIME).as_deref(),
        ),
        diffusion: diffusion_flags(&manufacturer, tags),
        manufacturer,
        patient: PatientInfo {
            age: tags.string(PATIENT_AGE).as_deref().and_then(parse_age),
            sex: tags.string(PATIENT_SEX).filter(|s| !s.is_empty()),
        },
    };

    debug!("Read {} (series {})", path.display(), record.series_id);
    Ok(record)
}

fn diffusion_flags(manufacturer: &str, tags: &impl TagSource) -> DiffusionFlags {
    let vendor = manufacturer.to_uppercase();
    let mut flags = DiffusionFlags::default();
    if vendor.contains("SIEMENS") {
        flags.siemens = tags.contains(SIEMENS_DIFFUSION);
    } else if vendor.contains("PHILIPS") {
        flags.philips = tags.contains(PHILIPS_DIFFUSION) || tags.contains(PHILIPS_DIFFUSION_PRIVATE);
    } else if vendor.starts_with("GE") {
        flags.ge = tags.contains(GE_DIFFUSION);
    }
    flags
}

fn acquisition_timestamp(date: Option<&str>, time: Option<&str>) -> Option<NaiveDateTime> {
    let date = NaiveDate::parse_from_str(date?, "%Y%m%d").ok()?;
    let time = time
        .and_then(|t| t.get(..6))
        .and_then(|t| NaiveTime::parse_from_str(t, "%H%M%S").ok())
        .or_else(|| NaiveTime::from_hms_opt(0, 0, 0))?;
    Some(date.and_time(time))
}

/// Age strings look like `034Y`; other units are not converted.
fn parse_age(value: &str) -> Option<u32> {
    value.trim().strip_suffix('Y')?.parse().ok()
}
