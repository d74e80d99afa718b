//! Pipeline configuration and the classification entry point.

use crate::plan::{PlannedSeries, SubjectPlan};
use crate::{Result, TransferError};
use bidsconv_core::{PatientInfo, SeriesRecord, SubjectSpec};
use bidsconv_rules::{infer_pairs, ConfigTable, RuleEngine, RuleTable};
use bidsconv_scan::{aggregate, patient_info, MetadataExtractor};
use bidsconv_storage::DEFAULT_BIDS_VERSION;
use bidsconv_tools::ConverterConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Everything a run needs, passed in explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Categorization table (five-column TSV)
    pub categorization_file: PathBuf,

    /// Configuration table (TOML)
    pub config_table: PathBuf,

    /// Acquisition file extensions
    pub extensions: Vec<String>,

    /// Converter settings
    pub converter: ConverterConfig,

    /// `BIDSVersion` of new datasets
    pub bids_version: String,

    /// `Name` of new datasets; the output folder name when unset
    pub dataset_name: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            categorization_file: PathBuf::from("categorization.tsv"),
            config_table: PathBuf::from("config.toml"),
            extensions: vec!["dcm".to_string()],
            converter: ConverterConfig::default(),
            bids_version: DEFAULT_BIDS_VERSION.to_string(),
            dataset_name: None,
        }
    }
}

impl PipelineConfig {
    /// Parse TOML. Relative table paths are resolved against `base`.
    pub fn parse(text: &str, base: &Path) -> std::result::Result<Self, toml::de::Error> {
        let mut config: PipelineConfig = toml::from_str(text)?;
        config.categorization_file = resolve(base, &config.categorization_file);
        config.config_table = resolve(base, &config.config_table);
        Ok(config)
    }

    /// Load a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::parse(&text, base).map_err(|source| TransferError::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load both tables into a rule engine.
    pub fn engine(&self) -> Result<RuleEngine> {
        let rules = RuleTable::load(&self.categorization_file)?;
        let config = ConfigTable::load(&self.config_table)?;
        info!(
            "Loaded {} rules from {}",
            rules.len(),
            self.categorization_file.display()
        );
        Ok(RuleEngine::new(rules, config))
    }

    /// Dataset name for an output root.
    pub fn dataset_name_for(&self, root: &Path) -> String {
        self.dataset_name.clone().unwrap_or_else(|| {
            root.file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "dataset".to_string())
        })
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Scan, aggregate, classify and pair one subject's source directory.
pub fn classify_subject(
    config: &PipelineConfig,
    source_dir: &Path,
    subject: SubjectSpec,
) -> Result<SubjectPlan> {
    let engine = config.engine()?;
    let extractor = MetadataExtractor::new().with_extensions(&config.extensions);

    let records = extractor.extract(source_dir)?;
    let patient = patient_info(&records);
    let series = aggregate(records);

    Ok(plan_series(&engine, subject, source_dir, &series, patient))
}

/// Classify aggregated series into a plan.
///
/// Transfer is preselected for every series with a destination folder
/// that is not excluded.
pub fn plan_series(
    engine: &RuleEngine,
    subject: SubjectSpec,
    source_dir: &Path,
    series: &[SeriesRecord],
    patient: PatientInfo,
) -> SubjectPlan {
    let decisions = engine.classify_all(series);
    let mut classes: Vec<_> = decisions.iter().map(|d| d.classification.clone()).collect();
    infer_pairs(series, &mut classes);

    let planned = series
        .iter()
        .zip(decisions)
        .zip(classes)
        .map(|((s, decision), classification)| PlannedSeries {
            index: s.index,
            series_id: s.series_id.clone(),
            description: s.description.clone(),
            volume_count: s.volume_count,
            echo_times: s.echo_times.clone(),
            acquired_at: s.acquired_at,
            diffusion_weighted: s.diffusion_weighted,
            files: s.files.clone(),
            transfer: classification.is_transferable(),
            classification,
            outcome: decision.outcome,
        })
        .collect();

    SubjectPlan {
        subject,
        source: source_dir.to_path_buf(),
        patient,
        series: planned,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bidsconv_core::{Category, FieldmapRole, ReferenceSpan, SeriesIndex};
    use bidsconv_naming::{NamingError, PlanIssue};

    fn series(index: usize, name: &str, description: &str, flag: &str) -> SeriesRecord {
        SeriesRecord {
            index: SeriesIndex(index),
            series_id: (index + 1).to_string(),
            description: description.to_string(),
            sequence_name: name.to_string(),
            acquisition_type: "2D".to_string(),
            image_type: vec!["ORIGINAL".into(), "PRIMARY".into(), flag.into()],
            volume_count: 1,
            echo_times: vec![],
            acquired_at: None,
            manufacturer: "SIEMENS".to_string(),
            diffusion_weighted: false,
            files: vec![PathBuf::from(format!("/raw/{}.dcm", index))],
        }
    }

    fn engine() -> RuleEngine {
        let rules = RuleTable::parse(
            "anat\tmprage\t\t\tT1w\nfunc\tbold\t\t\tbold\nfmap\tfield_map\t\t\tepi\n",
        )
        .unwrap();
        let config = ConfigTable::parse("phase_markers = [\"_p\"]\nexclude_containing = [\"localizer\"]\n")
            .unwrap();
        RuleEngine::new(rules, config)
    }

    fn scenario() -> Vec<SeriesRecord> {
        vec![
            series(0, "t1_mprage", "t1_mprage", "M"),
            series(1, "bold_task", "bold_task", "M"),
            series(2, "bold_task", "bold_task", "M"),
            series(3, "field_map_P", "field_map_P", "P"),
            series(4, "field_map_M", "field_map_M", "M"),
        ]
    }

    #[test]
    fn test_subject_03_scenario() {
        let mut plan = plan_series(
            &engine(),
            SubjectSpec::new(3),
            Path::new("/raw"),
            &scenario(),
            PatientInfo::default(),
        );

        let folders: Vec<_> = plan
            .series
            .iter()
            .map(|s| s.classification.category.folder().unwrap())
            .collect();
        assert_eq!(folders, vec!["anat", "func", "func", "fmap", "fmap"]);

        let fmaps = &plan.series[3..];
        for fmap in fmaps {
            assert_eq!(
                fmap.classification.reference_span,
                Some(ReferenceSpan::Range { first: 1, last: 2 })
            );
        }
        assert_eq!(fmaps[0].classification.fieldmap_role, Some(FieldmapRole::PhaseDiff));
        assert_eq!(fmaps[1].classification.fieldmap_role, Some(FieldmapRole::Magnitude));
        assert_eq!(fmaps[0].classification.acquisition, "p");

        // Functional series still need a task name.
        match plan.check() {
            Err(TransferError::Naming(NamingError::Invalid(issues))) => {
                assert_eq!(
                    issues,
                    vec![
                        PlanIssue::MissingTask { index: SeriesIndex(1) },
                        PlanIssue::MissingTask { index: SeriesIndex(2) },
                    ]
                );
            }
            other => panic!("unexpected {:?}", other),
        }

        for i in [1, 2] {
            let s = plan.get_mut(SeriesIndex(i)).unwrap();
            s.classification.task = "nback".into();
            s.classification.run = Some(i as u32);
        }
        assert!(plan.check().is_ok());
    }

    #[test]
    fn test_repeated_runs_give_identical_names() {
        let run = || {
            let mut plan = plan_series(
                &engine(),
                SubjectSpec::new(3).with_session("1"),
                Path::new("/raw"),
                &scenario(),
                PatientInfo::default(),
            );
            for i in [1, 2] {
                let s = plan.get_mut(SeriesIndex(i)).unwrap();
                s.classification.task = "rest".into();
                s.classification.run = Some(i as u32);
            }
            plan.destination_names().unwrap()
        };

        let first = run();
        assert_eq!(first, run());
        assert_eq!(first[0], "sub-003/ses-1/anat/sub-003_ses-1_T1w");
    }

    #[test]
    fn test_excluded_series_not_selected() {
        let mut records = scenario();
        records[0].description = "t1_localizer".into();
        let plan = plan_series(
            &engine(),
            SubjectSpec::new(1),
            Path::new("/raw"),
            &records,
            PatientInfo::default(),
        );

        assert!(plan.series[0].classification.excluded);
        assert_eq!(plan.series[0].classification.category, Category::Anatomical);
        assert!(!plan.series[0].transfer);
    }

    #[test]
    fn test_plan_json_roundtrip() {
        let plan = plan_series(
            &engine(),
            SubjectSpec::new(9),
            Path::new("/raw"),
            &scenario(),
            PatientInfo { age: Some(40), sex: Some("M".into()) },
        );
        let text = plan.to_json().unwrap();
        assert_eq!(SubjectPlan::from_json(&text).unwrap(), plan);
    }

    #[test]
    fn test_plan_keeps_acquisition_time_and_diffusion_flag() {
        let mut records = scenario();
        let at = chrono::NaiveDate::from_ymd_opt(2023, 3, 14)
            .and_then(|d| d.and_hms_opt(9, 26, 53))
            .unwrap();
        records[0].acquired_at = Some(at);
        records[1].diffusion_weighted = true;

        let plan = plan_series(
            &engine(),
            SubjectSpec::new(5),
            Path::new("/raw"),
            &records,
            PatientInfo::default(),
        );
        assert_eq!(plan.series[0].acquired_at, Some(at));
        assert!(plan.series[1].diffusion_weighted);
        assert!(!plan.series[0].diffusion_weighted);

        let reread = SubjectPlan::from_json(&plan.to_json().unwrap()).unwrap();
        assert_eq!(reread.series[0].acquired_at, Some(at));
    }

    #[test]
    fn test_config_paths_resolve_against_file() {
        let config = PipelineConfig::parse(
            "categorization_file = \"rules.tsv\"\nconfig_table = \"/etc/bidsconv/config.toml\"\n\n[converter]\ncompress = false\n",
            Path::new("/studies/a"),
        )
        .unwrap();

        assert_eq!(config.categorization_file, PathBuf::from("/studies/a/rules.tsv"));
        assert_eq!(config.config_table, PathBuf::from("/etc/bidsconv/config.toml"));
        assert_eq!(config.converter.binary, "dcm2niix");
        assert!(!config.converter.compress);
        assert_eq!(config.extensions, vec!["dcm"]);
    }

    #[test]
    fn test_classify_subject_reads_tables() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("categorization.tsv"), "anat\tmprage\t\t\tT1w\n").unwrap();
        std::fs::write(dir.path().join("config.toml"), ConfigTable::template()).unwrap();
        let config = PipelineConfig::load(&{
            let path = dir.path().join("bidsconv.toml");
            std::fs::write(&path, "dataset_name = \"study\"\n").unwrap();
            path
        })
        .unwrap();

        assert!(config.engine().is_ok());
        assert_eq!(config.dataset_name_for(Path::new("/out/bids")), "study");

        let empty = dir.path().join("empty");
        std::fs::create_dir(&empty).unwrap();
        let err = classify_subject(&config, &empty, SubjectSpec::new(1)).unwrap_err();
        assert!(matches!(err, TransferError::Scan(_)));
    }
}
