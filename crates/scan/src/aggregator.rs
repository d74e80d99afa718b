//! Groups per-image records into series.

use bidsconv_core::{ImageRecord, PatientInfo, SeriesIndex, SeriesRecord};
use std::collections::HashMap;
use tracing::{debug, info};

/// Group records by series identifier.
///
/// Series are ordered by the first appearance of their identifier, which
/// defines the canonical index. Representative values come from the first
/// record of each group.
pub fn aggregate(records: Vec<ImageRecord>) -> Vec<SeriesRecord> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut series: Vec<SeriesRecord> = Vec::new();

    for record in records {
        match positions.get(&record.series_id) {
            Some(&pos) => {
                let entry = &mut series[pos];
                entry.volume_count += 1;
                if let Some(echo) = record.echo_time {
                    push_echo(&mut entry.echo_times, echo);
                }
                entry.files.push(record.path);
            }
            None => {
                let index = SeriesIndex(series.len());
                positions.insert(record.series_id.clone(), index.get());
                debug!("Series {} starts at canonical index {}", record.series_id, index);
                series.push(SeriesRecord {
                    index,
                    series_id: record.series_id,
                    description: record.description,
                    sequence_name: record.sequence_name,
                    acquisition_type: record.acquisition_type,
                    image_type: record.image_type,
                    volume_count: 1,
                    echo_times: record.echo_time.into_iter().collect(),
                    acquired_at: record.acquired_at,
                    manufacturer: record.manufacturer,
                    diffusion_weighted: record.diffusion.any(),
                    files: vec![record.path],
                });
            }
        }
    }

    info!("Aggregated {} series", series.len());
    series
}

/// Keep echo times distinct and ascending.
fn push_echo(echoes: &mut Vec<f64>, echo: f64) {
    if echoes.iter().any(|e| (e - echo).abs() < f64::EPSILON) {
        return;
    }
    let pos = echoes.partition_point(|e| *e < echo);
    echoes.insert(pos, echo);
}

/// Age and sex from the first record that carries them.
pub fn patient_info(records: &[ImageRecord]) -> PatientInfo {
    if let Some(record) = records.iter().find(|r| r.patient.is_complete()) {
        return record.patient.clone();
    }
    PatientInfo {
        age: records.iter().find_map(|r| r.patient.age),
        sex: records.iter().find_map(|r| r.patient.sex.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bidsconv_core::DiffusionFlags;
    use std::path::PathBuf;

    fn image(file: &str, series: &str, description: &str, echo: Option<f64>) -> ImageRecord {
        ImageRecord {
            path: PathBuf::from(file),
            series_id: series.to_string(),
            description: description.to_string(),
            sequence_name: String::new(),
            acquisition_type: String::new(),
            image_type: vec![],
            echo_time: echo,
            echo_number: None,
            acquired_at: None,
            manufacturer: String::new(),
            diffusion: DiffusionFlags::default(),
            patient: PatientInfo::default(),
        }
    }

    #[test]
    fn test_first_seen_order_is_canonical() {
        let records = vec![
            image("1.dcm", "10", "t1_mprage", None),
            image("2.dcm", "3", "bold_task", None),
            image("3.dcm", "10", "t1_mprage_second", None),
            image("4.dcm", "3", "bold_task", None),
            image("5.dcm", "3", "bold_task", None),
        ];

        let series = aggregate(records);

        assert_eq!(series.len(), 2);
        assert_eq!(series[0].series_id, "10");
        assert_eq!(series[0].index, SeriesIndex(0));
        assert_eq!(series[1].series_id, "3");
        assert_eq!(series[1].index, SeriesIndex(1));
    }

    #[test]
    fn test_volume_count_matches_records() {
        let records = vec![
            image("1.dcm", "A", "x", None),
            image("2.dcm", "B", "y", None),
            image("3.dcm", "A", "x", None),
            image("4.dcm", "A", "x", None),
        ];

        let series = aggregate(records.clone());

        for s in &series {
            let expected = records.iter().filter(|r| r.series_id == s.series_id).count();
            assert_eq!(s.volume_count, expected);
            assert_eq!(s.files.len(), expected);
        }
    }

    #[test]
    fn test_representative_values_from_first_image() {
        let records = vec![
            image("1.dcm", "5", "first", None),
            image("2.dcm", "5", "second", None),
        ];

        let series = aggregate(records);
        assert_eq!(series[0].description, "first");
        assert_eq!(series[0].files, vec![PathBuf::from("1.dcm"), PathBuf::from("2.dcm")]);
    }

    #[test]
    fn test_echo_times_deduplicated() {
        let records = vec![
            image("1.dcm", "8", "fm", Some(7.38)),
            image("2.dcm", "8", "fm", Some(4.92)),
            image("3.dcm", "8", "fm", Some(7.38)),
            image("4.dcm", "8", "fm", None),
        ];

        let series = aggregate(records);
        assert_eq!(series[0].echo_times, vec![4.92, 7.38]);
        assert!(series[0].is_multi_echo());
    }

    #[test]
    fn test_patient_info_from_first_complete_record() {
        let mut a = image("1.dcm", "1", "x", None);
        a.patient.sex = Some("M".into());
        let mut b = image("2.dcm", "1", "x", None);
        b.patient = PatientInfo { age: Some(40), sex: Some("F".into()) };

        let info = patient_info(&[a.clone(), b]);
        assert_eq!(info.age, Some(40));
        assert_eq!(info.sex.as_deref(), Some("F"));

        let partial = patient_info(&[a]);
        assert_eq!(partial.age, None);
        assert_eq!(partial.sex.as_deref(), Some("M"));
    }
}
