//! Filename token grammar.
//!
//! ```text
//! sub-<id>[_ses-<n>][_task-<name>][_acq-<tag>][_run-<nn>][_rec-<tag>]_<label>
//! ```
//!
//! Each optional token appears only when its value is non-empty.

use bidsconv_core::{Category, Classification, DestinationEntry, SeriesIndex, SubjectSpec};

/// Task name with all whitespace removed.
pub fn clean_task(task: &str) -> String {
    task.split_whitespace().collect()
}

/// Run index, zero-padded to two digits below 10.
pub fn format_run(run: u32) -> String {
    format!("{:02}", run)
}

fn entities(subject: &SubjectSpec, c: &Classification) -> String {
    let mut stem = subject.prefix();

    let task = clean_task(&c.task);
    if !task.is_empty() {
        stem.push_str("_task-");
        stem.push_str(&task);
    }
    if !c.acquisition.is_empty() {
        stem.push_str("_acq-");
        stem.push_str(&c.acquisition);
    }
    if let Some(run) = c.run {
        stem.push_str("_run-");
        stem.push_str(&format_run(run));
    }
    if !c.reconstruction.is_empty() {
        stem.push_str("_rec-");
        stem.push_str(&c.reconstruction);
    }
    stem
}

/// Filename stem without extension.
pub fn build_stem(subject: &SubjectSpec, c: &Classification) -> String {
    format!("{}_{}", entities(subject, c), c.label)
}

/// Stem for one echo of a multi-echo series.
///
/// Fieldmaps carry the echo number in the label (`magnitude1`), replacing
/// any number the label already ends with; everything else gets an
/// `_echo-<n>` token before the label.
pub fn echo_stem(subject: &SubjectSpec, c: &Classification, echo: u32) -> String {
    if c.category == Category::Fieldmap {
        let base = c.label.trim_end_matches(|ch: char| ch.is_ascii_digit());
        let base = if base.is_empty() { c.label.as_str() } else { base };
        format!("{}_{}{}", entities(subject, c), base, echo)
    } else {
        format!("{}_echo-{}_{}", entities(subject, c), echo, c.label)
    }
}

/// Destination of a series, or `None` when its category has no folder.
pub fn destination(
    subject: &SubjectSpec,
    index: SeriesIndex,
    c: &Classification,
) -> Option<DestinationEntry> {
    let folder = c.category.folder()?;
    Some(DestinationEntry {
        index,
        category: c.category,
        folder: subject.relative_dir().join(folder),
        stem: build_stem(subject, c),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_minimal_stem() {
        let c = Classification::new(Category::Anatomical, "T1w");
        assert_eq!(build_stem(&SubjectSpec::new(3), &c), "sub-003_T1w");
    }

    #[test]
    fn test_full_token_order() {
        let subject = SubjectSpec::new(12).with_group("pat").with_session("1");
        let mut c = Classification::new(Category::Functional, "bold");
        c.task = "n back".into();
        c.acquisition = "mb4".into();
        c.run = Some(2);
        c.reconstruction = "NORM".into();

        assert_eq!(
            build_stem(&subject, &c),
            "sub-pat012_ses-1_task-nback_acq-mb4_run-02_rec-NORM_bold"
        );
    }

    #[test]
    fn test_run_padding() {
        assert_eq!(format_run(3), "03");
        assert_eq!(format_run(10), "10");
        assert_eq!(format_run(123), "123");
    }

    #[test]
    fn test_clean_task_strips_all_whitespace() {
        assert_eq!(clean_task(" resting\tstate  eyes closed "), "restingstateeyesclosed");
    }

    #[test]
    fn test_echo_stems() {
        let subject = SubjectSpec::new(1);
        let mut bold = Classification::new(Category::Functional, "bold");
        bold.task = "rest".into();
        assert_eq!(echo_stem(&subject, &bold, 2), "sub-001_task-rest_echo-2_bold");

        let fmap = Classification::new(Category::Fieldmap, "magnitude");
        assert_eq!(echo_stem(&subject, &fmap, 1), "sub-001_magnitude1");
    }

    #[test]
    fn test_numbered_fieldmap_label_is_renumbered() {
        let subject = SubjectSpec::new(1);
        let fmap = Classification::new(Category::Fieldmap, "magnitude1");
        assert_eq!(echo_stem(&subject, &fmap, 1), "sub-001_magnitude1");
        assert_eq!(echo_stem(&subject, &fmap, 2), "sub-001_magnitude2");

        let phase = Classification::new(Category::Fieldmap, "phase2");
        assert_eq!(echo_stem(&subject, &phase, 1), "sub-001_phase1");
    }

    #[test]
    fn test_destination_folder() {
        let subject = SubjectSpec::new(3).with_session("2");
        let c = Classification::new(Category::Diffusion, "dwi");
        let entry = destination(&subject, SeriesIndex(4), &c).unwrap();

        assert_eq!(entry.folder, PathBuf::from("sub-003").join("ses-2").join("dwi"));
        assert_eq!(entry.stem, "sub-003_ses-2_dwi");
        assert!(destination(&subject, SeriesIndex(5), &Classification::default()).is_none());
    }
}
