//! Batch validation and collision detection.
//!
//! Every check here is read-only. A batch that passes [`NamingEngine::check`]
//! has all required fields and no two files sharing a folder and name.

use crate::grammar::{clean_task, destination, echo_stem};
use bidsconv_core::{
    Category, Classification, DestinationEntry, SeriesIndex, SubjectSpec, PAYLOAD_EXT,
    PAYLOAD_EXT_PLAIN, SIDECAR_EXT,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One series requested for transfer.
#[derive(Debug, Clone, Copy)]
pub struct NamingInput<'a> {
    /// Canonical index
    pub index: SeriesIndex,

    /// Final classification
    pub classification: &'a Classification,

    /// Distinct echo times in the source data
    pub echo_count: usize,
}

/// Missing or unusable field of a requested series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
pub enum PlanIssue {
    /// Subject group or session that would break the filename grammar
    #[error("subject {entity} {value:?} must be alphanumeric")]
    InvalidSubject {
        /// Entity name
        entity: &'static str,
        /// Offending value
        value: String,
    },

    /// Excluded series cannot be transferred
    #[error("series {index}: excluded series cannot be transferred")]
    Excluded {
        /// Canonical index
        index: SeriesIndex,
    },

    /// Category without destination folder
    #[error("series {index}: category {category} has no destination folder")]
    NoFolder {
        /// Canonical index
        index: SeriesIndex,
        /// Category
        category: Category,
    },

    /// Label is empty
    #[error("series {index}: label is empty")]
    MissingLabel {
        /// Canonical index
        index: SeriesIndex,
    },

    /// Functional series without task name
    #[error("series {index}: functional series needs a task name")]
    MissingTask {
        /// Canonical index
        index: SeriesIndex,
    },

    /// Fieldmap without reference span
    #[error("series {index}: fieldmap needs a reference span")]
    MissingReference {
        /// Canonical index
        index: SeriesIndex,
    },

    /// Reference points at a series outside the batch
    #[error("series {index}: referenced series {target} is not part of the transfer")]
    DanglingReference {
        /// Canonical index
        index: SeriesIndex,
        /// Referenced index
        target: usize,
    },

    /// Entity value that would break the filename grammar
    #[error("series {index}: {entity} value {value:?} must be alphanumeric")]
    InvalidEntity {
        /// Canonical index
        index: SeriesIndex,
        /// Entity name
        entity: &'static str,
        /// Offending value
        value: String,
    },
}

/// Filename claimed by more than one series, or already on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collision {
    /// Folder relative to the dataset root
    pub folder: PathBuf,

    /// Conflicting filename stem
    pub stem: String,

    /// Series claiming it
    pub indices: Vec<SeriesIndex>,

    /// A file with this stem already exists in the dataset
    pub existing: bool,
}

impl std::fmt::Display for Collision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let indices: Vec<String> = self.indices.iter().map(|i| i.to_string()).collect();
        write!(
            f,
            "{} (series {})",
            self.folder.join(&self.stem).display(),
            indices.join(", ")
        )?;
        if self.existing {
            f.write_str(" already exists")?;
        }
        Ok(())
    }
}

/// Label outside the category vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelWarning {
    /// Canonical index
    pub index: SeriesIndex,

    /// Category
    pub category: Category,

    /// Label as given
    pub label: String,
}

/// Errors that stop a batch before anything is written.
#[derive(Debug, Clone, thiserror::Error)]
pub enum NamingError {
    /// Required fields missing
    #[error("invalid transfer request:\n{}", join_lines(.0))]
    Invalid(Vec<PlanIssue>),

    /// Duplicate destination names
    #[error("duplicate destination filenames:\n{}", join_lines(.0))]
    Collisions(Vec<Collision>),
}

fn join_lines<T: std::fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|i| format!("  {}", i))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Checked destinations for a batch.
#[derive(Debug, Clone, Default)]
pub struct NamingPlan {
    /// Destinations in canonical order
    pub entries: Vec<DestinationEntry>,

    /// Labels needing confirmation
    pub unknown_labels: Vec<LabelWarning>,
}

impl NamingPlan {
    /// Destination of a series.
    pub fn entry(&self, index: SeriesIndex) -> Option<&DestinationEntry> {
        self.entries.iter().find(|e| e.index == index)
    }
}

/// Builds and checks destination names for one subject.
#[derive(Debug, Clone)]
pub struct NamingEngine {
    subject: SubjectSpec,
}

impl NamingEngine {
    /// Create an engine for a subject.
    pub fn new(subject: SubjectSpec) -> Self {
        Self { subject }
    }

    /// The subject being named.
    pub fn subject(&self) -> &SubjectSpec {
        &self.subject
    }

    /// Required-field check. Collects every issue instead of stopping at the first.
    pub fn validate(&self, batch: &[NamingInput<'_>]) -> Vec<PlanIssue> {
        let mut issues = Vec::new();
        let requested: HashSet<usize> = batch.iter().map(|i| i.index.get()).collect();
        // Nothing at or above this index is part of the batch.
        let limit = requested.iter().max().map_or(0, |max| max + 1);

        if !is_alphanumeric(&self.subject.group) {
            issues.push(PlanIssue::InvalidSubject {
                entity: "group",
                value: self.subject.group.clone(),
            });
        }
        if let Some(session) = self.subject.session.as_ref().filter(|s| !is_alphanumeric(s)) {
            issues.push(PlanIssue::InvalidSubject {
                entity: "session",
                value: session.clone(),
            });
        }

        for input in batch {
            let index = input.index;
            let c = input.classification;

            if c.excluded || c.category == Category::Excluded {
                issues.push(PlanIssue::Excluded { index });
                continue;
            }
            if c.category.folder().is_none() {
                issues.push(PlanIssue::NoFolder { index, category: c.category });
                continue;
            }
            if c.label.trim().is_empty() {
                issues.push(PlanIssue::MissingLabel { index });
            } else if !is_alphanumeric(&c.label) {
                issues.push(PlanIssue::InvalidEntity {
                    index,
                    entity: "label",
                    value: c.label.clone(),
                });
            }

            if c.category == Category::Functional && clean_task(&c.task).is_empty() {
                issues.push(PlanIssue::MissingTask { index });
            }

            if c.category == Category::Fieldmap {
                match c.resolved_reference() {
                    None => issues.push(PlanIssue::MissingReference { index }),
                    Some(span) => {
                        for target in span.indices_below(limit) {
                            if target == index.get() || !requested.contains(&target) {
                                issues.push(PlanIssue::DanglingReference { index, target });
                            }
                        }
                        if let Some(target) = span.first_beyond(limit) {
                            issues.push(PlanIssue::DanglingReference { index, target });
                        }
                    }
                }
            }

            for (entity, value) in [
                ("task", clean_task(&c.task)),
                ("acq", c.acquisition.clone()),
                ("rec", c.reconstruction.clone()),
            ] {
                if !is_alphanumeric(&value) {
                    issues.push(PlanIssue::InvalidEntity { index, entity, value });
                }
            }
        }

        issues
    }

    /// Dry run: required fields, then collisions within the batch.
    ///
    /// Multi-echo series are expanded to the per-echo names they will
    /// receive, so those take part in the collision check too.
    pub fn check(&self, batch: &[NamingInput<'_>]) -> Result<NamingPlan, NamingError> {
        let issues = self.validate(batch);
        if !issues.is_empty() {
            return Err(NamingError::Invalid(issues));
        }

        let mut plan = NamingPlan::default();
        let mut claims: BTreeMap<(PathBuf, String), Vec<SeriesIndex>> = BTreeMap::new();

        for input in batch {
            let c = input.classification;
            let Some(entry) = destination(&self.subject, input.index, c) else {
                continue;
            };

            for stem in self.stems(&entry, input) {
                claims
                    .entry((entry.folder.clone(), stem))
                    .or_default()
                    .push(input.index);
            }

            if !c.category.accepts_label(&c.label) {
                warn!("Series {}: label {:?} is not a known {} label", input.index, c.label, c.category);
                plan.unknown_labels.push(LabelWarning {
                    index: input.index,
                    category: c.category,
                    label: c.label.clone(),
                });
            }
            plan.entries.push(entry);
        }

        let collisions: Vec<Collision> = claims
            .into_iter()
            .filter(|(_, indices)| indices.len() > 1)
            .map(|((folder, stem), indices)| Collision {
                folder,
                stem,
                indices,
                existing: false,
            })
            .collect();

        if !collisions.is_empty() {
            return Err(NamingError::Collisions(collisions));
        }

        debug!("Naming check passed for {} series", plan.entries.len());
        Ok(plan)
    }

    /// [`check`](Self::check) plus a look at files already under `root`.
    pub fn check_against_tree(
        &self,
        batch: &[NamingInput<'_>],
        root: &Path,
    ) -> Result<NamingPlan, NamingError> {
        let plan = self.check(batch)?;

        let mut collisions = Vec::new();
        for input in batch {
            let Some(entry) = plan.entry(input.index) else {
                continue;
            };
            for stem in self.stems(entry, input) {
                let dir = root.join(&entry.folder);
                let taken = [PAYLOAD_EXT, PAYLOAD_EXT_PLAIN, SIDECAR_EXT]
                    .iter()
                    .any(|ext| dir.join(format!("{}{}", stem, ext)).exists());
                if taken {
                    collisions.push(Collision {
                        folder: entry.folder.clone(),
                        stem,
                        indices: vec![input.index],
                        existing: true,
                    });
                }
            }
        }

        if collisions.is_empty() {
            Ok(plan)
        } else {
            Err(NamingError::Collisions(collisions))
        }
    }

    fn stems(&self, entry: &DestinationEntry, input: &NamingInput<'_>) -> Vec<String> {
        if input.echo_count > 1 {
            (1..=input.echo_count as u32)
                .map(|echo| echo_stem(&self.subject, input.classification, echo))
                .collect()
        } else {
            vec![entry.stem.clone()]
        }
    }
}

fn is_alphanumeric(value: &str) -> bool {
    value.chars().all(|c| c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bidsconv_core::ReferenceSpan;

    fn input(index: usize, c: &Classification) -> NamingInput<'_> {
        NamingInput {
            index: SeriesIndex(index),
            classification: c,
            echo_count: 1,
        }
    }

    fn bold(task: &str) -> Classification {
        let mut c = Classification::new(Category::Functional, "bold");
        c.task = task.to_string();
        c
    }

    #[test]
    fn test_missing_task_names_series() {
        let t1 = Classification::new(Category::Anatomical, "T1w");
        let func = bold("");
        let engine = NamingEngine::new(SubjectSpec::new(3));

        let issues = engine.validate(&[input(0, &t1), input(4, &func)]);
        assert_eq!(issues, vec![PlanIssue::MissingTask { index: SeriesIndex(4) }]);
    }

    #[test]
    fn test_fieldmap_requires_reference() {
        let mut fmap = Classification::new(Category::Fieldmap, "epi");
        let engine = NamingEngine::new(SubjectSpec::new(3));
        assert_eq!(
            engine.validate(&[input(2, &fmap)]),
            vec![PlanIssue::MissingReference { index: SeriesIndex(2) }]
        );

        fmap.reference_span = Some(ReferenceSpan::List(vec![]));
        assert_eq!(
            engine.validate(&[input(2, &fmap)]),
            vec![PlanIssue::MissingReference { index: SeriesIndex(2) }]
        );
    }

    #[test]
    fn test_reference_outside_batch() {
        let func = bold("rest");
        let mut fmap = Classification::new(Category::Fieldmap, "epi");
        fmap.reference_span = Some(ReferenceSpan::Range { first: 0, last: 1 });
        let engine = NamingEngine::new(SubjectSpec::new(3));

        let issues = engine.validate(&[input(0, &func), input(2, &fmap)]);
        assert_eq!(
            issues,
            vec![PlanIssue::DanglingReference { index: SeriesIndex(2), target: 1 }]
        );
    }

    #[test]
    fn test_unbounded_range_reports_first_missing_target() {
        let func = bold("rest");
        let mut fmap = Classification::new(Category::Fieldmap, "epi");
        fmap.reference_span = Some(ReferenceSpan::Range { first: 0, last: usize::MAX });
        let engine = NamingEngine::new(SubjectSpec::new(3));

        let issues = engine.validate(&[input(0, &func), input(1, &fmap)]);
        assert_eq!(
            issues,
            vec![
                PlanIssue::DanglingReference { index: SeriesIndex(1), target: 1 },
                PlanIssue::DanglingReference { index: SeriesIndex(1), target: 2 },
            ]
        );
    }

    #[test]
    fn test_excluded_and_unclassified_rejected() {
        let mut excluded = Classification::new(Category::Anatomical, "T1w");
        excluded.excluded = true;
        let unclassified = Classification::default();
        let engine = NamingEngine::new(SubjectSpec::new(1));

        let issues = engine.validate(&[input(0, &excluded), input(1, &unclassified)]);
        assert_eq!(
            issues,
            vec![
                PlanIssue::Excluded { index: SeriesIndex(0) },
                PlanIssue::NoFolder { index: SeriesIndex(1), category: Category::Unclassified },
            ]
        );
    }

    #[test]
    fn test_invalid_entity_value() {
        let mut t1 = Classification::new(Category::Anatomical, "T1w");
        t1.acquisition = "_ND".into();
        let engine = NamingEngine::new(SubjectSpec::new(1));

        let issues = engine.validate(&[input(0, &t1)]);
        assert!(matches!(issues[0], PlanIssue::InvalidEntity { entity: "acq", .. }));
    }

    #[test]
    fn test_invalid_session_label() {
        let t1 = Classification::new(Category::Anatomical, "T1w");
        let engine = NamingEngine::new(SubjectSpec::new(1).with_session("pre-op"));

        let issues = engine.validate(&[input(0, &t1)]);
        assert!(matches!(issues[0], PlanIssue::InvalidSubject { entity: "session", .. }));
    }

    #[test]
    fn test_collisions_list_every_name() {
        let a = bold("rest");
        let b = bold("rest");
        let t1a = Classification::new(Category::Anatomical, "T1w");
        let t1b = Classification::new(Category::Anatomical, "T1w");
        let engine = NamingEngine::new(SubjectSpec::new(3));

        let err = engine
            .check(&[input(0, &t1a), input(1, &a), input(2, &b), input(3, &t1b)])
            .unwrap_err();

        let NamingError::Collisions(collisions) = err else {
            panic!("expected collisions");
        };
        let stems: Vec<_> = collisions.iter().map(|c| c.stem.as_str()).collect();
        assert_eq!(stems, vec!["sub-003_T1w", "sub-003_task-rest_bold"]);
        assert_eq!(collisions[1].indices, vec![SeriesIndex(1), SeriesIndex(2)]);
    }

    #[test]
    fn test_same_name_in_different_folders_is_fine() {
        let mut anat = Classification::new(Category::Anatomical, "epi");
        anat.acquisition = "x".into();
        let mut fmap = Classification::new(Category::Fieldmap, "epi");
        fmap.acquisition = "x".into();
        fmap.reference_span = Some(ReferenceSpan::List(vec![0]));
        let engine = NamingEngine::new(SubjectSpec::new(3));

        let plan = engine.check(&[input(0, &anat), input(1, &fmap)]).unwrap();
        assert_eq!(plan.entries.len(), 2);
        assert_eq!(plan.unknown_labels.len(), 1);
        assert_eq!(plan.unknown_labels[0].index, SeriesIndex(0));
    }

    #[test]
    fn test_multi_echo_expansion_collides() {
        let mut a = Classification::new(Category::Fieldmap, "magnitude");
        a.reference_span = Some(ReferenceSpan::List(vec![2]));
        let mut b = Classification::new(Category::Fieldmap, "magnitude1");
        b.reference_span = Some(ReferenceSpan::List(vec![2]));
        let func = bold("rest");
        let engine = NamingEngine::new(SubjectSpec::new(1));

        let batch = [
            NamingInput { index: SeriesIndex(0), classification: &a, echo_count: 2 },
            input(1, &b),
            input(2, &func),
        ];
        let err = engine.check(&batch).unwrap_err();
        assert!(matches!(err, NamingError::Collisions(ref c) if c[0].stem == "sub-001_magnitude1"));
    }

    #[test]
    fn test_check_against_existing_tree() {
        let root = tempfile::tempdir().unwrap();
        let folder = root.path().join("sub-003").join("anat");
        std::fs::create_dir_all(&folder).unwrap();
        std::fs::write(folder.join("sub-003_T1w.nii.gz"), b"").unwrap();

        let t1 = Classification::new(Category::Anatomical, "T1w");
        let t2 = Classification::new(Category::Anatomical, "T2w");
        let engine = NamingEngine::new(SubjectSpec::new(3));

        assert!(engine.check_against_tree(&[input(1, &t2)], root.path()).is_ok());
        let err = engine.check_against_tree(&[input(0, &t1)], root.path()).unwrap_err();
        assert!(matches!(err, NamingError::Collisions(ref c) if c[0].existing));
    }

    #[test]
    fn test_check_is_deterministic() {
        let t1 = Classification::new(Category::Anatomical, "T1w");
        let func = bold("rest");
        let engine = NamingEngine::new(SubjectSpec::new(8));
        let batch = [input(0, &t1), input(1, &func)];

        let first: Vec<_> = engine.check(&batch).unwrap().entries;
        let second: Vec<_> = engine.check(&batch).unwrap().entries;
        assert_eq!(first, second);
    }
}
