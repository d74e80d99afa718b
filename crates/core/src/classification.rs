//! Series classification: category, label and fieldmap pairing.

use serde::{Deserialize, Serialize};

/// Errors raised while parsing classification values from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Category name not recognised
    #[error("unknown category: {0:?}")]
    UnknownCategory(String),

    /// Reference span text could not be parsed
    #[error("invalid reference span: {0:?}")]
    InvalidSpan(String),
}

const ANAT_LABELS: &[&str] = &[
    "T1w", "T2w", "T1rho", "T1map", "T2map", "T2star", "FLAIR", "FLASH", "PD", "PDmap", "PDT2",
    "inplaneT1", "inplaneT2", "angio", "defacemask",
];
const FUNC_LABELS: &[&str] = &["bold", "sbref", "asl"];
const DWI_LABELS: &[&str] = &["dwi"];
const FMAP_LABELS: &[&str] = &[
    "fieldmap", "magnitude", "magnitude1", "magnitude2", "phasediff", "phase1", "phase2", "epi",
];

/// Top-level destination type of a series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// No rule resolved the series
    #[default]
    Unclassified,
    /// Structural images
    #[serde(alias = "anat")]
    Anatomical,
    /// Task or resting-state time series
    #[serde(alias = "func")]
    Functional,
    /// Diffusion-weighted images
    #[serde(alias = "dwi")]
    Diffusion,
    /// Field-correction maps
    #[serde(alias = "fmap")]
    Fieldmap,
    /// Never transferred
    Excluded,
}

impl Category {
    /// Long name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Unclassified => "unclassified",
            Category::Anatomical => "anatomical",
            Category::Functional => "functional",
            Category::Diffusion => "diffusion",
            Category::Fieldmap => "fieldmap",
            Category::Excluded => "excluded",
        }
    }

    /// Destination folder beneath the subject folder.
    pub fn folder(&self) -> Option<&'static str> {
        match self {
            Category::Anatomical => Some("anat"),
            Category::Functional => Some("func"),
            Category::Diffusion => Some("dwi"),
            Category::Fieldmap => Some("fmap"),
            Category::Unclassified | Category::Excluded => None,
        }
    }

    /// Controlled label vocabulary.
    pub fn labels(&self) -> &'static [&'static str] {
        match self {
            Category::Anatomical => ANAT_LABELS,
            Category::Functional => FUNC_LABELS,
            Category::Diffusion => DWI_LABELS,
            Category::Fieldmap => FMAP_LABELS,
            Category::Unclassified | Category::Excluded => &[],
        }
    }

    /// Whether `label` belongs to this category's vocabulary.
    pub fn accepts_label(&self, label: &str) -> bool {
        self.labels().contains(&label)
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "unclassified" | "none" | "0" => Ok(Category::Unclassified),
            "anat" | "anatomical" => Ok(Category::Anatomical),
            "func" | "functional" => Ok(Category::Functional),
            "dwi" | "diffusion" => Ok(Category::Diffusion),
            "fmap" | "fieldmap" => Ok(Category::Fieldmap),
            "exclude" | "excluded" => Ok(Category::Excluded),
            _ => Err(ParseError::UnknownCategory(s.to_string())),
        }
    }
}

/// Magnitude/phase role of a fieldmap series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldmapRole {
    /// Single magnitude image
    Magnitude,
    /// First of a magnitude pair
    Magnitude1,
    /// Second of a magnitude pair
    Magnitude2,
    /// Phase difference map
    PhaseDiff,
    /// First of a phase pair
    Phase1,
    /// Second of a phase pair
    Phase2,
    /// Neither sentinel present
    Fieldmap,
}

impl FieldmapRole {
    /// Filename label for this role.
    pub fn label(&self) -> &'static str {
        match self {
            FieldmapRole::Magnitude => "magnitude",
            FieldmapRole::Magnitude1 => "magnitude1",
            FieldmapRole::Magnitude2 => "magnitude2",
            FieldmapRole::PhaseDiff => "phasediff",
            FieldmapRole::Phase1 => "phase1",
            FieldmapRole::Phase2 => "phase2",
            FieldmapRole::Fieldmap => "fieldmap",
        }
    }

    /// Whether this role carries phase information.
    pub fn is_phase(&self) -> bool {
        matches!(self, FieldmapRole::PhaseDiff | FieldmapRole::Phase1 | FieldmapRole::Phase2)
    }
}

/// Series indices a fieldmap corrects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReferenceSpan {
    /// Inclusive range
    Range {
        /// First index
        first: usize,
        /// Last index
        last: usize,
    },
    /// Explicit indices
    List(Vec<usize>),
}

impl ReferenceSpan {
    /// Referenced indices below `len`, ascending and without duplicates.
    ///
    /// Ranges are clamped before they are expanded, so an edited plan with
    /// a huge `last` stays cheap.
    pub fn indices_below(&self, len: usize) -> Vec<usize> {
        match self {
            ReferenceSpan::Range { first, last } => {
                if *first >= len {
                    return Vec::new();
                }
                (*first..=(*last).min(len - 1)).collect()
            }
            ReferenceSpan::List(items) => {
                let mut items: Vec<usize> = items.iter().copied().filter(|i| *i < len).collect();
                items.sort_unstable();
                items.dedup();
                items
            }
        }
    }

    /// Smallest referenced index that is `len` or greater.
    pub fn first_beyond(&self, len: usize) -> Option<usize> {
        match self {
            ReferenceSpan::Range { first, last } => {
                (*last >= len && first <= last).then(|| (*first).max(len))
            }
            ReferenceSpan::List(items) => items.iter().copied().filter(|i| *i >= len).min(),
        }
    }

    /// No index referenced.
    pub fn is_empty(&self) -> bool {
        match self {
            ReferenceSpan::Range { first, last } => first > last,
            ReferenceSpan::List(items) => items.is_empty(),
        }
    }
}

impl std::fmt::Display for ReferenceSpan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReferenceSpan::Range { first, last } if first == last => write!(f, "{}", first),
            ReferenceSpan::Range { first, last } => write!(f, "{}-{}", first, last),
            ReferenceSpan::List(items) => {
                let text: Vec<String> = items.iter().map(|i| i.to_string()).collect();
                f.write_str(&text.join(", "))
            }
        }
    }
}

impl std::str::FromStr for ReferenceSpan {
    type Err = ParseError;

    /// Accepts `"2-4"` or a comma/space separated list such as `"1, 3 5"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::InvalidSpan(s.to_string());
        let text = s.trim();
        if text.is_empty() {
            return Err(invalid());
        }

        if let Some((first, last)) = text.split_once('-') {
            let first: usize = first.trim().parse().map_err(|_| invalid())?;
            let last: usize = last.trim().parse().map_err(|_| invalid())?;
            if first > last {
                return Err(invalid());
            }
            return Ok(ReferenceSpan::Range { first, last });
        }

        let items = text
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|part| !part.is_empty())
            .map(|part| part.parse::<usize>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ReferenceSpan::List(items))
    }
}

/// Classification of one series.
///
/// Created by the rule engine, refined by fieldmap pairing and possibly
/// edited by an operator before transfer. Category-specific fields are
/// validated where a transfer is requested.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    /// Destination category
    pub category: Category,

    /// Terminal filename token
    #[serde(default)]
    pub label: String,

    /// `acq-` entity
    #[serde(default)]
    pub acquisition: String,

    /// `rec-` entity
    #[serde(default)]
    pub reconstruction: String,

    /// `task-` entity, functional series only
    #[serde(default)]
    pub task: String,

    /// `run-` entity
    #[serde(default)]
    pub run: Option<u32>,

    /// Matched an exclusion substring
    #[serde(default)]
    pub excluded: bool,

    /// Series corrected by this fieldmap
    #[serde(default)]
    pub reference_span: Option<ReferenceSpan>,

    /// Magnitude/phase role of a fieldmap
    #[serde(default)]
    pub fieldmap_role: Option<FieldmapRole>,

    /// `reference_span` was inferred by the nearest-series heuristic
    #[serde(default)]
    pub heuristic_reference: bool,
}

impl Classification {
    /// Classification with a category and label and defaults elsewhere.
    pub fn new(category: Category, label: impl Into<String>) -> Self {
        Self {
            category,
            label: label.into(),
            ..Default::default()
        }
    }

    /// Whether the series can be transferred at all.
    ///
    /// Excluded series and series without a destination folder never are.
    pub fn is_transferable(&self) -> bool {
        !self.excluded && self.category.folder().is_some()
    }

    /// Reference span with at least one index.
    pub fn resolved_reference(&self) -> Option<&ReferenceSpan> {
        self.reference_span.as_ref().filter(|span| !span.is_empty())
    }
}
