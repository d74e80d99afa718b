//! Rule matching and configuration markers.

use crate::{ConfigTable, Rule, RuleTable};
use bidsconv_core::{Category, Classification, SeriesRecord};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// How rule narrowing ended for one series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchOutcome {
    /// Exactly one rule survived
    Matched {
        /// Table line of the rule
        line: usize,
    },
    /// No rule matched the sequence name
    NoMatch,
    /// Several rules survived every stage
    Ambiguous {
        /// Table lines of the surviving rules
        lines: Vec<usize>,
    },
}

impl MatchOutcome {
    /// Whether a rule was applied.
    pub fn is_matched(&self) -> bool {
        matches!(self, MatchOutcome::Matched { .. })
    }
}

/// Classification of one series plus how it was reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesDecision {
    /// Resulting classification
    pub classification: Classification,

    /// Narrowing outcome
    pub outcome: MatchOutcome,
}

/// Applies a rule table and a configuration table to series.
#[derive(Debug, Clone)]
pub struct RuleEngine {
    rules: RuleTable,
    config: ConfigTable,
}

impl RuleEngine {
    /// Create an engine.
    pub fn new(rules: RuleTable, config: ConfigTable) -> Self {
        Self { rules, config }
    }

    /// The rule table.
    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    /// The configuration table.
    pub fn config(&self) -> &ConfigTable {
        &self.config
    }

    /// Narrow the rule table for one series.
    ///
    /// Stage one keeps rules whose sequence-name substring occurs in the
    /// series sequence name. Acquisition type and then description narrow
    /// further only while more than one candidate remains. Matching is
    /// case-insensitive.
    pub fn narrow(&self, series: &SeriesRecord) -> MatchOutcome {
        let name = series.sequence_name.to_lowercase();
        let acquisition = series.acquisition_type.to_lowercase();
        let description = series.description.to_lowercase();

        let mut candidates: Vec<&Rule> = self
            .rules
            .rules()
            .iter()
            .filter(|r| name.contains(&r.sequence_name.to_lowercase()))
            .collect();

        if candidates.len() > 1 {
            candidates.retain(|r| acquisition.contains(&r.acquisition_type.to_lowercase()));
        }
        if candidates.len() > 1 {
            candidates.retain(|r| description.contains(&r.description.to_lowercase()));
        }

        match candidates.as_slice() {
            [] => MatchOutcome::NoMatch,
            [rule] => MatchOutcome::Matched { line: rule.line },
            many => MatchOutcome::Ambiguous {
                lines: many.iter().map(|r| r.line).collect(),
            },
        }
    }

    /// Classify one series.
    pub fn classify(&self, series: &SeriesRecord) -> SeriesDecision {
        let outcome = self.narrow(series);

        let mut classification = match &outcome {
            MatchOutcome::Matched { line } => self
                .rules
                .rules()
                .iter()
                .find(|r| r.line == *line)
                .map(|r| Classification::new(r.category, r.label.clone()))
                .unwrap_or_default(),
            MatchOutcome::NoMatch => {
                debug!("Series {} ({}): no rule matched", series.index, series.description);
                Classification::default()
            }
            MatchOutcome::Ambiguous { lines } => {
                warn!(
                    "Series {} ({}): rules on lines {:?} all match, left unclassified",
                    series.index, series.description, lines
                );
                Classification::default()
            }
        };

        self.apply_markers(series, &mut classification);

        SeriesDecision { classification, outcome }
    }

    /// Classify series in canonical order.
    pub fn classify_all(&self, series: &[SeriesRecord]) -> Vec<SeriesDecision> {
        let decisions: Vec<SeriesDecision> = series.iter().map(|s| self.classify(s)).collect();
        let matched = decisions.iter().filter(|d| d.outcome.is_matched()).count();
        info!("Classified {} of {} series", matched, decisions.len());
        decisions
    }

    /// Reconstruction, phase and exclusion markers.
    ///
    /// These only read the series and the category, so the result does not
    /// depend on the order in which the flags are evaluated.
    fn apply_markers(&self, series: &SeriesRecord, c: &mut Classification) {
        let description = series.description.to_lowercase();

        for marker in &self.config.reconstruction_markers {
            if series.image_type.iter().any(|v| v.contains(marker.as_str())) {
                c.reconstruction = marker.clone();
            }
        }

        if c.category == Category::Fieldmap {
            for marker in &self.config.phase_markers {
                if description.contains(&marker.to_lowercase()) {
                    c.acquisition = marker.chars().skip(1).collect();
                }
            }
        }

        for substring in &self.config.exclude_containing {
            if description.contains(&substring.to_lowercase()) {
                debug!("Series {} excluded: description contains {:?}", series.index, substring);
                c.excluded = true;
                c.acquisition = substring.clone();
            }
        }

        for suffix in &self.config.exclude_ending_with {
            if description.ends_with(&suffix.to_lowercase()) {
                debug!("Series {} excluded: description ends with {:?}", series.index, suffix);
                c.excluded = true;
                c.acquisition = suffix.clone();
            }
        }
    }
}
