//! Categorization table.
//!
//! One rule per line, five tab-separated fields and no header:
//!
//! ```text
//! category  sequence-name  acquisition-type  description  label
//! ```
//!
//! Blank lines are ignored. Match columns may be empty, in which case they
//! match any value; category and label are required.

use crate::{Result, RuleError};
use bidsconv_core::Category;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// One categorization rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// 1-based line in the source table
    pub line: usize,

    /// Resulting category
    pub category: Category,

    /// Substring matched against the sequence name
    pub sequence_name: String,

    /// Substring matched against the acquisition type
    pub acquisition_type: String,

    /// Substring matched against the series description
    pub description: String,

    /// Resulting label
    pub label: String,
}

/// Ordered list of rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleTable {
    rules: Vec<Rule>,
}

impl RuleTable {
    /// Table from already validated rules.
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Parse table text.
    pub fn parse(text: &str) -> Result<Self> {
        let mut rules = Vec::new();

        for (pos, raw) in text.lines().enumerate() {
            let line = pos + 1;
            let raw = raw.trim_end_matches('\r');
            if raw.trim().is_empty() {
                continue;
            }

            let fields: Vec<&str> = raw.split('\t').collect();
            if fields.len() != 5 {
                return Err(RuleError::Arity { line, found: fields.len() });
            }

            let category_text = fields[0].trim();
            if category_text.is_empty() {
                return Err(RuleError::EmptyColumn { line, column: "category" });
            }
            let category = category_text
                .parse::<Category>()
                .map_err(|source| RuleError::Category { line, source })?;

            let label = fields[4].trim();
            if label.is_empty() && category != Category::Excluded {
                return Err(RuleError::EmptyColumn { line, column: "label" });
            }

            rules.push(Rule {
                line,
                category,
                sequence_name: fields[1].trim().to_string(),
                acquisition_type: fields[2].trim().to_string(),
                description: fields[3].trim().to_string(),
                label: label.to_string(),
            });
        }

        debug!("Parsed {} categorization rules", rules.len());
        Ok(Self { rules })
    }

    /// Load and parse a table file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| RuleError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Rules in table order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Table has no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rules() {
        let text = "anat\tmprage\t3D\t\tT1w\n\nfunc\tepfid2d\t2D\tbold\tbold\r\n";
        let table = RuleTable::parse(text).unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.rules()[0].category, Category::Anatomical);
        assert_eq!(table.rules()[0].description, "");
        assert_eq!(table.rules()[1].line, 3);
        assert_eq!(table.rules()[1].label, "bold");
    }

    #[test]
    fn test_wrong_arity_reports_line() {
        let err = RuleTable::parse("anat\tmprage\tT1w\n").unwrap_err();
        assert!(matches!(err, RuleError::Arity { line: 1, found: 3 }));
    }

    #[test]
    fn test_unknown_category() {
        let err = RuleTable::parse("anat\ta\tb\tc\tT1w\nbeh\ta\tb\tc\tx\n").unwrap_err();
        assert!(matches!(err, RuleError::Category { line: 2, .. }));
    }

    #[test]
    fn test_empty_label_rejected() {
        let err = RuleTable::parse("func\tepfid\t2D\tbold\t \n").unwrap_err();
        assert!(matches!(err, RuleError::EmptyColumn { column: "label", .. }));
    }

    #[test]
    fn test_load_missing_file() {
        let err = RuleTable::load(Path::new("/nonexistent/rules.tsv")).unwrap_err();
        assert!(matches!(err, RuleError::Io { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.tsv");
        std::fs::write(&path, "dwi\tep_b\t2D\tdti\tdwi\n").unwrap();

        let table = RuleTable::load(&path).unwrap();
        assert_eq!(table.rules()[0].category, Category::Diffusion);
    }
}
