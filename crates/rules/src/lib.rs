//! Series classification rules.
//!
//! A [`RuleTable`] maps sequence names, acquisition types and descriptions
//! to a category and label; a [`ConfigTable`] adds reconstruction markers,
//! fieldmap phase markers and exclusions. [`RuleEngine`] applies both and
//! [`pairing`] refines fieldmaps afterwards.

#![warn(missing_docs)]

pub mod table;
pub mod config;
pub mod engine;
pub mod pairing;

pub use table::{Rule, RuleTable};
pub use config::ConfigTable;
pub use engine::{RuleEngine, MatchOutcome, SeriesDecision};
pub use pairing::{infer_pairs, MAGNITUDE_SENTINEL, PHASE_SENTINEL, ROLE_POSITION};

use bidsconv_core::ParseError;
use std::path::PathBuf;

/// Result alias for rule loading.
pub type Result<T> = std::result::Result<T, RuleError>;

/// Errors raised while loading rule and configuration tables.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    /// Table file could not be read
    #[error("Cannot read {path}: {source}")]
    Io {
        /// Table path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Row does not have exactly five fields
    #[error("line {line}: expected 5 tab-separated fields, found {found}")]
    Arity {
        /// 1-based line number
        line: usize,
        /// Field count
        found: usize,
    },

    /// Category column is not a known category
    #[error("line {line}: {source}")]
    Category {
        /// 1-based line number
        line: usize,
        /// Parse failure
        source: ParseError,
    },

    /// Required column is empty
    #[error("line {line}: empty {column} column")]
    EmptyColumn {
        /// 1-based line number
        line: usize,
        /// Column name
        column: &'static str,
    },

    /// Configuration table is not valid TOML
    #[error("Config table: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration entry is unusable
    #[error("Config table: {list} entry {value:?} {reason}")]
    InvalidEntry {
        /// List name
        list: &'static str,
        /// Offending value
        value: String,
        /// What is wrong with it
        reason: &'static str,
    },
}
