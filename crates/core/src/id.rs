//! Identifiers used across a conversion run.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Canonical position of a series in first-discovery order.
///
/// Index 0 is the first series encountered while scanning the source
/// directory, not the lowest scanner-assigned series number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeriesIndex(pub usize);

impl SeriesIndex {
    /// Raw position.
    pub fn get(self) -> usize {
        self.0
    }

    /// Index of the series immediately before this one, if any.
    pub fn previous(self) -> Option<SeriesIndex> {
        self.0.checked_sub(1).map(SeriesIndex)
    }
}

impl std::fmt::Display for SeriesIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<usize> for SeriesIndex {
    fn from(value: usize) -> Self {
        Self(value)
    }
}

/// Unique identifier for one transfer run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Ulid);

impl RunId {
    /// Generate a new RunId
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for RunId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}
