//! Subject and session addressing.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Subject number, optional group prefix and optional session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectSpec {
    /// Subject number
    pub number: u32,

    /// Group prefix placed before the padded number
    #[serde(default)]
    pub group: String,

    /// Session label
    #[serde(default)]
    pub session: Option<String>,
}

impl SubjectSpec {
    /// Subject without group or session.
    pub fn new(number: u32) -> Self {
        Self {
            number,
            group: String::new(),
            session: None,
        }
    }

    /// Set the group prefix.
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    /// Set the session label. An empty label clears it.
    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        let session = session.into();
        self.session = if session.trim().is_empty() {
            None
        } else {
            Some(session.trim().to_string())
        };
        self
    }

    /// Padded number: two zeros below 10, one below 100.
    pub fn padded_number(&self) -> String {
        match self.number {
            n if n > 99 => n.to_string(),
            n if n > 9 => format!("0{}", n),
            n => format!("00{}", n),
        }
    }

    /// Value of the `sub-` entity.
    pub fn subject_id(&self) -> String {
        format!("{}{}", self.group, self.padded_number())
    }

    /// Subject folder name, e.g. `sub-003`.
    pub fn subject_label(&self) -> String {
        format!("sub-{}", self.subject_id())
    }

    /// Session folder name, e.g. `ses-2`.
    pub fn session_label(&self) -> Option<String> {
        self.session.as_ref().map(|s| format!("ses-{}", s))
    }

    /// Filename prefix, e.g. `sub-003_ses-2`.
    pub fn prefix(&self) -> String {
        match &self.session {
            Some(session) => format!("{}_ses-{}", self.subject_label(), session),
            None => self.subject_label(),
        }
    }

    /// Data folder relative to the dataset root.
    pub fn relative_dir(&self) -> PathBuf {
        let mut dir = PathBuf::from(self.subject_label());
        if let Some(session) = self.session_label() {
            dir.push(session);
        }
        dir
    }
}

impl std::fmt::Display for SubjectSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.session {
            Some(session) => write!(f, "{} ses-{}", self.subject_label(), session),
            None => f.write_str(&self.subject_label()),
        }
    }
}
