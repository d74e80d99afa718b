//! Pre-flight check of the destination subject folder.

use crate::{Result, TransferError};
use bidsconv_core::SubjectSpec;
use bidsconv_storage::{DatasetStore, SubjectState};
use std::path::PathBuf;
use tracing::{info, warn};

/// Yes/no questions asked before destructive steps.
pub trait Confirm: Send + Sync {
    /// Ask a question. `false` means keep what exists.
    fn confirm(&self, question: &str) -> bool;
}

/// Answers yes to everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeYes;

impl Confirm for AssumeYes {
    fn confirm(&self, question: &str) -> bool {
        info!("{} yes", question);
        true
    }
}

/// Answers no to everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeNo;

impl Confirm for AssumeNo {
    fn confirm(&self, question: &str) -> bool {
        info!("{} no", question);
        false
    }
}

/// What to do with existing data before a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// Nothing in the way
    Proceed,
    /// Delete this folder (relative to the root) first
    Replace(PathBuf),
}

/// Decide how existing subject data is handled.
///
/// - no session, subject folder without sessions: confirm replacing it
/// - no session, subject folder with sessions: refuse
/// - session folder already present: confirm replacing it
pub async fn guard<S: DatasetStore + ?Sized>(
    store: &S,
    subject: &SubjectSpec,
    confirm: &dyn Confirm,
) -> Result<GuardDecision> {
    let sessions = match store.subject_state(subject).await? {
        SubjectState::Absent => return Ok(GuardDecision::Proceed),
        SubjectState::Present { sessions } => sessions,
    };

    match subject.session_label() {
        None if !sessions.is_empty() => Err(TransferError::SessionRequired {
            subject: subject.subject_label(),
            sessions,
        }),
        None => ask(subject.relative_dir(), confirm),
        Some(session) if sessions.contains(&session) => ask(subject.relative_dir(), confirm),
        Some(_) => Ok(GuardDecision::Proceed),
    }
}

fn ask(dir: PathBuf, confirm: &dyn Confirm) -> Result<GuardDecision> {
    warn!("{} already exists", dir.display());
    let question = format!("{} already exists. Delete it and convert again?", dir.display());
    if confirm.confirm(&question) {
        Ok(GuardDecision::Replace(dir))
    } else {
        Err(TransferError::Declined(dir))
    }
}
