//! Subject planning and transfer into a BIDS dataset.
//!
//! [`classify_subject`] turns a source directory into an editable
//! [`SubjectPlan`]; [`TransferOrchestrator`] converts the selected series
//! and installs them, updating the dataset-level files.

#![warn(missing_docs)]

pub mod error;
pub mod pipeline;
pub mod plan;
pub mod guard;
pub mod orchestrator;
pub mod report;

pub use error::{TransferError, SeriesFailure, Result};
pub use pipeline::{PipelineConfig, classify_subject, plan_series};
pub use plan::{SubjectPlan, PlannedSeries};
pub use guard::{Confirm, AssumeYes, AssumeNo, GuardDecision, guard};
pub use orchestrator::{TransferOrchestrator, TransferConfig};
pub use report::{TransferReport, SeriesOutcome, SeriesStatus};
