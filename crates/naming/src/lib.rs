//! Destination naming for transferred series.
//!
//! [`grammar`] builds filename stems from a subject and a classification;
//! [`NamingEngine`] validates a whole batch and refuses it when a required
//! field is missing or two series would land on the same filename.

#![warn(missing_docs)]

pub mod grammar;
pub mod validate;

pub use grammar::{build_stem, echo_stem, clean_task, format_run, destination};
pub use validate::{
    NamingEngine, NamingInput, NamingPlan, NamingError, PlanIssue, Collision, LabelWarning,
};
