//! bidsconv core data models.
//!
//! This crate defines the records shared by every stage of a conversion:
//! per-image and per-series acquisition records, series classifications
//! and the addressing of subjects and destination files.

#![warn(missing_docs)]

mod id;
mod series;
mod classification;
mod subject;
mod destination;

pub use id::{SeriesIndex, RunId};
pub use series::{ImageRecord, SeriesRecord, DiffusionFlags, PatientInfo};
pub use classification::{Category, Classification, FieldmapRole, ReferenceSpan, ParseError};
pub use subject::SubjectSpec;
pub use destination::{
    DestinationEntry, PAYLOAD_EXT, PAYLOAD_EXT_PLAIN, SIDECAR_EXT, DIFFUSION_EXTS,
};
