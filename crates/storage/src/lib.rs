//! Output dataset storage for bidsconv.
//!
//! This crate provides a trait-based interface over the output dataset
//! with a filesystem implementation. Every write to the dataset root goes
//! through [`DatasetStore`].

#![warn(missing_docs)]

pub mod trait_;
pub mod description;
pub mod dataset_tree;

pub use trait_::{DatasetStore, StorageError, Result, SubjectState, ParticipantUpdate};
pub use description::{DatasetDescription, DescriptionUpdate, DEFAULT_BIDS_VERSION};
pub use dataset_tree::DatasetTree;
