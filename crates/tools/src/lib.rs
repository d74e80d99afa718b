//! Converter integration.
//!
//! Runs the external DICOM to NIfTI converter one series at a time.

#![warn(missing_docs)]

pub mod r#trait;
pub mod builtin;

pub use r#trait::{Converter, ConvertInput, ConvertOutput};
pub use builtin::{ConverterConfig, Dcm2NiixTool};
