//! Data models module
//!
//! Contains measurement records, the size report and the run report.

pub mod result;

// Re-export commonly used types
pub use result::{Answer, Measurement, Operation, Outcome, RunReport, SizeReport};
