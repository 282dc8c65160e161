//! Benchmark engine module
//!
//! The runner that drives strategies through the measured sequence, and the
//! task group strategies use to fan out their writes.

pub mod fanout;
pub mod runner;

// Re-export commonly used types
pub use fanout::TaskGroup;
pub use runner::{timed, BenchmarkRunner, ProgressUpdate, RunPlan};
