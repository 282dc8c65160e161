//! Utility functions module
//!
//! Helpers for human-readable sizes, elapsed times and duration parsing.

pub mod units;

// Re-export commonly used functions
pub use units::{format_bytes, format_elapsed, parse_duration, relative_slowdown};
