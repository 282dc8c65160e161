//! Units formatting and conversion utilities
//!
//! Provides human-readable formatting of byte counts and elapsed times for
//! the benchmark report, and duration parsing for configuration values.

use byte_unit::{Byte, UnitType};
use std::time::Duration;

/// Format bytes into human-readable size with binary units
///
/// # Examples
/// ```
/// use tokenbench::util::units::format_bytes;
///
/// assert_eq!(format_bytes(512), "512 B");
/// assert!(format_bytes(1536).ends_with("KiB"));
/// ```
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let adjusted = Byte::from_u64(bytes).get_appropriate_unit(UnitType::Binary);
    format!("{:.1}", adjusted)
}

/// Format an elapsed time with precision suited to its magnitude
///
/// # Examples
/// ```
/// use std::time::Duration;
/// use tokenbench::util::units::format_elapsed;
///
/// assert_eq!(format_elapsed(Duration::from_micros(750)), "750μs");
/// assert_eq!(format_elapsed(Duration::from_millis(5)), "5.000ms");
/// assert_eq!(format_elapsed(Duration::from_millis(2500)), "2.500s");
/// ```
pub fn format_elapsed(duration: Duration) -> String {
    let micros = duration.as_micros();

    if micros >= 1_000_000 {
        format!("{:.3}s", duration.as_secs_f64())
    } else if micros >= 1000 {
        format!("{:.3}ms", micros as f64 / 1000.0)
    } else {
        format!("{}μs", micros)
    }
}

/// Parse duration string into Duration
///
/// Accepts humantime forms like "30s", "1m 30s", "500ms".
///
/// # Examples
/// ```
/// use std::time::Duration;
/// use tokenbench::util::units::parse_duration;
///
/// assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
/// assert_eq!(parse_duration("1m 30s").unwrap(), Duration::from_secs(90));
/// ```
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    humantime::parse_duration(input.trim())
        .map_err(|e| format!("Invalid duration '{}': {}", input.trim(), e))
}

/// How many times slower `elapsed` is than `fastest`
///
/// Returns 1.0 when the fastest time is zero so a zero-cost step does not
/// produce an infinite factor.
pub fn relative_slowdown(elapsed: Duration, fastest: Duration) -> f64 {
    if fastest.is_zero() {
        return 1.0;
    }

    elapsed.as_secs_f64() / fastest.as_secs_f64()
}
