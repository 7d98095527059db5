//! Clocks used for latency measurement
//!
//! Request timestamps use a monotonic nanosecond clock. The window tracker
//! stamps samples with wall-clock milliseconds.

use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Global start time for monotonic nanosecond timestamps
static START: OnceLock<Instant> = OnceLock::new();

/// Get current time in nanoseconds since program start
///
/// All timestamps are relative to the first call to this function.
///
/// # Example
/// ```
/// use synload_core::timing::time_ns;
///
/// let start = time_ns();
/// // ... do work ...
/// let elapsed = time_ns() - start;
/// println!("Elapsed: {} ns", elapsed);
/// ```
#[inline]
pub fn time_ns() -> u64 {
    let start = START.get_or_init(Instant::now);
    start.elapsed().as_nanos() as u64
}

/// Milliseconds since the Unix epoch
///
/// A clock set before 1970 reads as 0.
#[inline]
pub fn wall_clock_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}
