//! Day clock used by the sync handshake.
//!
//! Timestamps on the wire are microseconds since local midnight. They wrap to
//! zero at midnight, so two readings are only comparable within the same
//! calendar day. Moving to another epoch would change the wire contract.

use chrono::{Local, NaiveTime, Timelike};

/// Number of microseconds in one day. Every day-clock reading is below this.
pub const DAY_MICROS: u64 = 86_400_000_000;

/// Current time as microseconds since local midnight.
pub fn day_micros() -> u64 {
    micros_since_midnight(Local::now().time())
}

/// Convert a wall-clock time of day to microseconds since midnight.
///
/// Leap-second readings (nanoseconds >= 1e9) are clamped into the last
/// microsecond of their second so the result stays below [`DAY_MICROS`].
pub fn micros_since_midnight(time: NaiveTime) -> u64 {
    let seconds = u64::from(time.num_seconds_from_midnight());
    let micros = u64::from(time.nanosecond().min(999_999_999)) / 1_000;
    seconds * 1_000_000 + micros
}
