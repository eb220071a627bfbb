//! # Record Encoder
//!
//! Formats values in the device's wire literal. Used to build lines for test
//! devices and to check the decoder against its inverse.

use super::protocol::{RECORD_CLOSE, RECORD_OPEN};

/// Format a `[value, timestamp_ms]` record (without terminator)
///
/// `f64`'s `Display` prints the shortest text that parses back to the same
/// value, so decoding the output reproduces the inputs exactly.
///
/// # Examples
///
/// ```
/// use pendulum_telemetry::record::encoder::encode_record;
///
/// assert_eq!(encode_record(3.25, 104032.0), "[3.25, 104032]");
/// ```
pub fn encode_record(value: f64, timestamp_ms: f64) -> String {
    format!("{}{}, {}{}", RECORD_OPEN, value, timestamp_ms, RECORD_CLOSE)
}

/// Format a record and append the line terminator
pub fn encode_line(value: f64, timestamp_ms: f64) -> String {
    let mut line = encode_record(value, timestamp_ms);
    line.push('\n');
    line
}
