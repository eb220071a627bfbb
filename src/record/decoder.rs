//! # Record Decoder
//!
//! Decodes one framed line into a [`Sample`].
//!
//! The grammar is deliberately narrow: optional whitespace, `[`, a number, `,`,
//! a number, `]`, optional whitespace. Field boundaries come from those
//! delimiters only, never from byte offsets or line length.

use super::protocol::*;
use crate::error::ParseError;

/// Decode a framed line
///
/// # Arguments
///
/// * `line` - One line from the device, terminator already stripped
///
/// # Returns
///
/// * `Result<Sample, ParseError>` - Decoded sample with the timestamp in seconds
///
/// # Errors
///
/// Returns `ParseError::Malformed` carrying the original text if the line is:
/// - empty or not valid UTF-8
/// - not enclosed in `[` and `]`
/// - not exactly two comma-separated fields
/// - carrying a field that is not a finite number
///
/// # Examples
///
/// ```
/// use pendulum_telemetry::record::decoder::parse;
/// use pendulum_telemetry::record::protocol::RawLine;
///
/// let sample = parse(&RawLine::from("[3.25, 104032]")).unwrap();
/// assert_eq!(sample.value(), 3.25);
/// assert_eq!(sample.timestamp(), 104.032);
/// ```
pub fn parse(line: &RawLine) -> Result<Sample, ParseError> {
    decode_record(line.as_bytes())
}

/// Decode a record from raw bytes
///
/// Same grammar as [`parse`], for callers that have not wrapped the bytes in a
/// [`RawLine`].
pub fn decode_record(bytes: &[u8]) -> Result<Sample, ParseError> {
    let malformed = || ParseError::Malformed(String::from_utf8_lossy(bytes).into_owned());

    let text = std::str::from_utf8(bytes).map_err(|_| malformed())?;

    let body = text
        .trim()
        .strip_prefix(RECORD_OPEN)
        .and_then(|rest| rest.strip_suffix(RECORD_CLOSE))
        .ok_or_else(malformed)?;

    let mut fields = body.split(RECORD_SEPARATOR);
    let mut numbers = [0.0f64; RECORD_FIELD_COUNT];
    for slot in numbers.iter_mut() {
        *slot = fields.next().and_then(parse_number).ok_or_else(malformed)?;
    }

    // Anything left over means a third field (or a trailing separator)
    if fields.next().is_some() {
        return Err(malformed());
    }

    let [value, timestamp_ms] = numbers;
    Ok(Sample::from_wire(value, timestamp_ms))
}

/// Parse one field as a finite number
fn parse_number(field: &str) -> Option<f64> {
    let field = field.trim();
    if field.is_empty() {
        return None;
    }

    field.parse::<f64>().ok().filter(|n| n.is_finite())
}
