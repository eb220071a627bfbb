//! # Wire Record Constants and Types
//!
//! Core definitions for the device's line protocol: one ASCII line per sample,
//! `[<value>, <timestamp_ms>]`, terminated by a newline.

use bytes::Bytes;

/// Line terminator emitted by the device
pub const LINE_TERMINATOR: u8 = b'\n';

/// Carriage return some firmwares emit before the terminator
pub const CARRIAGE_RETURN: u8 = b'\r';

/// Opening delimiter of the record literal
pub const RECORD_OPEN: char = '[';

/// Closing delimiter of the record literal
pub const RECORD_CLOSE: char = ']';

/// Separator between record fields
pub const RECORD_SEPARATOR: char = ',';

/// Number of fields in a record (value, timestamp)
pub const RECORD_FIELD_COUNT: usize = 2;

/// Device timestamps are milliseconds; samples carry seconds
pub const MILLIS_PER_SECOND: f64 = 1000.0;

/// One telemetry reading
///
/// Immutable once constructed: fields are only reachable through accessors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Device timestamp in seconds
    timestamp: f64,

    /// Measured value (distance)
    value: f64,
}

impl Sample {
    /// Create a sample from a timestamp in seconds and a value
    #[must_use]
    pub fn new(timestamp: f64, value: f64) -> Self {
        Self { timestamp, value }
    }

    /// Create a sample from wire-order fields (value first, milliseconds second)
    #[must_use]
    pub fn from_wire(value: f64, timestamp_ms: f64) -> Self {
        Self::new(timestamp_ms / MILLIS_PER_SECOND, value)
    }

    /// Timestamp in seconds
    #[must_use]
    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    /// Measured value
    #[must_use]
    pub fn value(&self) -> f64 {
        self.value
    }
}

/// One framed line from the device, terminator stripped
///
/// May be empty or malformed; the decoder decides.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawLine(Bytes);

impl RawLine {
    /// Wrap already-framed bytes
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Raw line bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for a bare terminator
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Lossy text view for logging and error reporting
    #[must_use]
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }
}

impl From<&str> for RawLine {
    fn from(line: &str) -> Self {
        Self(Bytes::copy_from_slice(line.as_bytes()))
    }
}
