//! # Wire Record Module
//!
//! The device's ASCII line protocol.
//!
//! This module handles:
//! - Sample and raw line types
//! - Decoding `[value, timestamp_ms]` lines into samples
//! - Formatting samples back into wire records

pub mod protocol;
pub mod decoder;
pub mod encoder;

pub use decoder::parse;
pub use protocol::{RawLine, Sample};
