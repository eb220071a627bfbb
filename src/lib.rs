//! # Pendulum Telemetry Library
//!
//! Acquire `[value, timestamp_ms]` telemetry from a line-oriented serial device
//! into a fixed-capacity sliding window for live plotting.
//!
//! This library provides the acquisition core: serial line framing, record
//! decoding, a cancellable background acquisition task, and the bounded window
//! a rendering collaborator reads snapshots from.

pub mod config;
pub mod error;
pub mod record;
pub mod serial;
pub mod window;
pub mod acquisition;
