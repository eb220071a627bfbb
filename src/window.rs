//! # Sliding Window Module
//!
//! Fixed-capacity, time-ordered retention of the most recent samples.
//!
//! ## Layout
//!
//! Samples live in a ring: the backing vector grows until it reaches capacity,
//! after which each push overwrites the oldest slot and advances `head`.
//! Logical index 0 is always `slots[head]`, so the observable order is the same
//! as shifting every sample down one position, at O(1) cost per push.
//!
//! ## Usage
//!
//! ```
//! use pendulum_telemetry::record::Sample;
//! use pendulum_telemetry::window::SlidingWindowBuffer;
//!
//! let mut window = SlidingWindowBuffer::new(2)?;
//! window.push(Sample::new(0.0, 1.0));
//! window.push(Sample::new(1.0, 2.0));
//! window.push(Sample::new(2.0, 3.0));
//!
//! let values: Vec<f64> = window.iter().map(|s| s.value()).collect();
//! assert_eq!(values, vec![2.0, 3.0]);
//! # Ok::<(), pendulum_telemetry::error::TelemetryError>(())
//! ```

use crate::error::{Result, TelemetryError};
use crate::record::Sample;

/// Bounded FIFO of samples, oldest first
#[derive(Debug, Clone)]
pub struct SlidingWindowBuffer {
    /// Backing storage, never longer than `capacity`
    slots: Vec<Sample>,
    /// Physical index of the oldest sample once the ring has wrapped
    head: usize,
    capacity: usize,
}

impl SlidingWindowBuffer {
    /// Create an empty window holding at most `capacity` samples
    ///
    /// # Errors
    ///
    /// Returns `InvalidCapacity` if `capacity` is 0.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(TelemetryError::InvalidCapacity(capacity));
        }

        Ok(Self {
            slots: Vec::with_capacity(capacity),
            head: 0,
            capacity,
        })
    }

    /// Append a sample, evicting the oldest one when full
    pub fn push(&mut self, sample: Sample) {
        if self.slots.len() < self.capacity {
            self.slots.push(sample);
            return;
        }

        self.slots[self.head] = sample;
        self.head = (self.head + 1) % self.capacity;
    }

    /// Drop every stored sample
    pub fn reset(&mut self) {
        self.slots.clear();
        self.head = 0;
    }

    /// Copy of the current contents, oldest first
    #[must_use]
    pub fn snapshot(&self) -> Vec<Sample> {
        self.iter().copied().collect()
    }

    /// Iterate oldest to newest without copying
    pub fn iter(&self) -> impl Iterator<Item = &Sample> + '_ {
        let (newer, older) = self.slots.split_at(self.head);
        older.iter().chain(newer.iter())
    }

    /// Sample at logical index (0 = oldest)
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Sample> {
        if index >= self.slots.len() {
            return None;
        }
        self.slots.get((self.head + index) % self.slots.len())
    }

    /// Most recently pushed sample
    #[must_use]
    pub fn latest(&self) -> Option<&Sample> {
        self.len().checked_sub(1).and_then(|last| self.get(last))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.slots.len() == self.capacity
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
