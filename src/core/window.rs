//! Bounded BPM history for charting.
//!
//! Only the presentation layer reads this; classification and alerting
//! never look at past samples.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default number of samples kept.
pub const DEFAULT_WINDOW_CAPACITY: usize = 30;

/// One charted point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowSample {
    pub timestamp: DateTime<Utc>,
    pub bpm: f64,
}

impl WindowSample {
    pub fn new(timestamp: DateTime<Utc>, bpm: f64) -> Self {
        Self { timestamp, bpm }
    }
}

/// Fixed-capacity FIFO of samples, oldest first.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    capacity: usize,
    samples: VecDeque<WindowSample>,
}

impl RollingWindow {
    /// Window holding up to `capacity` samples, never more than
    /// [`DEFAULT_WINDOW_CAPACITY`].
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, DEFAULT_WINDOW_CAPACITY);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity + 1),
        }
    }

    /// Add a sample at the tail, evicting from the head past capacity.
    ///
    /// A sample stamped earlier than the current tail (wall clock stepped
    /// backwards) is re-stamped to the tail's time so the sequence stays
    /// non-decreasing.
    pub fn append(&mut self, mut sample: WindowSample) {
        if let Some(last) = self.samples.back() {
            if sample.timestamp < last.timestamp {
                sample.timestamp = last.timestamp;
            }
        }

        self.samples.push_back(sample);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    /// Copy of the current samples, oldest first.
    pub fn snapshot(&self) -> Vec<WindowSample> {
        self.samples.iter().copied().collect()
    }

    pub fn latest(&self) -> Option<&WindowSample> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

impl Default for RollingWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_CAPACITY)
    }
}
