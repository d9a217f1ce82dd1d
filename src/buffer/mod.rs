//! Per-machine ring buffer (spec §4.B).

use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;

use crate::types::Reading;

/// Holds the most recent `capacity` readings for one machine, ordered by
/// timestamp. Late or duplicate timestamps are silently rejected to
/// preserve monotonicity (spec §4.B).
pub struct RingBuffer {
    capacity: usize,
    readings: VecDeque<Reading>,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            readings: VecDeque::with_capacity(capacity),
        }
    }

    /// Appends a reading if its timestamp is strictly greater than the
    /// buffer's current newest timestamp. Returns `true` if inserted.
    /// Evicts the oldest reading if the buffer is at capacity
    /// (spec §5 backpressure: "the buffer's oldest rows are evicted").
    pub fn append(&mut self, reading: Reading) -> bool {
        if let Some(newest) = self.readings.back() {
            if reading.timestamp <= newest.timestamp {
                return false;
            }
        }
        if self.readings.len() >= self.capacity {
            self.readings.pop_front();
        }
        self.readings.push_back(reading);
        true
    }

    /// An ordered, read-only view of the whole buffer (spec §4.B `snapshot()`).
    pub fn snapshot(&self) -> Vec<Reading> {
        self.readings.iter().cloned().collect()
    }

    /// A view restricted to readings within `window` of the buffer's newest
    /// timestamp (spec §4.B `tailSince(duration)`).
    pub fn tail_since(&self, window: Duration) -> Vec<Reading> {
        let Some(newest) = self.readings.back() else {
            return Vec::new();
        };
        let cutoff = newest.timestamp - window;
        self.readings
            .iter()
            .filter(|r| r.timestamp > cutoff)
            .cloned()
            .collect()
    }

    pub fn newest(&self) -> Option<&Reading> {
        self.readings.back()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    /// Age of the newest reading relative to `now`, or `None` if empty —
    /// used by the state detector's stale-data override (spec §4.D).
    pub fn age_of_newest(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.readings.back().map(|r| now - r.timestamp)
    }
}
