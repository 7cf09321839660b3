//! Verse boundary tracking.

use crate::models::VerseTiming;
use std::time::Duration;

/// Maps a playback position onto the verse being spoken.
///
/// `next_index` is the index of the first timing that starts after the
/// playhead, so it always lies in `[0, timings.len()]`. The current verse is
/// derived from it on demand and never stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundaryTracker {
    timings: Vec<VerseTiming>,
    next_index: usize,
}

impl BoundaryTracker {
    pub fn new(timings: Vec<VerseTiming>, position: Duration) -> Self {
        let mut tracker = Self {
            timings,
            next_index: 0,
        };
        tracker.reseek(position);
        tracker
    }

    /// Recompute the index after a seek or attach.
    pub fn reseek(&mut self, position: Duration) {
        self.next_index = self
            .timings
            .partition_point(|timing| timing.start() <= position);
    }

    /// Swap timings wholesale, keeping the playhead where it is.
    pub fn replace_timings(&mut self, timings: Vec<VerseTiming>, position: Duration) {
        self.timings = timings;
        self.reseek(position);
    }

    /// A registered boundary fired. Returns the new current verse.
    pub fn advance(&mut self) -> Option<u32> {
        self.next_index = (self.next_index + 1).min(self.timings.len());
        self.current_verse()
    }

    pub fn next_index(&self) -> usize {
        self.next_index
    }

    /// `timings[max(0, next_index - 1)]`, or `None` without timings.
    pub fn current_verse(&self) -> Option<u32> {
        self.timings
            .get(self.next_index.saturating_sub(1))
            .map(|timing| timing.verse_number)
    }

    /// One boundary per verse start, in order.
    pub fn boundaries(&self) -> Vec<Duration> {
        self.timings.iter().map(VerseTiming::start).collect()
    }

    pub fn timings(&self) -> &[VerseTiming] {
        &self.timings
    }

    pub fn len(&self) -> usize {
        self.timings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timings.is_empty()
    }
}
