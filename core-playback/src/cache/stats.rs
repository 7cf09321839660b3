//! Cache statistics and eviction reports

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Statistics about the segment cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of complete entries on disk
    pub entry_count: usize,

    /// Total bytes used by the cache root
    pub total_bytes: u64,

    /// Entries currently protected from eviction
    pub pinned_entries: usize,

    /// Least recent access across entries
    pub oldest_access: Option<DateTime<Utc>>,

    /// Most recent access across entries
    pub newest_access: Option<DateTime<Utc>>,

    /// Timestamp when stats were calculated
    pub calculated_at: i64,
}

impl CacheStats {
    /// Calculate cache usage as a percentage of max size.
    pub fn usage_percentage(&self, max_size: u64) -> f64 {
        if max_size == 0 {
            return 0.0;
        }

        (self.total_bytes as f64 / max_size as f64) * 100.0
    }

    /// Returns true if the cache is near capacity (>90%).
    pub fn is_near_capacity(&self, max_size: u64) -> bool {
        self.usage_percentage(max_size) > 90.0
    }

    /// Returns true if the cache is full (>=100%).
    pub fn is_full(&self, max_size: u64) -> bool {
        self.total_bytes >= max_size
    }

    /// Bytes over budget.
    pub fn space_needed(&self, max_size: u64) -> u64 {
        self.total_bytes.saturating_sub(max_size)
    }

    /// Returns average bytes per entry.
    pub fn average_entry_size(&self) -> u64 {
        if self.entry_count == 0 {
            0
        } else {
            self.total_bytes / self.entry_count as u64
        }
    }
}

/// What one `ensure_capacity` pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionReport {
    /// Entries removed because they were older than the max age
    pub expired_entries: usize,

    /// Entries removed to make room
    pub evicted_entries: usize,

    /// Bytes released by both phases
    pub bytes_freed: u64,

    /// Bytes in use after the pass
    pub bytes_in_use: u64,
}

impl EvictionReport {
    pub fn total_removed(&self) -> usize {
        self.expired_entries + self.evicted_entries
    }

    pub fn is_empty(&self) -> bool {
        self.total_removed() == 0
    }
}
