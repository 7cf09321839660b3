//! Cache configuration and size presets

use std::time::Duration;

pub use core_runtime::config::CacheSizePreset;

/// Entries not accessed for this long are purged before size-based eviction.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Configuration for the segment cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum cache size in bytes (default: 500MB)
    pub max_size_bytes: u64,

    /// Maximum time since last access before an entry expires (default: 30 days)
    pub max_age: Duration,

    /// Directory for cache entries (relative to the filesystem cache dir)
    pub cache_directory: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: CacheSizePreset::default().bytes(),
            max_age: DEFAULT_MAX_AGE,
            cache_directory: "verse_audio".to_string(),
        }
    }
}

impl CacheConfig {
    /// Create a new cache configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum cache size.
    pub fn with_max_size(mut self, bytes: u64) -> Self {
        self.max_size_bytes = bytes;
        self
    }

    /// Set maximum cache size from a preset.
    pub fn with_preset(mut self, preset: CacheSizePreset) -> Self {
        self.max_size_bytes = preset.bytes();
        self
    }

    /// Set the expiry age.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Set cache directory name.
    pub fn with_cache_directory(mut self, dir: impl Into<String>) -> Self {
        self.cache_directory = dir.into();
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_size_bytes == 0 {
            return Err("max_size_bytes must be greater than 0".to_string());
        }

        if self.max_age.is_zero() {
            return Err("max_age must be greater than 0".to_string());
        }

        if self.cache_directory.is_empty() {
            return Err("cache_directory cannot be empty".to_string());
        }

        Ok(())
    }
}
