//! # Core Configuration Module
//!
//! Provides configuration management for the verse audio core.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! instance that holds the bridges and settings the core needs. It enforces
//! fail-fast validation so a missing capability is reported at startup instead
//! of on the first cache write.
//!
//! ## Dependencies
//!
//! - `FileSystemAccess` - Cache storage (desktop default: tokio fs)
//! - `Clock` - Access-time source (default: system clock)
//!
//! When the `desktop-shims` feature is enabled, a `TokioFileSystem` rooted at
//! `cache_dir` is injected automatically if no filesystem is provided.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//!
//! let config = CoreConfig::builder()
//!     .cache_dir("/path/to/cache")
//!     .cache_size_mb(500)
//!     .build()?;
//! ```
//!
//! ## Error Handling
//!
//! ```should_panic
//! use core_runtime::config::CoreConfig;
//!
//! // Missing cache directory
//! let config = CoreConfig::builder()
//!     .cache_size_mb(250)
//!     .build()
//!     .expect("Should fail - cache directory is required");
//! ```

use crate::error::{Error, Result};
use bridge_traits::{Clock, FileSystemAccess, SystemClock};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

const MEGABYTE: u64 = 1024 * 1024;

/// Default cache budget: the "medium" preset.
pub const DEFAULT_CACHE_SIZE_MB: usize = 500;

/// Largest cache budget accepted by validation (100 GB).
pub const MAX_CACHE_SIZE_MB: usize = 100_000;

/// User-selectable cache budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheSizePreset {
    /// 250 MB
    Small,
    /// 500 MB
    #[default]
    Medium,
    /// 1 GB
    Large,
    /// 2 GB
    ExtraLarge,
}

impl CacheSizePreset {
    pub const ALL: [CacheSizePreset; 4] = [
        CacheSizePreset::Small,
        CacheSizePreset::Medium,
        CacheSizePreset::Large,
        CacheSizePreset::ExtraLarge,
    ];

    pub fn megabytes(&self) -> u64 {
        match self {
            CacheSizePreset::Small => 250,
            CacheSizePreset::Medium => 500,
            CacheSizePreset::Large => 1024,
            CacheSizePreset::ExtraLarge => 2048,
        }
    }

    pub fn bytes(&self) -> u64 {
        self.megabytes() * MEGABYTE
    }

    /// Exact preset for a megabyte budget, if there is one.
    pub fn from_megabytes(mb: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|preset| preset.megabytes() == mb)
    }

    /// Returns a human-readable label of the preset.
    pub fn label(&self) -> &'static str {
        match self {
            CacheSizePreset::Small => "250 MB",
            CacheSizePreset::Medium => "500 MB",
            CacheSizePreset::Large => "1 GB",
            CacheSizePreset::ExtraLarge => "2 GB",
        }
    }
}

/// Core configuration for the verse audio core.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Directory for generated audio artifacts
    pub cache_dir: PathBuf,

    /// Maximum cache size in megabytes
    pub cache_size_mb: usize,

    /// File system access abstraction
    pub file_system: Arc<dyn FileSystemAccess>,

    /// Time source for cache access times and expiry
    pub clock: Arc<dyn Clock>,

    /// Features flags
    pub features: FeatureFlags,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("cache_dir", &self.cache_dir)
            .field("cache_size_mb", &self.cache_size_mb)
            .field("file_system", &"FileSystemAccess { ... }")
            .field("clock", &"Clock { ... }")
            .field("features", &self.features)
            .finish()
    }
}

/// Feature flags control optional functionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFlags {
    /// Allow background generation of the next chapter
    pub enable_prefetch: bool,

    /// Write completed generations into the segment cache
    pub enable_cache_write_back: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_prefetch: true,
            enable_cache_write_back: true,
        }
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Cache budget in bytes.
    pub fn cache_size_bytes(&self) -> u64 {
        self.cache_size_mb as u64 * 1024 * 1024
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Cache directory is not empty
    /// - Cache size is reasonable (> 0 and <= 100GB)
    pub fn validate(&self) -> Result<()> {
        if self.cache_dir.as_os_str().is_empty() {
            return Err(Error::Config("Cache directory cannot be empty".to_string()));
        }

        if self.cache_size_mb == 0 {
            return Err(Error::Config(
                "Cache size must be greater than 0 MB".to_string(),
            ));
        }

        if self.cache_size_mb > MAX_CACHE_SIZE_MB {
            return Err(Error::Config(
                "Cache size exceeds maximum of 100GB (100,000 MB)".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn file_system_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "FileSystemAccess".to_string(),
        message: "FileSystemAccess implementation is required for the segment cache. \
                 Desktop: ensure the 'desktop-shims' feature is enabled to use the default TokioFileSystem. \
                 Mobile: inject a filesystem rooted in the app's sandboxed cache directory."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_file_system(cache_dir: &std::path::Path) -> Result<Arc<dyn FileSystemAccess>> {
    use bridge_desktop::TokioFileSystem;

    let fs: Arc<dyn FileSystemAccess> = Arc::new(TokioFileSystem::with_cache_directory(cache_dir));
    Ok(fs)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_file_system(_cache_dir: &std::path::Path) -> Result<Arc<dyn FileSystemAccess>> {
    Err(file_system_missing_error())
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    cache_dir: Option<PathBuf>,
    cache_size_mb: Option<usize>,
    file_system: Option<Arc<dyn FileSystemAccess>>,
    clock: Option<Arc<dyn Clock>>,
    features: FeatureFlags,
}

impl CoreConfigBuilder {
    /// Sets the cache directory.
    ///
    /// # Examples
    ///
    /// ```
    /// use core_runtime::config::CoreConfig;
    ///
    /// let builder = CoreConfig::builder()
    ///     .cache_dir("/path/to/cache");
    /// ```
    pub fn cache_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.cache_dir = Some(path.into());
        self
    }

    /// Sets the maximum cache size in megabytes.
    ///
    /// Default: 500 MB
    pub fn cache_size_mb(mut self, size_mb: usize) -> Self {
        self.cache_size_mb = Some(size_mb);
        self
    }

    /// Sets the maximum cache size from a user-facing preset.
    pub fn cache_size_preset(mut self, preset: CacheSizePreset) -> Self {
        self.cache_size_mb = Some(preset.megabytes() as usize);
        self
    }

    /// Sets the file system access implementation.
    ///
    /// If not provided, the desktop default (tokio fs-based) will be used when
    /// the `desktop-shims` feature is enabled.
    pub fn file_system(mut self, fs: Arc<dyn FileSystemAccess>) -> Self {
        self.file_system = Some(fs);
        self
    }

    /// Sets the time source. Defaults to [`SystemClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Enables or disables background prefetch.
    ///
    /// Default: true
    pub fn enable_prefetch(mut self, enabled: bool) -> Self {
        self.features.enable_prefetch = enabled;
        self
    }

    /// Enables or disables writing finished generations into the cache.
    ///
    /// Default: true
    pub fn enable_cache_write_back(mut self, enabled: bool) -> Self {
        self.features.enable_cache_write_back = enabled;
        self
    }

    /// Sets all feature flags at once.
    pub fn features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// # Returns
    ///
    /// Returns `Ok(CoreConfig)` on success, or an error if:
    /// - The cache directory is missing
    /// - No filesystem is available (see `desktop-shims`)
    /// - Configuration values are invalid
    pub fn build(self) -> Result<CoreConfig> {
        let cache_dir = self.cache_dir.ok_or_else(|| {
            Error::Config("Cache directory is required. Use .cache_dir() to set it.".to_string())
        })?;

        let file_system = match self.file_system {
            Some(fs) => fs,
            None => provide_default_file_system(&cache_dir)?,
        };

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);

        let config = CoreConfig {
            cache_dir,
            cache_size_mb: self.cache_size_mb.unwrap_or(DEFAULT_CACHE_SIZE_MB),
            file_system,
            clock,
            features: self.features,
        };

        config.validate()?;

        Ok(config)
    }
}
