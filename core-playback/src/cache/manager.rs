//! # Segment Cache Manager
//!
//! Disk-backed store of generated chapter audio with LRU + TTL eviction.
//!
//! Each entry is one directory named after [`CacheKey::slug`] holding the
//! encoded audio and a JSON sidecar of verse timings:
//!
//! ```text
//! <root>/network-1f3a.../
//!     audio.bin
//!     timings.json
//! ```
//!
//! The audio file's modification time doubles as the entry's last-access
//! time. It is written from the injected [`Clock`] on every store and hit, so
//! eviction order is deterministic under test.
//!
//! Every mutating operation runs behind one async mutex. Reads, deletes and
//! eviction failures are logged and swallowed; only writes propagate errors.

use crate::cache::config::CacheConfig;
use crate::cache::stats::{CacheStats, EvictionReport};
use crate::error::{PlaybackError, Result};
use crate::models::{validate_timings, CacheKey, VerseTiming};
use bridge_traits::playback::AudioComposition;
use bridge_traits::storage::FileSystemAccess;
use bridge_traits::time::Clock;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use core_async::sync::Mutex;
use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
use core_runtime::logging::strip_path;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

const AUDIO_FILE: &str = "audio.bin";
const TIMINGS_FILE: &str = "timings.json";

/// A cached chapter rendition.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedArtifact {
    pub key: CacheKey,
    pub audio_path: PathBuf,
    pub timings: Vec<VerseTiming>,
    /// Audio plus sidecar bytes.
    pub size_bytes: u64,
    pub last_accessed: DateTime<Utc>,
}

impl CachedArtifact {
    /// Playback length, taken from the end of the last verse.
    pub fn duration(&self) -> Duration {
        self.timings
            .last()
            .map(VerseTiming::end)
            .unwrap_or(Duration::ZERO)
    }

    pub fn to_composition(&self) -> AudioComposition {
        AudioComposition::single(self.audio_path.clone(), self.duration())
    }
}

/// One directory found under the cache root.
#[derive(Debug, Clone)]
struct EntryInfo {
    name: String,
    path: PathBuf,
    size: u64,
    last_access: DateTime<Utc>,
}

/// Disk-backed artifact cache.
pub struct SegmentCache {
    config: CacheConfig,
    fs: Arc<dyn FileSystemAccess>,
    clock: Arc<dyn Clock>,
    event_bus: Option<EventBus>,
    root: RwLock<Option<PathBuf>>,
    pinned: parking_lot::Mutex<HashMap<String, usize>>,
    write_lock: Mutex<()>,
}

impl SegmentCache {
    /// Create a new segment cache.
    ///
    /// Call [`initialize`](Self::initialize) before use.
    pub fn new(config: CacheConfig, fs: Arc<dyn FileSystemAccess>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            fs,
            clock,
            event_bus: None,
            root: RwLock::new(None),
            pinned: parking_lot::Mutex::new(HashMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    /// Set event bus for cache events.
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Resolve and create the cache root.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<()> {
        self.config
            .validate()
            .map_err(|e| PlaybackError::Config(format!("Invalid cache configuration: {}", e)))?;

        let base = self.fs.get_cache_directory().await.map_err(|e| {
            PlaybackError::CacheIo(format!("Failed to get cache directory: {}", e))
        })?;
        let root = base.join(&self.config.cache_directory);

        self.fs.create_dir_all(&root).await.map_err(|e| {
            PlaybackError::CacheIo(format!("Failed to create cache directory: {}", e))
        })?;

        info!(
            directory = %self.config.cache_directory,
            max_size_bytes = self.config.max_size_bytes,
            "Segment cache initialized"
        );
        *self.root.write() = Some(root);
        Ok(())
    }

    fn root(&self) -> Result<PathBuf> {
        self.root
            .read()
            .clone()
            .ok_or(PlaybackError::CacheNotInitialized)
    }

    fn emit(&self, event: CacheEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Cache(event)).ok();
        }
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Look up an artifact and record the access.
    ///
    /// A partial or unreadable entry is treated as a miss and removed.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn get(&self, key: &CacheKey) -> Option<CachedArtifact> {
        let root = match self.root() {
            Ok(root) => root,
            Err(e) => {
                warn!(error = %e, "Cache lookup before initialization");
                return None;
            }
        };

        let _guard = self.write_lock.lock().await;
        let dir = root.join(key.slug());
        let audio_path = dir.join(AUDIO_FILE);

        match self.fs.exists(&dir).await {
            Ok(true) => {}
            Ok(false) => return None,
            Err(e) => {
                warn!(error = %e, "Cache lookup failed");
                return None;
            }
        }

        let artifact = match self.read_entry(key, &dir).await {
            Ok(artifact) => artifact,
            Err(e) => {
                debug!(error = %e, "Discarding partial cache entry");
                self.remove_dir(&dir).await;
                return None;
            }
        };

        let now = self.clock.now();
        if let Err(e) = self.fs.set_modified(&audio_path, now).await {
            warn!(error = %e, "Failed to record cache access");
        }

        debug!(size = artifact.size_bytes, "Cache hit");
        Some(CachedArtifact {
            last_accessed: now,
            ..artifact
        })
    }

    async fn read_entry(&self, key: &CacheKey, dir: &Path) -> Result<CachedArtifact> {
        let audio_path = dir.join(AUDIO_FILE);
        let sidecar_path = dir.join(TIMINGS_FILE);

        let audio_meta = self.fs.metadata(&audio_path).await?;
        let sidecar = self.fs.read_file(&sidecar_path).await?;
        let timings: Vec<VerseTiming> = serde_json::from_slice(&sidecar)
            .map_err(|e| PlaybackError::InvalidTimings(format!("Unreadable sidecar: {}", e)))?;
        validate_timings(&timings)?;

        Ok(CachedArtifact {
            key: key.clone(),
            audio_path,
            timings,
            size_bytes: audio_meta.size + sidecar.len() as u64,
            last_accessed: audio_meta.modified_at.unwrap_or_else(|| self.clock.now()),
        })
    }

    /// Whether a complete entry exists, without recording an access.
    pub async fn contains(&self, key: &CacheKey) -> bool {
        let Ok(root) = self.root() else {
            return false;
        };
        let dir = root.join(key.slug());
        let audio = self.fs.exists(&dir.join(AUDIO_FILE)).await.unwrap_or(false);
        let sidecar = self.fs.exists(&dir.join(TIMINGS_FILE)).await.unwrap_or(false);
        audio && sidecar
    }

    // ========================================================================
    // Store
    // ========================================================================

    /// Store an artifact, evicting older entries first if needed.
    ///
    /// # Errors
    ///
    /// - `CacheFull` if the artifact exceeds the whole budget or the budget
    ///   cannot be met without touching pinned entries
    /// - `CacheIo` if writing fails (the partial entry is removed)
    #[instrument(skip(self, audio, timings), fields(key = %key, bytes = audio.len()))]
    pub async fn put(
        &self,
        audio: Bytes,
        timings: &[VerseTiming],
        key: &CacheKey,
    ) -> Result<CachedArtifact> {
        let root = self.root()?;
        validate_timings(timings)?;

        let sidecar = serde_json::to_vec(timings)
            .map_err(|e| PlaybackError::Internal(format!("Failed to encode timings: {}", e)))?;
        let needed = audio.len() as u64 + sidecar.len() as u64;

        if needed > self.config.max_size_bytes {
            return Err(PlaybackError::CacheFull {
                needed,
                budget: self.config.max_size_bytes,
            });
        }

        let _guard = self.write_lock.lock().await;
        let dir = root.join(key.slug());

        // A rewrite replaces the old entry; its bytes must not count against the budget.
        if self.fs.exists(&dir).await.unwrap_or(false) {
            self.remove_dir(&dir).await;
        }

        self.ensure_capacity_locked(&root, needed).await?;

        let audio_path = dir.join(AUDIO_FILE);
        if let Err(e) = self.write_entry(&dir, &audio_path, audio, sidecar).await {
            self.remove_dir(&dir).await;
            return Err(e);
        }

        let now = self.clock.now();
        if let Err(e) = self.fs.set_modified(&audio_path, now).await {
            warn!(error = %e, "Failed to stamp cache entry access time");
        }

        info!(entry = %key.slug(), bytes = needed, "Stored artifact");
        self.emit(CacheEvent::Stored {
            cache_key: key.to_string(),
            bytes: needed,
        });

        Ok(CachedArtifact {
            key: key.clone(),
            audio_path,
            timings: timings.to_vec(),
            size_bytes: needed,
            last_accessed: now,
        })
    }

    async fn write_entry(
        &self,
        dir: &Path,
        audio_path: &Path,
        audio: Bytes,
        sidecar: Vec<u8>,
    ) -> Result<()> {
        let io = |e: bridge_traits::BridgeError| {
            PlaybackError::CacheIo(format!("Failed to write cache entry: {}", e))
        };

        self.fs.create_dir_all(dir).await.map_err(io)?;
        self.fs
            .write_file(&dir.join(TIMINGS_FILE), Bytes::from(sidecar))
            .await
            .map_err(io)?;
        self.fs.write_file(audio_path, audio).await.map_err(io)?;
        Ok(())
    }

    // ========================================================================
    // Removal
    // ========================================================================

    /// Remove one entry. Errors are logged and swallowed.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn invalidate(&self, key: &CacheKey) {
        let Ok(root) = self.root() else {
            return;
        };
        let _guard = self.write_lock.lock().await;
        let dir = root.join(key.slug());

        if self.fs.exists(&dir).await.unwrap_or(false) && self.remove_dir(&dir).await {
            info!("Invalidated cache entry");
            self.emit(CacheEvent::Invalidated {
                cache_key: key.to_string(),
            });
        }
    }

    /// Remove every unpinned entry. Returns the number removed.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> usize {
        let Ok(root) = self.root() else {
            return 0;
        };
        let _guard = self.write_lock.lock().await;

        let mut cleared = 0;
        for entry in self.scan_entries(&root).await {
            if self.is_pinned_name(&entry.name) {
                debug!(entry = %entry.name, "Keeping pinned entry");
                continue;
            }
            if self.remove_dir(&entry.path).await {
                cleared += 1;
            }
        }

        info!(cleared, "Cleared segment cache");
        cleared
    }

    async fn remove_dir(&self, dir: &Path) -> bool {
        match self.fs.delete_dir_all(dir).await {
            Ok(()) => true,
            Err(e) if e.is_not_found() => false,
            Err(e) => {
                warn!(
                    entry = %strip_path(&dir.to_string_lossy()),
                    error = %e,
                    "Failed to delete cache entry"
                );
                false
            }
        }
    }

    // ========================================================================
    // Size Management
    // ========================================================================

    /// Bytes currently stored under the cache root.
    pub async fn total_size_bytes(&self) -> u64 {
        match self.root() {
            Ok(root) => self.measure(&root).await,
            Err(_) => 0,
        }
    }

    async fn measure(&self, root: &Path) -> u64 {
        match self.fs.directory_size(root).await {
            Ok(size) => size,
            Err(e) => {
                warn!(error = %e, "Failed to measure cache size");
                0
            }
        }
    }

    /// Make room for `additional` bytes.
    ///
    /// Expired entries go first, then the least recently accessed unpinned
    /// entries until the new total fits the budget.
    pub async fn ensure_capacity(&self, additional: u64) -> Result<EvictionReport> {
        let root = self.root()?;
        let _guard = self.write_lock.lock().await;
        self.ensure_capacity_locked(&root, additional).await
    }

    /// Expiry purge plus budget check.
    #[instrument(skip(self))]
    pub async fn run_maintenance(&self) -> Result<EvictionReport> {
        let report = self.ensure_capacity(0).await?;
        if !report.is_empty() {
            info!(
                expired = report.expired_entries,
                evicted = report.evicted_entries,
                bytes_freed = report.bytes_freed,
                "Cache maintenance removed entries"
            );
        }
        Ok(report)
    }

    async fn ensure_capacity_locked(&self, root: &Path, additional: u64) -> Result<EvictionReport> {
        let mut report = EvictionReport::default();
        let now = self.clock.now();
        let max_age = chrono::Duration::from_std(self.config.max_age)
            .unwrap_or_else(|_| chrono::Duration::days(30));

        // Phase 1: expiry
        let mut survivors = Vec::new();
        for entry in self.scan_entries(root).await {
            let expired = now.signed_duration_since(entry.last_access) > max_age;
            if expired && !self.is_pinned_name(&entry.name) {
                if self.remove_dir(&entry.path).await {
                    report.expired_entries += 1;
                    report.bytes_freed += entry.size;
                    debug!(entry = %entry.name, "Purged expired entry");
                    self.emit(CacheEvent::Evicted {
                        entry: entry.name.clone(),
                        bytes: entry.size,
                        reason: "expired".to_string(),
                    });
                }
            } else {
                survivors.push(entry);
            }
        }

        // Phase 2: budget
        let current = self.measure(root).await;
        let budget = self.config.max_size_bytes;
        if current + additional <= budget {
            report.bytes_in_use = current;
            return Ok(report);
        }

        let mut to_free = current + additional - budget;
        survivors.retain(|entry| !self.is_pinned_name(&entry.name));
        survivors.sort_by_key(|entry| entry.last_access);

        let mut in_use = current;
        for entry in survivors {
            if to_free == 0 {
                break;
            }
            if self.remove_dir(&entry.path).await {
                report.evicted_entries += 1;
                report.bytes_freed += entry.size;
                in_use = in_use.saturating_sub(entry.size);
                to_free = to_free.saturating_sub(entry.size);
                debug!(entry = %entry.name, bytes = entry.size, "Evicted entry");
                self.emit(CacheEvent::Evicted {
                    entry: entry.name,
                    bytes: entry.size,
                    reason: "capacity".to_string(),
                });
            }
        }

        report.bytes_in_use = in_use;
        if to_free > 0 {
            warn!(
                needed = additional,
                in_use, budget, "Cache budget cannot be met; remaining entries are pinned"
            );
            return Err(PlaybackError::CacheFull {
                needed: additional,
                budget,
            });
        }

        Ok(report)
    }

    async fn scan_entries(&self, root: &Path) -> Vec<EntryInfo> {
        let paths = match self.fs.list_directory(root).await {
            Ok(paths) => paths,
            Err(e) => {
                if !e.is_not_found() {
                    warn!(error = %e, "Failed to list cache root");
                }
                return Vec::new();
            }
        };

        let mut entries = Vec::with_capacity(paths.len());
        for path in paths {
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            let dir_meta = match self.fs.metadata(&path).await {
                Ok(meta) if meta.is_directory => meta,
                Ok(_) => continue,
                Err(e) => {
                    debug!(entry = %name, error = %e, "Skipping unreadable entry");
                    continue;
                }
            };

            let size = match self.fs.directory_size(&path).await {
                Ok(size) => size,
                Err(e) => {
                    debug!(entry = %name, error = %e, "Skipping unmeasurable entry");
                    continue;
                }
            };

            // Missing audio falls back to the directory's own mtime; with no
            // timestamp at all the entry sorts first.
            let last_access = match self.fs.metadata(&path.join(AUDIO_FILE)).await {
                Ok(meta) => meta.modified_at,
                Err(_) => dir_meta.modified_at,
            }
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

            entries.push(EntryInfo {
                name,
                path,
                size,
                last_access,
            });
        }
        entries
    }

    // ========================================================================
    // Pinning
    // ========================================================================

    /// Protect an entry from eviction. Pins are reference counted.
    pub fn pin(&self, key: &CacheKey) {
        let mut pinned = self.pinned.lock();
        *pinned.entry(key.slug()).or_insert(0) += 1;
    }

    /// Release one pin.
    pub fn unpin(&self, key: &CacheKey) {
        let mut pinned = self.pinned.lock();
        let slug = key.slug();
        if let Some(count) = pinned.get_mut(&slug) {
            *count -= 1;
            if *count == 0 {
                pinned.remove(&slug);
            }
        }
    }

    pub fn is_pinned(&self, key: &CacheKey) -> bool {
        self.is_pinned_name(&key.slug())
    }

    fn is_pinned_name(&self, name: &str) -> bool {
        self.pinned.lock().contains_key(name)
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    /// Get cache statistics.
    pub async fn stats(&self) -> CacheStats {
        let Ok(root) = self.root() else {
            return CacheStats::default();
        };

        let entries = self.scan_entries(&root).await;
        let pinned = self.pinned.lock().len();

        CacheStats {
            entry_count: entries.len(),
            total_bytes: self.measure(&root).await,
            pinned_entries: pinned,
            oldest_access: entries.iter().map(|e| e.last_access).min(),
            newest_access: entries.iter().map(|e| e.last_access).max(),
            calculated_at: self.clock.unix_timestamp(),
        }
    }
}
