//! # Segment Cache Module
//!
//! Persists generated chapter audio together with its verse timings so a
//! chapter that was generated once can start instantly the next time.
//!
//! ## Overview
//!
//! - Persistent storage through the `FileSystemAccess` bridge
//! - Last-access times taken from the injected `Clock`
//! - Time-to-live purge followed by least-recently-used eviction
//! - Pinning, so the artifact that is currently playing is never evicted
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────┐
//! │     SegmentCache                       │
//! │  - get() / put() / contains()          │
//! │  - ensure_capacity()                   │
//! │  - invalidate() / clear()              │
//! └────────┬───────────────────────────────┘
//!          │
//!          ├──> FileSystemAccess (Storage)
//!          ├──> Clock (Access times, TTL)
//!          └──> EventBus (Optional CacheEvents)
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_playback::cache::{CacheConfig, SegmentCache};
//!
//! # async fn example(cache: &SegmentCache, key: CacheKey, audio: Bytes, timings: Vec<VerseTiming>)
//! #     -> core_playback::Result<()> {
//! cache.initialize().await?;
//!
//! cache.put(audio, &timings, &key).await?;
//! if let Some(artifact) = cache.get(&key).await {
//!     println!("Cached {} ({} bytes)", artifact.key, artifact.size_bytes);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod manager;
pub mod stats;

// Re-export commonly used types
pub use config::{CacheConfig, CacheSizePreset, DEFAULT_MAX_AGE};
pub use manager::{CachedArtifact, SegmentCache};
pub use stats::{CacheStats, EvictionReport};
