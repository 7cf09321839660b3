//! # Audio Cache & Playback Module
//!
//! Caches generated chapter audio and drives playback of it.
//!
//! ## Overview
//!
//! This module handles:
//! - On-disk segment cache with LRU and age-based eviction
//! - Speech generation with network-to-device fallback
//! - Progressive loading: play a quick-start prefix while the rest generates
//! - Verse boundary tracking, sleep timer, and audio interruptions
//!
//! Host audio output is reached through
//! [`bridge_traits::playback::AudioTransport`]; speech engines and manifest
//! storage are injected through [`traits`].

pub mod cache;
pub mod config;
pub mod error;
pub mod generation;
pub mod models;
pub mod orchestrator;
pub mod traits;

pub use cache::{CacheConfig, CacheSizePreset, CacheStats, CachedArtifact, SegmentCache};
pub use config::PlaybackConfig;
pub use error::{PlaybackError, Result};
pub use generation::{
    FallbackSpeechGenerator, GenerationHandle, GenerationPriority, GenerationRequest,
    GenerationResult,
};
pub use models::{CacheKey, Chapter, Manifest, Verse, VerseTiming, VoiceFamily};
pub use orchestrator::{OrchestratorDeps, PlaybackOrchestrator, PlaybackSnapshot, SleepTimerMode};
pub use traits::{ManifestStore, SpeechEngine, SpeechGenerator, StoredManifest};
