//! # Core Playback Traits
//!
//! Collaborators the playback core drives but does not implement: speech
//! synthesis engines and the segment-manifest store.
//!
//! These differ from the bridge-traits definitions: bridge traits expose
//! platform capabilities (filesystem, transport, clock), while the traits here
//! are domain services a host wires in, usually backed by a TTS vendor SDK or
//! the on-device speech API.
//!
//! ## Generation Model
//!
//! A [`SpeechEngine`] produces one chapter rendition and reports progress as a
//! typed event sequence on a [`GenerationSink`]:
//!
//! ```text
//! Progress* -> QuickStart -> (Progress | ProgressiveUpdate)* -> return GenerationResult
//! ```
//!
//! A [`SpeechGenerator`] composes engines (see
//! [`FallbackSpeechGenerator`](crate::generation::FallbackSpeechGenerator)) and
//! keeps that ordering across a source switch.
//!
//! ## Cancellation
//!
//! Engines receive a [`CancellationToken`] and are expected to check it between
//! synthesis steps, returning [`PlaybackError::Cancelled`](crate::PlaybackError)
//! once it fires.

use crate::error::Result;
use crate::generation::{GenerationRequest, GenerationResult, GenerationSink};
use crate::models::{CacheKey, Manifest, VerseTiming, VoiceFamily};
use async_trait::async_trait;
use core_async::sync::CancellationToken;

// ============================================================================
// Speech Synthesis
// ============================================================================

/// One speech source.
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    /// Family written into the cache keys of this engine's output.
    fn family(&self) -> VoiceFamily;

    /// Synthesize `request.chapter` under `key`.
    ///
    /// Quick-start and progressive results go to `events` as they become
    /// available; the returned result is the complete rendition.
    async fn synthesize(
        &self,
        request: &GenerationRequest,
        key: &CacheKey,
        events: &GenerationSink,
        cancel: &CancellationToken,
    ) -> Result<GenerationResult>;
}

/// Produces chapter audio incrementally.
#[async_trait]
pub trait SpeechGenerator: Send + Sync {
    /// Generate `request.chapter`, reporting milestones on `events`.
    ///
    /// For one call, a quick-start is sent at most once and always precedes
    /// any progressive update. The returned result carries the cache key of
    /// the source that produced it.
    async fn generate_progressive(
        &self,
        request: GenerationRequest,
        events: GenerationSink,
        cancel: CancellationToken,
    ) -> Result<GenerationResult>;
}

// ============================================================================
// Manifest Store
// ============================================================================

/// A manifest together with the timings it was generated with.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredManifest {
    pub manifest: Manifest,
    pub timings: Vec<VerseTiming>,
}

/// Tracks segment manifests that back generated audio.
///
/// The core only reads manifests and asks for stale ones to be deleted.
#[async_trait]
pub trait ManifestStore: Send + Sync {
    async fn load(&self, key: &CacheKey) -> Result<Option<StoredManifest>>;

    async fn delete(&self, key: &CacheKey) -> Result<()>;
}
