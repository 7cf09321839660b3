//! # Speech Generation
//!
//! Typed generation events, the network-to-device fallback generator, and the
//! background task that runs a generation and writes its result to the cache.
//!
//! ## Event Ordering
//!
//! For one request, observers see:
//!
//! ```text
//! QuickStart (at most once) -> ProgressiveUpdate* -> Completed | Failed | Cancelled
//! ```
//!
//! with `Progress` interleaved anywhere before the outcome.

pub mod fallback;
pub mod task;

pub use fallback::FallbackSpeechGenerator;
pub use task::{spawn_generation, GenerationHandle, GenerationObserver, GenerationOutcome, ObservedEvent};

use crate::models::{CacheKey, Chapter, Manifest, VerseTiming, VoiceFamily};
use bytes::Bytes;
use core_async::sync::mpsc;
use std::fmt;
use std::time::Duration;

/// Channel engines report milestones on.
pub type GenerationSink = mpsc::UnboundedSender<GenerationEvent>;

/// Receiving end of a [`GenerationSink`].
pub type GenerationEvents = mpsc::UnboundedReceiver<GenerationEvent>;

/// Create a connected sink/receiver pair.
pub fn generation_channel() -> (GenerationSink, GenerationEvents) {
    mpsc::unbounded_channel()
}

/// How urgently a chapter is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenerationPriority {
    /// The listener is waiting on it.
    Interactive,
    /// Prefetch of upcoming content.
    Background,
}

impl GenerationPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationPriority::Interactive => "interactive",
            GenerationPriority::Background => "background",
        }
    }
}

impl fmt::Display for GenerationPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to generate.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub chapter: Chapter,
    pub rate: f32,
    pub priority: GenerationPriority,
}

impl GenerationRequest {
    pub fn new(chapter: Chapter, rate: f32, priority: GenerationPriority) -> Self {
        Self {
            chapter,
            rate,
            priority,
        }
    }

    /// Key under which the preferred (network) rendition is cached.
    pub fn preferred_key(&self) -> CacheKey {
        self.chapter.cache_key(VoiceFamily::Network, self.rate)
    }
}

/// A playable rendition, partial (quick-start) or complete.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResult {
    pub key: CacheKey,
    pub manifest: Manifest,
    pub timings: Vec<VerseTiming>,
    /// Encoded audio for the cache. Only complete results carry it.
    pub audio: Option<Bytes>,
}

impl GenerationResult {
    pub fn duration(&self) -> Duration {
        self.manifest.duration()
    }
}

/// Better timings (and possibly more audio) arrived before completion.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressiveUpdate {
    pub key: CacheKey,
    pub timings: Vec<VerseTiming>,
    /// Present when the update also extends the playable audio.
    pub manifest: Option<Manifest>,
}

impl From<GenerationResult> for ProgressiveUpdate {
    fn from(result: GenerationResult) -> Self {
        Self {
            key: result.key,
            timings: result.timings,
            manifest: Some(result.manifest),
        }
    }
}

/// Milestones reported while a generation runs.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationEvent {
    /// Estimated completion in `[0, 1]`.
    Progress(f32),
    /// Minimal playable prefix.
    QuickStart(GenerationResult),
    ProgressiveUpdate(ProgressiveUpdate),
    /// The generator switched voice sources.
    SourceChanged {
        from: VoiceFamily,
        to: VoiceFamily,
        reason: String,
    },
}
