//! Audio transport bridge and composition types.
//!
//! The core never renders audio itself. It hands an ordered
//! [`AudioComposition`] to the host's [`AudioTransport`], registers verse
//! boundary times on it, and receives [`TransportEvent`]s back as playback
//! advances.
//!
//! Transports must deliver events asynchronously: an event must never be
//! pushed into the core from inside one of the transport's own trait calls.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::Result;

/// One playable unit of generated audio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioSegment {
    /// Local file holding the encoded audio.
    pub location: PathBuf,
    /// Playback length of the segment.
    pub duration: Duration,
}

impl AudioSegment {
    pub fn new(location: impl Into<PathBuf>, duration: Duration) -> Self {
        Self {
            location: location.into(),
            duration,
        }
    }
}

/// Ordered segments that concatenate into one continuous playback item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioComposition {
    segments: Vec<AudioSegment>,
}

impl AudioComposition {
    pub fn new(segments: Vec<AudioSegment>) -> Self {
        Self { segments }
    }

    /// Composition backed by a single file.
    pub fn single(location: impl Into<PathBuf>, duration: Duration) -> Self {
        Self::new(vec![AudioSegment::new(location, duration)])
    }

    pub fn segments(&self) -> &[AudioSegment] {
        &self.segments
    }

    /// Total playable duration.
    pub fn duration(&self) -> Duration {
        self.segments.iter().map(|s| s.duration).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }
}

/// Signals pushed from the host transport into the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Periodic position report while playing.
    PositionChanged(Duration),
    /// A registered boundary time was crossed during normal playback.
    BoundaryCrossed(Duration),
    /// Playback reached the end of the attached composition.
    ReachedEnd,
    /// A transient interruption (call, alarm, another app) began.
    InterruptionBegan,
    /// The interruption ended; `should_resume` is the system's hint.
    InterruptionEnded { should_resume: bool },
    /// The active output route disappeared (headphones unplugged).
    OutputDeviceLost,
}

/// Platform audio output.
///
/// Every call resolves only once the platform has applied it; in particular
/// `seek` resolves after the new position is confirmed.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::playback::{AudioComposition, AudioTransport};
///
/// async fn start(transport: &dyn AudioTransport, composition: AudioComposition) -> Result<()> {
///     transport.attach(composition).await?;
///     transport.play().await
/// }
/// ```
#[async_trait]
pub trait AudioTransport: Send + Sync {
    /// Replace the current playback item. Playback is paused afterwards.
    async fn attach(&self, composition: AudioComposition) -> Result<()>;

    /// Register boundary times; crossing one emits `BoundaryCrossed`.
    /// Replaces any previously registered set.
    async fn set_boundaries(&self, boundaries: Vec<Duration>) -> Result<()>;

    async fn play(&self) -> Result<()>;

    async fn pause(&self) -> Result<()>;

    /// Move the playhead and wait for the platform to confirm it.
    async fn seek(&self, position: Duration) -> Result<()>;

    /// Current playhead position.
    async fn position(&self) -> Result<Duration>;

    /// Drop the current item and release output resources.
    async fn unload(&self) -> Result<()>;
}
