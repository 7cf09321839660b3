//! Reload-versus-defer policy for compositions that grow during playback.

use crate::config::PlaybackConfig;
use crate::models::{CacheKey, VerseTiming};
use bridge_traits::playback::AudioComposition;
use core_runtime::events::PlaybackPhase;
use std::fmt;
use std::time::Duration;

/// Which milestone produced the new composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadKind {
    Progressive,
    Final,
}

/// Outcome of [`decide_reload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadDecision {
    /// Keep playing the attached audio; swap later.
    Defer { remaining: Duration },
    /// Swap now.
    Rebuild,
}

/// Why a composition swap happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadTrigger {
    /// Applied as soon as the new audio arrived.
    Generation,
    UserPause,
    /// The playhead came within the lead of the attached end.
    NearEnd,
    ReachedEnd,
}

impl ReloadTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReloadTrigger::Generation => "generation",
            ReloadTrigger::UserPause => "pause",
            ReloadTrigger::NearEnd => "near_end",
            ReloadTrigger::ReachedEnd => "reached_end",
        }
    }
}

impl fmt::Display for ReloadTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fuller composition waiting for a safe moment.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingReload {
    pub key: CacheKey,
    pub composition: AudioComposition,
    pub timings: Vec<VerseTiming>,
    /// Whether the composition covers the whole chapter.
    pub complete: bool,
}

/// Swapping the composition interrupts audio for a moment, so while playing
/// with plenty of buffer left the swap is deferred.
pub fn decide_reload(
    state: PlaybackPhase,
    attached: Duration,
    position: Duration,
    kind: ReloadKind,
    config: &PlaybackConfig,
) -> ReloadDecision {
    let remaining = attached.saturating_sub(position);
    let threshold = match kind {
        ReloadKind::Final => config.final_reload_threshold,
        ReloadKind::Progressive => config.progressive_reload_threshold,
    };

    if state == PlaybackPhase::Playing && remaining > threshold {
        ReloadDecision::Defer { remaining }
    } else {
        ReloadDecision::Rebuild
    }
}

/// Whether a pending reload should be applied at `position`.
pub fn near_end(attached: Duration, position: Duration, lead: Duration) -> bool {
    attached.saturating_sub(position) <= lead
}
