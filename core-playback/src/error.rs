//! # Playback Error Types
//!
//! Error types for the segment cache, speech generation and the playback
//! orchestrator.

use bridge_traits::BridgeError;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during cache, generation and playback operations.
#[derive(Error, Debug)]
pub enum PlaybackError {
    // ========================================================================
    // Cache Errors
    // ========================================================================
    /// Reading or writing a cached artifact failed.
    #[error("Cache I/O error: {0}")]
    CacheIo(String),

    /// The artifact cannot fit in the cache budget.
    #[error("Cache storage full: need {needed} bytes, budget {budget} bytes")]
    CacheFull { needed: u64, budget: u64 },

    /// `SegmentCache::initialize` has not been called yet.
    #[error("Segment cache not initialized")]
    CacheNotInitialized,

    // ========================================================================
    // Generation Errors
    // ========================================================================
    /// A speech engine did not produce a result in time.
    #[error("Speech generation timed out after {0:?}")]
    GenerationTimeout(Duration),

    /// A speech engine reported a synthesis failure.
    #[error("Speech synthesis failed: {0}")]
    SynthesisFailed(String),

    /// Every voice source failed; nothing can be played.
    #[error("Audio generation failed: {0}")]
    GenerationFailed(String),

    // ========================================================================
    // Load Errors
    // ========================================================================
    /// A stored manifest is empty, incomplete or points at missing audio.
    #[error("Invalid manifest: {0}")]
    ManifestInvalid(String),

    /// Verse timings are out of order, overlapping or negative.
    #[error("Invalid verse timings: {0}")]
    InvalidTimings(String),

    /// The transport rejected a composition.
    #[error("Failed to attach audio: {0}")]
    AttachFailed(String),

    // ========================================================================
    // Cancellation
    // ========================================================================
    /// The operation was superseded or stopped.
    #[error("Operation cancelled")]
    Cancelled,

    // ========================================================================
    // Control Errors
    // ========================================================================
    /// A control was invoked without a loaded chapter.
    #[error("No chapter loaded")]
    NoChapterLoaded,

    /// The audio transport failed.
    #[error("Audio transport error: {0}")]
    Transport(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Internal error (should not occur in normal operation).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PlaybackError {
    /// Returns `true` for cancellation, which callers treat as silent.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PlaybackError::Cancelled)
    }

    /// Returns `true` if this error is transient and the operation can be retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PlaybackError::GenerationTimeout(_)
                | PlaybackError::SynthesisFailed(_)
                | PlaybackError::CacheIo(_)
                | PlaybackError::Transport(_)
        )
    }

    /// Returns `true` if this error should be shown to the listener.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            PlaybackError::GenerationFailed(_)
                | PlaybackError::AttachFailed(_)
                | PlaybackError::NoChapterLoaded
        )
    }
}

impl From<BridgeError> for PlaybackError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Transport(msg) => PlaybackError::Transport(msg),
            other => PlaybackError::CacheIo(other.to_string()),
        }
    }
}

/// Result type for playback operations.
pub type Result<T> = std::result::Result<T, PlaybackError>;
