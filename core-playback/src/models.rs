//! # Domain Models
//!
//! Chapters, verse timings, cache keys and segment manifests.

use crate::error::{PlaybackError, Result};
use bridge_traits::playback::{AudioComposition, AudioSegment};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;

/// Hex characters of the key digest used in on-disk entry names.
const SLUG_DIGEST_LEN: usize = 24;

// ============================================================================
// Cache Keys
// ============================================================================

/// Which speech source produced an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceFamily {
    /// High-quality network synthesis.
    Network,
    /// On-device synthesis.
    Device,
}

impl VoiceFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoiceFamily::Network => "network",
            VoiceFamily::Device => "device",
        }
    }
}

impl fmt::Display for VoiceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one generated artifact.
///
/// The voice family is part of the key, so a chapter generated by both
/// sources produces two distinct cache entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub content_id: String,
    pub translation: String,
    pub family: VoiceFamily,
    /// Speech rate in hundredths (1.0 => 100).
    pub rate_percent: u16,
}

impl CacheKey {
    pub fn new(
        content_id: impl Into<String>,
        translation: impl Into<String>,
        family: VoiceFamily,
        rate: f32,
    ) -> Self {
        Self {
            content_id: content_id.into(),
            translation: translation.into(),
            family,
            rate_percent: rate_to_percent(rate),
        }
    }

    /// Same content and rate, different voice source.
    pub fn with_family(&self, family: VoiceFamily) -> Self {
        Self {
            family,
            ..self.clone()
        }
    }

    pub fn rate(&self) -> f32 {
        self.rate_percent as f32 / 100.0
    }

    /// Filesystem-safe entry name: `<family>-<digest prefix>`.
    pub fn slug(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.content_id.as_bytes());
        hasher.update(b"|");
        hasher.update(self.translation.as_bytes());
        hasher.update(b"|");
        hasher.update(self.rate_percent.to_string().as_bytes());
        let digest = hex::encode(hasher.finalize());
        format!("{}-{}", self.family.as_str(), &digest[..SLUG_DIGEST_LEN])
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}@{}x{:.2}",
            self.content_id,
            self.translation,
            self.family,
            self.rate()
        )
    }
}

fn rate_to_percent(rate: f32) -> u16 {
    if !rate.is_finite() || rate <= 0.0 {
        return 100;
    }
    (rate * 100.0).round().clamp(1.0, u16::MAX as f32) as u16
}

// ============================================================================
// Verse Timings
// ============================================================================

/// Start and end of one verse inside a chapter's audio, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerseTiming {
    pub verse_number: u32,
    pub start_time: f64,
    pub end_time: f64,
}

impl VerseTiming {
    pub fn new(verse_number: u32, start_time: f64, end_time: f64) -> Self {
        Self {
            verse_number,
            start_time,
            end_time,
        }
    }

    pub fn start(&self) -> Duration {
        Duration::from_secs_f64(self.start_time.max(0.0))
    }

    pub fn end(&self) -> Duration {
        Duration::from_secs_f64(self.end_time.max(0.0))
    }
}

/// Checks ordering invariants: non-negative, non-overlapping, ordered by
/// start, verse numbers strictly increasing.
pub fn validate_timings(timings: &[VerseTiming]) -> Result<()> {
    let mut previous: Option<&VerseTiming> = None;

    for timing in timings {
        if !timing.start_time.is_finite() || !timing.end_time.is_finite() {
            return Err(PlaybackError::InvalidTimings(format!(
                "verse {} has a non-finite time",
                timing.verse_number
            )));
        }
        if timing.start_time < 0.0 || timing.end_time < timing.start_time {
            return Err(PlaybackError::InvalidTimings(format!(
                "verse {} spans {}..{}",
                timing.verse_number, timing.start_time, timing.end_time
            )));
        }
        if let Some(prev) = previous {
            if timing.verse_number <= prev.verse_number {
                return Err(PlaybackError::InvalidTimings(format!(
                    "verse {} follows verse {}",
                    timing.verse_number, prev.verse_number
                )));
            }
            if timing.start_time < prev.end_time {
                return Err(PlaybackError::InvalidTimings(format!(
                    "verse {} overlaps verse {}",
                    timing.verse_number, prev.verse_number
                )));
            }
        }
        previous = Some(timing);
    }

    Ok(())
}

// ============================================================================
// Chapters
// ============================================================================

/// One verse of text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verse {
    pub number: u32,
    pub text: String,
}

impl Verse {
    pub fn new(number: u32, text: impl Into<String>) -> Self {
        Self {
            number,
            text: text.into(),
        }
    }

    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

/// A unit of content with ordered verses and (once known) their timings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: String,
    pub translation: String,
    pub verses: Vec<Verse>,
    #[serde(default)]
    pub timings: Vec<VerseTiming>,
}

impl Chapter {
    pub fn new(id: impl Into<String>, translation: impl Into<String>, verses: Vec<Verse>) -> Self {
        Self {
            id: id.into(),
            translation: translation.into(),
            verses,
            timings: Vec::new(),
        }
    }

    pub fn cache_key(&self, family: VoiceFamily, rate: f32) -> CacheKey {
        CacheKey::new(&self.id, &self.translation, family, rate)
    }

    /// Swap the timings wholesale. Rejected timings leave the chapter untouched.
    pub fn replace_timings(&mut self, timings: Vec<VerseTiming>) -> Result<()> {
        validate_timings(&timings)?;
        self.timings = timings;
        Ok(())
    }

    pub fn word_count(&self) -> usize {
        self.verses.iter().map(Verse::word_count).sum()
    }

    /// Fraction of the chapter covered once `words_spoken` words are
    /// synthesized, clamped to `[0, 1]`.
    ///
    /// Device engines report words, not bytes, so this is the progress
    /// estimate for on-device generation.
    pub fn word_progress(&self, words_spoken: usize) -> f32 {
        let total = self.word_count();
        if total == 0 {
            return 1.0;
        }
        (words_spoken as f32 / total as f32).clamp(0.0, 1.0)
    }

    /// Fraction covered once the first `verses_done` verses are synthesized.
    pub fn verse_progress(&self, verses_done: usize) -> f32 {
        let spoken: usize = self
            .verses
            .iter()
            .take(verses_done)
            .map(Verse::word_count)
            .sum();
        self.word_progress(spoken)
    }
}

// ============================================================================
// Manifests
// ============================================================================

/// Ordered audio segments that make up (part of) a chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub key: CacheKey,
    pub segments: Vec<AudioSegment>,
    /// `true` once the segments cover the whole chapter.
    pub complete: bool,
}

impl Manifest {
    pub fn new(key: CacheKey, segments: Vec<AudioSegment>, complete: bool) -> Self {
        Self {
            key,
            segments,
            complete,
        }
    }

    pub fn duration(&self) -> Duration {
        self.segments.iter().map(|s| s.duration).sum()
    }

    /// Rejects manifests that cannot be played.
    pub fn validate(&self) -> Result<()> {
        if self.segments.is_empty() {
            return Err(PlaybackError::ManifestInvalid(format!(
                "{} has no segments",
                self.key
            )));
        }
        if let Some(index) = self.segments.iter().position(|s| s.duration.is_zero()) {
            return Err(PlaybackError::ManifestInvalid(format!(
                "{} segment {} is empty",
                self.key, index
            )));
        }
        Ok(())
    }

    pub fn to_composition(&self) -> AudioComposition {
        AudioComposition::new(self.segments.clone())
    }
}
