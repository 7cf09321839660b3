//! # Playback Configuration
//!
//! Thresholds and timeouts used by the playback orchestrator and the fallback
//! speech generator.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Orchestrator and generation configuration.
///
/// Controls when a fuller composition may replace the attached one, how long
/// the network voice gets before falling back, and sleep-timer granularity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Buffered audio ahead of the playhead above which a *final* reload is
    /// deferred while playing.
    ///
    /// Default: 10 seconds.
    #[serde(default = "default_final_reload_threshold")]
    pub final_reload_threshold: Duration,

    /// Same as `final_reload_threshold`, for progressive updates.
    ///
    /// Default: 8 seconds.
    #[serde(default = "default_progressive_reload_threshold")]
    pub progressive_reload_threshold: Duration,

    /// A deferred reload is applied once the playhead is this close to the end
    /// of the attached audio.
    ///
    /// Default: 5 seconds.
    #[serde(default = "default_pending_reload_lead")]
    pub pending_reload_lead: Duration,

    /// Countdown sleep timer tick interval.
    ///
    /// Default: 1 second.
    #[serde(default = "default_sleep_timer_tick")]
    pub sleep_timer_tick: Duration,

    /// Time the network voice gets before the device voice takes over.
    ///
    /// Default: 30 seconds.
    #[serde(default = "default_network_timeout")]
    pub network_timeout: Duration,

    /// Speech rate multiplier passed to the engines (1.0 = normal).
    #[serde(default = "default_speech_rate")]
    pub speech_rate: f32,

    /// Capacity of the orchestrator-owned event bus.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            final_reload_threshold: default_final_reload_threshold(),
            progressive_reload_threshold: default_progressive_reload_threshold(),
            pending_reload_lead: default_pending_reload_lead(),
            sleep_timer_tick: default_sleep_timer_tick(),
            network_timeout: default_network_timeout(),
            speech_rate: default_speech_rate(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl PlaybackConfig {
    /// Defers reloads more readily and gives the network voice longer.
    ///
    /// Suited to slow devices where an audible swap is the bigger annoyance.
    pub fn conservative() -> Self {
        Self {
            final_reload_threshold: Duration::from_secs(5),
            progressive_reload_threshold: Duration::from_secs(4),
            pending_reload_lead: Duration::from_secs(3),
            network_timeout: Duration::from_secs(45),
            ..Default::default()
        }
    }

    /// Swaps in fuller audio sooner and falls back to the device voice quickly.
    pub fn eager() -> Self {
        Self {
            final_reload_threshold: Duration::from_secs(20),
            progressive_reload_threshold: Duration::from_secs(15),
            pending_reload_lead: Duration::from_secs(8),
            network_timeout: Duration::from_secs(10),
            ..Default::default()
        }
    }

    pub fn with_speech_rate(mut self, rate: f32) -> Self {
        self.speech_rate = rate;
        self
    }

    pub fn with_network_timeout(mut self, timeout: Duration) -> Self {
        self.network_timeout = timeout;
        self
    }

    pub fn with_sleep_timer_tick(mut self, tick: Duration) -> Self {
        self.sleep_timer_tick = tick;
        self
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.final_reload_threshold.is_zero() || self.progressive_reload_threshold.is_zero() {
            return Err("reload thresholds must be > 0".to_string());
        }

        if self.pending_reload_lead > self.final_reload_threshold
            || self.pending_reload_lead > self.progressive_reload_threshold
        {
            return Err("pending_reload_lead cannot exceed the reload thresholds".to_string());
        }

        if self.sleep_timer_tick.is_zero() {
            return Err("sleep_timer_tick must be > 0".to_string());
        }

        if self.network_timeout.is_zero() {
            return Err("network_timeout must be > 0".to_string());
        }

        if !(0.25..=4.0).contains(&self.speech_rate) {
            return Err("speech_rate must be between 0.25 and 4.0".to_string());
        }

        if self.event_buffer == 0 {
            return Err("event_buffer must be > 0".to_string());
        }

        Ok(())
    }
}

// ============================================================================
// Default Functions (for serde)
// ============================================================================

fn default_final_reload_threshold() -> Duration {
    Duration::from_secs(10)
}

fn default_progressive_reload_threshold() -> Duration {
    Duration::from_secs(8)
}

fn default_pending_reload_lead() -> Duration {
    Duration::from_secs(5)
}

fn default_sleep_timer_tick() -> Duration {
    Duration::from_secs(1)
}

fn default_network_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_speech_rate() -> f32 {
    1.0
}

fn default_event_buffer() -> usize {
    256
}
