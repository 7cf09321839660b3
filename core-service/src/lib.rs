//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (audio transport,
//! speech engines, manifest storage) into the segment cache and playback
//! orchestrator. Desktop apps typically enable the `desktop-shims` feature so
//! the cache runs on the tokio filesystem from `bridge-desktop` without
//! injecting one.
//!
//! ```ignore
//! let config = CoreConfig::builder().cache_dir(dir).cache_size_mb(250).build()?;
//! let core = CoreService::bootstrap(config, deps).await?;
//! core.orchestrator().load(chapter, true).await?;
//! ```

pub mod error;

pub use error::{CoreError, Result};

use std::sync::Arc;

use bridge_traits::playback::AudioTransport;
use core_playback::cache::{CacheConfig, SegmentCache};
use core_playback::orchestrator::{OrchestratorDeps, PlaybackOrchestrator};
use core_playback::traits::{ManifestStore, SpeechEngine};
use core_playback::{FallbackSpeechGenerator, PlaybackConfig};
use core_runtime::config::{CoreConfig, FeatureFlags};
use core_runtime::events::{EventBus, EventStream};
use tracing::{info, instrument, warn};

/// Aggregated handle to the host bridges the core requires.
#[derive(Clone)]
pub struct CoreDependencies {
    pub transport: Arc<dyn AudioTransport>,
    pub manifests: Arc<dyn ManifestStore>,
    /// Preferred, higher quality voice.
    pub network_voice: Arc<dyn SpeechEngine>,
    /// On-device voice used when the network voice fails.
    pub device_voice: Arc<dyn SpeechEngine>,
}

impl CoreDependencies {
    /// Construct a dependency bundle from explicit bridge handles.
    pub fn new(
        transport: Arc<dyn AudioTransport>,
        manifests: Arc<dyn ManifestStore>,
        network_voice: Arc<dyn SpeechEngine>,
        device_voice: Arc<dyn SpeechEngine>,
    ) -> Self {
        Self {
            transport,
            manifests,
            network_voice,
            device_voice,
        }
    }
}

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct CoreService {
    cache: Arc<SegmentCache>,
    orchestrator: PlaybackOrchestrator,
    events: EventBus,
    features: FeatureFlags,
}

impl CoreService {
    /// Build the core with default playback tuning.
    pub async fn bootstrap(config: CoreConfig, deps: CoreDependencies) -> Result<Self> {
        Self::bootstrap_with(config, PlaybackConfig::default(), deps).await
    }

    /// Build the core.
    ///
    /// Initializes the segment cache and purges expired entries before the
    /// orchestrator is created. A failed purge is logged, not fatal.
    #[instrument(skip_all, fields(cache_size_mb = config.cache_size_mb))]
    pub async fn bootstrap_with(
        config: CoreConfig,
        playback: PlaybackConfig,
        deps: CoreDependencies,
    ) -> Result<Self> {
        config.validate()?;
        playback
            .validate()
            .map_err(|e| CoreError::InitializationFailed(format!("Invalid playback config: {}", e)))?;

        let events = EventBus::new(playback.event_buffer);

        let cache_config = CacheConfig::new().with_max_size(config.cache_size_bytes());
        let cache = Arc::new(
            SegmentCache::new(
                cache_config,
                Arc::clone(&config.file_system),
                Arc::clone(&config.clock),
            )
            .with_event_bus(events.clone()),
        );
        cache.initialize().await?;

        match cache.run_maintenance().await {
            Ok(report) => info!(
                expired = report.expired_entries,
                evicted = report.evicted_entries,
                bytes_in_use = report.bytes_in_use,
                "Startup cache maintenance finished"
            ),
            Err(e) => warn!(error = %e, "Startup cache maintenance failed"),
        }

        let generator = Arc::new(FallbackSpeechGenerator::new(
            deps.network_voice,
            deps.device_voice,
            playback.network_timeout,
        ));

        let orchestrator = PlaybackOrchestrator::with_options(
            playback,
            OrchestratorDeps {
                cache: Arc::clone(&cache),
                manifests: deps.manifests,
                generator,
                transport: deps.transport,
            },
            config.features,
            events.clone(),
        )?;

        info!(
            prefetch = config.features.enable_prefetch,
            write_back = config.features.enable_cache_write_back,
            "Core service ready"
        );

        Ok(Self {
            cache,
            orchestrator,
            events,
            features: config.features,
        })
    }

    pub fn orchestrator(&self) -> &PlaybackOrchestrator {
        &self.orchestrator
    }

    pub fn cache(&self) -> Arc<SegmentCache> {
        Arc::clone(&self.cache)
    }

    pub fn features(&self) -> FeatureFlags {
        self.features
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.events
    }

    /// Subscribe to every core event.
    pub fn events(&self) -> EventStream {
        EventStream::new(self.events.subscribe())
    }

    /// Stop playback and background work.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        self.orchestrator.stop().await;
        info!("Core service shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::playback::AudioComposition;
    use bridge_traits::time::ManualClock;
    use bytes::Bytes;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use core_async::sync::CancellationToken;
    use core_playback::generation::{GenerationRequest, GenerationResult, GenerationSink};
    use core_playback::models::{CacheKey, VerseTiming, VoiceFamily};
    use core_playback::traits::StoredManifest;
    use core_playback::{CacheSizePreset, PlaybackError};
    use core_runtime::events::{CacheEvent, CoreEvent, PlaybackPhase};
    use std::time::Duration;
    use tempfile::TempDir;

    struct SilentTransport;

    #[async_trait]
    impl AudioTransport for SilentTransport {
        async fn attach(&self, _composition: AudioComposition) -> BridgeResult<()> {
            Ok(())
        }
        async fn set_boundaries(&self, _boundaries: Vec<Duration>) -> BridgeResult<()> {
            Ok(())
        }
        async fn play(&self) -> BridgeResult<()> {
            Ok(())
        }
        async fn pause(&self) -> BridgeResult<()> {
            Ok(())
        }
        async fn seek(&self, _position: Duration) -> BridgeResult<()> {
            Ok(())
        }
        async fn position(&self) -> BridgeResult<Duration> {
            Ok(Duration::ZERO)
        }
        async fn unload(&self) -> BridgeResult<()> {
            Ok(())
        }
    }

    struct NoManifests;

    #[async_trait]
    impl ManifestStore for NoManifests {
        async fn load(&self, _key: &CacheKey) -> core_playback::Result<Option<StoredManifest>> {
            Ok(None)
        }
        async fn delete(&self, _key: &CacheKey) -> core_playback::Result<()> {
            Ok(())
        }
    }

    struct UnavailableVoice(VoiceFamily);

    #[async_trait]
    impl SpeechEngine for UnavailableVoice {
        fn family(&self) -> VoiceFamily {
            self.0
        }

        async fn synthesize(
            &self,
            _request: &GenerationRequest,
            _key: &CacheKey,
            _events: &GenerationSink,
            _cancel: &CancellationToken,
        ) -> core_playback::Result<GenerationResult> {
            Err(PlaybackError::SynthesisFailed("voice unavailable".to_string()))
        }
    }

    fn deps() -> CoreDependencies {
        CoreDependencies::new(
            Arc::new(SilentTransport),
            Arc::new(NoManifests),
            Arc::new(UnavailableVoice(VoiceFamily::Network)),
            Arc::new(UnavailableVoice(VoiceFamily::Device)),
        )
    }

    fn config(dir: &TempDir, clock: Arc<ManualClock>) -> CoreConfig {
        CoreConfig::builder()
            .cache_dir(dir.path())
            .cache_size_mb(10)
            .clock(clock)
            .enable_cache_write_back(false)
            .build()
            .unwrap()
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        ))
    }

    #[tokio::test]
    async fn test_bootstrap_initializes_cache() {
        let dir = TempDir::new().unwrap();
        let core = CoreService::bootstrap(config(&dir, clock()), deps())
            .await
            .unwrap();

        assert_eq!(core.cache().config().max_size_bytes, 10 * 1024 * 1024);
        assert_eq!(core.cache().stats().await.entry_count, 0);
        assert!(!core.features().enable_cache_write_back);
        assert_eq!(
            core.orchestrator().snapshot().await.state,
            PlaybackPhase::Idle
        );
    }

    #[tokio::test]
    async fn test_bootstrap_applies_cache_size_preset() {
        let dir = TempDir::new().unwrap();
        let config = CoreConfig::builder()
            .cache_dir(dir.path())
            .cache_size_preset(CacheSizePreset::Small)
            .clock(clock())
            .build()
            .unwrap();

        let core = CoreService::bootstrap(config, deps()).await.unwrap();

        assert_eq!(
            core.cache().config().max_size_bytes,
            CacheSizePreset::Small.bytes()
        );
    }

    #[tokio::test]
    async fn test_bootstrap_purges_expired_entries() {
        let dir = TempDir::new().unwrap();
        let clock = clock();
        let config = config(&dir, clock.clone());

        let key = CacheKey::new("romans-8", "KJV", VoiceFamily::Network, 1.0);
        let seed = SegmentCache::new(
            CacheConfig::new(),
            Arc::clone(&config.file_system),
            clock.clone(),
        );
        seed.initialize().await.unwrap();
        seed.put(
            Bytes::from_static(b"audio"),
            &[VerseTiming::new(1, 0.0, 4.0)],
            &key,
        )
        .await
        .unwrap();

        clock.advance(ChronoDuration::days(45));
        let core = CoreService::bootstrap(config, deps()).await.unwrap();

        assert!(!core.cache().contains(&key).await);
    }

    #[tokio::test]
    async fn test_invalid_playback_config_is_rejected() {
        let dir = TempDir::new().unwrap();
        let playback = PlaybackConfig {
            event_buffer: 0,
            ..PlaybackConfig::default()
        };

        let result = CoreService::bootstrap_with(config(&dir, clock()), playback, deps()).await;
        assert!(matches!(result, Err(CoreError::InitializationFailed(_))));
    }

    #[tokio::test]
    async fn test_events_reach_service_subscribers() {
        let dir = TempDir::new().unwrap();
        let core = CoreService::bootstrap(config(&dir, clock()), deps())
            .await
            .unwrap();
        let mut events = core.events();

        let key = CacheKey::new("romans-9", "KJV", VoiceFamily::Network, 1.0);
        core.cache()
            .put(Bytes::from_static(b"audio"), &[VerseTiming::new(1, 0.0, 2.0)], &key)
            .await
            .unwrap();

        let stored = events
            .drain()
            .into_iter()
            .any(|e| matches!(e, CoreEvent::Cache(CacheEvent::Stored { .. })));
        assert!(stored);

        core.shutdown().await;
    }
}
