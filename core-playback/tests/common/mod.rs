//! Fakes shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_desktop::TokioFileSystem;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::playback::{AudioComposition, AudioSegment, AudioTransport};
use bridge_traits::time::SystemClock;
use bytes::Bytes;
use core_async::sync::CancellationToken;
use core_playback::cache::{CacheConfig, SegmentCache};
use core_playback::generation::{GenerationEvent, GenerationResult, GenerationSink, ProgressiveUpdate};
use core_playback::models::{CacheKey, Chapter, Manifest, Verse, VerseTiming};
use core_playback::orchestrator::{OrchestratorDeps, PlaybackOrchestrator};
use core_playback::traits::{ManifestStore, SpeechGenerator, StoredManifest};
use core_playback::{GenerationRequest, PlaybackConfig, PlaybackError, Result};
use core_runtime::config::FeatureFlags;
use core_runtime::events::{CoreEvent, EventBus, EventStream};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;

// ============================================================================
// Transport
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    /// Duration of the attached composition.
    Attach(Duration),
    SetBoundaries(Vec<Duration>),
    Play,
    Pause,
    Seek(Duration),
    Unload,
}

/// Transport that records every call and reports a settable position.
#[derive(Default)]
pub struct RecordingTransport {
    calls: Mutex<Vec<TransportCall>>,
    position: Mutex<Duration>,
    fail_attach: Mutex<bool>,
}

impl RecordingTransport {
    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn attached_durations(&self) -> Vec<Duration> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::Attach(duration) => Some(duration),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, call: &TransportCall) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }

    pub fn set_position(&self, position: Duration) {
        *self.position.lock() = position;
    }

    pub fn fail_attach(&self, fail: bool) {
        *self.fail_attach.lock() = fail;
    }

    fn record(&self, call: TransportCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl AudioTransport for RecordingTransport {
    async fn attach(&self, composition: AudioComposition) -> BridgeResult<()> {
        if *self.fail_attach.lock() {
            return Err(BridgeError::Transport("player rejected item".to_string()));
        }
        self.record(TransportCall::Attach(composition.duration()));
        *self.position.lock() = Duration::ZERO;
        Ok(())
    }

    async fn set_boundaries(&self, boundaries: Vec<Duration>) -> BridgeResult<()> {
        self.record(TransportCall::SetBoundaries(boundaries));
        Ok(())
    }

    async fn play(&self) -> BridgeResult<()> {
        self.record(TransportCall::Play);
        Ok(())
    }

    async fn pause(&self) -> BridgeResult<()> {
        self.record(TransportCall::Pause);
        Ok(())
    }

    async fn seek(&self, position: Duration) -> BridgeResult<()> {
        self.record(TransportCall::Seek(position));
        *self.position.lock() = position;
        Ok(())
    }

    async fn position(&self) -> BridgeResult<Duration> {
        Ok(*self.position.lock())
    }

    async fn unload(&self) -> BridgeResult<()> {
        self.record(TransportCall::Unload);
        Ok(())
    }
}

// ============================================================================
// Generator
// ============================================================================

pub enum Step {
    Progress(f32),
    QuickStart(GenerationResult),
    Update(ProgressiveUpdate),
    /// Block until the test releases the gate.
    Wait(Arc<Notify>),
}

/// What one `generate_progressive` call does.
pub struct Script {
    pub steps: Vec<Step>,
    pub outcome: std::result::Result<GenerationResult, String>,
}

impl Script {
    pub fn completes(result: GenerationResult) -> Self {
        Self {
            steps: Vec::new(),
            outcome: Ok(result),
        }
    }

    pub fn fails(message: &str) -> Self {
        Self {
            steps: Vec::new(),
            outcome: Err(message.to_string()),
        }
    }

    pub fn then(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }
}

/// Generator that replays one queued [`Script`] per call.
#[derive(Default)]
pub struct ScriptedGenerator {
    scripts: Mutex<VecDeque<Script>>,
    calls: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn push(&self, script: Script) {
        self.scripts.lock().push_back(script);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechGenerator for ScriptedGenerator {
    async fn generate_progressive(
        &self,
        _request: GenerationRequest,
        events: GenerationSink,
        cancel: CancellationToken,
    ) -> Result<GenerationResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let Some(script) = self.scripts.lock().pop_front() else {
            return Err(PlaybackError::GenerationFailed("no script queued".to_string()));
        };

        let run = async move {
            for step in script.steps {
                match step {
                    Step::Progress(p) => {
                        events.send(GenerationEvent::Progress(p)).ok();
                    }
                    Step::QuickStart(result) => {
                        events.send(GenerationEvent::QuickStart(result)).ok();
                    }
                    Step::Update(update) => {
                        events.send(GenerationEvent::ProgressiveUpdate(update)).ok();
                    }
                    Step::Wait(gate) => gate.notified().await,
                }
            }
            script.outcome.map_err(PlaybackError::SynthesisFailed)
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(PlaybackError::Cancelled),
            result = run => result,
        }
    }
}

// ============================================================================
// Manifest store
// ============================================================================

#[derive(Default)]
pub struct InMemoryManifests {
    manifests: Mutex<HashMap<CacheKey, StoredManifest>>,
    deleted: Mutex<Vec<CacheKey>>,
}

impl InMemoryManifests {
    pub fn insert(&self, stored: StoredManifest) {
        self.manifests
            .lock()
            .insert(stored.manifest.key.clone(), stored);
    }

    pub fn deleted(&self) -> Vec<CacheKey> {
        self.deleted.lock().clone()
    }
}

#[async_trait]
impl ManifestStore for InMemoryManifests {
    async fn load(&self, key: &CacheKey) -> Result<Option<StoredManifest>> {
        Ok(self.manifests.lock().get(key).cloned())
    }

    async fn delete(&self, key: &CacheKey) -> Result<()> {
        self.manifests.lock().remove(key);
        self.deleted.lock().push(key.clone());
        Ok(())
    }
}

// ============================================================================
// Builders
// ============================================================================

pub fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

/// Chapter with `verses` verses of a few words each.
pub fn chapter(id: &str, verses: u32) -> Chapter {
    Chapter::new(
        id,
        "KJV",
        (1..=verses)
            .map(|n| Verse::new(n, "and the evening and the morning"))
            .collect(),
    )
}

/// Back-to-back timings of `each` seconds for verses `1..=count`.
pub fn timings(count: u32, each: f64) -> Vec<VerseTiming> {
    (0..count)
        .map(|i| VerseTiming::new(i + 1, i as f64 * each, (i + 1) as f64 * each))
        .collect()
}

/// A rendition covering `timings`, one segment per verse.
pub fn rendition(key: &CacheKey, timings: Vec<VerseTiming>, complete: bool) -> GenerationResult {
    let segments = timings
        .iter()
        .map(|t| {
            AudioSegment::new(
                format!("/tmp/{}-{}.m4a", key.slug(), t.verse_number),
                t.end().saturating_sub(t.start()),
            )
        })
        .collect();

    GenerationResult {
        key: key.clone(),
        manifest: Manifest::new(key.clone(), segments, complete),
        timings,
        audio: complete.then(|| Bytes::from_static(b"encoded chapter audio")),
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub orchestrator: PlaybackOrchestrator,
    pub transport: Arc<RecordingTransport>,
    pub generator: Arc<ScriptedGenerator>,
    pub manifests: Arc<InMemoryManifests>,
    pub cache: Arc<SegmentCache>,
    pub events: EventStream,
    _dir: TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_features(FeatureFlags {
            enable_prefetch: true,
            enable_cache_write_back: false,
        })
        .await
    }

    pub async fn with_features(features: FeatureFlags) -> Self {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(SegmentCache::new(
            CacheConfig::default().with_cache_directory("segments"),
            Arc::new(TokioFileSystem::with_cache_directory(dir.path())),
            Arc::new(SystemClock),
        ));
        cache.initialize().await.unwrap();

        let transport = Arc::new(RecordingTransport::default());
        let generator = Arc::new(ScriptedGenerator::default());
        let manifests = Arc::new(InMemoryManifests::default());
        let bus = EventBus::new(256);
        let events = EventStream::new(bus.subscribe());

        let orchestrator = PlaybackOrchestrator::with_options(
            PlaybackConfig::default(),
            OrchestratorDeps {
                cache: cache.clone(),
                manifests: manifests.clone(),
                generator: generator.clone(),
                transport: transport.clone(),
            },
            features,
            bus,
        )
        .unwrap();

        Self {
            orchestrator,
            transport,
            generator,
            manifests,
            cache,
            events,
            _dir: dir,
        }
    }

    /// Wait (bounded) for the first event matching `predicate`.
    pub async fn wait_for<F>(&mut self, predicate: F) -> CoreEvent
    where
        F: Fn(&CoreEvent) -> bool,
    {
        tokio::time::timeout(secs(30), async {
            loop {
                match self.events.recv().await {
                    Ok(event) if predicate(&event) => return event,
                    Ok(_) => continue,
                    Err(e) => panic!("event stream failed: {e}"),
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    /// Let spawned tasks run until they block.
    pub async fn settle(&self) {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }
}
