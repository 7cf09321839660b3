//! # Playback Orchestrator
//!
//! Owns the playback state machine for one listener.
//!
//! ## Overview
//!
//! Loading a chapter consults the [`SegmentCache`], then the [`ManifestStore`],
//! and finally starts (or adopts) a generation task. Audio is attached to the
//! host [`AudioTransport`] as soon as a quick-start prefix exists; fuller
//! compositions replace it later, either immediately or at a safe moment.
//!
//! ```text
//!            load()
//!   Idle ───────────> Ready(is_loading) ── quick-start ──> Ready / Playing
//!                          │                                   │   ▲
//!                          └── generation failed ──> Error     │   │ play()
//!                                                   pause() ─> Paused
//!   Playing ── end of attached audio ──> Finished ── pending reload ──> Playing
//! ```
//!
//! ## Concurrency
//!
//! Session state lives behind one async mutex. Transport calls made while
//! rebuilding a composition (attach, seek) are awaited with the lock held, so
//! no caller can observe a position from the old composition mid-swap.
//!
//! Every load gets a new `load_id`; generation events for an older id are
//! dropped.
//!
//! ## Events
//!
//! Everything observable is also published on the orchestrator's
//! [`EventBus`] as [`CoreEvent::Playback`] and [`CoreEvent::SleepTimer`].

pub mod boundary;
pub mod reload;
pub mod session;
pub mod sleep_timer;

pub use boundary::BoundaryTracker;
pub use reload::{decide_reload, PendingReload, ReloadDecision, ReloadKind, ReloadTrigger};
pub use session::{PlaybackSnapshot, Session};
pub use sleep_timer::SleepTimerMode;

use crate::cache::SegmentCache;
use crate::config::PlaybackConfig;
use crate::error::{PlaybackError, Result};
use crate::generation::{
    spawn_generation, GenerationHandle, GenerationObserver, GenerationOutcome,
    GenerationPriority, GenerationRequest, ObservedEvent,
};
use crate::models::{validate_timings, CacheKey, Chapter, VerseTiming, VoiceFamily};
use crate::traits::{ManifestStore, SpeechGenerator};
use bridge_traits::playback::{AudioComposition, AudioTransport, TransportEvent};
use core_async::sync::Mutex;
use core_runtime::config::FeatureFlags;
use core_runtime::events::{
    CoreEvent, EventBus, EventStream, PlaybackEvent, PlaybackPhase, SleepTimerEvent,
};
use reload::near_end;
use session::{AttachedSession, LoadingSession};
use sleep_timer::SleepTimer;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Collaborators the orchestrator drives.
#[derive(Clone)]
pub struct OrchestratorDeps {
    pub cache: Arc<SegmentCache>,
    pub manifests: Arc<dyn ManifestStore>,
    pub generator: Arc<dyn SpeechGenerator>,
    pub transport: Arc<dyn AudioTransport>,
}

/// Playback state machine. Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct PlaybackOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    config: PlaybackConfig,
    features: FeatureFlags,
    cache: Arc<SegmentCache>,
    manifests: Arc<dyn ManifestStore>,
    generator: Arc<dyn SpeechGenerator>,
    transport: Arc<dyn AudioTransport>,
    events: EventBus,
    session: Mutex<Session>,
    prefetch: parking_lot::Mutex<Option<GenerationHandle>>,
    sleep_timer: parking_lot::Mutex<Option<SleepTimer>>,
    pinned: parking_lot::Mutex<Vec<CacheKey>>,
    load_seq: AtomicU64,
}

impl PlaybackOrchestrator {
    /// Create an orchestrator with its own event bus and default features.
    pub fn new(config: PlaybackConfig, deps: OrchestratorDeps) -> Result<Self> {
        let events = EventBus::new(config.event_buffer);
        Self::with_options(config, deps, FeatureFlags::default(), events)
    }

    /// Create an orchestrator publishing on a shared event bus.
    pub fn with_options(
        config: PlaybackConfig,
        deps: OrchestratorDeps,
        features: FeatureFlags,
        events: EventBus,
    ) -> Result<Self> {
        config.validate().map_err(PlaybackError::Config)?;

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                features,
                cache: deps.cache,
                manifests: deps.manifests,
                generator: deps.generator,
                transport: deps.transport,
                events,
                session: Mutex::new(Session::Idle),
                prefetch: parking_lot::Mutex::new(None),
                sleep_timer: parking_lot::Mutex::new(None),
                pinned: parking_lot::Mutex::new(Vec::new()),
                load_seq: AtomicU64::new(0),
            }),
        })
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.inner.config
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.inner.events
    }

    /// Subscribe to orchestrator events.
    pub fn events(&self) -> EventStream {
        EventStream::new(self.inner.events.subscribe())
    }

    /// Current observable state.
    pub async fn snapshot(&self) -> PlaybackSnapshot {
        let session = self.inner.session.lock().await;
        let mut snapshot = PlaybackSnapshot::from_session(&session);
        snapshot.sleep_timer_remaining = self
            .inner
            .sleep_timer
            .lock()
            .as_ref()
            .and_then(SleepTimer::remaining);
        snapshot
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Load `chapter`, starting playback once audio is attached if `autoplay`.
    ///
    /// The session reports `Ready` with `is_loading` immediately. Returns once
    /// the first composition is attached; further audio keeps arriving in the
    /// background.
    ///
    /// # Errors
    ///
    /// - `Cancelled` if another load or `stop()` superseded this one
    /// - `GenerationFailed` if nothing could be generated
    #[instrument(skip(self, chapter), fields(chapter = %chapter.id))]
    pub async fn load(&self, chapter: Chapter, autoplay: bool) -> Result<()> {
        let load_id = self.inner.load_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let network_key = chapter.cache_key(VoiceFamily::Network, self.inner.config.speech_rate);
        let device_key = network_key.with_family(VoiceFamily::Device);

        {
            let mut session = self.inner.session.lock().await;
            self.teardown_locked(&mut session).await;
            *session = Session::Loading(LoadingSession::new(
                load_id,
                chapter.clone(),
                network_key.clone(),
                autoplay,
            ));
            self.pin(&[network_key.clone(), device_key.clone()]);
            self.emit_state(&session);
        }

        for key in [&network_key, &device_key] {
            let Some(artifact) = self.inner.cache.get(key).await else {
                continue;
            };
            match self
                .attach_initial(
                    load_id,
                    artifact.to_composition(),
                    artifact.timings.clone(),
                    key.clone(),
                    true,
                )
                .await
            {
                Ok(()) => {
                    info!(key = %key, "Playing cached artifact");
                    return Ok(());
                }
                Err(PlaybackError::Cancelled) => return Err(PlaybackError::Cancelled),
                Err(e) => {
                    warn!(key = %key, error = %e, "Cached artifact unusable, regenerating");
                    self.discard_stale(key).await;
                }
            }
        }

        for key in [&network_key, &device_key] {
            let stored = match self.inner.manifests.load(key).await {
                Ok(Some(stored)) if stored.manifest.complete => stored,
                Ok(_) => continue,
                Err(e) => {
                    warn!(key = %key, error = %e, "Manifest lookup failed");
                    continue;
                }
            };

            let attached = match stored
                .manifest
                .validate()
                .and_then(|()| validate_timings(&stored.timings))
            {
                Ok(()) => {
                    self.attach_initial(
                        load_id,
                        stored.manifest.to_composition(),
                        stored.timings,
                        key.clone(),
                        true,
                    )
                    .await
                }
                Err(e) => Err(e),
            };

            match attached {
                Ok(()) => {
                    info!(key = %key, "Playing stored manifest");
                    return Ok(());
                }
                Err(PlaybackError::Cancelled) => return Err(PlaybackError::Cancelled),
                Err(e) => {
                    warn!(key = %key, error = %e, "Stored manifest unusable, regenerating");
                    self.discard_stale(key).await;
                }
            }
        }

        let handle = self.adopt_or_spawn(&chapter, load_id).await?;
        self.drive_until_attached(load_id, handle.observe()).await
    }

    fn is_current(&self, load_id: u64) -> bool {
        self.inner.load_seq.load(Ordering::SeqCst) == load_id
    }

    async fn discard_stale(&self, key: &CacheKey) {
        self.inner.cache.invalidate(key).await;
        if let Err(e) = self.inner.manifests.delete(key).await {
            warn!(key = %key, error = %e, "Failed to delete stale manifest");
        }
    }

    async fn adopt_or_spawn(&self, chapter: &Chapter, load_id: u64) -> Result<GenerationHandle> {
        let request = GenerationRequest::new(
            chapter.clone(),
            self.inner.config.speech_rate,
            GenerationPriority::Interactive,
        );
        let key = request.preferred_key();

        let adopted = {
            let mut slot = self.inner.prefetch.lock();
            match slot.take() {
                Some(handle) if handle.key() == &key && handle.is_usable() => Some(handle),
                other => {
                    *slot = other;
                    None
                }
            }
        };

        let handle = match adopted {
            Some(handle) => {
                info!(generation = %handle.id(), "Adopting in-flight prefetch");
                handle
            }
            None => spawn_generation(
                Arc::clone(&self.inner.generator),
                Arc::clone(&self.inner.cache),
                self.inner.events.clone(),
                request,
                self.inner.features.enable_cache_write_back,
            ),
        };

        let mut session = self.inner.session.lock().await;
        match &mut *session {
            Session::Loading(loading) if loading.load_id == load_id => {
                loading.generation = Some(handle.clone());
                Ok(handle)
            }
            _ => {
                handle.cancel();
                Err(PlaybackError::Cancelled)
            }
        }
    }

    /// Follow generation until the first composition is attached.
    async fn drive_until_attached(
        &self,
        load_id: u64,
        mut observer: GenerationObserver,
    ) -> Result<()> {
        while let Some(event) = observer.next().await {
            if !self.is_current(load_id) {
                return Err(PlaybackError::Cancelled);
            }

            match event {
                ObservedEvent::Progress(progress) => self.record_progress(load_id, progress).await,
                ObservedEvent::QuickStart(result) => {
                    match self
                        .attach_initial(
                            load_id,
                            result.manifest.to_composition(),
                            result.timings,
                            result.key,
                            false,
                        )
                        .await
                    {
                        Ok(()) => {
                            self.spawn_driver(load_id, observer);
                            return Ok(());
                        }
                        Err(PlaybackError::Cancelled) => return Err(PlaybackError::Cancelled),
                        Err(e) => {
                            warn!(error = %e, "Quick-start audio rejected; waiting for full result");
                        }
                    }
                }
                ObservedEvent::Progressive(update) => {
                    self.record_loading_timings(load_id, update.timings).await;
                }
                ObservedEvent::Finished(GenerationOutcome::Completed(result)) => {
                    let attached = self
                        .attach_initial(
                            load_id,
                            result.manifest.to_composition(),
                            result.timings,
                            result.key,
                            true,
                        )
                        .await;
                    if let Err(e) = &attached {
                        if !e.is_cancelled() {
                            self.fail_load(load_id, e).await;
                        }
                    }
                    return attached;
                }
                ObservedEvent::Finished(outcome) => {
                    let error = outcome.into_result().err().unwrap_or(PlaybackError::Cancelled);
                    if !error.is_cancelled() {
                        self.fail_load(load_id, &error).await;
                    }
                    return Err(error);
                }
            }
        }

        Err(PlaybackError::Cancelled)
    }

    fn spawn_driver(&self, load_id: u64, observer: GenerationObserver) {
        let orchestrator = self.clone();
        core_async::spawn(async move {
            orchestrator.drive_generation(load_id, observer).await;
        });
    }

    /// Apply generation milestones after the first attach.
    async fn drive_generation(&self, load_id: u64, mut observer: GenerationObserver) {
        while let Some(event) = observer.next().await {
            if !self.is_current(load_id) {
                debug!(load_id, "Dropping generation event for superseded load");
                return;
            }

            match event {
                ObservedEvent::Progress(progress) => self.record_progress(load_id, progress).await,
                ObservedEvent::QuickStart(_) => {}
                ObservedEvent::Progressive(update) => {
                    self.apply_update(
                        load_id,
                        update.key,
                        update.manifest.map(|m| m.to_composition()),
                        update.timings,
                        ReloadKind::Progressive,
                    )
                    .await;
                }
                ObservedEvent::Finished(GenerationOutcome::Completed(result)) => {
                    self.apply_update(
                        load_id,
                        result.key,
                        Some(result.manifest.to_composition()),
                        result.timings,
                        ReloadKind::Final,
                    )
                    .await;
                }
                ObservedEvent::Finished(GenerationOutcome::Failed(message)) => {
                    self.generation_ended_early(load_id, message).await;
                }
                ObservedEvent::Finished(GenerationOutcome::Cancelled) => return,
            }
        }
    }

    /// Turn a loading session into an attached one.
    async fn attach_initial(
        &self,
        load_id: u64,
        composition: AudioComposition,
        timings: Vec<VerseTiming>,
        key: CacheKey,
        complete: bool,
    ) -> Result<()> {
        validate_timings(&timings)?;

        let mut session = self.inner.session.lock().await;
        let play_requested = match &*session {
            Session::Loading(loading) if loading.load_id == load_id => loading.play_requested,
            _ => return Err(PlaybackError::Cancelled),
        };

        let tracker = BoundaryTracker::new(timings.clone(), Duration::ZERO);
        let duration = composition.duration();
        self.inner
            .transport
            .attach(composition)
            .await
            .map_err(|e| PlaybackError::AttachFailed(e.to_string()))?;
        self.inner
            .transport
            .set_boundaries(tracker.boundaries())
            .await
            .map_err(|e| PlaybackError::AttachFailed(e.to_string()))?;

        let mut loading = match std::mem::take(&mut *session) {
            Session::Loading(loading) => loading,
            other => {
                *session = other;
                return Err(PlaybackError::Cancelled);
            }
        };
        if let Err(e) = loading.chapter.replace_timings(timings) {
            debug!(error = %e, "Keeping previous chapter timings");
        }

        let mut attached = AttachedSession {
            load_id,
            chapter: loading.chapter,
            key,
            state: PlaybackPhase::Ready,
            position: Duration::ZERO,
            duration,
            tracker,
            pending: None,
            generation: loading.generation,
            content_pending: !complete,
            progress: if complete { 1.0 } else { loading.progress },
            resume_after_interruption: false,
        };

        if play_requested {
            match self.inner.transport.play().await {
                Ok(()) => attached.state = PlaybackPhase::Playing,
                Err(e) => warn!(error = %e, "Transport refused to start playback"),
            }
        }

        self.emit(PlaybackEvent::CompositionAttached {
            chapter_id: attached.chapter.id.clone(),
            duration_ms: duration.as_millis() as u64,
            complete,
        });
        self.emit_verse(&attached);
        self.emit_attached_state(&attached);
        *session = Session::Attached(attached);
        Ok(())
    }

    async fn fail_load(&self, load_id: u64, error: &PlaybackError) {
        let mut session = self.inner.session.lock().await;
        if !session.is_current(load_id) {
            return;
        }

        let chapter_id = session.chapter_id().unwrap_or_default().to_string();
        warn!(chapter = %chapter_id, error = %error, "Load failed");
        *session = Session::Failed {
            chapter_id: chapter_id.clone(),
            message: error.to_string(),
        };
        drop(session);
        self.unpin_all();

        self.emit(PlaybackEvent::StateChanged {
            chapter_id: Some(chapter_id.clone()),
            state: PlaybackPhase::Error,
            is_loading: false,
        });
        self.emit(PlaybackEvent::Error {
            chapter_id: Some(chapter_id),
            message: error.to_string(),
            recoverable: false,
        });
    }

    async fn record_progress(&self, load_id: u64, progress: f32) {
        let mut session = self.inner.session.lock().await;
        match &mut *session {
            Session::Loading(loading) if loading.load_id == load_id => loading.progress = progress,
            Session::Attached(attached) if attached.load_id == load_id => {
                attached.progress = progress
            }
            _ => {}
        }
    }

    async fn record_loading_timings(&self, load_id: u64, timings: Vec<VerseTiming>) {
        let mut session = self.inner.session.lock().await;
        if let Session::Loading(loading) = &mut *session {
            if loading.load_id == load_id {
                if let Err(e) = loading.chapter.replace_timings(timings) {
                    debug!(error = %e, "Ignoring invalid progressive timings");
                }
            }
        }
    }

    // ========================================================================
    // Reloads
    // ========================================================================

    /// New timings (and possibly a fuller composition) for the attached chapter.
    async fn apply_update(
        &self,
        load_id: u64,
        key: CacheKey,
        composition: Option<AudioComposition>,
        timings: Vec<VerseTiming>,
        kind: ReloadKind,
    ) {
        if let Err(e) = validate_timings(&timings) {
            warn!(error = %e, "Ignoring generation update with invalid timings");
            return;
        }

        let mut session = self.inner.session.lock().await;
        let Session::Attached(attached) = &mut *session else {
            return;
        };
        if attached.load_id != load_id {
            return;
        }

        if kind == ReloadKind::Final {
            attached.content_pending = false;
            attached.progress = 1.0;
        }
        if let Err(e) = attached.chapter.replace_timings(timings.clone()) {
            debug!(error = %e, "Keeping previous chapter timings");
        }

        let Some(composition) = composition else {
            let previous = attached.tracker.current_verse();
            attached.tracker.replace_timings(timings, attached.position);
            self.register_boundaries(attached).await;
            if attached.tracker.current_verse() != previous {
                self.emit_verse(attached);
            }
            return;
        };

        let position = self.current_position(attached).await;
        let reload = PendingReload {
            key,
            composition,
            timings,
            complete: kind == ReloadKind::Final,
        };

        match decide_reload(
            attached.state,
            attached.duration,
            position,
            kind,
            &self.inner.config,
        ) {
            ReloadDecision::Defer { remaining } => {
                debug!(remaining_ms = remaining.as_millis() as u64, "Deferring reload");
                attached.position = position;
                attached
                    .tracker
                    .replace_timings(reload.timings.clone(), position);
                self.register_boundaries(attached).await;
                attached.pending = Some(reload);
                self.emit(PlaybackEvent::ReloadDeferred {
                    chapter_id: attached.chapter.id.clone(),
                    remaining_ms: remaining.as_millis() as u64,
                });
                self.emit_verse(attached);
            }
            ReloadDecision::Rebuild => {
                attached.pending = None;
                self.rebuild_reporting(attached, reload, ReloadTrigger::Generation)
                    .await;
            }
        }
    }

    /// Swap in `reload`, keeping the playhead where it was.
    ///
    /// A rejected attach leaves the reload pending so a later trigger retries
    /// it. Once the transport holds the new composition the session follows
    /// it, even if the seek back fails.
    async fn rebuild(
        &self,
        attached: &mut AttachedSession,
        reload: PendingReload,
        trigger: ReloadTrigger,
    ) -> Result<()> {
        let was_playing = attached.is_playing();
        let was_finished = attached.state == PlaybackPhase::Finished;
        let position = if was_finished {
            attached.duration
        } else {
            self.current_position(attached).await
        };

        let duration = reload.composition.duration();
        let target = position.min(duration);

        if let Err(e) = self.inner.transport.attach(reload.composition.clone()).await {
            attached.pending = Some(reload);
            return Err(PlaybackError::AttachFailed(e.to_string()));
        }

        attached.key = reload.key;
        attached.duration = duration;
        attached.position = Duration::ZERO;
        if reload.complete {
            attached.content_pending = false;
        }
        attached.tracker.replace_timings(reload.timings, Duration::ZERO);
        self.inner
            .transport
            .set_boundaries(attached.tracker.boundaries())
            .await
            .map_err(|e| PlaybackError::AttachFailed(e.to_string()))?;
        self.inner
            .transport
            .seek(target)
            .await
            .map_err(|e| PlaybackError::Transport(e.to_string()))?;

        attached.position = target;
        attached.tracker.reseek(target);

        let resume = was_playing || (was_finished && duration > target);
        if resume {
            self.inner
                .transport
                .play()
                .await
                .map_err(|e| PlaybackError::Transport(e.to_string()))?;
            attached.state = PlaybackPhase::Playing;
        } else if was_finished {
            attached.state = PlaybackPhase::Finished;
        }

        info!(
            trigger = %trigger,
            duration_ms = duration.as_millis() as u64,
            position_ms = target.as_millis() as u64,
            resumed = resume,
            "Reloaded composition"
        );
        self.emit(PlaybackEvent::CompositionAttached {
            chapter_id: attached.chapter.id.clone(),
            duration_ms: duration.as_millis() as u64,
            complete: !attached.content_pending,
        });
        self.emit(PlaybackEvent::ReloadApplied {
            chapter_id: attached.chapter.id.clone(),
            trigger: trigger.to_string(),
            duration_ms: duration.as_millis() as u64,
        });
        if resume && !was_playing {
            self.emit_attached_state(attached);
        }
        Ok(())
    }

    async fn rebuild_reporting(
        &self,
        attached: &mut AttachedSession,
        reload: PendingReload,
        trigger: ReloadTrigger,
    ) {
        if let Err(e) = self.rebuild(attached, reload, trigger).await {
            warn!(trigger = %trigger, error = %e, "Composition reload failed");
            self.emit(PlaybackEvent::Error {
                chapter_id: Some(attached.chapter.id.clone()),
                message: e.to_string(),
                recoverable: true,
            });
        }
    }

    async fn apply_pending(&self, attached: &mut AttachedSession, trigger: ReloadTrigger) {
        if let Some(reload) = attached.pending.take() {
            self.rebuild_reporting(attached, reload, trigger).await;
        }
    }

    /// Generation failed after audio was attached: keep what plays.
    async fn generation_ended_early(&self, load_id: u64, message: String) {
        let mut session = self.inner.session.lock().await;
        let Session::Attached(attached) = &mut *session else {
            return;
        };
        if attached.load_id != load_id {
            return;
        }

        warn!(error = %message, "Generation failed after playback started");
        attached.content_pending = false;
        self.emit(PlaybackEvent::Error {
            chapter_id: Some(attached.chapter.id.clone()),
            message,
            recoverable: true,
        });

        if attached.state == PlaybackPhase::Finished && attached.at_true_end() {
            self.finish_chapter(attached);
        }
    }

    /// Re-register verse boundaries after the timings changed in place.
    async fn register_boundaries(&self, attached: &AttachedSession) {
        if let Err(e) = self
            .inner
            .transport
            .set_boundaries(attached.tracker.boundaries())
            .await
        {
            warn!(error = %e, "Failed to update verse boundaries");
        }
    }

    async fn current_position(&self, attached: &AttachedSession) -> Duration {
        match self.inner.transport.position().await {
            Ok(position) => position,
            Err(e) => {
                debug!(error = %e, "Transport position unavailable");
                attached.position
            }
        }
    }

    // ========================================================================
    // Transport Events
    // ========================================================================

    /// Feed a host transport event into the state machine.
    #[instrument(skip(self))]
    pub async fn handle_transport_event(&self, event: TransportEvent) {
        let mut session = self.inner.session.lock().await;
        let Session::Attached(attached) = &mut *session else {
            debug!("Transport event without attached audio");
            return;
        };

        match event {
            TransportEvent::PositionChanged(position) => {
                attached.position = position;
                self.emit(PlaybackEvent::PositionChanged {
                    chapter_id: attached.chapter.id.clone(),
                    position_ms: position.as_millis() as u64,
                    duration_ms: attached.duration.as_millis() as u64,
                });
                if attached.pending.is_some()
                    && near_end(
                        attached.duration,
                        position,
                        self.inner.config.pending_reload_lead,
                    )
                {
                    self.apply_pending(attached, ReloadTrigger::NearEnd).await;
                }
            }
            TransportEvent::BoundaryCrossed(_) => {
                // Index first, then listeners.
                if attached.tracker.advance().is_some() {
                    self.emit_verse(attached);
                }
            }
            TransportEvent::ReachedEnd => {
                attached.position = attached.duration;
                attached.state = PlaybackPhase::Finished;
                if attached.pending.is_some() {
                    self.apply_pending(attached, ReloadTrigger::ReachedEnd).await;
                    if attached.pending.is_some() {
                        // Swap rejected: more audio exists, so this is not the end.
                        self.emit_attached_state(attached);
                    }
                } else {
                    self.emit_attached_state(attached);
                    if attached.at_true_end() {
                        self.finish_chapter(attached);
                    }
                }
            }
            TransportEvent::InterruptionBegan => {
                if attached.is_playing() {
                    self.pause_transport(attached).await;
                    attached.resume_after_interruption = true;
                }
            }
            TransportEvent::InterruptionEnded { should_resume } => {
                let resume = std::mem::take(&mut attached.resume_after_interruption)
                    && should_resume
                    && attached.state == PlaybackPhase::Paused;
                if resume {
                    match self.inner.transport.play().await {
                        Ok(()) => {
                            attached.state = PlaybackPhase::Playing;
                            self.emit_attached_state(attached);
                        }
                        Err(e) => warn!(error = %e, "Failed to resume after interruption"),
                    }
                }
            }
            TransportEvent::OutputDeviceLost => {
                attached.resume_after_interruption = false;
                if attached.is_playing() {
                    self.pause_transport(attached).await;
                }
            }
        }
    }

    async fn pause_transport(&self, attached: &mut AttachedSession) {
        match self.inner.transport.pause().await {
            Ok(()) => {
                attached.state = PlaybackPhase::Paused;
                self.emit_attached_state(attached);
            }
            Err(e) => warn!(error = %e, "Failed to pause transport"),
        }
    }

    fn finish_chapter(&self, attached: &AttachedSession) {
        info!(chapter = %attached.chapter.id, "Chapter finished");
        self.emit(PlaybackEvent::ChapterFinished {
            chapter_id: attached.chapter.id.clone(),
        });

        let fired = {
            let mut slot = self.inner.sleep_timer.lock();
            match slot.as_ref().map(|timer| timer.mode) {
                Some(SleepTimerMode::EndOfChapter) => slot.take(),
                _ => None,
            }
        };
        if let Some(timer) = fired {
            info!("End-of-chapter sleep timer fired");
            self.emit_sleep(SleepTimerEvent::Fired {
                mode: timer.mode.to_string(),
            });
        }
    }

    // ========================================================================
    // Controls
    // ========================================================================

    /// Start or resume playback. While loading, records the intent to play.
    #[instrument(skip(self))]
    pub async fn play(&self) -> Result<()> {
        let mut session = self.inner.session.lock().await;
        match &mut *session {
            Session::Loading(loading) => {
                loading.play_requested = true;
                Ok(())
            }
            Session::Attached(attached) => {
                if attached.is_playing() {
                    return Ok(());
                }
                if attached.state == PlaybackPhase::Finished {
                    self.seek_locked(attached, Duration::ZERO).await?;
                }
                self.inner
                    .transport
                    .play()
                    .await
                    .map_err(|e| PlaybackError::Transport(e.to_string()))?;
                attached.state = PlaybackPhase::Playing;
                attached.resume_after_interruption = false;
                self.emit_attached_state(attached);
                Ok(())
            }
            _ => Err(PlaybackError::NoChapterLoaded),
        }
    }

    /// Pause playback and apply any pending reload.
    #[instrument(skip(self))]
    pub async fn pause(&self) -> Result<()> {
        let mut session = self.inner.session.lock().await;
        match &mut *session {
            Session::Loading(loading) => {
                loading.play_requested = false;
                Ok(())
            }
            Session::Attached(attached) => {
                attached.resume_after_interruption = false;
                if attached.is_playing() {
                    self.inner
                        .transport
                        .pause()
                        .await
                        .map_err(|e| PlaybackError::Transport(e.to_string()))?;
                    attached.state = PlaybackPhase::Paused;
                    self.emit_attached_state(attached);
                }
                self.apply_pending(attached, ReloadTrigger::UserPause).await;
                Ok(())
            }
            _ => Err(PlaybackError::NoChapterLoaded),
        }
    }

    /// Move the playhead, clamped to the attached audio.
    #[instrument(skip(self))]
    pub async fn seek(&self, position: Duration) -> Result<()> {
        let mut session = self.inner.session.lock().await;
        match &mut *session {
            Session::Attached(attached) => self.seek_locked(attached, position).await,
            _ => Err(PlaybackError::NoChapterLoaded),
        }
    }

    async fn seek_locked(&self, attached: &mut AttachedSession, position: Duration) -> Result<()> {
        let target = position.min(attached.duration);
        self.inner
            .transport
            .seek(target)
            .await
            .map_err(|e| PlaybackError::Transport(e.to_string()))?;

        let previous = attached.tracker.current_verse();
        attached.position = target;
        attached.tracker.reseek(target);

        if attached.state == PlaybackPhase::Finished && target < attached.duration {
            attached.state = PlaybackPhase::Paused;
            self.emit_attached_state(attached);
        }
        self.emit(PlaybackEvent::PositionChanged {
            chapter_id: attached.chapter.id.clone(),
            position_ms: target.as_millis() as u64,
            duration_ms: attached.duration.as_millis() as u64,
        });
        if attached.tracker.current_verse() != previous {
            self.emit_verse(attached);
        }
        Ok(())
    }

    /// Stop playback, cancel generation and prefetch, and return to idle.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        self.inner.load_seq.fetch_add(1, Ordering::SeqCst);

        let mut session = self.inner.session.lock().await;
        self.teardown_locked(&mut session).await;
        *session = Session::Idle;
        self.emit_state(&session);
        drop(session);

        if let Some(prefetch) = self.inner.prefetch.lock().take() {
            prefetch.cancel();
        }
        self.cancel_sleep_timer();
        info!("Playback stopped");
    }

    async fn teardown_locked(&self, session: &mut Session) {
        if let Some(generation) = session.generation() {
            generation.cancel();
        }
        if let Session::Attached(_) = session {
            if let Err(e) = self.inner.transport.unload().await {
                warn!(error = %e, "Failed to unload transport");
            }
        }
        self.unpin_all();
    }

    // ========================================================================
    // Prefetch
    // ========================================================================

    /// Start generating `chapter` in the background.
    ///
    /// At most one prefetch runs; a new one cancels the previous. Loading the
    /// same chapter later adopts the running task.
    #[instrument(skip(self, chapter), fields(chapter = %chapter.id))]
    pub async fn prefetch(&self, chapter: Chapter) -> Result<()> {
        if !self.inner.features.enable_prefetch {
            debug!("Prefetch disabled");
            return Ok(());
        }

        let request = GenerationRequest::new(
            chapter,
            self.inner.config.speech_rate,
            GenerationPriority::Background,
        );
        let key = request.preferred_key();

        if self.inner.cache.contains(&key).await
            || self
                .inner
                .cache
                .contains(&key.with_family(VoiceFamily::Device))
                .await
        {
            debug!(key = %key, "Already cached; skipping prefetch");
            return Ok(());
        }

        {
            let session = self.inner.session.lock().await;
            if session.generation().is_some_and(|g| g.key() == &key) {
                debug!(key = %key, "Already generating for the current session");
                return Ok(());
            }
        }

        let mut slot = self.inner.prefetch.lock();
        if let Some(existing) = slot.take() {
            if existing.key() == &key && existing.is_usable() {
                *slot = Some(existing);
                return Ok(());
            }
            debug!(generation = %existing.id(), "Cancelling previous prefetch");
            existing.cancel();
        }

        info!(key = %key, "Starting prefetch");
        *slot = Some(spawn_generation(
            Arc::clone(&self.inner.generator),
            Arc::clone(&self.inner.cache),
            self.inner.events.clone(),
            request,
            self.inner.features.enable_cache_write_back,
        ));
        Ok(())
    }

    /// Key of the running prefetch, if any.
    pub fn prefetch_key(&self) -> Option<CacheKey> {
        self.inner
            .prefetch
            .lock()
            .as_ref()
            .filter(|handle| !handle.is_cancelled())
            .map(|handle| handle.key().clone())
    }

    // ========================================================================
    // Sleep Timer
    // ========================================================================

    /// Arm the sleep timer, replacing any armed one.
    #[instrument(skip(self))]
    pub fn set_sleep_timer(&self, mode: SleepTimerMode) {
        let timer = SleepTimer::new(mode);
        let countdown = match mode {
            SleepTimerMode::Countdown(_) => {
                let weak = Arc::downgrade(&self.inner);
                let id = timer.id;
                Some(timer.countdown(
                    self.inner.config.sleep_timer_tick,
                    self.inner.events.clone(),
                    move || async move {
                        if let Some(inner) = weak.upgrade() {
                            PlaybackOrchestrator { inner }.sleep_timer_expired(id).await;
                        }
                    },
                ))
            }
            SleepTimerMode::EndOfChapter => None,
        };

        self.emit_sleep(SleepTimerEvent::Started {
            mode: mode.to_string(),
            remaining_secs: timer.remaining().map(|r| r.as_secs()),
        });
        if let Some(previous) = self.inner.sleep_timer.lock().replace(timer) {
            previous.cancel();
        }
        if let Some(countdown) = countdown {
            core_async::spawn(countdown);
        }
    }

    pub fn cancel_sleep_timer(&self) {
        if let Some(timer) = self.inner.sleep_timer.lock().take() {
            timer.cancel();
            self.emit_sleep(SleepTimerEvent::Cancelled);
        }
    }

    async fn sleep_timer_expired(&self, id: Uuid) {
        let mode = {
            let mut slot = self.inner.sleep_timer.lock();
            if slot.as_ref().is_some_and(|timer| timer.id == id) {
                slot.take().map(|timer| timer.mode)
            } else {
                None
            }
        };
        let Some(mode) = mode else {
            return;
        };

        info!("Sleep timer fired");
        if let Err(e) = self.pause().await {
            debug!(error = %e, "Nothing to pause for sleep timer");
        }
        self.emit_sleep(SleepTimerEvent::Fired {
            mode: mode.to_string(),
        });
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn pin(&self, keys: &[CacheKey]) {
        let mut pinned = self.inner.pinned.lock();
        for key in keys {
            self.inner.cache.pin(key);
            pinned.push(key.clone());
        }
    }

    fn unpin_all(&self) {
        let keys = std::mem::take(&mut *self.inner.pinned.lock());
        for key in &keys {
            self.inner.cache.unpin(key);
        }
    }

    fn emit(&self, event: PlaybackEvent) {
        self.inner.events.emit(CoreEvent::Playback(event)).ok();
    }

    fn emit_sleep(&self, event: SleepTimerEvent) {
        self.inner.events.emit(CoreEvent::SleepTimer(event)).ok();
    }

    fn emit_state(&self, session: &Session) {
        self.emit(PlaybackEvent::StateChanged {
            chapter_id: session.chapter_id().map(str::to_string),
            state: session.phase(),
            is_loading: session.is_loading(),
        });
    }

    fn emit_attached_state(&self, attached: &AttachedSession) {
        self.emit(PlaybackEvent::StateChanged {
            chapter_id: Some(attached.chapter.id.clone()),
            state: attached.state,
            is_loading: false,
        });
    }

    fn emit_verse(&self, attached: &AttachedSession) {
        if let Some(verse_number) = attached.tracker.current_verse() {
            self.emit(PlaybackEvent::VerseChanged {
                chapter_id: attached.chapter.id.clone(),
                verse_number,
            });
        }
    }
}
