//! Background generation tasks.
//!
//! [`spawn_generation`] runs a [`SpeechGenerator`] on its own task, publishes
//! milestones on the event bus, writes the complete result into the
//! [`SegmentCache`], and exposes progress through a `watch` snapshot. Any
//! number of [`GenerationObserver`]s can follow one task; each sees the same
//! quick-start, progressive, outcome ordering regardless of when it attached.

use crate::cache::SegmentCache;
use crate::error::PlaybackError;
use crate::generation::{
    generation_channel, GenerationEvent, GenerationEvents, GenerationRequest, GenerationResult,
    ProgressiveUpdate,
};
use crate::models::CacheKey;
use crate::traits::SpeechGenerator;
use core_async::sync::{watch, CancellationToken};
use core_runtime::events::{
    CacheEvent, CoreEvent, EventBus, GenerationEvent as GenerationNotice,
};
use futures::future::join;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn, Instrument};
use uuid::Uuid;

/// How a generation task ended.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    Completed(GenerationResult),
    Failed(String),
    Cancelled,
}

impl GenerationOutcome {
    pub fn into_result(self) -> Result<GenerationResult, PlaybackError> {
        match self {
            GenerationOutcome::Completed(result) => Ok(result),
            GenerationOutcome::Failed(message) => Err(PlaybackError::GenerationFailed(message)),
            GenerationOutcome::Cancelled => Err(PlaybackError::Cancelled),
        }
    }
}

/// Latest state of one generation task.
#[derive(Debug, Clone, Default)]
pub struct GenerationSnapshot {
    pub progress: f32,
    pub quick_start: Option<GenerationResult>,
    /// Incremented on every progressive update.
    pub update_seq: u64,
    pub latest_update: Option<ProgressiveUpdate>,
    pub outcome: Option<GenerationOutcome>,
}

/// Handle to a running generation task.
#[derive(Debug, Clone)]
pub struct GenerationHandle {
    id: Uuid,
    key: CacheKey,
    cancel: CancellationToken,
    rx: watch::Receiver<GenerationSnapshot>,
}

impl GenerationHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Preferred cache key of the request.
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.rx.borrow().outcome.is_some()
    }

    pub fn progress(&self) -> f32 {
        self.rx.borrow().progress
    }

    pub fn outcome(&self) -> Option<GenerationOutcome> {
        self.rx.borrow().outcome.clone()
    }

    /// Still running, or finished with a result.
    pub fn is_usable(&self) -> bool {
        !self.is_cancelled()
            && matches!(self.outcome(), None | Some(GenerationOutcome::Completed(_)))
    }

    /// Follow this task from the beginning.
    pub fn observe(&self) -> GenerationObserver {
        GenerationObserver {
            rx: self.rx.clone(),
            quick_start_seen: false,
            update_seq: 0,
            progress: 0.0,
            done: false,
        }
    }
}

/// What an observer yields, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum ObservedEvent {
    Progress(f32),
    QuickStart(GenerationResult),
    /// Only the newest update is yielded when several arrive between polls.
    Progressive(ProgressiveUpdate),
    Finished(GenerationOutcome),
}

/// Ordered view over one generation task.
#[derive(Debug)]
pub struct GenerationObserver {
    rx: watch::Receiver<GenerationSnapshot>,
    quick_start_seen: bool,
    update_seq: u64,
    progress: f32,
    done: bool,
}

impl GenerationObserver {
    /// Next milestone, or `None` once the outcome has been yielded.
    pub async fn next(&mut self) -> Option<ObservedEvent> {
        loop {
            if self.done {
                return None;
            }

            if let Some(event) = self.poll_snapshot() {
                return Some(event);
            }

            if self.rx.changed().await.is_err() {
                // Task is gone; take whatever it published last.
                if let Some(event) = self.poll_snapshot() {
                    return Some(event);
                }
                self.done = true;
                return Some(ObservedEvent::Finished(GenerationOutcome::Failed(
                    "generation task ended without a result".to_string(),
                )));
            }
        }
    }

    fn poll_snapshot(&mut self) -> Option<ObservedEvent> {
        let snapshot = self.rx.borrow_and_update();

        if !self.quick_start_seen {
            if let Some(result) = &snapshot.quick_start {
                self.quick_start_seen = true;
                return Some(ObservedEvent::QuickStart(result.clone()));
            }
        }

        if snapshot.update_seq > self.update_seq {
            self.update_seq = snapshot.update_seq;
            if let Some(update) = &snapshot.latest_update {
                return Some(ObservedEvent::Progressive(update.clone()));
            }
        }

        if snapshot.outcome.is_none() && snapshot.progress > self.progress {
            self.progress = snapshot.progress;
            return Some(ObservedEvent::Progress(snapshot.progress));
        }

        if let Some(outcome) = &snapshot.outcome {
            self.done = true;
            return Some(ObservedEvent::Finished(outcome.clone()));
        }

        None
    }
}

/// Start generating `request` on a background task.
///
/// With `write_back`, the complete result's audio is stored in `cache`. A
/// failed write is logged and reported as a [`CacheEvent::WriteFailed`]; the
/// generation itself still completes.
#[instrument(skip_all, fields(chapter = %request.chapter.id, priority = %request.priority))]
pub fn spawn_generation(
    generator: Arc<dyn SpeechGenerator>,
    cache: Arc<SegmentCache>,
    events: EventBus,
    request: GenerationRequest,
    write_back: bool,
) -> GenerationHandle {
    let id = Uuid::new_v4();
    let key = request.preferred_key();
    let cancel = CancellationToken::new();
    let (snapshot_tx, rx) = watch::channel(GenerationSnapshot::default());

    events
        .emit(CoreEvent::Generation(GenerationNotice::Started {
            generation_id: id.to_string(),
            chapter_id: request.chapter.id.clone(),
            cache_key: key.to_string(),
            priority: request.priority.to_string(),
        }))
        .ok();

    let task_cancel = cancel.clone();
    core_async::spawn(
        async move {
            let (sink, milestones) = generation_channel();
            let generation = generator.generate_progressive(request, sink, task_cancel.clone());
            let (result, ()) = join(
                generation,
                pump(milestones, &snapshot_tx, &events, id),
            )
            .await;

            let outcome = match result {
                Ok(_) if task_cancel.is_cancelled() => GenerationOutcome::Cancelled,
                Ok(result) => {
                    if write_back {
                        store_result(&cache, &events, &result).await;
                    }
                    info!(key = %result.key, "Generation completed");
                    events
                        .emit(CoreEvent::Generation(GenerationNotice::Completed {
                            generation_id: id.to_string(),
                            cache_key: result.key.to_string(),
                            duration_ms: result.duration().as_millis() as u64,
                        }))
                        .ok();
                    GenerationOutcome::Completed(result)
                }
                Err(e) if e.is_cancelled() || task_cancel.is_cancelled() => {
                    GenerationOutcome::Cancelled
                }
                Err(e) => {
                    warn!(error = %e, "Generation failed");
                    events
                        .emit(CoreEvent::Generation(GenerationNotice::Failed {
                            generation_id: id.to_string(),
                            message: e.to_string(),
                        }))
                        .ok();
                    GenerationOutcome::Failed(e.to_string())
                }
            };

            if matches!(outcome, GenerationOutcome::Cancelled) {
                debug!("Generation cancelled");
                events
                    .emit(CoreEvent::Generation(GenerationNotice::Cancelled {
                        generation_id: id.to_string(),
                    }))
                    .ok();
            }

            snapshot_tx.send_modify(|snapshot| snapshot.outcome = Some(outcome));
        }
        .in_current_span(),
    );

    GenerationHandle {
        id,
        key,
        cancel,
        rx,
    }
}

/// Mirror engine milestones into the snapshot and the event bus.
async fn pump(
    mut milestones: GenerationEvents,
    snapshot: &watch::Sender<GenerationSnapshot>,
    events: &EventBus,
    id: Uuid,
) {
    while let Some(milestone) = milestones.recv().await {
        match milestone {
            GenerationEvent::Progress(progress) => {
                let progress = progress.clamp(0.0, 1.0);
                snapshot.send_modify(|s| s.progress = s.progress.max(progress));
                events
                    .emit(CoreEvent::Generation(GenerationNotice::Progress {
                        generation_id: id.to_string(),
                        percent: (progress * 100.0).round() as u8,
                    }))
                    .ok();
            }
            GenerationEvent::QuickStart(result) => {
                events
                    .emit(CoreEvent::Generation(GenerationNotice::QuickStartReady {
                        generation_id: id.to_string(),
                        cache_key: result.key.to_string(),
                        duration_ms: result.duration().as_millis() as u64,
                    }))
                    .ok();
                snapshot.send_modify(|s| {
                    if s.quick_start.is_none() {
                        s.quick_start = Some(result);
                    }
                });
            }
            GenerationEvent::ProgressiveUpdate(update) => {
                snapshot.send_modify(|s| {
                    s.update_seq += 1;
                    s.latest_update = Some(update);
                });
            }
            GenerationEvent::SourceChanged { from, to, reason } => {
                events
                    .emit(CoreEvent::Generation(GenerationNotice::FellBack {
                        generation_id: id.to_string(),
                        from: from.to_string(),
                        to: to.to_string(),
                        reason,
                    }))
                    .ok();
            }
        }
    }
}

async fn store_result(cache: &SegmentCache, events: &EventBus, result: &GenerationResult) {
    let Some(audio) = result.audio.clone() else {
        debug!(key = %result.key, "Result carries no audio; nothing to cache");
        return;
    };

    if let Err(e) = cache.put(audio, &result.timings, &result.key).await {
        warn!(key = %result.key, error = %e, "Failed to cache generated audio");
        events
            .emit(CoreEvent::Cache(CacheEvent::WriteFailed {
                cache_key: result.key.to_string(),
                message: e.to_string(),
            }))
            .ok();
    }
}
