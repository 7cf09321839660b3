//! Tests for the playback orchestrator
//!
//! Generation is scripted and the transport only records calls, so every
//! transport event here is fed in by hand.

mod common;

use bridge_traits::playback::TransportEvent;
use bytes::Bytes;
use common::*;
use core_playback::generation::ProgressiveUpdate;
use core_playback::models::{Manifest, VoiceFamily};
use core_playback::orchestrator::SleepTimerMode;
use core_playback::traits::StoredManifest;
use core_playback::PlaybackError;
use core_runtime::events::{CoreEvent, GenerationEvent, PlaybackEvent, PlaybackPhase, SleepTimerEvent};
use std::sync::Arc;
use tokio::sync::Notify;

fn is_playback(event: &CoreEvent, f: impl Fn(&PlaybackEvent) -> bool) -> bool {
    matches!(event, CoreEvent::Playback(inner) if f(inner))
}

/// Load `chapter` from a cached artifact of `verses` five-second verses.
async fn load_cached(h: &Harness, id: &str, verses: u32, autoplay: bool) {
    let chapter = chapter(id, verses);
    let key = chapter.cache_key(VoiceFamily::Network, 1.0);
    h.cache
        .put(Bytes::from_static(b"audio"), &timings(verses, 5.0), &key)
        .await
        .unwrap();
    h.orchestrator.load(chapter, autoplay).await.unwrap();
}

// ============================================================================
// Loading
// ============================================================================

#[tokio::test]
async fn test_cached_chapter_plays_without_generation() {
    let h = Harness::new().await;

    load_cached(&h, "genesis-1", 3, true).await;

    assert_eq!(h.generator.calls(), 0);
    assert_eq!(h.transport.attached_durations(), vec![secs(15)]);
    assert!(h.transport.calls().contains(&TransportCall::SetBoundaries(vec![
        secs(0),
        secs(5),
        secs(10)
    ])));

    let snapshot = h.orchestrator.snapshot().await;
    assert_eq!(snapshot.state, PlaybackPhase::Playing);
    assert!(!snapshot.is_loading);
    assert_eq!(snapshot.current_verse, Some(1));
    assert_eq!(snapshot.generation_progress, 1.0);
}

#[tokio::test]
async fn test_load_without_autoplay_stays_ready() {
    let h = Harness::new().await;

    load_cached(&h, "genesis-1", 2, false).await;

    assert_eq!(h.transport.count(&TransportCall::Play), 0);
    assert_eq!(h.orchestrator.snapshot().await.state, PlaybackPhase::Ready);
}

#[tokio::test]
async fn test_device_rendition_is_used_when_cached() {
    let h = Harness::new().await;
    let chapter = chapter("psalm-23", 2);
    let device = chapter.cache_key(VoiceFamily::Device, 1.0);
    h.cache
        .put(Bytes::from_static(b"audio"), &timings(2, 4.0), &device)
        .await
        .unwrap();

    h.orchestrator.load(chapter, false).await.unwrap();

    assert_eq!(h.generator.calls(), 0);
    assert_eq!(h.transport.attached_durations(), vec![secs(8)]);
}

#[tokio::test]
async fn test_complete_stored_manifest_skips_generation() {
    let h = Harness::new().await;
    let chapter = chapter("genesis-2", 3);
    let key = chapter.cache_key(VoiceFamily::Network, 1.0);
    let stored = rendition(&key, timings(3, 4.0), true);
    h.manifests.insert(StoredManifest {
        manifest: stored.manifest,
        timings: stored.timings,
    });

    h.orchestrator.load(chapter, true).await.unwrap();

    assert_eq!(h.generator.calls(), 0);
    assert_eq!(h.transport.attached_durations(), vec![secs(12)]);
}

#[tokio::test]
async fn test_malformed_manifest_is_discarded_and_regenerated() {
    let h = Harness::new().await;
    let chapter = chapter("genesis-3", 2);
    let key = chapter.cache_key(VoiceFamily::Network, 1.0);
    h.manifests.insert(StoredManifest {
        manifest: Manifest::new(key.clone(), Vec::new(), true),
        timings: timings(2, 5.0),
    });
    h.generator
        .push(Script::completes(rendition(&key, timings(2, 5.0), true)));

    h.orchestrator.load(chapter, false).await.unwrap();

    assert_eq!(h.manifests.deleted(), vec![key]);
    assert_eq!(h.generator.calls(), 1);
    assert_eq!(h.transport.attached_durations(), vec![secs(10)]);
    assert!(!h.orchestrator.snapshot().await.is_loading);
}

#[tokio::test]
async fn test_generation_failure_sets_error_state() {
    let mut h = Harness::new().await;
    h.generator.push(Script::fails("network voice unavailable"));

    let result = h.orchestrator.load(chapter("genesis-4", 2), true).await;
    assert!(matches!(result, Err(PlaybackError::GenerationFailed(_))));

    let snapshot = h.orchestrator.snapshot().await;
    assert_eq!(snapshot.state, PlaybackPhase::Error);
    assert!(snapshot.error.unwrap().contains("network voice unavailable"));

    let event = h
        .wait_for(|e| is_playback(e, |p| matches!(p, PlaybackEvent::Error { .. })))
        .await;
    assert!(matches!(
        event,
        CoreEvent::Playback(PlaybackEvent::Error {
            recoverable: false,
            ..
        })
    ));
    assert!(h.transport.attached_durations().is_empty());
}

#[tokio::test]
async fn test_superseded_load_is_ignored() {
    let mut h = Harness::new().await;
    let slow = chapter("exodus-1", 4);
    let slow_key = slow.cache_key(VoiceFamily::Network, 1.0);
    let gate = Arc::new(Notify::new());
    h.generator.push(
        Script::completes(rendition(&slow_key, timings(4, 5.0), true)).then(Step::Wait(gate)),
    );

    let orchestrator = h.orchestrator.clone();
    let first = tokio::spawn(async move { orchestrator.load(slow, true).await });
    h.wait_for(|e| matches!(e, CoreEvent::Generation(GenerationEvent::Started { .. })))
        .await;

    load_cached(&h, "exodus-2", 2, true).await;

    let result = first.await.unwrap();
    assert!(matches!(result, Err(PlaybackError::Cancelled)));

    let snapshot = h.orchestrator.snapshot().await;
    assert_eq!(snapshot.chapter_id.as_deref(), Some("exodus-2"));
    assert_eq!(snapshot.state, PlaybackPhase::Playing);
    assert_eq!(h.transport.attached_durations(), vec![secs(10)]);
}

#[tokio::test]
async fn test_pins_follow_the_live_session() {
    let mut h = Harness::new().await;
    let slow = chapter("exodus-3", 4);
    let slow_key = slow.cache_key(VoiceFamily::Network, 1.0);
    let gate = Arc::new(Notify::new());
    h.generator.push(
        Script::completes(rendition(&slow_key, timings(4, 5.0), true)).then(Step::Wait(gate)),
    );

    let orchestrator = h.orchestrator.clone();
    let first = tokio::spawn(async move { orchestrator.load(slow, true).await });
    h.wait_for(|e| matches!(e, CoreEvent::Generation(GenerationEvent::Started { .. })))
        .await;
    assert!(h.cache.is_pinned(&slow_key));
    assert!(h.cache.is_pinned(&slow_key.with_family(VoiceFamily::Device)));

    load_cached(&h, "exodus-4", 2, true).await;
    assert!(matches!(first.await.unwrap(), Err(PlaybackError::Cancelled)));

    let live_key = chapter("exodus-4", 2).cache_key(VoiceFamily::Network, 1.0);
    assert!(!h.cache.is_pinned(&slow_key));
    assert!(!h.cache.is_pinned(&slow_key.with_family(VoiceFamily::Device)));
    assert!(h.cache.is_pinned(&live_key));

    h.orchestrator.stop().await;
    assert!(!h.cache.is_pinned(&live_key));
    assert!(!h.cache.is_pinned(&live_key.with_family(VoiceFamily::Device)));
}

// ============================================================================
// Progressive reloads
// ============================================================================

/// Quick-start of 4 verses (20s) now; the full 8 verses (40s) once `gate`
/// is released.
async fn load_progressive(h: &Harness, gate: Arc<Notify>) {
    let chapter = chapter("john-1", 8);
    let key = chapter.cache_key(VoiceFamily::Network, 1.0);
    h.generator.push(
        Script::completes(rendition(&key, timings(8, 5.0), true))
            .then(Step::Progress(0.5))
            .then(Step::QuickStart(rendition(&key, timings(4, 5.0), false)))
            .then(Step::Wait(gate)),
    );
    h.orchestrator.load(chapter, true).await.unwrap();
}

#[tokio::test]
async fn test_quick_start_attaches_before_generation_completes() {
    let h = Harness::new().await;
    load_progressive(&h, Arc::new(Notify::new())).await;

    assert_eq!(h.transport.attached_durations(), vec![secs(20)]);
    let snapshot = h.orchestrator.snapshot().await;
    assert_eq!(snapshot.state, PlaybackPhase::Playing);
    assert!(snapshot.generation_progress < 1.0);
}

#[tokio::test]
async fn test_final_reload_is_deferred_while_playing() {
    let mut h = Harness::new().await;
    let gate = Arc::new(Notify::new());
    load_progressive(&h, gate.clone()).await;

    h.transport.set_position(secs(7));
    gate.notify_one();
    h.wait_for(|e| is_playback(e, |p| matches!(p, PlaybackEvent::ReloadDeferred { .. })))
        .await;

    // Still on the quick-start audio, but the verse reflects the new timings.
    assert_eq!(h.transport.attached_durations(), vec![secs(20)]);
    let snapshot = h.orchestrator.snapshot().await;
    assert!(snapshot.has_pending_reload);
    assert_eq!(snapshot.position, secs(7));
    assert_eq!(snapshot.current_verse, Some(2));

    // Close to the attached end: swap in place and keep playing.
    h.transport.clear_calls();
    h.transport.set_position(secs(16));
    h.orchestrator
        .handle_transport_event(TransportEvent::PositionChanged(secs(16)))
        .await;

    let calls = h.transport.calls();
    assert_eq!(h.transport.attached_durations(), vec![secs(40)]);
    assert!(calls.contains(&TransportCall::Seek(secs(16))));
    assert_eq!(calls.last(), Some(&TransportCall::Play));

    let snapshot = h.orchestrator.snapshot().await;
    assert!(!snapshot.has_pending_reload);
    assert_eq!(snapshot.duration, secs(40));
    assert_eq!(snapshot.position, secs(16));
    assert_eq!(snapshot.current_verse, Some(4));

    let applied = h
        .wait_for(|e| is_playback(e, |p| matches!(p, PlaybackEvent::ReloadApplied { .. })))
        .await;
    assert!(matches!(
        applied,
        CoreEvent::Playback(PlaybackEvent::ReloadApplied { ref trigger, .. }) if trigger == "near_end"
    ));
}

#[tokio::test]
async fn test_pause_applies_pending_reload() {
    let mut h = Harness::new().await;
    let gate = Arc::new(Notify::new());
    load_progressive(&h, gate.clone()).await;

    h.transport.set_position(secs(3));
    gate.notify_one();
    h.wait_for(|e| is_playback(e, |p| matches!(p, PlaybackEvent::ReloadDeferred { .. })))
        .await;

    h.transport.clear_calls();
    h.orchestrator.pause().await.unwrap();

    let calls = h.transport.calls();
    assert_eq!(calls.first(), Some(&TransportCall::Pause));
    assert!(calls.contains(&TransportCall::Attach(secs(40))));
    assert!(calls.contains(&TransportCall::Seek(secs(3))));
    assert!(!calls.contains(&TransportCall::Play));

    let snapshot = h.orchestrator.snapshot().await;
    assert_eq!(snapshot.state, PlaybackPhase::Paused);
    assert_eq!(snapshot.duration, secs(40));
}

#[tokio::test]
async fn test_reload_when_little_buffer_remains_rebuilds_immediately() {
    let mut h = Harness::new().await;
    let gate = Arc::new(Notify::new());
    load_progressive(&h, gate.clone()).await;

    h.transport.set_position(secs(12));
    gate.notify_one();
    h.wait_for(|e| is_playback(e, |p| matches!(p, PlaybackEvent::ReloadApplied { .. })))
        .await;

    assert_eq!(h.transport.attached_durations(), vec![secs(20), secs(40)]);
    assert!(h.transport.calls().contains(&TransportCall::Seek(secs(12))));
    assert_eq!(h.orchestrator.snapshot().await.state, PlaybackPhase::Playing);
}

#[tokio::test]
async fn test_reaching_end_with_pending_reload_resumes() {
    let mut h = Harness::new().await;
    let gate = Arc::new(Notify::new());
    load_progressive(&h, gate.clone()).await;

    h.transport.set_position(secs(2));
    gate.notify_one();
    h.wait_for(|e| is_playback(e, |p| matches!(p, PlaybackEvent::ReloadDeferred { .. })))
        .await;

    h.transport.clear_calls();
    h.orchestrator
        .handle_transport_event(TransportEvent::ReachedEnd)
        .await;

    let calls = h.transport.calls();
    assert!(calls.contains(&TransportCall::Attach(secs(40))));
    assert!(calls.contains(&TransportCall::Seek(secs(20))));
    assert_eq!(calls.last(), Some(&TransportCall::Play));

    let snapshot = h.orchestrator.snapshot().await;
    assert_eq!(snapshot.state, PlaybackPhase::Playing);
    assert_eq!(snapshot.position, secs(20));

    let finished: Vec<_> = h
        .events
        .drain()
        .into_iter()
        .filter(|e| is_playback(e, |p| matches!(p, PlaybackEvent::ChapterFinished { .. })))
        .collect();
    assert!(finished.is_empty());
}

#[tokio::test]
async fn test_generation_failure_after_quick_start_keeps_playing() {
    let mut h = Harness::new().await;
    let chapter = chapter("john-2", 6);
    let key = chapter.cache_key(VoiceFamily::Network, 1.0);
    let gate = Arc::new(Notify::new());
    h.generator.push(
        Script::fails("synthesis crashed")
            .then(Step::QuickStart(rendition(&key, timings(2, 5.0), false)))
            .then(Step::Wait(gate.clone())),
    );
    h.orchestrator.load(chapter, true).await.unwrap();

    gate.notify_one();
    let event = h
        .wait_for(|e| is_playback(e, |p| matches!(p, PlaybackEvent::Error { .. })))
        .await;
    assert!(matches!(
        event,
        CoreEvent::Playback(PlaybackEvent::Error {
            recoverable: true,
            ..
        })
    ));

    let snapshot = h.orchestrator.snapshot().await;
    assert_eq!(snapshot.state, PlaybackPhase::Playing);
    assert_eq!(snapshot.duration, secs(10));
}

#[tokio::test]
async fn test_deferred_reload_registers_new_boundaries() {
    let mut h = Harness::new().await;
    let chapter = chapter("john-3", 8);
    let key = chapter.cache_key(VoiceFamily::Network, 1.0);
    let gate = Arc::new(Notify::new());
    h.generator.push(
        Script::completes(rendition(&key, timings(8, 6.0), true))
            .then(Step::QuickStart(rendition(&key, timings(4, 5.0), false)))
            .then(Step::Wait(gate.clone())),
    );
    h.orchestrator.load(chapter, true).await.unwrap();

    h.transport.set_position(secs(2));
    h.transport.clear_calls();
    gate.notify_one();
    h.wait_for(|e| is_playback(e, |p| matches!(p, PlaybackEvent::ReloadDeferred { .. })))
        .await;

    // Same audio, boundaries moved to the new start times.
    let calls = h.transport.calls();
    assert!(h.transport.attached_durations().is_empty());
    let expected: Vec<_> = (0..8).map(|i| secs(i * 6)).collect();
    assert_eq!(
        calls
            .iter()
            .rev()
            .find(|c| matches!(c, TransportCall::SetBoundaries(_))),
        Some(&TransportCall::SetBoundaries(expected))
    );

    let snapshot = h.orchestrator.snapshot().await;
    assert_eq!(snapshot.next_boundary_index, 1);
    assert_eq!(snapshot.current_verse, Some(1));

    h.orchestrator
        .handle_transport_event(TransportEvent::BoundaryCrossed(secs(6)))
        .await;
    let snapshot = h.orchestrator.snapshot().await;
    assert_eq!(snapshot.next_boundary_index, 2);
    assert_eq!(snapshot.current_verse, Some(2));
}

#[tokio::test]
async fn test_rejected_pending_reload_is_kept_for_retry() {
    let mut h = Harness::new().await;
    let gate = Arc::new(Notify::new());
    load_progressive(&h, gate.clone()).await;

    h.transport.set_position(secs(2));
    gate.notify_one();
    h.wait_for(|e| is_playback(e, |p| matches!(p, PlaybackEvent::ReloadDeferred { .. })))
        .await;

    h.transport.fail_attach(true);
    h.orchestrator.pause().await.unwrap();

    let snapshot = h.orchestrator.snapshot().await;
    assert_eq!(snapshot.state, PlaybackPhase::Paused);
    assert!(snapshot.has_pending_reload);
    assert_eq!(snapshot.duration, secs(20));

    // The end of the quick-start audio is not the end of the chapter.
    h.orchestrator.play().await.unwrap();
    h.orchestrator
        .handle_transport_event(TransportEvent::ReachedEnd)
        .await;
    assert!(h.orchestrator.snapshot().await.has_pending_reload);

    h.transport.fail_attach(false);
    h.orchestrator
        .handle_transport_event(TransportEvent::ReachedEnd)
        .await;

    assert_eq!(h.transport.attached_durations(), vec![secs(20), secs(40)]);
    let snapshot = h.orchestrator.snapshot().await;
    assert_eq!(snapshot.state, PlaybackPhase::Playing);
    assert_eq!(snapshot.duration, secs(40));
    assert_eq!(snapshot.position, secs(20));
    assert!(!snapshot.has_pending_reload);

    let events = h.events.drain();
    assert!(!events
        .iter()
        .any(|e| is_playback(e, |p| matches!(p, PlaybackEvent::ChapterFinished { .. }))));
    assert!(events.iter().any(|e| is_playback(e, |p| matches!(
        p,
        PlaybackEvent::Error {
            recoverable: true,
            ..
        }
    ))));
}

/// Quick-start of 4 verses (20s), then a progressive update to 6 verses (30s)
/// once `gate` is released. Completion never arrives.
async fn load_with_progressive_update(h: &Harness, gate: Arc<Notify>) {
    let chapter = chapter("luke-1", 8);
    let key = chapter.cache_key(VoiceFamily::Network, 1.0);
    h.generator.push(
        Script::completes(rendition(&key, timings(8, 5.0), true))
            .then(Step::QuickStart(rendition(&key, timings(4, 5.0), false)))
            .then(Step::Wait(gate))
            .then(Step::Update(rendition(&key, timings(6, 5.0), false).into()))
            .then(Step::Wait(Arc::new(Notify::new()))),
    );
    h.orchestrator.load(chapter, true).await.unwrap();
}

#[tokio::test]
async fn test_progressive_update_is_deferred_while_playing() {
    let mut h = Harness::new().await;
    let gate = Arc::new(Notify::new());
    load_with_progressive_update(&h, gate.clone()).await;

    h.transport.set_position(secs(2));
    gate.notify_one();
    h.wait_for(|e| is_playback(e, |p| matches!(p, PlaybackEvent::ReloadDeferred { .. })))
        .await;

    assert_eq!(h.transport.attached_durations(), vec![secs(20)]);
    let snapshot = h.orchestrator.snapshot().await;
    assert!(snapshot.has_pending_reload);
    assert!(snapshot.generation_progress < 1.0);

    h.transport.set_position(secs(16));
    h.orchestrator
        .handle_transport_event(TransportEvent::PositionChanged(secs(16)))
        .await;

    assert_eq!(h.transport.attached_durations(), vec![secs(20), secs(30)]);
    let snapshot = h.orchestrator.snapshot().await;
    assert_eq!(snapshot.state, PlaybackPhase::Playing);
    assert_eq!(snapshot.duration, secs(30));
    assert!(!snapshot.has_pending_reload);
    assert!(snapshot.generation_progress < 1.0);
}

#[tokio::test]
async fn test_progressive_update_rebuilds_while_paused() {
    let mut h = Harness::new().await;
    let gate = Arc::new(Notify::new());
    load_with_progressive_update(&h, gate.clone()).await;

    h.orchestrator.pause().await.unwrap();
    h.transport.set_position(secs(4));
    h.transport.clear_calls();
    gate.notify_one();
    h.wait_for(|e| is_playback(e, |p| matches!(p, PlaybackEvent::ReloadApplied { .. })))
        .await;

    let calls = h.transport.calls();
    assert_eq!(h.transport.attached_durations(), vec![secs(30)]);
    assert!(calls.contains(&TransportCall::Seek(secs(4))));
    assert!(!calls.contains(&TransportCall::Play));

    let snapshot = h.orchestrator.snapshot().await;
    assert_eq!(snapshot.state, PlaybackPhase::Paused);
    assert_eq!(snapshot.duration, secs(30));
    assert_eq!(snapshot.position, secs(4));
}

#[tokio::test]
async fn test_timings_only_update_moves_verse_in_place() {
    let mut h = Harness::new().await;
    let chapter = chapter("luke-2", 4);
    let key = chapter.cache_key(VoiceFamily::Network, 1.0);
    let gate = Arc::new(Notify::new());
    h.generator.push(
        Script::completes(rendition(&key, timings(4, 6.0), true))
            .then(Step::QuickStart(rendition(&key, timings(4, 5.0), false)))
            .then(Step::Wait(gate.clone()))
            .then(Step::Update(ProgressiveUpdate {
                key: key.clone(),
                timings: timings(4, 6.0),
                manifest: None,
            }))
            .then(Step::Wait(Arc::new(Notify::new()))),
    );
    h.orchestrator.load(chapter, true).await.unwrap();

    h.orchestrator
        .handle_transport_event(TransportEvent::PositionChanged(secs(11)))
        .await;
    h.transport.clear_calls();
    gate.notify_one();
    h.wait_for(|e| {
        is_playback(e, |p| {
            matches!(p, PlaybackEvent::VerseChanged { verse_number: 2, .. })
        })
    })
    .await;

    assert!(h.transport.attached_durations().is_empty());
    assert!(h.transport.calls().contains(&TransportCall::SetBoundaries(vec![
        secs(0),
        secs(6),
        secs(12),
        secs(18)
    ])));
    let snapshot = h.orchestrator.snapshot().await;
    assert_eq!(snapshot.next_boundary_index, 2);
    assert!(!snapshot.has_pending_reload);
}

// ============================================================================
// Transport events and controls
// ============================================================================

#[tokio::test]
async fn test_boundary_crossing_and_seek_track_verses() {
    let mut h = Harness::new().await;
    load_cached(&h, "ruth-1", 3, true).await;

    h.orchestrator
        .handle_transport_event(TransportEvent::BoundaryCrossed(secs(5)))
        .await;
    assert_eq!(h.orchestrator.snapshot().await.current_verse, Some(2));

    h.orchestrator.seek(secs(12)).await.unwrap();
    let snapshot = h.orchestrator.snapshot().await;
    assert_eq!(snapshot.current_verse, Some(3));
    assert_eq!(snapshot.next_boundary_index, 3);

    h.orchestrator.seek(secs(99)).await.unwrap();
    assert_eq!(h.orchestrator.snapshot().await.position, secs(15));

    let verses: Vec<u32> = h
        .events
        .drain()
        .into_iter()
        .filter_map(|e| match e {
            CoreEvent::Playback(PlaybackEvent::VerseChanged { verse_number, .. }) => {
                Some(verse_number)
            }
            _ => None,
        })
        .collect();
    assert_eq!(verses, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_true_end_finishes_chapter_and_play_restarts() {
    let mut h = Harness::new().await;
    load_cached(&h, "ruth-2", 2, true).await;

    h.orchestrator
        .handle_transport_event(TransportEvent::ReachedEnd)
        .await;
    h.wait_for(|e| is_playback(e, |p| matches!(p, PlaybackEvent::ChapterFinished { .. })))
        .await;
    assert_eq!(h.orchestrator.snapshot().await.state, PlaybackPhase::Finished);

    h.transport.clear_calls();
    h.orchestrator.play().await.unwrap();
    assert_eq!(
        h.transport.calls(),
        vec![TransportCall::Seek(secs(0)), TransportCall::Play]
    );
    assert_eq!(h.orchestrator.snapshot().await.state, PlaybackPhase::Playing);
}

#[tokio::test]
async fn test_interruptions_resume_only_what_they_paused() {
    let h = Harness::new().await;
    load_cached(&h, "ruth-3", 2, true).await;

    h.orchestrator
        .handle_transport_event(TransportEvent::InterruptionBegan)
        .await;
    assert_eq!(h.orchestrator.snapshot().await.state, PlaybackPhase::Paused);

    h.orchestrator
        .handle_transport_event(TransportEvent::InterruptionEnded { should_resume: true })
        .await;
    assert_eq!(h.orchestrator.snapshot().await.state, PlaybackPhase::Playing);

    // Paused by the user: an interruption must not start playback.
    h.orchestrator.pause().await.unwrap();
    h.orchestrator
        .handle_transport_event(TransportEvent::InterruptionBegan)
        .await;
    h.orchestrator
        .handle_transport_event(TransportEvent::InterruptionEnded { should_resume: true })
        .await;
    assert_eq!(h.orchestrator.snapshot().await.state, PlaybackPhase::Paused);

    // The system asks not to resume.
    h.orchestrator.play().await.unwrap();
    h.orchestrator
        .handle_transport_event(TransportEvent::InterruptionBegan)
        .await;
    h.orchestrator
        .handle_transport_event(TransportEvent::InterruptionEnded {
            should_resume: false,
        })
        .await;
    assert_eq!(h.orchestrator.snapshot().await.state, PlaybackPhase::Paused);
}

#[tokio::test]
async fn test_output_device_loss_pauses_without_resume() {
    let h = Harness::new().await;
    load_cached(&h, "ruth-4", 2, true).await;

    h.orchestrator
        .handle_transport_event(TransportEvent::InterruptionBegan)
        .await;
    h.orchestrator
        .handle_transport_event(TransportEvent::OutputDeviceLost)
        .await;
    h.orchestrator
        .handle_transport_event(TransportEvent::InterruptionEnded { should_resume: true })
        .await;

    assert_eq!(h.orchestrator.snapshot().await.state, PlaybackPhase::Paused);
}

#[tokio::test]
async fn test_controls_without_chapter() {
    let h = Harness::new().await;

    assert!(matches!(
        h.orchestrator.play().await,
        Err(PlaybackError::NoChapterLoaded)
    ));
    assert!(matches!(
        h.orchestrator.seek(secs(1)).await,
        Err(PlaybackError::NoChapterLoaded)
    ));
}

#[tokio::test]
async fn test_stop_unloads_and_returns_to_idle() {
    let h = Harness::new().await;
    load_cached(&h, "ruth-1", 2, true).await;

    h.orchestrator.stop().await;

    assert!(h.transport.calls().contains(&TransportCall::Unload));
    let snapshot = h.orchestrator.snapshot().await;
    assert_eq!(snapshot.state, PlaybackPhase::Idle);
    assert_eq!(snapshot.chapter_id, None);
}

// ============================================================================
// Prefetch
// ============================================================================

#[tokio::test]
async fn test_load_adopts_running_prefetch() {
    let mut h = Harness::new().await;
    let chapter = chapter("mark-1", 6);
    let key = chapter.cache_key(VoiceFamily::Network, 1.0);
    let gate = Arc::new(Notify::new());
    h.generator.push(
        Script::completes(rendition(&key, timings(6, 5.0), true))
            .then(Step::QuickStart(rendition(&key, timings(2, 5.0), false)))
            .then(Step::Wait(gate.clone())),
    );

    h.orchestrator.prefetch(chapter.clone()).await.unwrap();
    assert_eq!(h.orchestrator.prefetch_key(), Some(key));

    h.orchestrator.load(chapter, true).await.unwrap();
    assert_eq!(h.orchestrator.prefetch_key(), None);

    gate.notify_one();
    h.wait_for(|e| is_playback(e, |p| matches!(p, PlaybackEvent::ReloadApplied { .. })))
        .await;

    assert_eq!(h.generator.calls(), 1);
    assert_eq!(h.transport.attached_durations(), vec![secs(10), secs(30)]);
}

#[tokio::test]
async fn test_prefetch_skips_cached_chapter() {
    let h = Harness::new().await;
    let chapter = chapter("mark-2", 2);
    h.cache
        .put(
            Bytes::from_static(b"audio"),
            &timings(2, 5.0),
            &chapter.cache_key(VoiceFamily::Device, 1.0),
        )
        .await
        .unwrap();

    h.orchestrator.prefetch(chapter).await.unwrap();

    assert_eq!(h.orchestrator.prefetch_key(), None);
    assert_eq!(h.generator.calls(), 0);
}

#[tokio::test]
async fn test_new_prefetch_replaces_previous() {
    let mut h = Harness::new().await;
    let first = chapter("mark-3", 2);
    let second = chapter("mark-4", 2);
    let second_key = second.cache_key(VoiceFamily::Network, 1.0);
    h.generator.push(
        Script::completes(rendition(
            &first.cache_key(VoiceFamily::Network, 1.0),
            timings(2, 5.0),
            true,
        ))
        .then(Step::Wait(Arc::new(Notify::new()))),
    );
    h.generator.push(
        Script::completes(rendition(&second_key, timings(2, 5.0), true))
            .then(Step::Wait(Arc::new(Notify::new()))),
    );

    h.orchestrator.prefetch(first).await.unwrap();
    h.orchestrator.prefetch(second).await.unwrap();

    assert_eq!(h.orchestrator.prefetch_key(), Some(second_key));
    h.wait_for(|e| matches!(e, CoreEvent::Generation(GenerationEvent::Cancelled { .. })))
        .await;
}

// ============================================================================
// Sleep timer
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_countdown_sleep_timer_pauses() {
    let mut h = Harness::new().await;
    load_cached(&h, "luke-1", 2, true).await;

    h.orchestrator
        .set_sleep_timer(SleepTimerMode::Countdown(secs(3)));
    assert_eq!(
        h.orchestrator.snapshot().await.sleep_timer_remaining,
        Some(secs(3))
    );

    h.wait_for(|e| matches!(e, CoreEvent::SleepTimer(SleepTimerEvent::Fired { .. })))
        .await;

    assert_eq!(h.transport.count(&TransportCall::Pause), 1);
    let snapshot = h.orchestrator.snapshot().await;
    assert_eq!(snapshot.state, PlaybackPhase::Paused);
    assert_eq!(snapshot.sleep_timer_remaining, None);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_sleep_timer_never_fires() {
    let mut h = Harness::new().await;
    load_cached(&h, "luke-2", 2, true).await;

    h.orchestrator
        .set_sleep_timer(SleepTimerMode::Countdown(secs(3)));
    h.orchestrator.cancel_sleep_timer();
    tokio::time::sleep(secs(10)).await;

    let fired = h
        .events
        .drain()
        .into_iter()
        .any(|e| matches!(e, CoreEvent::SleepTimer(SleepTimerEvent::Fired { .. })));
    assert!(!fired);
    assert_eq!(h.orchestrator.snapshot().await.state, PlaybackPhase::Playing);
}

#[tokio::test]
async fn test_end_of_chapter_timer_waits_for_true_end() {
    let mut h = Harness::new().await;
    let gate = Arc::new(Notify::new());
    load_progressive(&h, gate.clone()).await;
    h.orchestrator.set_sleep_timer(SleepTimerMode::EndOfChapter);

    // End of the quick-start audio while the rest is still generating.
    h.orchestrator
        .handle_transport_event(TransportEvent::ReachedEnd)
        .await;
    assert_eq!(h.orchestrator.snapshot().await.state, PlaybackPhase::Finished);

    gate.notify_one();
    h.wait_for(|e| is_playback(e, |p| matches!(p, PlaybackEvent::ReloadApplied { .. })))
        .await;
    assert_eq!(h.orchestrator.snapshot().await.state, PlaybackPhase::Playing);
    let early = h
        .events
        .drain()
        .into_iter()
        .any(|e| matches!(e, CoreEvent::SleepTimer(SleepTimerEvent::Fired { .. })));
    assert!(!early);

    h.orchestrator
        .handle_transport_event(TransportEvent::ReachedEnd)
        .await;
    h.wait_for(|e| matches!(e, CoreEvent::SleepTimer(SleepTimerEvent::Fired { .. })))
        .await;
    assert_eq!(h.orchestrator.snapshot().await.state, PlaybackPhase::Finished);
}
