//! Playback session state.
//!
//! One tagged value per orchestrator, so combinations such as "finished with
//! no chapter" cannot be represented.

use crate::generation::GenerationHandle;
use crate::models::{CacheKey, Chapter};
use crate::orchestrator::boundary::BoundaryTracker;
use crate::orchestrator::reload::PendingReload;
use core_runtime::events::PlaybackPhase;
use std::time::Duration;

#[derive(Debug, Default)]
pub enum Session {
    #[default]
    Idle,
    Loading(LoadingSession),
    Attached(AttachedSession),
    Failed {
        chapter_id: String,
        message: String,
    },
}

impl Session {
    /// Observable state.
    pub fn phase(&self) -> PlaybackPhase {
        match self {
            Session::Idle => PlaybackPhase::Idle,
            Session::Loading(_) => PlaybackPhase::Ready,
            Session::Attached(attached) => attached.state,
            Session::Failed { .. } => PlaybackPhase::Error,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Session::Loading(_))
    }

    pub fn load_id(&self) -> Option<u64> {
        match self {
            Session::Loading(loading) => Some(loading.load_id),
            Session::Attached(attached) => Some(attached.load_id),
            _ => None,
        }
    }

    /// Whether events for `load_id` still apply to this session.
    pub fn is_current(&self, load_id: u64) -> bool {
        self.load_id() == Some(load_id)
    }

    pub fn chapter_id(&self) -> Option<&str> {
        match self {
            Session::Idle => None,
            Session::Loading(loading) => Some(&loading.chapter.id),
            Session::Attached(attached) => Some(&attached.chapter.id),
            Session::Failed { chapter_id, .. } => Some(chapter_id),
        }
    }

    /// Generation task tied to this session, if any.
    pub fn generation(&self) -> Option<&GenerationHandle> {
        match self {
            Session::Loading(loading) => loading.generation.as_ref(),
            Session::Attached(attached) => attached.generation.as_ref(),
            _ => None,
        }
    }
}

/// Load accepted, nothing attached yet.
#[derive(Debug)]
pub struct LoadingSession {
    pub load_id: u64,
    pub chapter: Chapter,
    pub key: CacheKey,
    /// Start playback as soon as audio is attached.
    pub play_requested: bool,
    pub generation: Option<GenerationHandle>,
    pub progress: f32,
}

impl LoadingSession {
    pub fn new(load_id: u64, chapter: Chapter, key: CacheKey, play_requested: bool) -> Self {
        Self {
            load_id,
            chapter,
            key,
            play_requested,
            generation: None,
            progress: 0.0,
        }
    }
}

/// Audio attached to the transport.
#[derive(Debug)]
pub struct AttachedSession {
    pub load_id: u64,
    pub chapter: Chapter,
    /// Key of the attached audio.
    pub key: CacheKey,
    /// One of `Ready`, `Playing`, `Paused`, `Finished`.
    pub state: PlaybackPhase,
    pub position: Duration,
    pub duration: Duration,
    pub tracker: BoundaryTracker,
    pub pending: Option<PendingReload>,
    pub generation: Option<GenerationHandle>,
    /// More audio is still being generated for this chapter.
    pub content_pending: bool,
    pub progress: f32,
    /// Set when an interruption paused playback that should come back.
    pub resume_after_interruption: bool,
}

impl AttachedSession {
    /// True end of the chapter: nothing pending, nothing generating.
    pub fn at_true_end(&self) -> bool {
        self.pending.is_none() && !self.content_pending
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlaybackPhase::Playing
    }
}

/// Read-only view of the orchestrator for UI layers.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSnapshot {
    pub state: PlaybackPhase,
    pub is_loading: bool,
    pub chapter_id: Option<String>,
    pub position: Duration,
    pub duration: Duration,
    pub current_verse: Option<u32>,
    pub next_boundary_index: usize,
    /// Generation progress in `[0, 1]`; `1.0` once nothing is pending.
    pub generation_progress: f32,
    pub sleep_timer_remaining: Option<Duration>,
    pub has_pending_reload: bool,
    pub error: Option<String>,
}

impl PlaybackSnapshot {
    pub fn from_session(session: &Session) -> Self {
        let mut snapshot = Self {
            state: session.phase(),
            is_loading: session.is_loading(),
            chapter_id: session.chapter_id().map(str::to_string),
            position: Duration::ZERO,
            duration: Duration::ZERO,
            current_verse: None,
            next_boundary_index: 0,
            generation_progress: 0.0,
            sleep_timer_remaining: None,
            has_pending_reload: false,
            error: None,
        };

        match session {
            Session::Loading(loading) => snapshot.generation_progress = loading.progress,
            Session::Attached(attached) => {
                snapshot.position = attached.position;
                snapshot.duration = attached.duration;
                snapshot.current_verse = attached.tracker.current_verse();
                snapshot.next_boundary_index = attached.tracker.next_index();
                snapshot.has_pending_reload = attached.pending.is_some();
                snapshot.generation_progress = if attached.content_pending {
                    attached.progress
                } else {
                    1.0
                };
            }
            Session::Failed { message, .. } => snapshot.error = Some(message.clone()),
            Session::Idle => {}
        }

        snapshot
    }
}
