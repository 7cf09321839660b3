//! Sleep timer.

use core_async::sync::CancellationToken;
use core_runtime::events::{CoreEvent, EventBus, SleepTimerEvent};
use futures::future::{select, Either};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// When playback should stop by itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepTimerMode {
    /// Pause once this much time has passed.
    Countdown(Duration),
    /// Stop at the true end of the chapter, not at the end of a partial
    /// composition that more audio will extend.
    EndOfChapter,
}

impl SleepTimerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SleepTimerMode::Countdown(_) => "countdown",
            SleepTimerMode::EndOfChapter => "end_of_chapter",
        }
    }
}

impl fmt::Display for SleepTimerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An armed timer.
#[derive(Debug)]
pub(crate) struct SleepTimer {
    pub id: Uuid,
    pub mode: SleepTimerMode,
    cancel: CancellationToken,
    remaining: Arc<Mutex<Option<Duration>>>,
}

impl SleepTimer {
    pub fn new(mode: SleepTimerMode) -> Self {
        let remaining = match mode {
            SleepTimerMode::Countdown(duration) => Some(duration),
            SleepTimerMode::EndOfChapter => None,
        };
        Self {
            id: Uuid::new_v4(),
            mode,
            cancel: CancellationToken::new(),
            remaining: Arc::new(Mutex::new(remaining)),
        }
    }

    /// Time left on a countdown.
    pub fn remaining(&self) -> Option<Duration> {
        *self.remaining.lock()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Ticks `remaining` down every `tick`, then runs `on_expire`.
    ///
    /// Returns without calling `on_expire` if the timer is cancelled first.
    pub fn countdown<F, Fut>(
        &self,
        tick: Duration,
        events: EventBus,
        on_expire: F,
    ) -> impl Future<Output = ()> + Send + 'static
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = self.cancel.clone();
        let remaining = Arc::clone(&self.remaining);

        async move {
            loop {
                let left = remaining.lock().unwrap_or(Duration::ZERO);
                if left.is_zero() {
                    break;
                }
                let step = tick.min(left);

                let cancelled = pin!(cancel.cancelled());
                let elapsed = pin!(core_async::sleep(step));
                if let Either::Left(_) = select(cancelled, elapsed).await {
                    debug!("Sleep timer cancelled");
                    return;
                }

                let left = left.saturating_sub(step);
                *remaining.lock() = Some(left);
                if !left.is_zero() {
                    events
                        .emit(CoreEvent::SleepTimer(SleepTimerEvent::Tick {
                            remaining_secs: left.as_secs(),
                        }))
                        .ok();
                }
            }

            if !cancel.is_cancelled() {
                on_expire().await;
            }
        }
    }
}
