//! Cancellable one-shot timers on the tokio clock.
//!
//! A fired timer delivers its payload through the sink given to
//! [`TimerService::new`]. Cancellation and firing race on a single flag, so
//! exactly one of them wins: either the payload is delivered, or
//! [`TimerService::cancel`] returns [`CancelOutcome::Cancelled`].

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;

/// Identity of a scheduled timer, unique within one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// Outcome of [`TimerService::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The timer will never fire.
    Cancelled,
    /// Too late: the payload was already handed to the sink.
    AlreadyFired,
}

/// A pending timer.
#[derive(Debug)]
pub struct TimerHandle {
    id: TimerId,
    settled: Arc<AtomicBool>,
    task: AbortHandle,
}

impl TimerHandle {
    pub fn id(&self) -> TimerId {
        self.id
    }
}

pub struct TimerService<P> {
    next_id: AtomicU64,
    sink: Arc<dyn Fn(TimerId, P) + Send + Sync>,
}

impl<P> fmt::Debug for TimerService<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerService")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish()
    }
}

impl<P: Send + 'static> TimerService<P> {
    pub fn new(sink: impl Fn(TimerId, P) + Send + Sync + 'static) -> Self {
        Self { next_id: AtomicU64::new(1), sink: Arc::new(sink) }
    }

    /// Deliver `payload` to the sink after `delay`. Must be called from
    /// within a tokio runtime.
    pub fn schedule_after(&self, delay: Duration, payload: P) -> TimerHandle {
        let id = TimerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let settled = Arc::new(AtomicBool::new(false));

        let sink = Arc::clone(&self.sink);
        let flag = Arc::clone(&settled);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !flag.swap(true, Ordering::AcqRel) {
                sink(id, payload);
            }
        });

        TimerHandle { id, settled, task: task.abort_handle() }
    }

    pub fn cancel(&self, handle: TimerHandle) -> CancelOutcome {
        if handle.settled.swap(true, Ordering::AcqRel) {
            CancelOutcome::AlreadyFired
        } else {
            handle.task.abort();
            CancelOutcome::Cancelled
        }
    }
}
