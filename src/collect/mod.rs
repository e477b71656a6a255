mod run;

pub use run::Collector;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use crate::model::{RunCounts, RunMode};

/// Lifecycle of a collection run.
///
/// `Idle → Running → {Completed, Paused, Failed}`. `Paused` covers both an
/// explicit cancel and a defensive stop after repeated blocking; a paused
/// historical run resumes from its checkpoint. `Failed` is reserved for
/// storage becoming unreachable, the one condition no retry can fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Paused,
    Failed,
}

/// Why a unit of work was skipped rather than stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum SkipReason {
    /// Storage already holds this match; no detail fetch was made.
    AlreadyStored,
    /// The detail page is gone; permanent, never retried.
    NotFound,
    /// The page fetched but did not parse; raw content is preserved for
    /// offline diagnosis.
    ParseError,
}

/// Point-in-time view of a run for the status surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStatus {
    pub mode: RunMode,
    pub state: RunState,
    pub counts: RunCounts,
}

/// State shared between a run task and its [`RunHandle`].
pub(crate) struct RunShared {
    mode: RunMode,
    state: Mutex<RunState>,
    counts: Mutex<RunCounts>,
    cancelled: AtomicBool,
    /// Match ids currently being processed; guards against two concurrent
    /// attempts for the same id.
    in_flight: Mutex<HashSet<u64>>,
    /// How often the source has blocked us this run; feeds backoff
    /// escalation.
    blocked_strikes: AtomicU32,
}

impl RunShared {
    pub(crate) fn new(mode: RunMode) -> Self {
        Self {
            mode,
            state: Mutex::new(RunState::Idle),
            counts: Mutex::new(RunCounts::default()),
            cancelled: AtomicBool::new(false),
            in_flight: Mutex::new(HashSet::new()),
            blocked_strikes: AtomicU32::new(0),
        }
    }

    pub(crate) fn status(&self) -> RunStatus {
        RunStatus {
            mode: self.mode,
            state: *self.state.lock().unwrap(),
            counts: *self.counts.lock().unwrap(),
        }
    }

    pub(crate) fn set_state(&self, state: RunState) {
        *self.state.lock().unwrap() = state;
    }

    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn counts(&self) -> RunCounts {
        *self.counts.lock().unwrap()
    }

    pub(crate) fn seed_counts(&self, counts: RunCounts) {
        *self.counts.lock().unwrap() = counts;
    }

    pub(crate) fn with_counts(&self, update: impl FnOnce(&mut RunCounts)) {
        update(&mut self.counts.lock().unwrap());
    }

    pub(crate) fn record_skip(&self, reason: SkipReason) {
        self.with_counts(|c| match reason {
            SkipReason::AlreadyStored => c.skipped_already_stored += 1,
            SkipReason::NotFound => c.skipped_not_found += 1,
            SkipReason::ParseError => c.skipped_parse_error += 1,
        });
    }

    /// Claim an id for processing; `false` if an attempt is already in
    /// flight.
    pub(crate) fn try_claim(&self, id: u64) -> bool {
        self.in_flight.lock().unwrap().insert(id)
    }

    pub(crate) fn release(&self, id: u64) {
        self.in_flight.lock().unwrap().remove(&id);
    }

    pub(crate) fn blocked_strike(&self) -> u32 {
        self.blocked_strikes.fetch_add(1, Ordering::SeqCst)
    }
}

/// Handle to a spawned collection run.
pub struct RunHandle {
    shared: std::sync::Arc<RunShared>,
    task: tokio::task::JoinHandle<()>,
}

impl RunHandle {
    pub(crate) fn new(shared: std::sync::Arc<RunShared>, task: tokio::task::JoinHandle<()>) -> Self {
        Self { shared, task }
    }

    /// Current state and aggregate counts.
    pub fn status(&self) -> RunStatus {
        self.shared.status()
    }

    /// Request a stop. Observed at the next suspension point: the run
    /// finishes nothing new, commits a consistent checkpoint and reports
    /// [`RunState::Paused`].
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    /// Wait for the run to reach a terminal state.
    pub async fn wait(self) -> RunStatus {
        // A panicked task is reported through the state it left behind.
        let _ = self.task.await;
        self.shared.status()
    }
}
