//! Clock seam: "now" plus one-shot cancelable timers.
//!
//! The engine never sleeps itself. It asks a [`Clock`] to run a callback after
//! a delay and keeps the returned [`TimerHandle`] so it can cancel it later.
//! Callbacks carry only immutable `(task id, kind)` values; live state is
//! re-read under the engine lock when they fire.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{Duration, NaiveDateTime};

use crate::time::truncate_to_second;

/// Body run when a timer fires. Runs at most once.
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Opaque handle of an armed timer, owned by whoever armed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerHandle(u64);

impl TimerHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClockError {
    #[error("timer capacity exhausted ({limit} armed)")]
    Exhausted { limit: usize },

    #[error("timer facility unavailable: {0}")]
    Unavailable(String),
}

pub trait Clock: Send + Sync {
    /// Local wall-clock now.
    fn now(&self) -> NaiveDateTime;

    /// Run `callback` once after `delay`. Must never run it synchronously.
    fn arm_after(
        &self,
        delay: std::time::Duration,
        callback: TimerCallback,
    ) -> Result<TimerHandle, ClockError>;

    /// After this returns the callback should not start. Unknown or already
    /// fired handles are ignored.
    fn cancel(&self, handle: TimerHandle);
}

struct PendingTimer {
    deadline: NaiveDateTime,
    callback: TimerCallback,
}

struct ManualState {
    now: NaiveDateTime,
    next_handle: u64,
    pending: BTreeMap<u64, PendingTimer>,
    capacity: Option<usize>,
    fail_next: usize,
}

/// Virtual clock for deterministic scheduling.
///
/// Time only moves through [`ManualClock::advance`] / [`ManualClock::advance_to`],
/// which fire due callbacks in deadline order. While a callback runs, `now()`
/// reports that callback's deadline. Callbacks run outside the clock's own
/// lock, so they may arm or cancel timers.
pub struct ManualClock {
    state: Mutex<ManualState>,
}

impl ManualClock {
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            state: Mutex::new(ManualState {
                now: truncate_to_second(start),
                next_handle: 1,
                pending: BTreeMap::new(),
                capacity: None,
                fail_next: 0,
            }),
        }
    }

    /// Refuse to arm more than `limit` concurrent timers.
    pub fn with_capacity(self, limit: usize) -> Self {
        self.lock().capacity = Some(limit);
        self
    }

    /// Make the next `n` arm calls fail as if the timer facility were exhausted.
    pub fn fail_next_arms(&self, n: usize) {
        self.lock().fail_next = n;
    }

    /// Jump to `at` without firing anything (e.g. simulating a process that
    /// was not running).
    pub fn set_now(&self, at: NaiveDateTime) {
        self.lock().now = truncate_to_second(at);
    }

    pub fn advance(&self, by: Duration) -> usize {
        let target = self.now().checked_add_signed(by).unwrap_or(NaiveDateTime::MAX);
        self.advance_to(target)
    }

    /// Move time forward to `target`, firing every timer due on the way.
    /// Returns the number of callbacks run.
    pub fn advance_to(&self, target: NaiveDateTime) -> usize {
        let mut fired = 0;
        loop {
            let next = {
                let mut state = self.lock();
                let due = state
                    .pending
                    .iter()
                    .filter(|(_, t)| t.deadline <= target)
                    .min_by_key(|(id, t)| (t.deadline, **id))
                    .map(|(id, _)| *id);

                match due.and_then(|id| state.pending.remove(&id)) {
                    Some(timer) => {
                        if timer.deadline > state.now {
                            state.now = timer.deadline;
                        }
                        Some(timer.callback)
                    }
                    None => {
                        if target > state.now {
                            state.now = target;
                        }
                        None
                    }
                }
            };

            match next {
                Some(callback) => {
                    callback();
                    fired += 1;
                }
                None => break,
            }
        }
        fired
    }

    pub fn pending_timers(&self) -> usize {
        self.lock().pending.len()
    }

    /// Deadlines of every armed timer, earliest first.
    pub fn deadlines(&self) -> Vec<NaiveDateTime> {
        let mut out: Vec<_> = self.lock().pending.values().map(|t| t.deadline).collect();
        out.sort();
        out
    }

    fn lock(&self) -> MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        self.lock().now
    }

    fn arm_after(
        &self,
        delay: std::time::Duration,
        callback: TimerCallback,
    ) -> Result<TimerHandle, ClockError> {
        let mut state = self.lock();

        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(ClockError::Unavailable("injected arming failure".to_string()));
        }
        if let Some(limit) = state.capacity {
            if state.pending.len() >= limit {
                return Err(ClockError::Exhausted { limit });
            }
        }

        let delay = Duration::from_std(delay).unwrap_or(Duration::MAX);
        let deadline = state.now.checked_add_signed(delay).unwrap_or(NaiveDateTime::MAX);

        let id = state.next_handle;
        state.next_handle += 1;
        state.pending.insert(id, PendingTimer { deadline, callback });
        Ok(TimerHandle(id))
    }

    fn cancel(&self, handle: TimerHandle) {
        self.lock().pending.remove(&handle.0);
    }
}
