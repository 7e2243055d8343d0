//! ReminderEngine: the facade every caller (CLI, daemon, timers) goes through.
//!
//! One mutex covers the task store, the scheduler's armed set and the store
//! revision, so "read task, plan, arm" is atomic with respect to other
//! mutations and to firing timers. Timer callbacks hold only a weak reference
//! plus `(key, arm_id)` and re-enter through the same lock.
//!
//! Persistence and notification emission happen after the lock is released.
//! Writes are ordered by revision in the [`PersistGate`], so a slow writer can
//! never clobber a newer snapshot.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{Duration, NaiveDateTime};
use tracing::{debug, error, info};

use crate::clock::{Clock, TimerCallback};
use crate::dispatcher::{dispatch_alert, DispatchOutcome};
use crate::error::{EngineError, Result, ValidationError};
use crate::merge::merge_task_lists;
use crate::notify::{NotificationIntent, NotificationSink};
use crate::overdue::{self, SweepReport};
use crate::persistence::{PersistGate, PersistHealth, Persistence};
use crate::reminders::{AlertEntry, AlertKey, AlertKind};
use crate::scheduler::{FireCallbackFactory, ScheduleReport, Scheduler};
use crate::task::{Task, TaskDraft, TaskId, TaskPatch, TaskStatus};
use crate::task_store::{TaskFilter, TaskSort, TaskStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// How long a still-armed due timer may lag before the sweep flags its
    /// task overdue anyway.
    pub overdue_grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            overdue_grace: Duration::seconds(60),
        }
    }
}

impl EngineConfig {
    pub fn with_overdue_grace(mut self, grace: Duration) -> Self {
        self.overdue_grace = grace;
        self
    }
}

/// Degraded-mode and count summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStatus {
    pub pending: usize,
    pub overdue: usize,
    pub completed: usize,
    pub armed: usize,
    pub arm_failures: u64,
    pub persistence: PersistHealth,
}

impl EngineStatus {
    pub fn total(&self) -> usize {
        self.pending + self.overdue + self.completed
    }

    pub fn is_degraded(&self) -> bool {
        self.arm_failures > 0 || self.persistence.dirty
    }
}

#[derive(Default)]
struct EngineState {
    store: TaskStore,
    scheduler: Scheduler,
    /// Bumped on every store change; orders persistence writes.
    revision: u64,
}

struct Shared {
    state: Mutex<EngineState>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn NotificationSink>,
    persist: PersistGate,
    config: EngineConfig,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Borrowed view handed to mutation bodies while the engine lock is held.
struct Tx<'a> {
    store: &'a mut TaskStore,
    scheduler: &'a mut Scheduler,
    clock: &'a dyn Clock,
    on_fire: FireCallbackFactory<'a>,
    now: NaiveDateTime,
}

impl Tx<'_> {
    fn schedule(&mut self, id: TaskId) -> ScheduleReport {
        match self.store.get(id) {
            Some(task) => self.scheduler.schedule(task, self.clock, self.on_fire),
            None => ScheduleReport::default(),
        }
    }

    fn rebuild(&mut self) -> ScheduleReport {
        self.scheduler.rebuild_all(self.store.iter(), self.clock, self.on_fire)
    }

    fn existing(&mut self, id: TaskId) -> Result<&mut Task> {
        self.store.get_mut(id).ok_or(EngineError::NotFound(id))
    }
}

#[derive(Clone)]
pub struct ReminderEngine {
    shared: Arc<Shared>,
}

impl ReminderEngine {
    pub fn new(
        clock: Arc<dyn Clock>,
        sink: Arc<dyn NotificationSink>,
        persistence: Arc<dyn Persistence>,
        config: EngineConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(EngineState::default()),
                clock,
                sink,
                persist: PersistGate::new(persistence),
                config,
            }),
        }
    }

    pub fn config(&self) -> EngineConfig {
        self.shared.config
    }

    pub fn now(&self) -> NaiveDateTime {
        self.shared.clock.now()
    }

    /// Replace the store with what persistence holds. Cancels every armed
    /// timer; callers follow up with a sweep and [`Self::rebuild_schedule`].
    pub fn load(&self) -> Result<usize> {
        let tasks = self
            .shared
            .persist
            .load()
            .map_err(|e| EngineError::Persistence(format!("{e:#}")))?;

        let store = TaskStore::from_tasks(tasks.clone())?;

        let mut state = self.shared.lock_state();
        let state = &mut *state;
        state.scheduler.cancel_all(&*self.shared.clock);
        state.store = store;
        state.revision += 1;
        self.shared.persist.mark_clean(state.revision, &tasks);

        info!(tasks = state.store.len(), "tasks loaded");
        Ok(state.store.len())
    }

    pub fn add_task(&self, draft: TaskDraft) -> Result<Task> {
        draft.validate()?;

        self.mutate(|tx| {
            let id = tx.store.allocate_id()?;
            let task = Task::from_draft(id, draft, tx.now);
            tx.store.insert(task.clone());
            let report = tx.schedule(id);
            info!(task_id = %id, due_at = %task.due_at, armed = report.armed, "task added");
            Ok((task, true))
        })
    }

    /// Apply `patch`. Pending and Overdue tasks come back as Pending with a
    /// fresh plan; Completed tasks keep their status and stay unarmed.
    pub fn edit_task(&self, id: TaskId, patch: TaskPatch) -> Result<Task> {
        patch.validate()?;

        self.mutate(|tx| {
            let task = tx.existing(id)?;
            task.apply(patch);
            if !task.is_completed() {
                let due_at = task.due_at;
                task.reopen(due_at);
            }
            let task = task.clone();
            let report = tx.schedule(id);
            info!(task_id = %id, status = %task.status, armed = report.armed, "task edited");
            Ok((task, true))
        })
    }

    /// Idempotent: completing a completed task changes nothing.
    pub fn complete_task(&self, id: TaskId) -> Result<Task> {
        self.mutate(|tx| {
            let now = tx.now;
            let task = tx.existing(id)?;
            if task.is_completed() {
                return Ok((task.clone(), false));
            }
            task.complete(now);
            let task = task.clone();
            let canceled = tx.scheduler.cancel(id, tx.clock);
            info!(task_id = %id, canceled, "task completed");
            Ok((task, true))
        })
    }

    pub fn delete_task(&self, id: TaskId) -> Result<Task> {
        self.mutate(|tx| {
            let task = tx.store.remove(id).ok_or(EngineError::NotFound(id))?;
            let canceled = tx.scheduler.cancel(id, tx.clock);
            info!(task_id = %id, canceled, "task deleted");
            Ok((task, true))
        })
    }

    /// Reopen a Completed task with its due instant pushed back by `delta`.
    pub fn snooze_task(&self, id: TaskId, delta: Duration) -> Result<Task> {
        if delta <= Duration::zero() {
            return Err(ValidationError::NonPositiveSnooze.into());
        }

        self.mutate(|tx| {
            let task = tx.existing(id)?;
            if !task.is_completed() {
                return Err(EngineError::InvalidTransition {
                    id,
                    status: task.status,
                    action: "snooze",
                });
            }
            let due_at = task
                .due_at
                .checked_add_signed(delta)
                .ok_or(ValidationError::SnoozeOutOfRange)?;
            task.reopen(due_at);
            let task = task.clone();
            let report = tx.schedule(id);
            info!(task_id = %id, due_at = %task.due_at, armed = report.armed, "task snoozed");
            Ok((task, true))
        })
    }

    /// Cancel everything and re-arm every Pending task in store order.
    pub fn rebuild_schedule(&self) -> ScheduleReport {
        let on_fire = fire_callback_factory(&self.shared);
        let mut state = self.shared.lock_state();
        let state = &mut *state;
        let report = state
            .scheduler
            .rebuild_all(state.store.iter(), &*self.shared.clock, &on_fire);
        info!(armed = report.armed, failed = report.failed, "schedule rebuilt");
        report
    }

    /// Append every draft with a fresh id, write once, then rebuild. The whole
    /// batch is rejected if any draft is invalid.
    pub fn import_tasks(&self, drafts: Vec<TaskDraft>) -> Result<Vec<Task>> {
        for draft in &drafts {
            draft.validate()?;
        }

        self.mutate(|tx| {
            let mut imported = Vec::with_capacity(drafts.len());
            for draft in drafts {
                let id = tx.store.allocate_id()?;
                let task = Task::from_draft(id, draft, tx.now);
                tx.store.insert(task.clone());
                imported.push(task);
            }
            let report = tx.rebuild();
            info!(imported = imported.len(), armed = report.armed, "tasks imported");
            let changed = !imported.is_empty();
            Ok((imported, changed))
        })
    }

    pub fn clear_completed(&self) -> Result<usize> {
        self.mutate(|tx| {
            let removed = tx.store.remove_where(Task::is_completed).len();
            tx.rebuild();
            info!(removed, "completed tasks cleared");
            Ok((removed, removed > 0))
        })
    }

    pub fn clear_all(&self) -> Result<usize> {
        self.mutate(|tx| {
            let removed = tx.store.remove_where(|_| true).len();
            tx.scheduler.cancel_all(tx.clock);
            info!(removed, "all tasks cleared");
            Ok((removed, removed > 0))
        })
    }

    /// One overdue reconciler pass. Never emits notifications.
    pub fn sweep_overdue(&self) -> Result<SweepReport> {
        let grace = self.shared.config.overdue_grace;
        self.mutate(|tx| {
            let report = overdue::sweep_overdue(tx.store, tx.scheduler, tx.clock, tx.now, grace);
            let changed = !report.flagged.is_empty();
            Ok((report, changed))
        })
    }

    /// Run the dispatcher for `(id, kind)` as if its timer had fired now.
    pub fn dispatch(&self, id: TaskId, kind: AlertKind) -> Result<DispatchOutcome> {
        let key = AlertKey::new(id, kind);
        let (outcome, now, write) = {
            let mut state = self.shared.lock_state();
            let state = &mut *state;
            let now = self.shared.clock.now();
            let outcome = dispatch_alert(&mut state.store, &mut state.scheduler, &*self.shared.clock, key, now);
            let write = outcome.mutated().then(|| {
                state.revision += 1;
                (state.revision, state.store.tasks().to_vec())
            });
            (outcome, now, write)
        };

        finish_dispatch(&self.shared, key, &outcome, now, write)?;
        Ok(outcome)
    }

    pub fn task(&self, id: TaskId) -> Option<Task> {
        self.shared.lock_state().store.get(id).cloned()
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.shared.lock_state().store.tasks().to_vec()
    }

    pub fn list(&self, filter: &TaskFilter, sort: TaskSort) -> Vec<Task> {
        self.shared.lock_state().store.query(filter, sort)
    }

    pub fn armed_alerts(&self) -> Vec<AlertEntry> {
        self.shared.lock_state().scheduler.armed_entries()
    }

    pub fn armed_for(&self, id: TaskId) -> Vec<AlertEntry> {
        self.shared.lock_state().scheduler.armed_for(id)
    }

    pub fn status(&self) -> EngineStatus {
        let state = self.shared.lock_state();
        EngineStatus {
            pending: state.store.count(TaskStatus::Pending),
            overdue: state.store.count(TaskStatus::Overdue),
            completed: state.store.count(TaskStatus::Completed),
            armed: state.scheduler.len(),
            arm_failures: state.scheduler.arm_failures(),
            persistence: self.shared.persist.health(),
        }
    }

    /// Write the current snapshot if anything is unsaved.
    pub fn flush(&self) -> Result<()> {
        let (revision, snapshot) = {
            let state = self.shared.lock_state();
            (state.revision, state.store.tasks().to_vec())
        };
        self.shared.persist.flush(revision, &snapshot)
    }

    /// Merge the list another process wrote with ours, re-plan every alert
    /// and save the result. Changes on both sides survive; see
    /// [`merge_task_lists`] for how one task changed on both sides resolves.
    ///
    /// Returns [`EngineError::Conflict`] if storage moved again before the
    /// merged list could be written; calling again picks that up too.
    pub fn reconcile(&self) -> Result<ScheduleReport> {
        let on_fire = fire_callback_factory(&self.shared);

        let (report, revision, snapshot) = {
            let mut state = self.shared.lock_state();
            let state = &mut *state;
            let theirs = self
                .shared
                .persist
                .load()
                .map_err(|e| EngineError::Persistence(format!("{e:#}")))?;
            let base = self.shared.persist.synced();
            let merged = merge_task_lists(&base, state.store.tasks(), &theirs);
            let store = TaskStore::from_tasks(merged)?;

            state.scheduler.cancel_all(&*self.shared.clock);
            state.store = store;
            state.revision += 1;
            self.shared.persist.mark_synced(&theirs);
            let report = state
                .scheduler
                .rebuild_all(state.store.iter(), &*self.shared.clock, &on_fire);
            info!(
                theirs = theirs.len(),
                merged = state.store.len(),
                armed = report.armed,
                "merged task list changed by another process"
            );
            (report, state.revision, state.store.tasks().to_vec())
        };

        // Written even when equal to theirs: a timer write that raced the
        // reload may have replaced it since.
        self.shared.persist.write(revision, &snapshot)?;
        Ok(report)
    }

    /// Cancel every timer, then flush.
    pub fn shutdown(&self) -> Result<()> {
        let canceled = {
            let mut state = self.shared.lock_state();
            state.scheduler.cancel_all(&*self.shared.clock)
        };
        debug!(canceled, "timers canceled for shutdown");
        self.flush()
    }

    /// Run `op` under the engine lock. `op` returns its value plus whether the
    /// store changed; a change bumps the revision and writes a snapshot once
    /// the lock is released.
    fn mutate<T>(&self, op: impl FnOnce(&mut Tx<'_>) -> Result<(T, bool)>) -> Result<T> {
        let on_fire = fire_callback_factory(&self.shared);

        let (value, write) = {
            let mut guard = self.shared.lock_state();
            let state = &mut *guard;
            let mut tx = Tx {
                store: &mut state.store,
                scheduler: &mut state.scheduler,
                clock: &*self.shared.clock,
                on_fire: &on_fire,
                now: self.shared.clock.now(),
            };
            let (value, changed) = op(&mut tx)?;
            let write = changed.then(|| {
                state.revision += 1;
                (state.revision, state.store.tasks().to_vec())
            });
            (value, write)
        };

        if let Some((revision, snapshot)) = write {
            self.shared.persist.write(revision, &snapshot)?;
        }
        Ok(value)
    }
}

fn fire_callback_factory(shared: &Arc<Shared>) -> impl Fn(AlertKey, u64) -> TimerCallback {
    let weak: Weak<Shared> = Arc::downgrade(shared);
    move |key, arm_id| {
        let weak = weak.clone();
        Box::new(move || {
            if let Some(shared) = weak.upgrade() {
                on_timer(&shared, key, arm_id);
            }
        })
    }
}

/// Timer entry point. Stale fires (canceled or superseded arming) stop at the
/// scheduler claim; the dispatcher's status guard covers the rest.
fn on_timer(shared: &Arc<Shared>, key: AlertKey, arm_id: u64) {
    let (outcome, now, write) = {
        let mut state = shared.lock_state();
        let state = &mut *state;
        if !state.scheduler.claim_fired(key, arm_id) {
            debug!(alert = %key, arm_id, "stale timer fire ignored");
            return;
        }
        let now = shared.clock.now();
        let outcome = dispatch_alert(&mut state.store, &mut state.scheduler, &*shared.clock, key, now);
        let write = outcome.mutated().then(|| {
            state.revision += 1;
            (state.revision, state.store.tasks().to_vec())
        });
        (outcome, now, write)
    };

    if let Err(e) = finish_dispatch(shared, key, &outcome, now, write) {
        error!(alert = %key, error = %e, "could not persist fired alert; will retry");
    }
}

/// Emit the intent first, then write, so a slow disk never delays the alert.
fn finish_dispatch(
    shared: &Shared,
    key: AlertKey,
    outcome: &DispatchOutcome,
    fired_at: NaiveDateTime,
    write: Option<(u64, Vec<Task>)>,
) -> Result<()> {
    let task = match outcome {
        DispatchOutcome::Completed(task) | DispatchOutcome::Reminded(task) => task,
        DispatchOutcome::Ignored(_) => return Ok(()),
    };

    shared.sink.emit(&NotificationIntent {
        kind: key.kind,
        task: task.clone(),
        fired_at,
    });

    match write {
        Some((revision, snapshot)) => shared.persist.write(revision, &snapshot),
        None => Ok(()),
    }
}
