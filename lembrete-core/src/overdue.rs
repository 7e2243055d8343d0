//! Overdue reconciler: periodic sweep surfacing due instants that passed
//! without an observed due alert (typically the process was not running).
//!
//! A sweep never emits notifications. A task whose due timer is still armed is
//! left to that timer unless it has lagged past the grace period.

use chrono::{Duration, NaiveDateTime};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::reminders::{AlertKey, AlertKind};
use crate::scheduler::Scheduler;
use crate::task::TaskId;
use crate::task_store::TaskStore;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Tasks moved Pending -> Overdue by this sweep.
    pub flagged: Vec<TaskId>,
    /// Past-due tasks left alone because their due timer may still fire.
    pub deferred: Vec<TaskId>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.flagged.is_empty() && self.deferred.is_empty()
    }
}

pub fn sweep_overdue(
    store: &mut TaskStore,
    scheduler: &mut Scheduler,
    clock: &dyn Clock,
    now: NaiveDateTime,
    grace: Duration,
) -> SweepReport {
    let mut report = SweepReport::default();

    let past_due: Vec<TaskId> = store
        .iter()
        .filter(|t| t.is_pending() && now > t.due_at)
        .map(|t| t.id)
        .collect();

    for id in past_due {
        let Some(task) = store.get_mut(id) else {
            continue;
        };

        let due_armed = scheduler.is_armed(AlertKey::new(id, AlertKind::Due));
        if due_armed && now - task.due_at <= grace {
            report.deferred.push(id);
            continue;
        }

        task.mark_overdue();
        scheduler.cancel(id, clock);
        info!(task_id = %id, due_at = %task.due_at, "task flagged overdue");
        report.flagged.push(id);
    }

    debug!(flagged = report.flagged.len(), deferred = report.deferred.len(), "overdue sweep done");
    report
}
