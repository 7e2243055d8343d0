//! Alert dispatcher: the body run when an alert timer fires.
//!
//! Runs with the engine lock held. Live state is re-read here; the timer only
//! carried `(task id, kind)`, so a task that was deleted, completed or edited
//! away after arming is simply ignored.

use chrono::NaiveDateTime;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::reminders::{AlertKey, AlertKind};
use crate::scheduler::Scheduler;
use crate::task::{Task, TaskStatus};
use crate::task_store::TaskStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Deleted after the alert was armed.
    Missing,
    NotPending(TaskStatus),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Due alert: task moved to Completed. Carries the post-transition snapshot.
    Completed(Task),
    /// Lead alert: status untouched.
    Reminded(Task),
    Ignored(IgnoreReason),
}

impl DispatchOutcome {
    /// Whether the store changed and needs a write.
    pub fn mutated(&self) -> bool {
        matches!(self, DispatchOutcome::Completed(_))
    }
}

pub fn dispatch_alert(
    store: &mut TaskStore,
    scheduler: &mut Scheduler,
    clock: &dyn Clock,
    key: AlertKey,
    now: NaiveDateTime,
) -> DispatchOutcome {
    // No-op when the timer path already claimed this key.
    scheduler.disarm(key, clock);

    let Some(task) = store.get_mut(key.task_id) else {
        debug!(alert = %key, "alert for missing task ignored");
        return DispatchOutcome::Ignored(IgnoreReason::Missing);
    };

    if task.status != TaskStatus::Pending {
        debug!(alert = %key, status = %task.status, "alert for non-pending task ignored");
        return DispatchOutcome::Ignored(IgnoreReason::NotPending(task.status));
    }

    match key.kind {
        AlertKind::Due => {
            task.complete(now);
            let snapshot = task.clone();
            let canceled = scheduler.cancel(key.task_id, clock);
            info!(task_id = %key.task_id, canceled_leads = canceled, "due alert fired; task completed");
            DispatchOutcome::Completed(snapshot)
        }
        AlertKind::Lead(lead) => {
            info!(task_id = %key.task_id, lead = %lead, "lead alert fired");
            DispatchOutcome::Reminded(task.clone())
        }
    }
}
