//! Alert plan primitives: which wall-clock instants a task must alert at.

use std::fmt;

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::task::{LeadTime, Task, TaskId, TaskStatus};

/// What an alert means when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    /// Fires at the due instant and completes the task.
    Due,
    /// Fires `offset` before the due instant; informational only.
    Lead(LeadTime),
}

impl AlertKind {
    pub fn offset(&self) -> Duration {
        match self {
            AlertKind::Due => Duration::zero(),
            AlertKind::Lead(lead) => lead.offset(),
        }
    }

    pub fn is_due(&self) -> bool {
        matches!(self, AlertKind::Due)
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertKind::Due => f.write_str("due"),
            AlertKind::Lead(lead) => write!(f, "lead({lead})"),
        }
    }
}

/// Identity of an armed alert: at most one timer per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AlertKey {
    pub task_id: TaskId,
    pub kind: AlertKind,
}

impl AlertKey {
    pub fn new(task_id: TaskId, kind: AlertKind) -> Self {
        Self { task_id, kind }
    }
}

impl fmt::Display for AlertKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.task_id, self.kind)
    }
}

/// A planned alert, derived from a task's current due instant and leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AlertEntry {
    pub fire_at: NaiveDateTime,
    pub task_id: TaskId,
    pub kind: AlertKind,
}

impl AlertEntry {
    pub fn key(&self) -> AlertKey {
        AlertKey::new(self.task_id, self.kind)
    }
}

/// Deterministically plan the alerts a task implies at `now`.
///
/// - Only Pending tasks are planned.
/// - The due entry is included iff the due instant is still ahead.
/// - Each lead is included iff its own fire instant is still ahead; missed
///   leads are dropped, never caught up.
///
/// Entries come back ordered by fire instant.
pub fn plan_task_alerts(task: &Task, now: NaiveDateTime) -> Vec<AlertEntry> {
    if task.status != TaskStatus::Pending {
        return vec![];
    }

    let mut out = Vec::with_capacity(task.leads.len() + 1);
    let kinds = std::iter::once(AlertKind::Due).chain(task.leads.iter().copied().map(AlertKind::Lead));

    for kind in kinds {
        let Some(fire_at) = task.due_at.checked_sub_signed(kind.offset()) else {
            continue;
        };
        if fire_at <= now {
            continue;
        }
        out.push(AlertEntry {
            fire_at,
            task_id: task.id,
            kind,
        });
    }

    out.sort();
    out
}
