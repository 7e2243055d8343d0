//! Notification intents and the sink capability the engine emits into.

use std::sync::{Mutex, PoisonError};

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::reminders::AlertKind;
use crate::task::{Task, TaskId};
use crate::time::format_short;

/// What presentation layers are asked to show when an alert fires.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationIntent {
    pub kind: AlertKind,
    /// Snapshot taken under the engine lock right after the transition.
    pub task: Task,
    pub fired_at: NaiveDateTime,
}

impl NotificationIntent {
    pub fn is_due(&self) -> bool {
        self.kind.is_due()
    }

    pub fn title(&self) -> String {
        match self.kind {
            AlertKind::Due => "Tarefa agora!".to_string(),
            AlertKind::Lead(lead) => format!("Lembrete ({} antes)", lead.label()),
        }
    }

    pub fn body(&self) -> String {
        let mut body = match self.kind {
            AlertKind::Due => format!("É hora de realizar a tarefa:\n\n{}", self.task.description),
            AlertKind::Lead(_) => format!(
                "{}\nVence em {}",
                self.task.description,
                format_short(self.task.due_at)
            ),
        };
        if !self.task.notes.trim().is_empty() {
            body.push_str("\n\n");
            body.push_str(self.task.notes.trim());
        }
        body
    }
}

/// Presentation capability. Fire-and-forget: implementations must not block
/// on user acknowledgment. A user's "done" or "snooze" response comes back
/// through the normal engine mutation API.
pub trait NotificationSink: Send + Sync {
    fn emit(&self, intent: &NotificationIntent);
}

/// Sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn emit(&self, _intent: &NotificationIntent) {}
}

/// Sink that keeps every intent, for tests and dry runs.
#[derive(Debug, Default)]
pub struct RecordingSink {
    intents: Mutex<Vec<NotificationIntent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intents(&self) -> Vec<NotificationIntent> {
        self.intents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.intents.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count_for(&self, task_id: TaskId, kind: AlertKind) -> usize {
        self.intents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|i| i.task.id == task_id && i.kind == kind)
            .count()
    }
}

impl NotificationSink for RecordingSink {
    fn emit(&self, intent: &NotificationIntent) {
        self.intents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(intent.clone());
    }
}
