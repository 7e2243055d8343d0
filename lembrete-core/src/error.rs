//! Error types for the reminder engine.

use crate::task::{TaskId, TaskStatus};

/// Rejected input. The store is never mutated when one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("description must not be empty")]
    EmptyDescription,

    #[error("invalid date/time '{input}' (use DD/MM/YYYY HH:MM or YYYY-MM-DD HH:MM)")]
    MalformedDateTime { input: String },

    #[error("unknown lead time '{0}' (expected 5m, 10m, 30m, 1h or 1d)")]
    UnknownLeadTime(String),

    #[error("unknown priority '{0}' (expected low, medium, high or urgent)")]
    UnknownPriority(String),

    #[error("unknown category '{0}'")]
    UnknownCategory(String),

    #[error("unknown status '{0}'")]
    UnknownStatus(String),

    #[error("snooze delay must be positive")]
    NonPositiveSnooze,

    #[error("snooze delay pushes the due time out of range")]
    SnoozeOutOfRange,
}

/// Errors surfaced by the engine's mutation API.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("task {0} not found")]
    NotFound(TaskId),

    #[error("cannot {action} task {id} while it is {status}")]
    InvalidTransition {
        id: TaskId,
        status: TaskStatus,
        action: &'static str,
    },

    /// The in-memory change was kept; the write is retried on the next
    /// mutation and on flush.
    #[error("persistence failed: {0}")]
    Persistence(String),

    /// Storage was rewritten by another process since our last load or save.
    /// The in-memory change was kept; [`crate::ReminderEngine::reconcile`]
    /// merges it with the newer list.
    #[error("task list was changed by another process")]
    Conflict,

    #[error("no task ids left (highest id is {0})")]
    IdsExhausted(TaskId),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, EngineError>;
