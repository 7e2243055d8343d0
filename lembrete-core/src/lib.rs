//! lembrete-core: task model and notification scheduling engine for Lembrete

pub mod clock;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod merge;
pub mod notify;
pub mod overdue;
pub mod persistence;
pub mod reminders;
pub mod scheduler;
pub mod task;
pub mod task_store;
pub mod time;

pub use clock::{Clock, ClockError, ManualClock, TimerCallback, TimerHandle};
pub use dispatcher::{dispatch_alert, DispatchOutcome, IgnoreReason};
pub use engine::{EngineConfig, EngineStatus, ReminderEngine};
pub use error::{EngineError, ValidationError};
pub use merge::merge_task_lists;
pub use notify::{NotificationIntent, NotificationSink, NullSink, RecordingSink};
pub use overdue::{sweep_overdue, SweepReport};
pub use persistence::{MemoryPersistence, PersistHealth, Persistence, StaleWrite};
pub use reminders::{plan_task_alerts, AlertEntry, AlertKey, AlertKind};
pub use scheduler::{ScheduleReport, Scheduler};
pub use task::{parse_leads, Category, LeadTime, Priority, Task, TaskDraft, TaskId, TaskPatch, TaskStatus};
pub use task_store::{StatusFilter, TaskFilter, TaskSort, TaskStore};
