//! Task model for the reminder engine.
//!
//! A task carries a local wall-clock due instant plus an optional set of lead
//! offsets drawn from a fixed catalog. Every enum here has an explicit string
//! mapping so it round-trips exactly through the task file.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::time::{self, truncate_to_second};

/// Task identifier: assigned as max existing + 1 and never reused within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().trim_start_matches('#').parse().map(TaskId)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Overdue,
    /// Terminal, except through snooze.
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Overdue => "overdue",
            TaskStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "overdue" => Ok(TaskStatus::Overdue),
            "completed" | "done" => Ok(TaskStatus::Completed),
            other => Err(ValidationError::UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" | "normal" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            other => Err(ValidationError::UnknownPriority(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    #[default]
    General,
    Personal,
    Work,
    Health,
    Finance,
    Study,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::General,
        Category::Personal,
        Category::Work,
        Category::Health,
        Category::Finance,
        Category::Study,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::General => "general",
            Category::Personal => "personal",
            Category::Work => "work",
            Category::Health => "health",
            Category::Finance => "finance",
            Category::Study => "study",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == wanted)
            .ok_or(ValidationError::UnknownCategory(wanted))
    }
}

/// Lead-time catalog: how long before the due instant a reminder fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LeadTime {
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "10m")]
    TenMinutes,
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "1d")]
    OneDay,
}

impl LeadTime {
    pub const ALL: [LeadTime; 5] = [
        LeadTime::FiveMinutes,
        LeadTime::TenMinutes,
        LeadTime::ThirtyMinutes,
        LeadTime::OneHour,
        LeadTime::OneDay,
    ];

    pub fn minutes(&self) -> i64 {
        match self {
            LeadTime::FiveMinutes => 5,
            LeadTime::TenMinutes => 10,
            LeadTime::ThirtyMinutes => 30,
            LeadTime::OneHour => 60,
            LeadTime::OneDay => 24 * 60,
        }
    }

    pub fn offset(&self) -> Duration {
        Duration::minutes(self.minutes())
    }

    pub fn from_minutes(minutes: i64) -> Option<Self> {
        LeadTime::ALL.into_iter().find(|l| l.minutes() == minutes)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LeadTime::FiveMinutes => "5m",
            LeadTime::TenMinutes => "10m",
            LeadTime::ThirtyMinutes => "30m",
            LeadTime::OneHour => "1h",
            LeadTime::OneDay => "1d",
        }
    }

    /// Human label used in notification text.
    pub fn label(&self) -> &'static str {
        match self {
            LeadTime::FiveMinutes => "5 minutos",
            LeadTime::TenMinutes => "10 minutos",
            LeadTime::ThirtyMinutes => "30 minutos",
            LeadTime::OneHour => "1 hora",
            LeadTime::OneDay => "1 dia",
        }
    }
}

impl fmt::Display for LeadTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeadTime {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect::<String>().to_lowercase();
        let unknown = || ValidationError::UnknownLeadTime(s.trim().to_string());

        let split = compact
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(unknown)?;
        let (digits, unit) = compact.split_at(split);
        let amount: i64 = digits.parse().map_err(|_| unknown())?;

        let minutes = match unit {
            "m" | "min" | "mins" | "minute" | "minutes" => amount,
            "h" | "hr" | "hour" | "hours" => amount * 60,
            "d" | "day" | "days" => amount * 24 * 60,
            _ => return Err(unknown()),
        };

        LeadTime::from_minutes(minutes).ok_or_else(unknown)
    }
}

/// Parse a comma/semicolon separated lead list such as `5m, 1h`.
pub fn parse_leads(input: &str) -> Result<BTreeSet<LeadTime>, ValidationError> {
    input
        .split([',', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(LeadTime::from_str)
        .collect()
}

/// Core task record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub description: String,

    #[serde(with = "time::wall_clock")]
    pub due_at: NaiveDateTime,

    #[serde(with = "time::wall_clock")]
    pub created_at: NaiveDateTime,

    #[serde(default, with = "time::wall_clock_opt")]
    pub completed_at: Option<NaiveDateTime>,

    pub status: TaskStatus,

    /// Display flag mirrored from the last overdue observation.
    #[serde(default)]
    pub is_overdue: bool,

    #[serde(default)]
    pub leads: BTreeSet<LeadTime>,

    #[serde(default)]
    pub priority: Priority,

    #[serde(default)]
    pub category: Category,

    #[serde(default)]
    pub notes: String,
}

impl Task {
    pub fn new(id: TaskId, description: impl Into<String>, due_at: NaiveDateTime, created_at: NaiveDateTime) -> Self {
        Self {
            id,
            description: description.into(),
            due_at: truncate_to_second(due_at),
            created_at: truncate_to_second(created_at),
            completed_at: None,
            status: TaskStatus::Pending,
            is_overdue: false,
            leads: BTreeSet::new(),
            priority: Priority::default(),
            category: Category::default(),
            notes: String::new(),
        }
    }

    pub(crate) fn from_draft(id: TaskId, draft: TaskDraft, now: NaiveDateTime) -> Self {
        Self {
            leads: draft.leads,
            priority: draft.priority,
            category: draft.category,
            notes: draft.notes,
            ..Task::new(id, draft.description.trim(), draft.due_at, draft.created_at.unwrap_or(now))
        }
    }

    pub fn with_lead(mut self, lead: LeadTime) -> Self {
        self.leads.insert(lead);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    pub fn is_pending(&self) -> bool {
        self.status == TaskStatus::Pending
    }

    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    pub(crate) fn complete(&mut self, now: NaiveDateTime) {
        self.status = TaskStatus::Completed;
        self.completed_at = Some(truncate_to_second(now));
        self.is_overdue = false;
    }

    pub(crate) fn mark_overdue(&mut self) {
        self.status = TaskStatus::Overdue;
        self.is_overdue = true;
    }

    /// Back to Pending with a (possibly new) due instant.
    pub(crate) fn reopen(&mut self, due_at: NaiveDateTime) {
        self.due_at = truncate_to_second(due_at);
        self.status = TaskStatus::Pending;
        self.is_overdue = false;
        self.completed_at = None;
    }

    pub(crate) fn apply(&mut self, patch: TaskPatch) {
        if let Some(description) = patch.description {
            self.description = description.trim().to_string();
        }
        if let Some(due_at) = patch.due_at {
            self.due_at = truncate_to_second(due_at);
        }
        if let Some(leads) = patch.leads {
            self.leads = leads;
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(category) = patch.category {
            self.category = category;
        }
        if let Some(notes) = patch.notes {
            self.notes = notes;
        }
    }
}

/// Caller-supplied fields for a new task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskDraft {
    pub description: String,
    pub due_at: NaiveDateTime,
    pub leads: BTreeSet<LeadTime>,
    pub priority: Priority,
    pub category: Category,
    pub notes: String,
    /// Keeps the original creation instant of imported history; `None` means
    /// "now" when the task is added.
    pub created_at: Option<NaiveDateTime>,
}

impl TaskDraft {
    pub fn new(description: impl Into<String>, due_at: NaiveDateTime) -> Self {
        Self {
            description: description.into(),
            due_at,
            leads: BTreeSet::new(),
            priority: Priority::default(),
            category: Category::default(),
            notes: String::new(),
            created_at: None,
        }
    }

    /// Build a draft from raw text input, as typed by a user.
    pub fn parse(description: &str, due: &str) -> Result<Self, ValidationError> {
        let draft = Self::new(description, time::parse_due(due)?);
        draft.validate()?;
        Ok(draft)
    }

    pub fn with_lead(mut self, lead: LeadTime) -> Self {
        self.leads.insert(lead);
        self
    }

    pub fn with_leads(mut self, leads: impl IntoIterator<Item = LeadTime>) -> Self {
        self.leads.extend(leads);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    pub fn with_created_at(mut self, created_at: NaiveDateTime) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.description.trim().is_empty() {
            return Err(ValidationError::EmptyDescription);
        }
        Ok(())
    }
}

/// Partial edit. `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    pub description: Option<String>,
    pub due_at: Option<NaiveDateTime>,
    pub leads: Option<BTreeSet<LeadTime>>,
    pub priority: Option<Priority>,
    pub category: Option<Category>,
    pub notes: Option<String>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        *self == TaskPatch::default()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match &self.description {
            Some(d) if d.trim().is_empty() => Err(ValidationError::EmptyDescription),
            _ => Ok(()),
        }
    }
}
