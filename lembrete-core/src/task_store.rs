//! TaskStore: the ordered, in-memory source of truth for tasks.
//!
//! - Keeps insertion order (store order is what bulk rescheduling walks).
//! - Ids are max existing + 1 and never handed out twice in one run, even
//!   after the highest task is deleted.
//! - Queries back the sortable/filterable task list.

use std::collections::HashSet;

use tracing::warn;

use crate::error::EngineError;
use crate::task::{Category, Priority, Task, TaskId, TaskStatus};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatusFilter {
    #[default]
    All,
    /// Pending or Overdue.
    Open,
    Pending,
    Overdue,
    Completed,
}

impl StatusFilter {
    fn matches(&self, status: TaskStatus) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Open => status != TaskStatus::Completed,
            StatusFilter::Pending => status == TaskStatus::Pending,
            StatusFilter::Overdue => status == TaskStatus::Overdue,
            StatusFilter::Completed => status == TaskStatus::Completed,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub status: StatusFilter,
    pub category: Option<Category>,
    pub priority: Option<Priority>,
}

impl TaskFilter {
    pub fn matches(&self, task: &Task) -> bool {
        self.status.matches(task.status)
            && self.category.is_none_or(|c| c == task.category)
            && self.priority.is_none_or(|p| p == task.priority)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TaskSort {
    /// Open tasks by due instant, then completed ones.
    #[default]
    Due,
    /// Most urgent first, then by due instant.
    Priority,
    Created,
}

#[derive(Debug, Default, Clone)]
pub struct TaskStore {
    tasks: Vec<Task>,
    next_id: u64,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from loaded records. Duplicate ids get fresh ones.
    pub fn from_tasks(tasks: Vec<Task>) -> Result<Self, EngineError> {
        let mut store = Self::new();
        let max = tasks.iter().map(|t| t.id).max().unwrap_or(TaskId(0));
        store.next_id = max.0.checked_add(1).ok_or(EngineError::IdsExhausted(max))?;

        let mut seen = HashSet::new();
        for mut task in tasks {
            if !seen.insert(task.id) {
                let fresh = store.allocate_id()?;
                warn!(old = %task.id, new = %fresh, "duplicate task id on load; reassigned");
                task.id = fresh;
                seen.insert(fresh);
            }
            store.tasks.push(task);
        }
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub(crate) fn get_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    /// Next free id: above every id handed out this run and every live id.
    pub(crate) fn allocate_id(&mut self) -> Result<TaskId, EngineError> {
        let max_live = self.tasks.iter().map(|t| t.id).max().unwrap_or(TaskId(0));
        let above_live = max_live
            .0
            .checked_add(1)
            .ok_or(EngineError::IdsExhausted(max_live))?;
        let id = self.next_id.max(above_live);
        self.next_id = id.checked_add(1).ok_or(EngineError::IdsExhausted(TaskId(id)))?;
        Ok(TaskId(id))
    }

    pub(crate) fn insert(&mut self, task: Task) {
        debug_assert!(self.get(task.id).is_none(), "task ids must be unique");
        self.tasks.push(task);
    }

    pub(crate) fn remove(&mut self, id: TaskId) -> Option<Task> {
        let pos = self.tasks.iter().position(|t| t.id == id)?;
        Some(self.tasks.remove(pos))
    }

    /// Remove every task matching `pred`, returning them in store order.
    pub(crate) fn remove_where(&mut self, pred: impl Fn(&Task) -> bool) -> Vec<Task> {
        let (removed, kept): (Vec<Task>, Vec<Task>) =
            std::mem::take(&mut self.tasks).into_iter().partition(|t| pred(t));
        self.tasks = kept;
        removed
    }

    pub fn query(&self, filter: &TaskFilter, sort: TaskSort) -> Vec<Task> {
        let mut out: Vec<Task> = self.tasks.iter().filter(|t| filter.matches(t)).cloned().collect();

        match sort {
            TaskSort::Due => out.sort_by_key(|t| (t.status == TaskStatus::Completed, t.due_at, t.id)),
            TaskSort::Priority => {
                out.sort_by_key(|t| (std::cmp::Reverse(t.priority), t.due_at, t.id))
            }
            TaskSort::Created => out.sort_by_key(|t| (t.created_at, t.id)),
        }
        out
    }
}
