//! Task commands shared by the one-shot CLI and the daemon prompt.

use anyhow::{anyhow, Result};
use chrono::NaiveDateTime;
use clap::{Args, Subcommand, ValueEnum};

use lembrete_core::time::{format_short, parse_due};
use lembrete_core::{
    Category, EngineStatus, LeadTime, Priority, ReminderEngine, StatusFilter, Task, TaskDraft,
    TaskFilter, TaskId, TaskPatch, TaskSort,
};

use crate::config::Config;

#[derive(Subcommand, Debug, Clone)]
pub enum TaskCommand {
    /// Add a task: add "Pay rent" --due "05/11/2026 09:00" --leads 1h,1d
    Add(AddArgs),

    /// Change fields of a task; its alerts are re-planned
    Edit(EditArgs),

    /// Mark a task completed and cancel its alerts
    #[command(alias = "done")]
    Complete { id: TaskId },

    /// Delete a task and cancel its alerts
    #[command(alias = "rm")]
    Delete { id: TaskId },

    /// Reopen a just-fired (completed) task with its due time pushed back
    Snooze {
        id: TaskId,

        /// Defaults to [engine].default_snooze_minutes
        #[arg(long)]
        minutes: Option<i64>,
    },

    /// List tasks
    #[command(alias = "ls")]
    List(ListArgs),
}

#[derive(Args, Debug, Clone)]
pub struct AddArgs {
    pub description: String,

    /// DD/MM/YYYY HH:MM or YYYY-MM-DD HH:MM
    #[arg(long, value_parser = parse_due)]
    pub due: NaiveDateTime,

    /// Lead alerts: 5m, 10m, 30m, 1h, 1d
    #[arg(long, value_delimiter = ',')]
    pub leads: Vec<LeadTime>,

    #[arg(long, default_value_t)]
    pub priority: Priority,

    #[arg(long, default_value_t)]
    pub category: Category,

    #[arg(long, default_value = "")]
    pub notes: String,
}

#[derive(Args, Debug, Clone)]
pub struct EditArgs {
    pub id: TaskId,

    #[arg(long)]
    pub description: Option<String>,

    #[arg(long, value_parser = parse_due)]
    pub due: Option<NaiveDateTime>,

    /// Replaces the lead set
    #[arg(long, value_delimiter = ',', conflicts_with = "no_leads")]
    pub leads: Option<Vec<LeadTime>>,

    /// Remove every lead alert
    #[arg(long)]
    pub no_leads: bool,

    #[arg(long)]
    pub priority: Option<Priority>,

    #[arg(long)]
    pub category: Option<Category>,

    #[arg(long)]
    pub notes: Option<String>,
}

impl EditArgs {
    fn into_patch(self) -> TaskPatch {
        let leads = if self.no_leads {
            Some(Default::default())
        } else {
            self.leads.map(|l| l.into_iter().collect())
        };
        TaskPatch {
            description: self.description,
            due_at: self.due,
            leads,
            priority: self.priority,
            category: self.category,
            notes: self.notes,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, Default)]
pub enum StatusArg {
    #[default]
    All,
    Open,
    Pending,
    Overdue,
    Completed,
}

impl From<StatusArg> for StatusFilter {
    fn from(s: StatusArg) -> Self {
        match s {
            StatusArg::All => StatusFilter::All,
            StatusArg::Open => StatusFilter::Open,
            StatusArg::Pending => StatusFilter::Pending,
            StatusArg::Overdue => StatusFilter::Overdue,
            StatusArg::Completed => StatusFilter::Completed,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, Default)]
pub enum SortArg {
    #[default]
    Due,
    Priority,
    Created,
}

impl From<SortArg> for TaskSort {
    fn from(s: SortArg) -> Self {
        match s {
            SortArg::Due => TaskSort::Due,
            SortArg::Priority => TaskSort::Priority,
            SortArg::Created => TaskSort::Created,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    #[arg(long, value_enum, default_value_t)]
    pub status: StatusArg,

    #[arg(long)]
    pub category: Option<Category>,

    #[arg(long)]
    pub priority: Option<Priority>,

    #[arg(long, value_enum, default_value_t)]
    pub sort: SortArg,

    /// Print JSON records instead of a table
    #[arg(long)]
    pub json: bool,
}

pub fn execute(engine: &ReminderEngine, cfg: &Config, cmd: TaskCommand) -> Result<()> {
    match cmd {
        TaskCommand::Add(args) => {
            let draft = TaskDraft::new(args.description, args.due)
                .with_leads(args.leads)
                .with_priority(args.priority)
                .with_category(args.category)
                .with_notes(args.notes);
            let task = engine.add_task(draft)?;
            println!("Added {}", task_line(&task));
        }
        TaskCommand::Edit(args) => {
            let id = args.id;
            let patch = args.into_patch();
            if patch.is_empty() {
                println!("Nothing to change for #{id}");
                return Ok(());
            }
            let task = engine.edit_task(id, patch)?;
            println!("Updated {}", task_line(&task));
        }
        TaskCommand::Complete { id } => {
            let task = engine.complete_task(id)?;
            println!("Completed {}", task_line(&task));
        }
        TaskCommand::Delete { id } => {
            let task = engine.delete_task(id)?;
            println!("Deleted {}", task_line(&task));
        }
        TaskCommand::Snooze { id, minutes } => {
            let delta = match minutes {
                Some(m) => chrono::Duration::try_minutes(m)
                    .ok_or_else(|| anyhow!("--minutes {m} is out of range"))?,
                None => cfg.default_snooze()?,
            };
            let task = engine.snooze_task(id, delta)?;
            println!("Snoozed {}", task_line(&task));
        }
        TaskCommand::List(args) => {
            let filter = TaskFilter {
                status: args.status.into(),
                category: args.category,
                priority: args.priority,
            };
            let tasks = engine.list(&filter, args.sort.into());
            if args.json {
                println!("{}", serde_json::to_string_pretty(&tasks)?);
            } else if tasks.is_empty() {
                println!("No tasks.");
            } else {
                for t in &tasks {
                    println!("{}", task_line(t));
                }
            }
        }
    }
    Ok(())
}

pub fn task_line(t: &Task) -> String {
    let leads = if t.leads.is_empty() {
        String::new()
    } else {
        let list: Vec<&str> = t.leads.iter().map(LeadTime::as_str).collect();
        format!("  [{}]", list.join(","))
    };
    format!(
        "#{:<4} {:<9} {}  {:<6} {:<8} {}{}",
        t.id.to_string(),
        t.status.as_str(),
        format_short(t.due_at),
        t.priority.as_str(),
        t.category.as_str(),
        t.description,
        leads
    )
}

pub fn print_status(status: &EngineStatus) {
    println!(
        "Tasks: {} total, {} pending, {} overdue, {} completed",
        status.total(),
        status.pending,
        status.overdue,
        status.completed
    );
    println!("Armed alerts: {}", status.armed);
    if status.arm_failures > 0 {
        println!("Arming failures: {}", status.arm_failures);
    }
    if status.persistence.dirty {
        println!(
            "Unsaved changes: {}",
            status
                .persistence
                .last_error
                .as_deref()
                .unwrap_or("write pending")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use clap::Parser;

    #[derive(Parser, Debug)]
    #[command(no_binary_name = true)]
    struct Line {
        #[command(subcommand)]
        cmd: TaskCommand,
    }

    fn parse(args: &[&str]) -> TaskCommand {
        Line::try_parse_from(args).unwrap().cmd
    }

    #[test]
    fn add_parses_due_and_leads() {
        let TaskCommand::Add(args) = parse(&[
            "add",
            "Pay rent",
            "--due",
            "05/11/2026 09:00",
            "--leads",
            "1h,1d",
            "--priority",
            "urgent",
        ]) else {
            panic!("expected add");
        };
        assert_eq!(
            args.due,
            NaiveDate::from_ymd_opt(2026, 11, 5)
                .unwrap()
                .and_hms_opt(9, 0, 0)
                .unwrap()
        );
        assert_eq!(args.leads, vec![LeadTime::OneHour, LeadTime::OneDay]);
        assert_eq!(args.priority, Priority::Urgent);
        assert_eq!(args.category, Category::General);
    }

    #[test]
    fn bad_due_is_rejected_by_parser() {
        assert!(Line::try_parse_from(["add", "x", "--due", "tomorrow"]).is_err());
    }

    #[test]
    fn edit_builds_patch() {
        let TaskCommand::Edit(args) = parse(&["edit", "#3", "--no-leads", "--notes", "bring id"]) else {
            panic!("expected edit");
        };
        assert_eq!(args.id, TaskId(3));
        let patch = args.into_patch();
        assert_eq!(patch.leads, Some(Default::default()));
        assert_eq!(patch.notes.as_deref(), Some("bring id"));
        assert!(patch.due_at.is_none());
    }

    #[test]
    fn done_alias_completes() {
        assert!(matches!(parse(&["done", "4"]), TaskCommand::Complete { id: TaskId(4) }));
    }

    #[test]
    fn snooze_minutes_beyond_range_is_an_error() {
        use lembrete_core::{EngineConfig, ManualClock, MemoryPersistence, NullSink, TaskStatus};
        use std::sync::Arc;

        let at = NaiveDate::from_ymd_opt(2026, 3, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let engine = ReminderEngine::new(
            Arc::new(ManualClock::new(at)),
            Arc::new(NullSink),
            Arc::new(MemoryPersistence::new()),
            EngineConfig::default(),
        );
        let task = engine.add_task(TaskDraft::new("call mom", at)).unwrap();
        engine.complete_task(task.id).unwrap();

        let max = i64::MAX.to_string();
        let cmd = parse(&["snooze", "1", "--minutes", max.as_str()]);
        let err = execute(&engine, &Config::default(), cmd).unwrap_err();
        assert!(err.to_string().contains("out of range"));

        let cmd = parse(&["snooze", "1", "--minutes", "200000000000"]);
        assert!(execute(&engine, &Config::default(), cmd).is_err());
        assert_eq!(engine.task(task.id).unwrap().status, TaskStatus::Completed);
    }

    #[test]
    fn task_line_shows_leads() {
        let at = NaiveDate::from_ymd_opt(2026, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 0)
            .unwrap();
        let t = Task::new(TaskId(12), "Renew passport", at, at).with_lead(LeadTime::OneDay);
        let line = task_line(&t);
        assert!(line.starts_with("#12"));
        assert!(line.contains("02/01/2026 03:04"));
        assert!(line.ends_with("Renew passport  [1d]"));
    }
}
