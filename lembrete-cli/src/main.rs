use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use lembrete_core::time::format_short;
use lembrete_core::{EngineError, NullSink, ReminderEngine};
use lembrete_ingest::{parse_import_file, require_drafts};

mod commands;
mod config;
mod daemon;
mod sinks;
mod state;
mod store_file;
mod timer;

use commands::{print_status, task_line, TaskCommand};
use config::Config;
use store_file::TaskFile;
use timer::TokioClock;

#[derive(Parser, Debug)]
#[command(name = "lembrete", version, about = "Tasks with timed reminders")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Run the reminder daemon: fire alerts, sweep overdue tasks, read commands from stdin
    Run,

    #[command(flatten)]
    Task(TaskCommand),

    /// Import tasks from a legacy tasks.json export or a CSV file
    Import {
        path: PathBuf,

        /// Parse and print, but don't save
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete every completed task
    ClearCompleted,

    /// Delete every task
    ClearAll {
        #[arg(long)]
        yes: bool,
    },

    /// Flag past-due pending tasks overdue
    Sweep,

    /// Task counts and task-file health
    Status,

    /// Manage ~/.lembrete/config.toml
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand, Debug, Clone)]
enum ConfigCommand {
    /// Write the default config if none exists
    Init,
    /// Print the effective config
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries listings and pop-ups.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Config { command } => match command {
            ConfigCommand::Init => config::init_config(),
            ConfigCommand::Show => config::show_config(),
        },
        Command::Run => daemon::run(&config::load_config()?).await,
        other => one_shot(&config::load_config()?, other),
    }
}

/// Attempts at applying a one-shot command when another process keeps
/// rewriting the task file under it.
const SAVE_ATTEMPTS: u32 = 3;

/// Load, apply one command, save. No notifications are shown; the daemon
/// picks the change up from the task file.
fn one_shot(cfg: &Config, command: Command) -> Result<()> {
    let clock = Arc::new(TokioClock::new(Handle::current(), cfg.engine.max_armed_timers));
    let file = Arc::new(TaskFile::new(cfg.tasks_path()?));
    let engine = ReminderEngine::new(clock, Arc::new(NullSink), file, cfg.engine_config());
    engine.load()?;
    apply_with_retry(&engine, cfg, command)?;
    engine.shutdown()?;
    Ok(())
}

/// Apply `command` to the loaded engine. If the save hits a newer file, drop
/// our copy, reload and apply again.
fn apply_with_retry(engine: &ReminderEngine, cfg: &Config, command: Command) -> Result<()> {
    let mut attempt = 1;
    loop {
        match apply(engine, cfg, command.clone()) {
            Err(e) if attempt < SAVE_ATTEMPTS && is_conflict(&e) => {
                warn!(attempt, "task file changed while saving; reloading and retrying");
                engine.load()?;
                attempt += 1;
            }
            result => return result,
        }
    }
}

fn is_conflict(e: &anyhow::Error) -> bool {
    matches!(e.downcast_ref::<EngineError>(), Some(EngineError::Conflict))
}

fn apply(engine: &ReminderEngine, cfg: &Config, command: Command) -> Result<()> {
    match command {
        Command::Task(cmd) => commands::execute(engine, cfg, cmd)?,

        Command::Import { path, dry_run } => {
            let batch = parse_import_file(&path)?;
            for skip in &batch.skipped {
                println!("skipped row {}: {}", skip.row, skip.reason);
            }
            require_drafts(&batch)?;

            if dry_run {
                for d in &batch.drafts {
                    println!("{}  {}", format_short(d.due_at), d.description);
                }
                println!("{} tasks would be imported", batch.drafts.len());
            } else {
                let added = engine.import_tasks(batch.drafts)?;
                for t in &added {
                    println!("{}", task_line(t));
                }
                println!("Imported {} tasks from {}", added.len(), path.display());
            }
        }

        Command::ClearCompleted => {
            let n = engine.clear_completed()?;
            println!("Removed {n} completed tasks");
        }

        Command::ClearAll { yes } => {
            if !yes {
                bail!("refusing to delete every task without --yes");
            }
            let n = engine.clear_all()?;
            println!("Removed {n} tasks");
        }

        Command::Sweep => {
            let report = engine.sweep_overdue()?;
            if report.flagged.is_empty() {
                println!("Nothing overdue.");
            }
            for id in &report.flagged {
                if let Some(t) = engine.task(*id) {
                    println!("Overdue {}", task_line(&t));
                }
            }
        }

        Command::Status => {
            // Arm what the daemon would arm, so the count is meaningful.
            engine.rebuild_schedule();
            print_status(&engine.status());
        }

        other => bail!("not a one-shot command: {other:?}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_commands_sit_at_top_level() {
        let cli = Cli::try_parse_from(["lembrete", "complete", "#5"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Task(TaskCommand::Complete { id: lembrete_core::TaskId(5) })
        ));

        let cli = Cli::try_parse_from(["lembrete", "clear-completed"]).unwrap();
        assert!(matches!(cli.command, Command::ClearCompleted));
    }

    #[test]
    fn import_takes_a_path() {
        let cli = Cli::try_parse_from(["lembrete", "import", "old/tasks.json", "--dry-run"]).unwrap();
        match cli.command {
            Command::Import { path, dry_run } => {
                assert_eq!(path, PathBuf::from("old/tasks.json"));
                assert!(dry_run);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn one_shot_retries_after_the_daemon_saved_first() {
        use chrono::NaiveDate;
        use lembrete_core::{
            AlertKind, EngineConfig, ManualClock, Persistence, RecordingSink, TaskDraft, TaskStatus,
        };

        let start = NaiveDate::from_ymd_opt(2026, 11, 5)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");

        let clock = Arc::new(ManualClock::new(start));
        let sink = Arc::new(RecordingSink::new());
        let daemon = ReminderEngine::new(
            clock.clone(),
            sink.clone(),
            Arc::new(TaskFile::new(&path)),
            EngineConfig::default(),
        );
        daemon.load().unwrap();
        daemon
            .add_task(TaskDraft::new("Pay rent", start + chrono::Duration::minutes(2)))
            .unwrap();

        let cli = ReminderEngine::new(
            Arc::new(ManualClock::new(start)),
            Arc::new(NullSink),
            Arc::new(TaskFile::new(&path)),
            EngineConfig::default(),
        );
        cli.load().unwrap();

        // The daemon completes rent and saves between our load and our save.
        clock.advance(chrono::Duration::minutes(3));
        assert_eq!(sink.len(), 1);
        assert!(matches!(sink.intents()[0].kind, AlertKind::Due));

        let cmd = Cli::try_parse_from(["lembrete", "add", "dentist", "--due", "05/11/2026 11:00"])
            .unwrap()
            .command;
        apply_with_retry(&cli, &Config::default(), cmd).unwrap();

        let saved = TaskFile::new(&path).load_all().unwrap();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[0].status, TaskStatus::Completed);
        assert_eq!(saved[1].description, "dentist");
        assert_eq!(saved[1].id, lembrete_core::TaskId(2));
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
