//! Long-running reminder daemon: owns the timers, runs the periodic overdue
//! sweep, and reads task commands from stdin while it waits.
//!
//! One-shot commands write the same task file. The daemon polls it and merges
//! what they wrote with its own changes (fired alerts, prompt commands).

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::runtime::Handle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use lembrete_core::{EngineError, ReminderEngine};

use crate::commands::{self, print_status, TaskCommand};
use crate::config::Config;
use crate::sinks::build_sink;
use crate::store_file::TaskFile;
use crate::timer::TokioClock;

/// One line typed at the daemon prompt.
#[derive(Parser, Debug)]
#[command(name = "lembrete", no_binary_name = true, disable_version_flag = true)]
struct ReplLine {
    #[command(subcommand)]
    cmd: ReplCommand,
}

#[derive(Subcommand, Debug)]
enum ReplCommand {
    #[command(flatten)]
    Task(TaskCommand),

    /// Flag past-due tasks overdue now
    Sweep,

    /// Drop every armed timer and re-plan from the task list
    Rebuild,

    /// Task counts, armed alerts, unsaved changes
    Status,

    /// Save and stop the daemon
    #[command(alias = "exit")]
    Quit,
}

enum Flow {
    Continue,
    Quit,
}

pub async fn run(cfg: &Config) -> Result<()> {
    let tasks_path = cfg.tasks_path()?;
    let file = Arc::new(TaskFile::new(&tasks_path));
    let clock = Arc::new(TokioClock::new(Handle::current(), cfg.engine.max_armed_timers));
    let engine = ReminderEngine::new(
        clock,
        build_sink(&cfg.notifications),
        file.clone(),
        cfg.engine_config(),
    );

    let loaded = engine.load()?;
    info!(tasks = loaded, path = %tasks_path.display(), "daemon starting");
    refresh(&engine);

    let mut sweep_ticker = interval_secs(cfg.engine.sweep_interval_secs);
    let mut file_ticker = interval_secs(cfg.engine.file_poll_secs);
    // First ticks complete immediately; startup already did both.
    sweep_ticker.tick().await;
    file_ticker.tick().await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    prompt();
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupted");
                break;
            }
            _ = file_ticker.tick() => sync_with_file(&engine, &file),
            _ = sweep_ticker.tick() => sweep(&engine),
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match handle_line(&engine, &file, cfg, &line) {
                    Flow::Quit => break,
                    Flow::Continue => prompt(),
                },
                Ok(None) => {
                    info!("stdin closed; running until interrupted");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!(error = %e, "stdin read failed; prompt disabled");
                    stdin_open = false;
                }
            },
        }
    }

    engine.shutdown()?;
    info!("daemon stopped");
    Ok(())
}

fn interval_secs(secs: u64) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval(Duration::from_secs(secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

/// Re-arm whatever is pending, then sweep. Sweeping second lets a due timer
/// armed a moment ago keep its grace period.
fn refresh(engine: &ReminderEngine) {
    let report = engine.rebuild_schedule();
    info!(armed = report.armed, failed = report.failed, "schedule rebuilt");
    sweep(engine);
}

fn sweep(engine: &ReminderEngine) {
    match engine.sweep_overdue() {
        Ok(report) if !report.flagged.is_empty() => {
            info!(flagged = report.flagged.len(), "overdue sweep");
        }
        Ok(report) => debug!(deferred = report.deferred.len(), "overdue sweep: nothing to flag"),
        Err(e) => warn!(error = %e, "overdue sweep could not save"),
    }
}

/// Merge writes from other processes, or retry our own unsaved write.
fn sync_with_file(engine: &ReminderEngine, file: &TaskFile) {
    if file.changed_on_disk() {
        info!(path = %file.path().display(), "task file changed on disk; merging");
        match engine.reconcile() {
            // reconcile re-armed everything; catch what went past due meanwhile.
            Ok(_) => sweep(engine),
            Err(e) => warn!(error = %e, "merge with task file failed; will retry"),
        }
    } else if engine.status().persistence.dirty {
        if let Err(e) = engine.flush() {
            warn!(error = %e, "retrying task file write failed");
        }
    }
}

fn handle_line(engine: &ReminderEngine, file: &TaskFile, cfg: &Config, line: &str) -> Flow {
    let words = match split_words(line) {
        Ok(w) => w,
        Err(e) => {
            eprintln!("error: {e}");
            return Flow::Continue;
        }
    };
    if words.is_empty() {
        return Flow::Continue;
    }

    let parsed = match ReplLine::try_parse_from(words) {
        Ok(p) => p,
        Err(e) => {
            // Also covers `help` and `--help`.
            let _ = e.print();
            return Flow::Continue;
        }
    };

    let result = match parsed.cmd {
        ReplCommand::Task(cmd) => commands::execute(engine, cfg, cmd),
        ReplCommand::Sweep => engine.sweep_overdue().map_err(anyhow::Error::from).map(|report| {
            if report.flagged.is_empty() {
                println!("Nothing overdue.");
            } else {
                for id in &report.flagged {
                    println!("Overdue: #{id}");
                }
            }
        }),
        ReplCommand::Rebuild => {
            let report = engine.rebuild_schedule();
            println!("Armed {} alerts ({} failed)", report.armed, report.failed);
            Ok(())
        }
        ReplCommand::Status => {
            print_status(&engine.status());
            Ok(())
        }
        ReplCommand::Quit => return Flow::Quit,
    };

    match result {
        Ok(()) => {}
        Err(e) if matches!(e.downcast_ref::<EngineError>(), Some(EngineError::Conflict)) => {
            // The change is applied in memory; fold in the other writer's now.
            sync_with_file(engine, file);
            println!("(merged with changes from another lembrete process)");
        }
        Err(e) => eprintln!("error: {e:#}"),
    }
    Flow::Continue
}

fn prompt() {
    let mut out = std::io::stdout().lock();
    let _ = out.write_all(b"lembrete> ").and_then(|_| out.flush());
}

/// Split a prompt line into words. Single or double quotes group words;
/// there are no escapes.
fn split_words(line: &str) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut cur = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;

    for c in line.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => cur.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_word = true;
            }
            None if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut cur));
                    in_word = false;
                }
            }
            None => {
                cur.push(c);
                in_word = true;
            }
        }
    }

    if let Some(q) = quote {
        bail!("unterminated {q} quote");
    }
    if in_word {
        words.push(cur);
    }
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};
    use lembrete_core::{
        AlertKind, EngineConfig, ManualClock, NullSink, Persistence, RecordingSink, TaskDraft, TaskId,
        TaskStatus,
    };

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 5)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    struct Daemon {
        engine: ReminderEngine,
        file: Arc<TaskFile>,
        clock: Arc<ManualClock>,
        sink: Arc<RecordingSink>,
    }

    fn daemon(path: &std::path::Path) -> Daemon {
        let file = Arc::new(TaskFile::new(path));
        let clock = Arc::new(ManualClock::new(start()));
        let sink = Arc::new(RecordingSink::new());
        let engine = ReminderEngine::new(clock.clone(), sink.clone(), file.clone(), EngineConfig::default());
        engine.load().unwrap();
        Daemon {
            engine,
            file,
            clock,
            sink,
        }
    }

    fn one_shot(path: &std::path::Path) -> ReminderEngine {
        let engine = ReminderEngine::new(
            Arc::new(ManualClock::new(start())),
            Arc::new(NullSink),
            Arc::new(TaskFile::new(path)),
            EngineConfig::default(),
        );
        engine.load().unwrap();
        engine
    }

    fn on_disk(path: &std::path::Path) -> Vec<lembrete_core::Task> {
        TaskFile::new(path).load_all().unwrap()
    }

    #[test]
    fn fired_alert_and_one_shot_add_both_reach_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        let d = daemon(&path);
        let rent = d
            .engine
            .add_task(TaskDraft::new("Pay rent", start() + chrono::Duration::minutes(2)))
            .unwrap();

        let cli = one_shot(&path);
        cli.add_task(TaskDraft::new("dentist", start() + chrono::Duration::hours(3)))
            .unwrap();
        cli.shutdown().unwrap();

        // Due alert fires before the daemon has looked at the file again.
        d.clock.advance(chrono::Duration::minutes(3));
        assert_eq!(d.sink.count_for(rent.id, AlertKind::Due), 1);
        assert!(d.engine.status().persistence.dirty);

        sync_with_file(&d.engine, &d.file);

        let saved = on_disk(&path);
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[0].description, "Pay rent");
        assert_eq!(saved[0].status, TaskStatus::Completed);
        assert_eq!(saved[1].description, "dentist");
        assert_eq!(saved[1].status, TaskStatus::Pending);
        assert_eq!(d.engine.armed_for(saved[1].id).len(), 1);
        assert!(!d.engine.status().persistence.dirty);
        assert!(!d.file.changed_on_disk());
    }

    #[test]
    fn task_added_elsewhere_is_armed_on_the_next_poll() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        let d = daemon(&path);
        sync_with_file(&d.engine, &d.file);
        assert!(d.engine.armed_alerts().is_empty());

        let cli = one_shot(&path);
        let soon = cli
            .add_task(TaskDraft::new("stretch", start() + chrono::Duration::seconds(30)))
            .unwrap();
        let missed = cli
            .add_task(TaskDraft::new("missed call", start() - chrono::Duration::minutes(5)))
            .unwrap();

        sync_with_file(&d.engine, &d.file);
        assert_eq!(d.engine.armed_for(soon.id).len(), 1);
        assert_eq!(d.engine.task(missed.id).unwrap().status, TaskStatus::Overdue);

        d.clock.advance(chrono::Duration::seconds(31));
        assert_eq!(d.sink.len(), 1);
        assert_eq!(d.sink.count_for(soon.id, AlertKind::Due), 1);
        let saved = on_disk(&path);
        assert_eq!(saved[0].status, TaskStatus::Completed);
        assert_eq!(saved[1].status, TaskStatus::Overdue);
    }

    #[test]
    fn clean_engine_with_unchanged_file_does_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        let d = daemon(&path);
        d.engine
            .add_task(TaskDraft::new("x", start() + chrono::Duration::hours(1)))
            .unwrap();
        let before = std::fs::read_to_string(&path).unwrap();

        sync_with_file(&d.engine, &d.file);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
        assert_eq!(d.engine.armed_alerts().len(), 1);
    }

    #[test]
    fn quotes_group_words() {
        let words = split_words(r#"add "Pay rent" --due '05/11/2026 09:00'  --leads 1h"#).unwrap();
        assert_eq!(
            words,
            vec!["add", "Pay rent", "--due", "05/11/2026 09:00", "--leads", "1h"]
        );
    }

    #[test]
    fn empty_quotes_make_an_empty_word() {
        assert_eq!(split_words(r#"edit 2 --notes """#).unwrap(), vec!["edit", "2", "--notes", ""]);
        assert!(split_words("   ").unwrap().is_empty());
    }

    #[test]
    fn unterminated_quote_is_an_error() {
        assert!(split_words(r#"add "Pay rent"#).is_err());
    }

    #[test]
    fn prompt_accepts_task_and_daemon_commands() {
        let parse = |line: &str| ReplLine::try_parse_from(split_words(line).unwrap()).map(|l| l.cmd);

        assert!(matches!(
            parse("snooze 7 --minutes 15").unwrap(),
            ReplCommand::Task(TaskCommand::Snooze { id: TaskId(7), minutes: Some(15) })
        ));
        assert!(matches!(parse("status").unwrap(), ReplCommand::Status));
        assert!(matches!(parse("exit").unwrap(), ReplCommand::Quit));
        assert!(parse("launch rockets").is_err());
    }

    #[test]
    fn prompt_definition_is_consistent() {
        use clap::CommandFactory;
        ReplLine::command().debug_assert();
    }
}
