//! JSON task file: the durable [`Persistence`] behind the CLI and daemon.
//!
//! The daemon and one-shot commands share one file. Each handle remembers the
//! bytes it last loaded or saved and refuses to save over anything else with
//! [`StaleWrite`]; the engine then merges and saves again.

use anyhow::{Context, Result};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::warn;

use lembrete_core::{Persistence, StaleWrite, Task};

pub struct TaskFile {
    path: PathBuf,
    /// File content after our last load or save; `None` when it was absent.
    known: Mutex<Option<String>>,
}

impl TaskFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            known: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn known(&self) -> MutexGuard<'_, Option<String>> {
        self.known.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_current(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("read {}", self.path.display())),
        }
    }

    /// True when another process rewrote the file since we last touched it.
    /// Rewriting identical content does not count.
    pub fn changed_on_disk(&self) -> bool {
        match self.read_current() {
            Ok(current) => current != *self.known(),
            Err(e) => {
                warn!(error = %format!("{e:#}"), "could not check task file");
                false
            }
        }
    }
}

impl Persistence for TaskFile {
    fn load_all(&self) -> Result<Vec<Task>> {
        let mut known = self.known();
        let current = self.read_current()?;
        *known = current.clone();
        match current {
            Some(s) if !s.trim().is_empty() => {
                serde_json::from_str(&s).with_context(|| format!("parse {}", self.path.display()))
            }
            _ => Ok(Vec::new()),
        }
    }

    fn save_all(&self, tasks: &[Task]) -> Result<()> {
        let mut known = self.known();
        // Another writer can still slip in between this check and the rename;
        // its change is then lost to this save.
        if self.read_current()? != *known {
            return Err(StaleWrite.into());
        }

        let json = serde_json::to_string_pretty(tasks).context("serialize tasks")?;
        write_atomic(&self.path, json.as_bytes())?;
        *known = Some(json);
        Ok(())
    }
}

/// Replace `path` with `bytes` through a synced sibling temp file and a
/// rename, so readers see the old file or the new one, never a torn write.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }

    let tmp = tmp_path(path);
    {
        let mut f = fs::File::create(&tmp).with_context(|| format!("create {}", tmp.display()))?;
        f.write_all(bytes)
            .with_context(|| format!("write {}", tmp.display()))?;
        f.sync_all().with_context(|| format!("sync {}", tmp.display()))?;
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "lembrete".into());
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use lembrete_core::{LeadTime, TaskId};

    fn task(id: u64) -> Task {
        let at = NaiveDate::from_ymd_opt(2026, 11, 3)
            .unwrap()
            .and_hms_opt(8, 15, 0)
            .unwrap();
        Task::new(TaskId(id), format!("task {id}"), at, at).with_lead(LeadTime::OneDay)
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let file = TaskFile::new(dir.path().join("tasks.json"));
        assert!(file.load_all().unwrap().is_empty());
        assert!(!file.changed_on_disk());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tasks.json");
        let file = TaskFile::new(&path);

        file.save_all(&[task(1), task(2)]).unwrap();
        let back = file.load_all().unwrap();

        assert_eq!(back, vec![task(1), task(2)]);
        assert!(!tmp_path(&path).exists());
    }

    #[test]
    fn detects_writes_from_another_process() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        let ours = TaskFile::new(&path);
        ours.save_all(&[task(1)]).unwrap();
        assert!(!ours.changed_on_disk());

        fs::remove_file(&path).unwrap();
        assert!(ours.changed_on_disk());
        ours.load_all().unwrap();
        assert!(!ours.changed_on_disk());
    }

    #[test]
    fn save_over_a_newer_file_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        let daemon = TaskFile::new(&path);
        let one_shot = TaskFile::new(&path);
        daemon.load_all().unwrap();
        one_shot.load_all().unwrap();

        one_shot.save_all(&[task(1), task(2)]).unwrap();
        assert!(daemon.changed_on_disk());

        let err = daemon.save_all(&[task(3)]).unwrap_err();
        assert!(err.downcast_ref::<StaleWrite>().is_some());
        assert_eq!(daemon.load_all().unwrap(), vec![task(1), task(2)]);

        daemon.save_all(&[task(1), task(2), task(3)]).unwrap();
        assert_eq!(one_shot.load_all().unwrap().len(), 3);
    }

    #[test]
    fn identical_rewrite_is_not_a_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        let a = TaskFile::new(&path);
        let b = TaskFile::new(&path);
        a.save_all(&[task(1)]).unwrap();
        b.load_all().unwrap();

        a.load_all().unwrap();
        a.save_all(&[task(1)]).unwrap();
        assert!(!b.changed_on_disk());
        b.save_all(&[task(1), task(2)]).unwrap();
    }

    #[test]
    fn garbage_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        fs::write(&path, "{not json").unwrap();
        assert!(TaskFile::new(path).load_all().is_err());
    }
}
