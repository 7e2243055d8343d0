//! Persistence seam and the write gate that serializes whole-list saves.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{bail, Result};
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::task::Task;

/// Durable storage for the task list. Whole-list overwrite semantics.
///
/// Storage shared with other processes must refuse a save when it was
/// rewritten since this handle's last load or save, returning [`StaleWrite`]
/// (wrapped in the `anyhow::Error`).
pub trait Persistence: Send + Sync {
    fn load_all(&self) -> Result<Vec<Task>>;
    fn save_all(&self, tasks: &[Task]) -> Result<()>;
}

/// Save refused: someone else wrote the list after we last saw it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("task list was rewritten by another writer")]
pub struct StaleWrite;

/// In-memory persistence, for tests and scratch sessions.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    tasks: Mutex<Vec<Task>>,
    saves: AtomicUsize,
    failing: AtomicBool,
    /// Set by [`Self::write_externally`], cleared by the next load.
    foreign_write: AtomicBool,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        Self {
            tasks: Mutex::new(tasks),
            ..Self::default()
        }
    }

    /// Last successfully saved list.
    pub fn saved(&self) -> Vec<Task> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Make subsequent saves fail, as a full disk would.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Replace the stored list as another process would. Saves are refused
    /// with [`StaleWrite`] until the next load.
    pub fn write_externally(&self, tasks: Vec<Task>) {
        *self.tasks.lock().unwrap_or_else(PoisonError::into_inner) = tasks;
        self.foreign_write.store(true, Ordering::SeqCst);
    }
}

impl Persistence for MemoryPersistence {
    fn load_all(&self) -> Result<Vec<Task>> {
        self.foreign_write.store(false, Ordering::SeqCst);
        Ok(self.saved())
    }

    fn save_all(&self, tasks: &[Task]) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("simulated write failure");
        }
        if self.foreign_write.load(Ordering::SeqCst) {
            return Err(StaleWrite.into());
        }
        *self.tasks.lock().unwrap_or_else(PoisonError::into_inner) = tasks.to_vec();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistHealth {
    /// In-memory state is ahead of what was last written.
    pub dirty: bool,
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct WriterState {
    written_revision: u64,
    health: PersistHealth,
    /// The list as storage last held it (our last load or successful save);
    /// the common base when merging with a foreign write.
    synced: Vec<Task>,
}

/// Serializes writes so concurrent mutations never interleave partial saves,
/// and drops snapshots older than one already on disk.
pub(crate) struct PersistGate {
    backend: Arc<dyn Persistence>,
    writer: Mutex<WriterState>,
}

impl PersistGate {
    pub(crate) fn new(backend: Arc<dyn Persistence>) -> Self {
        Self {
            backend,
            writer: Mutex::new(WriterState::default()),
        }
    }

    pub(crate) fn load(&self) -> Result<Vec<Task>> {
        self.backend.load_all()
    }

    /// Mark `revision` as matching storage, which holds `stored` (after load).
    pub(crate) fn mark_clean(&self, revision: u64, stored: &[Task]) {
        let mut w = self.lock();
        w.written_revision = revision;
        w.health = PersistHealth::default();
        w.synced = stored.to_vec();
    }

    /// Record that storage holds `stored` without touching revisions or
    /// health (a reload taken for merging).
    pub(crate) fn mark_synced(&self, stored: &[Task]) {
        self.lock().synced = stored.to_vec();
    }

    pub(crate) fn synced(&self) -> Vec<Task> {
        self.lock().synced.clone()
    }

    /// Write `snapshot` taken at `revision`. Older revisions are skipped.
    pub(crate) fn write(&self, revision: u64, snapshot: &[Task]) -> std::result::Result<(), EngineError> {
        let mut w = self.lock();
        let stale = revision < w.written_revision
            || (revision == w.written_revision && !w.health.dirty);
        if stale {
            debug!(revision, written = w.written_revision, "skipping stale snapshot");
            return Ok(());
        }

        match self.backend.save_all(snapshot) {
            Ok(()) => {
                w.written_revision = revision;
                w.health = PersistHealth::default();
                w.synced = snapshot.to_vec();
                debug!(revision, tasks = snapshot.len(), "task list saved");
                Ok(())
            }
            Err(e) => {
                let msg = format!("{e:#}");
                let conflict = e.downcast_ref::<StaleWrite>().is_some();
                if conflict {
                    warn!(revision, "task list changed underneath us; save held until merged");
                } else {
                    warn!(revision, error = %msg, "task list save failed; will retry on next change");
                }
                w.health = PersistHealth {
                    dirty: true,
                    last_error: Some(msg.clone()),
                };
                Err(if conflict {
                    EngineError::Conflict
                } else {
                    EngineError::Persistence(msg)
                })
            }
        }
    }

    /// Retry only if something is pending.
    pub(crate) fn flush(&self, revision: u64, snapshot: &[Task]) -> std::result::Result<(), EngineError> {
        let pending = {
            let w = self.lock();
            w.health.dirty || revision > w.written_revision
        };
        if !pending {
            return Ok(());
        }
        self.write(revision, snapshot)
    }

    pub(crate) fn health(&self) -> PersistHealth {
        self.lock().health.clone()
    }

    fn lock(&self) -> MutexGuard<'_, WriterState> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskId;
    use chrono::NaiveDate;

    fn task(id: u64) -> Task {
        let at = NaiveDate::from_ymd_opt(2026, 2, 2)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        Task::new(TaskId(id), format!("t{id}"), at, at)
    }

    #[test]
    fn older_revision_never_overwrites_newer() {
        let mem = Arc::new(MemoryPersistence::new());
        let gate = PersistGate::new(mem.clone());

        gate.write(2, &[task(1), task(2)]).unwrap();
        gate.write(1, &[task(1)]).unwrap();

        assert_eq!(mem.saved().len(), 2);
        assert_eq!(mem.save_count(), 1);
    }

    #[test]
    fn failure_marks_dirty_and_flush_retries() {
        let mem = Arc::new(MemoryPersistence::new());
        let gate = PersistGate::new(mem.clone());

        mem.set_failing(true);
        let err = gate.write(1, &[task(1)]).unwrap_err();
        assert!(matches!(err, EngineError::Persistence(ref msg) if msg.contains("simulated")));
        assert!(gate.health().dirty);

        mem.set_failing(false);
        gate.flush(1, &[task(1)]).unwrap();
        assert!(!gate.health().dirty);
        assert_eq!(mem.saved().len(), 1);

        // Nothing pending: no extra write.
        gate.flush(1, &[task(1)]).unwrap();
        assert_eq!(mem.save_count(), 1);
    }

    #[test]
    fn foreign_write_is_a_conflict_until_reloaded() {
        let mem = Arc::new(MemoryPersistence::new());
        let gate = PersistGate::new(mem.clone());
        gate.write(1, &[task(1)]).unwrap();
        assert_eq!(gate.synced(), vec![task(1)]);

        mem.write_externally(vec![task(1), task(2)]);
        assert!(matches!(gate.write(2, &[task(3)]), Err(EngineError::Conflict)));
        assert!(gate.health().dirty);
        assert_eq!(mem.saved().len(), 2);
        assert_eq!(gate.synced(), vec![task(1)]);

        let theirs = gate.load().unwrap();
        gate.mark_synced(&theirs);
        gate.write(3, &[task(1), task(2), task(3)]).unwrap();
        assert_eq!(mem.saved().len(), 3);
        assert!(!gate.health().dirty);
    }
}
