//! Tokio-backed [`Clock`]: one sleeping task per armed alert.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::NaiveDateTime;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

use lembrete_core::time::local_now;
use lembrete_core::{Clock, ClockError, TimerCallback, TimerHandle};

#[derive(Default)]
struct TimerTable {
    next_id: u64,
    live: HashMap<u64, AbortHandle>,
}

pub struct TokioClock {
    handle: Handle,
    timers: Arc<Mutex<TimerTable>>,
    capacity: usize,
}

impl TokioClock {
    pub fn new(handle: Handle, capacity: usize) -> Self {
        Self {
            handle,
            timers: Arc::new(Mutex::new(TimerTable::default())),
            capacity,
        }
    }

    pub fn armed(&self) -> usize {
        lock(&self.timers).live.len()
    }
}

fn lock(timers: &Mutex<TimerTable>) -> MutexGuard<'_, TimerTable> {
    timers.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Clock for TokioClock {
    fn now(&self) -> NaiveDateTime {
        local_now()
    }

    fn arm_after(&self, delay: Duration, callback: TimerCallback) -> Result<TimerHandle, ClockError> {
        let mut table = lock(&self.timers);
        if table.live.len() >= self.capacity {
            return Err(ClockError::Exhausted {
                limit: self.capacity,
            });
        }

        table.next_id += 1;
        let id = table.next_id;

        // The table lock is held until the abort handle is stored, so the
        // task can't observe a missing entry and drop a live fire.
        let timers = Arc::clone(&self.timers);
        let task = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            let live = lock(&timers).live.remove(&id).is_some();
            if live {
                callback();
            }
        });
        table.live.insert(id, task.abort_handle());

        Ok(TimerHandle::new(id))
    }

    fn cancel(&self, handle: TimerHandle) {
        if let Some(task) = lock(&self.timers).live.remove(&handle.raw()) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter(hits: &Arc<AtomicUsize>) -> TimerCallback {
        let hits = Arc::clone(hits);
        Box::new(move || {
            hits.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn fires_after_delay() {
        let clock = TokioClock::new(Handle::current(), 8);
        let hits = Arc::new(AtomicUsize::new(0));
        clock.arm_after(Duration::from_millis(20), counter(&hits)).unwrap();
        assert_eq!(clock.armed(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(clock.armed(), 0);
    }

    #[tokio::test]
    async fn canceled_timer_does_not_fire() {
        let clock = TokioClock::new(Handle::current(), 8);
        let hits = Arc::new(AtomicUsize::new(0));
        let h = clock.arm_after(Duration::from_millis(50), counter(&hits)).unwrap();
        clock.cancel(h);
        clock.cancel(h);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn capacity_is_enforced() {
        let clock = TokioClock::new(Handle::current(), 1);
        let hits = Arc::new(AtomicUsize::new(0));
        clock.arm_after(Duration::from_secs(60), counter(&hits)).unwrap();
        assert_eq!(
            clock.arm_after(Duration::from_secs(60), counter(&hits)).unwrap_err(),
            ClockError::Exhausted { limit: 1 }
        );
    }

    mod with_engine {
        use super::*;
        use lembrete_core::{
            AlertKind, EngineConfig, MemoryPersistence, RecordingSink, ReminderEngine, TaskDraft,
            TaskPatch, TaskStatus,
        };

        struct Rig {
            engine: ReminderEngine,
            clock: Arc<TokioClock>,
            sink: Arc<RecordingSink>,
            store: Arc<MemoryPersistence>,
        }

        fn rig() -> Rig {
            let clock = Arc::new(TokioClock::new(Handle::current(), 256));
            let sink = Arc::new(RecordingSink::new());
            let store = Arc::new(MemoryPersistence::new());
            let engine = ReminderEngine::new(clock.clone(), sink.clone(), store.clone(), EngineConfig::default());
            engine.load().unwrap();
            Rig {
                engine,
                clock,
                sink,
                store,
            }
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
        async fn added_task_fires_once_and_completes() {
            let r = rig();
            let due = r.engine.now() + chrono::Duration::seconds(2);
            let task = r.engine.add_task(TaskDraft::new("stand up", due)).unwrap();
            assert_eq!(r.clock.armed(), 1);

            tokio::time::sleep(Duration::from_millis(4500)).await;

            assert_eq!(r.sink.len(), 1);
            assert_eq!(r.sink.count_for(task.id, AlertKind::Due), 1);
            let done = r.engine.task(task.id).unwrap();
            assert_eq!(done.status, TaskStatus::Completed);
            assert_eq!(r.store.saved(), vec![done]);
            assert_eq!(r.clock.armed(), 0);
            assert!(r.engine.armed_alerts().is_empty());
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
        async fn edits_and_deletes_racing_the_due_timer_never_double_fire() {
            let r = rig();
            let due = r.engine.now() + chrono::Duration::seconds(1);
            let later = due + chrono::Duration::hours(1);

            let mut ids = Vec::new();
            for i in 0..20 {
                ids.push(r.engine.add_task(TaskDraft::new(format!("task {i}"), due)).unwrap().id);
            }

            // Spread the changes across the window in which the timers fire.
            let mut changes = Vec::new();
            for (i, &id) in ids.iter().enumerate() {
                let engine = r.engine.clone();
                let offset = Duration::from_millis(100 * i as u64);
                changes.push(tokio::spawn(async move {
                    tokio::time::sleep(offset).await;
                    if i % 2 == 0 {
                        engine.delete_task(id).map(|_| ())
                    } else {
                        let patch = TaskPatch {
                            due_at: Some(later),
                            ..TaskPatch::default()
                        };
                        engine.edit_task(id, patch).map(|_| ())
                    }
                }));
            }
            for change in changes {
                change.await.unwrap().unwrap();
            }
            tokio::time::sleep(Duration::from_millis(3000)).await;

            for (i, &id) in ids.iter().enumerate() {
                let fired = r.sink.count_for(id, AlertKind::Due);
                assert!(fired <= 1, "task {id} fired {fired} times");
                if i % 2 == 0 {
                    assert!(r.engine.task(id).is_none());
                    assert!(r.engine.armed_for(id).is_empty());
                    continue;
                }
                let task = r.engine.task(id).unwrap();
                assert_eq!(task.due_at, later);
                if fired == 0 {
                    // Edited before the timer: the old arming must not complete it.
                    assert_eq!(task.status, TaskStatus::Pending);
                    assert_eq!(r.engine.armed_for(id).len(), 1);
                } else {
                    assert_eq!(task.status, TaskStatus::Completed);
                    assert!(r.engine.armed_for(id).is_empty());
                }
            }
            assert_eq!(r.store.saved(), r.engine.tasks());
        }
    }
}
