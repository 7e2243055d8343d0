//! Scheduler: owns the mapping from armed alert keys to live timer handles.
//!
//! Invariant: at most one armed timer per `(task id, kind)`. Every arming gets
//! a fresh `arm_id`; a firing callback must present the arm id it was created
//! with, so a timer that was canceled (or superseded) but still managed to
//! wake up can never be mistaken for the live one.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use tracing::{debug, warn};

use crate::clock::{Clock, TimerCallback, TimerHandle};
use crate::reminders::{plan_task_alerts, AlertEntry, AlertKey};
use crate::task::{Task, TaskId};

/// Builds the callback a timer runs for `(key, arm_id)`.
pub type FireCallbackFactory<'a> = &'a dyn Fn(AlertKey, u64) -> TimerCallback;

#[derive(Debug, Clone, Copy)]
struct ArmedAlert {
    handle: TimerHandle,
    arm_id: u64,
    fire_at: NaiveDateTime,
}

/// Outcome of a Schedule / RebuildAll pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleReport {
    pub armed: usize,
    /// Entries left unarmed because the clock refused them.
    pub failed: usize,
}

impl ScheduleReport {
    fn merge(&mut self, other: ScheduleReport) {
        self.armed += other.armed;
        self.failed += other.failed;
    }
}

#[derive(Debug, Default)]
pub struct Scheduler {
    armed: BTreeMap<AlertKey, ArmedAlert>,
    next_arm_id: u64,
    arm_failures: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace whatever is armed for `task` with its current plan.
    ///
    /// Calling this twice in a row leaves exactly the current plan armed.
    pub fn schedule(
        &mut self,
        task: &Task,
        clock: &dyn Clock,
        on_fire: FireCallbackFactory<'_>,
    ) -> ScheduleReport {
        self.cancel(task.id, clock);

        let now = clock.now();
        let mut report = ScheduleReport::default();

        for entry in plan_task_alerts(task, now) {
            if self.arm(entry, now, clock, on_fire) {
                report.armed += 1;
            } else {
                report.failed += 1;
            }
        }

        debug!(task_id = %task.id, armed = report.armed, failed = report.failed, "task scheduled");
        report
    }

    fn arm(
        &mut self,
        entry: AlertEntry,
        now: NaiveDateTime,
        clock: &dyn Clock,
        on_fire: FireCallbackFactory<'_>,
    ) -> bool {
        let key = entry.key();
        let delay = (entry.fire_at - now).to_std().unwrap_or_default();

        self.next_arm_id += 1;
        let arm_id = self.next_arm_id;

        match clock.arm_after(delay, on_fire(key, arm_id)) {
            Ok(handle) => {
                let replaced = self.armed.insert(
                    key,
                    ArmedAlert {
                        handle,
                        arm_id,
                        fire_at: entry.fire_at,
                    },
                );
                if let Some(old) = replaced {
                    clock.cancel(old.handle);
                }
                true
            }
            Err(e) => {
                self.arm_failures += 1;
                warn!(alert = %key, fire_at = %entry.fire_at, error = %e, "could not arm alert timer; left unarmed");
                false
            }
        }
    }

    /// Cancel every armed alert of `task_id`. No-op when nothing is armed.
    pub fn cancel(&mut self, task_id: TaskId, clock: &dyn Clock) -> usize {
        let keys: Vec<AlertKey> = self
            .armed
            .keys()
            .filter(|k| k.task_id == task_id)
            .copied()
            .collect();

        for key in &keys {
            if let Some(armed) = self.armed.remove(key) {
                clock.cancel(armed.handle);
            }
        }
        if !keys.is_empty() {
            debug!(task_id = %task_id, canceled = keys.len(), "alerts canceled");
        }
        keys.len()
    }

    /// Cancel one specific alert.
    pub fn disarm(&mut self, key: AlertKey, clock: &dyn Clock) -> bool {
        match self.armed.remove(&key) {
            Some(armed) => {
                clock.cancel(armed.handle);
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&mut self, clock: &dyn Clock) -> usize {
        let n = self.armed.len();
        for (_, armed) in std::mem::take(&mut self.armed) {
            clock.cancel(armed.handle);
        }
        n
    }

    /// Cancel everything, then schedule each Pending task in store order.
    pub fn rebuild_all<'t>(
        &mut self,
        tasks: impl IntoIterator<Item = &'t Task>,
        clock: &dyn Clock,
        on_fire: FireCallbackFactory<'_>,
    ) -> ScheduleReport {
        let canceled = self.cancel_all(clock);
        let mut report = ScheduleReport::default();

        for task in tasks.into_iter().filter(|t| t.is_pending()) {
            report.merge(self.schedule(task, clock, on_fire));
        }

        debug!(canceled, armed = report.armed, failed = report.failed, "schedule rebuilt");
        report
    }

    /// Called from a firing timer. Removes the entry and returns true only if
    /// `arm_id` is the live arming for `key`; anything else is a stale fire.
    pub fn claim_fired(&mut self, key: AlertKey, arm_id: u64) -> bool {
        match self.armed.get(&key) {
            Some(armed) if armed.arm_id == arm_id => {
                self.armed.remove(&key);
                true
            }
            _ => false,
        }
    }

    pub fn is_armed(&self, key: AlertKey) -> bool {
        self.armed.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.armed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }

    /// Arming failures since this scheduler was created.
    pub fn arm_failures(&self) -> u64 {
        self.arm_failures
    }

    /// Armed alerts ordered by fire instant.
    pub fn armed_entries(&self) -> Vec<AlertEntry> {
        let mut out: Vec<AlertEntry> = self
            .armed
            .iter()
            .map(|(key, armed)| AlertEntry {
                fire_at: armed.fire_at,
                task_id: key.task_id,
                kind: key.kind,
            })
            .collect();
        out.sort();
        out
    }

    pub fn armed_for(&self, task_id: TaskId) -> Vec<AlertEntry> {
        self.armed_entries()
            .into_iter()
            .filter(|e| e.task_id == task_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::reminders::AlertKind;
    use crate::task::LeadTime;
    use chrono::{Duration, NaiveDate};
    use std::sync::{Arc, Mutex};

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 7, 1)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    fn task(id: u64, due_in_minutes: i64, leads: &[LeadTime]) -> Task {
        leads.iter().fold(
            Task::new(TaskId(id), "t", now() + Duration::minutes(due_in_minutes), now()),
            |t, l| t.with_lead(*l),
        )
    }

    type Fired = Arc<Mutex<Vec<(AlertKey, u64)>>>;

    fn recorder(fired: &Fired) -> impl Fn(AlertKey, u64) -> TimerCallback + '_ {
        move |key, arm_id| {
            let fired = Arc::clone(fired);
            Box::new(move || fired.lock().unwrap().push((key, arm_id)))
        }
    }

    fn keys(s: &Scheduler) -> Vec<AlertKey> {
        s.armed_entries().iter().map(|e| e.key()).collect()
    }

    #[test]
    fn schedule_twice_is_idempotent() {
        let clock = ManualClock::new(now());
        let fired: Fired = Arc::default();
        let mut s = Scheduler::new();
        let t = task(1, 60, &[LeadTime::FiveMinutes, LeadTime::ThirtyMinutes]);

        s.schedule(&t, &clock, &recorder(&fired));
        let first = keys(&s);
        s.schedule(&t, &clock, &recorder(&fired));

        assert_eq!(keys(&s), first);
        assert_eq!(s.len(), 3);
        assert_eq!(clock.pending_timers(), 3);
    }

    #[test]
    fn cancel_unknown_task_is_noop() {
        let clock = ManualClock::new(now());
        let mut s = Scheduler::new();
        assert_eq!(s.cancel(TaskId(99), &clock), 0);
    }

    #[test]
    fn stale_arm_id_is_not_claimed() {
        let clock = ManualClock::new(now());
        let fired: Fired = Arc::default();
        let mut s = Scheduler::new();
        let t = task(1, 10, &[]);

        s.schedule(&t, &clock, &recorder(&fired));
        s.schedule(&t, &clock, &recorder(&fired));
        let due = AlertKey::new(TaskId(1), AlertKind::Due);

        // arm id 1 belonged to the first, canceled arming.
        assert!(!s.claim_fired(due, 1));
        assert!(s.claim_fired(due, 2));
        assert!(!s.claim_fired(due, 2));
        assert!(s.is_empty());
    }

    #[test]
    fn arming_failure_does_not_abort_rest_of_plan() {
        let clock = ManualClock::new(now());
        let fired: Fired = Arc::default();
        let mut s = Scheduler::new();
        let t = task(1, 60, &[LeadTime::FiveMinutes, LeadTime::ThirtyMinutes]);

        clock.fail_next_arms(1);
        let report = s.schedule(&t, &clock, &recorder(&fired));

        assert_eq!(report, ScheduleReport { armed: 2, failed: 1 });
        assert_eq!(s.arm_failures(), 1);
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn rebuild_only_arms_pending_tasks() {
        let clock = ManualClock::new(now());
        let fired: Fired = Arc::default();
        let mut s = Scheduler::new();

        let mut done = task(2, 30, &[]);
        done.complete(now());
        let tasks = vec![task(1, 30, &[LeadTime::TenMinutes]), done];

        s.schedule(&tasks[1], &clock, &recorder(&fired));
        let report = s.rebuild_all(&tasks, &clock, &recorder(&fired));

        assert_eq!(report.armed, 2);
        assert!(s.armed_for(TaskId(2)).is_empty());
        assert_eq!(clock.pending_timers(), 2);
    }

    #[test]
    fn fired_callbacks_carry_key_and_arm_id() {
        let clock = ManualClock::new(now());
        let fired: Fired = Arc::default();
        let mut s = Scheduler::new();
        s.schedule(&task(7, 10, &[LeadTime::FiveMinutes]), &clock, &recorder(&fired));

        clock.advance(Duration::minutes(10));
        let got: Vec<AlertKey> = fired.lock().unwrap().iter().map(|(k, _)| *k).collect();
        assert_eq!(
            got,
            vec![
                AlertKey::new(TaskId(7), AlertKind::Lead(LeadTime::FiveMinutes)),
                AlertKey::new(TaskId(7), AlertKind::Due),
            ]
        );
    }
}
