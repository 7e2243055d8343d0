//! Three-way merge of task lists, for when another process rewrote storage
//! while this one held unsaved changes.
//!
//! `base` is the list both sides last agreed on. Per task id:
//! - a task changed on our side keeps our version, otherwise theirs wins;
//! - a deletion sticks only if the other side left the task as it was in `base`;
//! - tasks added on either side are kept.
//!
//! Both sides may have added different tasks under the same new id. Theirs
//! come first in the result, so [`crate::TaskStore::from_tasks`] hands the
//! fresh id to ours.

use std::collections::HashMap;

use crate::task::{Task, TaskId};

pub fn merge_task_lists(base: &[Task], ours: &[Task], theirs: &[Task]) -> Vec<Task> {
    let base_by_id = index(base);
    let ours_by_id = index(ours);
    let theirs_by_id = index(theirs);

    let mut merged = Vec::with_capacity(theirs.len().max(ours.len()));

    for t in theirs {
        let b = base_by_id.get(&t.id).copied();
        match ours_by_id.get(&t.id).copied() {
            Some(o) if b.is_none() && o != t => {
                // Added on both sides under one id: keep both.
                merged.push(t.clone());
                merged.push(o.clone());
            }
            Some(o) if Some(o) != b => merged.push(o.clone()),
            Some(_) => merged.push(t.clone()),
            // We deleted it; their edit outranks our deletion.
            None if b.is_some_and(|b| b != t) => merged.push(t.clone()),
            None if b.is_some() => {}
            None => merged.push(t.clone()),
        }
    }

    for o in ours {
        if theirs_by_id.contains_key(&o.id) {
            continue;
        }
        match base_by_id.get(&o.id) {
            // They deleted it; keep it only if we changed it since.
            Some(b) if *b == o => {}
            _ => merged.push(o.clone()),
        }
    }

    merged
}

fn index(tasks: &[Task]) -> HashMap<TaskId, &Task> {
    tasks.iter().map(|t| (t.id, t)).collect()
}
