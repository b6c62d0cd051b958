//! Tracking of map tasks whose shuffle stage already ended.

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};

use tracing::info;

use crate::types::{ShuffleId, TaskKey};

/// Remembers, per shuffle, which tasks were told that their stage ended.
///
/// Once a task is marked it stays marked until its whole shuffle is cleared; every push
/// operation consults the tracker first and turns into a no-op for ended tasks.
#[derive(Debug, Default)]
pub struct MapperEndTracker {
    ended: RwLock<HashMap<ShuffleId, HashSet<TaskKey>>>,
}

impl MapperEndTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `task` as ended and returns `true` if it was not marked before.
    pub fn mark_ended(&self, task: TaskKey) -> bool {
        let newly_ended = self
            .ended
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(task.shuffle_id)
            .or_default()
            .insert(task);

        if newly_ended {
            info!(task = %task, "mapper ended, further pushes for the task are skipped");
        }

        newly_ended
    }

    pub fn is_ended(&self, task: TaskKey) -> bool {
        self.ended
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&task.shuffle_id)
            .is_some_and(|tasks| tasks.contains(&task))
    }

    /// Returns how many tasks of `shuffle_id` are marked as ended.
    pub fn ended_count(&self, shuffle_id: ShuffleId) -> usize {
        self.ended
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&shuffle_id)
            .map_or(0, HashSet::len)
    }

    /// Forgets every ended task of `shuffle_id`.
    pub fn clear_shuffle(&self, shuffle_id: ShuffleId) {
        self.ended
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&shuffle_id);
    }
}
