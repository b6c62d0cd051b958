use std::fmt;

use crate::types::ShuffleId;

/// Identifier of one framed batch within a task's push stream.
pub type BatchId = i32;

/// Identifies one attempt of one map task within a shuffle.
///
/// All per-task push state is scoped by this key. Its string form `"{shuffle}-{map}-{attempt}"`
/// is stable and used in logs and error details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskKey {
    pub shuffle_id: ShuffleId,
    pub map_id: i32,
    pub attempt_id: i32,
}

impl TaskKey {
    /// Creates a new [`TaskKey`].
    pub fn new(shuffle_id: ShuffleId, map_id: i32, attempt_id: i32) -> Self {
        Self {
            shuffle_id,
            map_id,
            attempt_id,
        }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.shuffle_id, self.map_id, self.attempt_id)
    }
}
