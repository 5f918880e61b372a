//! # Checkpoint Store
//!
//! Advisory, best-effort snapshots captured when a task reaches a
//! terminal state: the exit reason plus a short tail of each output
//! stream. Nothing in the supervisor treats this as authoritative —
//! task state lives in the repository; a checkpoint only exists to
//! give a future retry path something to look at without re-reading
//! the full output buffer.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::domain::FailureCause;
use crate::ids::TaskId;

/// How many trailing lines of each stream a checkpoint keeps.
pub const CHECKPOINT_TAIL_LINES: usize = 20;

#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub task_id: TaskId,
    pub exit_code: Option<i32>,
    pub failure_cause: Option<FailureCause>,
    pub stdout_tail: Vec<String>,
    pub stderr_tail: Vec<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Keyed by task id; a later checkpoint for the same task replaces the
/// earlier one rather than accumulating a history.
#[derive(Default)]
pub struct CheckpointStore {
    entries: DashMap<TaskId, Checkpoint>,
}

impl CheckpointStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, checkpoint: Checkpoint) {
        self.entries.insert(checkpoint.task_id.clone(), checkpoint);
    }

    #[must_use]
    pub fn get(&self, task_id: &TaskId) -> Option<Checkpoint> {
        self.entries.get(task_id).map(|e| e.clone())
    }

    pub fn clear(&self, task_id: &TaskId) {
        self.entries.remove(task_id);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint(id: &str) -> Checkpoint {
        Checkpoint {
            task_id: TaskId::new(id).unwrap(),
            exit_code: Some(1),
            failure_cause: Some(FailureCause::NonZeroExit),
            stdout_tail: vec!["line1".into()],
            stderr_tail: vec![],
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn record_then_get_round_trips() {
        let store = CheckpointStore::new();
        store.record(checkpoint("t1"));
        let got = store.get(&TaskId::new("t1").unwrap()).unwrap();
        assert_eq!(got.exit_code, Some(1));
    }

    #[test]
    fn a_later_checkpoint_replaces_the_earlier_one() {
        let store = CheckpointStore::new();
        store.record(checkpoint("t1"));
        let mut second = checkpoint("t1");
        second.exit_code = Some(0);
        second.failure_cause = None;
        store.record(second);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&TaskId::new("t1").unwrap()).unwrap().exit_code, Some(0));
    }

    #[test]
    fn clear_removes_the_entry() {
        let store = CheckpointStore::new();
        store.record(checkpoint("t1"));
        store.clear(&TaskId::new("t1").unwrap());
        assert!(store.is_empty());
    }
}
