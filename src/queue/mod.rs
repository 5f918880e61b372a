//! # Priority Queue
//!
//! Strict-priority, FIFO-within-band waiting set. The queue itself
//! only orders by `(priority, enqueue time)`; it never consults the
//! dependency graph — that composition happens one layer up, in the
//! Queue Handler.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::domain::{Priority, Task};
use crate::ids::TaskId;

#[derive(Debug, Clone)]
struct QueueEntry {
    priority: Priority,
    enqueued_at: DateTime<Utc>,
    task: Task,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.task.id == other.task.id
    }
}
impl Eq for QueueEntry {}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; we want P0 (highest priority) and
        // the earliest enqueue time to sort to the top, so reverse
        // priority's natural ordering (P0 < P1 < P2) and reverse time.
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.enqueued_at.cmp(&self.enqueued_at))
    }
}
impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct Inner {
    heap: BinaryHeap<QueueEntry>,
    /// Lazy-deletion tombstones: ids `remove`d but not yet popped.
    removed: HashSet<TaskId>,
    members: HashSet<TaskId>,
}

pub struct PriorityQueue {
    inner: Mutex<Inner>,
}

impl Default for PriorityQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PriorityQueue {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn enqueue(&self, task: Task) {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        inner.members.insert(task.id.clone());
        inner.removed.remove(&task.id);
        inner.heap.push(QueueEntry {
            priority: task.priority,
            enqueued_at: Utc::now(),
            task,
        });
    }

    /// Re-enqueues `task` ahead of every other entry in its priority
    /// band, for the requeue-on-spawn-failure path. Backdates the
    /// enqueue timestamp to the epoch so normal FIFO ordering within
    /// the band always sorts this entry first.
    pub fn enqueue_at_head(&self, task: Task) {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        inner.members.insert(task.id.clone());
        inner.removed.remove(&task.id);
        inner.heap.push(QueueEntry {
            priority: task.priority,
            enqueued_at: DateTime::<Utc>::MIN_UTC,
            task,
        });
    }

    /// Pops the highest-priority, earliest-enqueued task, skipping
    /// (and discarding) any tombstoned entries along the way.
    pub fn dequeue(&self) -> Option<Task> {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        loop {
            let entry = inner.heap.pop()?;
            if inner.removed.remove(&entry.task.id) {
                continue;
            }
            inner.members.remove(&entry.task.id);
            return Some(entry.task);
        }
    }

    #[must_use]
    pub fn peek(&self) -> Option<Task> {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        loop {
            let top = inner.heap.peek()?;
            if inner.removed.contains(&top.task.id) {
                inner.heap.pop();
                continue;
            }
            return Some(top.task.clone());
        }
    }

    /// Tombstones `id` so a future pop skips it instead of returning it.
    pub fn remove(&self, id: &TaskId) {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        if inner.members.remove(id) {
            inner.removed.insert(id.clone());
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.lock().expect("queue mutex poisoned").members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    #[must_use]
    pub fn contains(&self, id: &TaskId) -> bool {
        self.inner.lock().expect("queue mutex poisoned").members.contains(id)
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        inner.heap.clear();
        inner.removed.clear();
        inner.members.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DelegateRequest;

    fn task(priority: Priority) -> Task {
        Task::from_delegate_request(DelegateRequest {
            prompt: "echo hi".into(),
            priority: Some(priority),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn strict_priority_ordering() {
        let q = PriorityQueue::new();
        q.enqueue(task(Priority::P2));
        q.enqueue(task(Priority::P0));
        q.enqueue(task(Priority::P1));
        assert_eq!(q.dequeue().unwrap().priority, Priority::P0);
        assert_eq!(q.dequeue().unwrap().priority, Priority::P1);
        assert_eq!(q.dequeue().unwrap().priority, Priority::P2);
    }

    #[test]
    fn fifo_within_priority_band() {
        let q = PriorityQueue::new();
        let first = task(Priority::P1);
        let first_id = first.id.clone();
        q.enqueue(first);
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = task(Priority::P1);
        q.enqueue(second);
        assert_eq!(q.dequeue().unwrap().id, first_id);
    }

    #[test]
    fn remove_tombstones_without_breaking_heap_order() {
        let q = PriorityQueue::new();
        let t = task(Priority::P0);
        let id = t.id.clone();
        q.enqueue(t);
        q.enqueue(task(Priority::P1));
        q.remove(&id);
        assert!(!q.contains(&id));
        let next = q.dequeue().unwrap();
        assert_eq!(next.priority, Priority::P1);
    }

    #[test]
    fn size_and_is_empty_track_live_membership() {
        let q = PriorityQueue::new();
        assert!(q.is_empty());
        q.enqueue(task(Priority::P1));
        assert_eq!(q.size(), 1);
        q.clear();
        assert!(q.is_empty());
    }
}
