//! In-memory `TaskRepository`. Backs the abstract contract from
//! `super` without committing to an on-disk format.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{TaskPatch, TaskRepository};
use crate::domain::{Task, TaskStatus};
use crate::errors::{ErrorKind, Result, SupervisorError};
use crate::ids::TaskId;

#[derive(Default)]
struct Store {
    tasks: HashMap<TaskId, Task>,
    by_status: HashMap<TaskStatus, BTreeSet<TaskId>>,
    /// `(created_at, task_id)` tuples, ordered ascending by construction;
    /// read in reverse for the descending `findAll` contract.
    by_created_at: BTreeSet<(DateTime<Utc>, TaskId)>,
}

impl Store {
    fn index_insert(&mut self, task: &Task) {
        self.by_status
            .entry(task.status)
            .or_default()
            .insert(task.id.clone());
        self.by_created_at.insert((task.created_at, task.id.clone()));
    }

    fn index_remove(&mut self, task: &Task) {
        if let Some(set) = self.by_status.get_mut(&task.status) {
            set.remove(&task.id);
        }
        self.by_created_at.remove(&(task.created_at, task.id.clone()));
    }
}

pub struct InMemoryTaskRepository {
    store: Mutex<Store>,
}

impl Default for InMemoryTaskRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTaskRepository {
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: Mutex::new(Store::default()),
        }
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn save(&self, task: Task) -> Result<()> {
        let mut store = self.store.lock().await;
        if let Some(existing) = store.tasks.get(&task.id).cloned() {
            store.index_remove(&existing);
        }
        store.index_insert(&task);
        store.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    async fn update(&self, id: &TaskId, patch: TaskPatch) -> Result<()> {
        let mut store = self.store.lock().await;
        let Some(task) = store.tasks.get(id).cloned() else {
            return Err(SupervisorError::task_not_found(id.to_string()));
        };
        let mut updated = task.clone();
        if let Some(status) = patch.status {
            updated.status = status;
        }
        if let Some(started_at) = patch.started_at {
            updated.started_at = Some(started_at);
        }
        if let Some(completed_at) = patch.completed_at {
            updated.completed_at = Some(completed_at);
        }
        if let Some(worker_id) = patch.worker_id {
            updated.worker_id = worker_id;
        }
        if let Some(exit_code) = patch.exit_code {
            updated.exit_code = exit_code;
        }
        if let Some(duration_ms) = patch.duration_ms {
            updated.duration_ms = duration_ms;
        }
        if let Some(failure_cause) = patch.failure_cause {
            updated.failure_cause = failure_cause;
        }

        store.index_remove(&task);
        store.index_insert(&updated);
        store.tasks.insert(id.clone(), updated);
        Ok(())
    }

    async fn find_by_id(&self, id: &TaskId) -> Result<Option<Task>> {
        Ok(self.store.lock().await.tasks.get(id).cloned())
    }

    async fn find_all(&self, limit: usize, offset: usize) -> Result<Vec<Task>> {
        let store = self.store.lock().await;
        let capped_limit = limit.min(crate::config::Configuration::default().default_page_size);
        Ok(store
            .by_created_at
            .iter()
            .rev()
            .skip(offset)
            .take(capped_limit)
            .filter_map(|(_, id)| store.tasks.get(id).cloned())
            .collect())
    }

    async fn find_all_unbounded(&self) -> Result<Vec<Task>> {
        let store = self.store.lock().await;
        Ok(store
            .by_created_at
            .iter()
            .rev()
            .filter_map(|(_, id)| store.tasks.get(id).cloned())
            .collect())
    }

    async fn find_by_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        let store = self.store.lock().await;
        Ok(store
            .by_status
            .get(&status)
            .into_iter()
            .flatten()
            .filter_map(|id| store.tasks.get(id).cloned())
            .collect())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.store.lock().await.tasks.len())
    }

    async fn delete(&self, id: &TaskId) -> Result<()> {
        let mut store = self.store.lock().await;
        if let Some(task) = store.tasks.remove(id) {
            store.index_remove(&task);
            Ok(())
        } else {
            Err(SupervisorError::new(
                ErrorKind::TaskNotFound,
                format!("task not found: {id}"),
            ))
        }
    }

    async fn delete_all(&self) -> Result<()> {
        let mut store = self.store.lock().await;
        *store = Store::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DelegateRequest;

    fn sample_task() -> Task {
        Task::from_delegate_request(DelegateRequest {
            prompt: "echo hi".into(),
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn save_then_find_round_trips() {
        let repo = InMemoryTaskRepository::new();
        let task = sample_task();
        repo.save(task.clone()).await.unwrap();
        let found = repo.find_by_id(&task.id).await.unwrap().unwrap();
        assert_eq!(found.id, task.id);
    }

    #[tokio::test]
    async fn save_twice_is_idempotent() {
        let repo = InMemoryTaskRepository::new();
        let task = sample_task();
        repo.save(task.clone()).await.unwrap();
        repo.save(task.clone()).await.unwrap();
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn find_all_defaults_to_capped_page_size() {
        let repo = InMemoryTaskRepository::new();
        for _ in 0..150 {
            repo.save(sample_task()).await.unwrap();
        }
        let page = repo.find_all(1000, 0).await.unwrap();
        assert_eq!(page.len(), 100);
    }

    #[tokio::test]
    async fn find_by_status_uses_the_index() {
        let repo = InMemoryTaskRepository::new();
        let mut task = sample_task();
        task.transition_to(TaskStatus::Running).unwrap();
        repo.save(task.clone()).await.unwrap();
        let running = repo.find_by_status(TaskStatus::Running).await.unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, task.id);
    }

    #[tokio::test]
    async fn delete_removes_from_both_indexes() {
        let repo = InMemoryTaskRepository::new();
        let task = sample_task();
        repo.save(task.clone()).await.unwrap();
        repo.delete(&task.id).await.unwrap();
        assert!(repo.find_by_id(&task.id).await.unwrap().is_none());
        assert_eq!(repo.find_by_status(TaskStatus::Queued).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn delete_unknown_task_errors() {
        let repo = InMemoryTaskRepository::new();
        let id = TaskId::new("nonexistent").unwrap();
        assert!(repo.delete(&id).await.is_err());
    }
}
