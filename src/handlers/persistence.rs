//! # Persistence Handler
//!
//! Subscribes to the lifecycle events that carry a state change and
//! upserts the corresponding fields into the repository. `TaskDelegated`
//! is the only event that re-emits a downstream signal (`TaskPersisted`),
//! and only after the save has actually landed, so the Queue Handler
//! never enqueues a task that isn't durable yet.

use std::sync::Arc;

use chrono::Utc;
use tracing::warn;

use crate::domain::event::{
    TaskCancelled, TaskCompleted, TaskDelegated, TaskFailed, TaskPersisted, TaskStarted,
    TaskTimeout,
};
use crate::domain::{EventType, FailureCause, Task, TaskStatus};
use crate::errors::{ErrorKind, Result, SupervisorError};
use crate::event_bus::EventBus;
use crate::ids::TaskId;
use crate::repository::{TaskPatch, TaskRepository};

pub struct PersistenceHandler {
    bus: EventBus,
    repository: Arc<dyn TaskRepository>,
}

impl PersistenceHandler {
    #[must_use]
    pub fn new(bus: EventBus, repository: Arc<dyn TaskRepository>) -> Self {
        Self { bus, repository }
    }

    pub fn register(self: &Arc<Self>) -> Result<()> {
        let h = self.clone();
        self.bus.subscribe(EventType::TaskDelegated, move |env| {
            let h = h.clone();
            async move {
                let crate::domain::TaskEvent::TaskDelegated(TaskDelegated { task }) = env.payload
                else {
                    return Ok(());
                };
                h.on_delegated(task).await
            }
        })?;

        let h = self.clone();
        self.bus.subscribe(EventType::TaskStarted, move |env| {
            let h = h.clone();
            async move {
                let crate::domain::TaskEvent::TaskStarted(TaskStarted { task_id, worker_id }) =
                    env.payload
                else {
                    return Ok(());
                };
                h.repository
                    .update(
                        &task_id,
                        TaskPatch {
                            status: Some(TaskStatus::Running),
                            started_at: Some(Utc::now()),
                            worker_id: Some(Some(worker_id)),
                            ..Default::default()
                        },
                    )
                    .await
            }
        })?;

        let h = self.clone();
        self.bus.subscribe(EventType::TaskCompleted, move |env| {
            let h = h.clone();
            async move {
                let crate::domain::TaskEvent::TaskCompleted(TaskCompleted { task_id, exit_code }) =
                    env.payload
                else {
                    return Ok(());
                };
                h.finish(&task_id, TaskStatus::Completed, Some(exit_code), None).await
            }
        })?;

        let h = self.clone();
        self.bus.subscribe(EventType::TaskFailed, move |env| {
            let h = h.clone();
            async move {
                let crate::domain::TaskEvent::TaskFailed(TaskFailed {
                    task_id,
                    exit_code,
                    cause,
                    ..
                }) = env.payload
                else {
                    return Ok(());
                };
                h.finish(&task_id, TaskStatus::Failed, exit_code, Some(cause)).await
            }
        })?;

        let h = self.clone();
        self.bus.subscribe(EventType::TaskCancelled, move |env| {
            let h = h.clone();
            async move {
                let crate::domain::TaskEvent::TaskCancelled(TaskCancelled { task_id }) =
                    env.payload
                else {
                    return Ok(());
                };
                h.finish(&task_id, TaskStatus::Cancelled, None, None).await
            }
        })?;

        let h = self.clone();
        self.bus.subscribe(EventType::TaskTimeout, move |env| {
            let h = h.clone();
            async move {
                let crate::domain::TaskEvent::TaskTimeout(TaskTimeout { task_id }) = env.payload
                else {
                    return Ok(());
                };
                // A timeout has no natural exit code; record it as a failure.
                h.finish(&task_id, TaskStatus::Failed, None, Some(FailureCause::Timeout)).await
            }
        })?;

        Ok(())
    }

    async fn on_delegated(&self, task: Task) -> Result<()> {
        self.repository.save(task.clone()).await?;
        self.bus.emit(TaskPersisted { task }).await
    }

    async fn finish(
        &self,
        task_id: &TaskId,
        status: TaskStatus,
        exit_code: Option<i32>,
        cause: Option<FailureCause>,
    ) -> Result<()> {
        let existing = self.repository.find_by_id(task_id).await?.ok_or_else(|| {
            SupervisorError::new(
                ErrorKind::TaskNotFound,
                format!("terminal event for unknown task {task_id}"),
            )
        })?;

        let now = Utc::now();
        let duration_ms = existing.started_at.map(|started| (now - started).num_milliseconds());

        if let Err(err) = self
            .repository
            .update(
                task_id,
                TaskPatch {
                    status: Some(status),
                    completed_at: Some(now),
                    exit_code: Some(exit_code),
                    duration_ms: Some(duration_ms),
                    failure_cause: Some(cause.map(|c| c.to_string())),
                    ..Default::default()
                },
            )
            .await
        {
            warn!(%err, %task_id, "failed to persist terminal transition");
            return Err(err);
        }
        Ok(())
    }
}
