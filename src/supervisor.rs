//! # Supervisor
//!
//! The external request surface: `delegate`/`status`/`logs`/`cancel`/
//! `retry`. [`SupervisorHandle`] is the only client — it never touches
//! a component directly, only the bus's emit/request path, so it is
//! exactly as capable as any external caller would be through the same
//! door the handlers use.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Configuration;
use crate::domain::event::{
    TaskCancellationAck, TaskCancellationRequested, TaskDelegated, TaskLogsQuery, TaskLogsResponse,
    TaskStatusQuery, TaskStatusResponse,
};
use crate::domain::{CapturedOutput, DelegateRequest, Task, TaskEvent};
use crate::errors::{Result, SupervisorError};
use crate::event_bus::EventBus;
use crate::ids::TaskId;
use crate::repository::TaskRepository;

#[async_trait]
pub trait Supervisor: Send + Sync {
    async fn delegate(&self, request: DelegateRequest) -> Result<Task>;
    async fn status(&self, task_id: Option<TaskId>) -> Result<Vec<Task>>;
    async fn logs(&self, task_id: TaskId, tail: Option<usize>) -> Result<CapturedOutput>;
    async fn cancel(&self, task_id: TaskId, reason: Option<String>) -> Result<()>;
    async fn retry(&self, task_id: TaskId) -> Result<Task>;
}

pub struct SupervisorHandle {
    bus: EventBus,
    repository: Arc<dyn TaskRepository>,
    config: Configuration,
}

impl SupervisorHandle {
    #[must_use]
    pub fn new(bus: EventBus, repository: Arc<dyn TaskRepository>, config: Configuration) -> Self {
        Self { bus, repository, config }
    }
}

#[async_trait]
impl Supervisor for SupervisorHandle {
    async fn delegate(&self, request: DelegateRequest) -> Result<Task> {
        let task = Task::from_delegate_request(request)?;
        self.bus.emit(TaskDelegated { task: task.clone() }).await?;
        Ok(task)
    }

    async fn status(&self, task_id: Option<TaskId>) -> Result<Vec<Task>> {
        let response = self
            .bus
            .request(TaskStatusQuery { task_id }, self.config.event_request_timeout())
            .await?;
        match response {
            TaskEvent::TaskStatusResponse(TaskStatusResponse { tasks }) => Ok(tasks),
            _ => Err(SupervisorError::system("unexpected response to status query")),
        }
    }

    async fn logs(&self, task_id: TaskId, tail: Option<usize>) -> Result<CapturedOutput> {
        let response = self
            .bus
            .request(TaskLogsQuery { task_id, tail }, self.config.event_request_timeout())
            .await?;
        match response {
            TaskEvent::TaskLogsResponse(TaskLogsResponse { stdout, stderr, total_size }) => {
                Ok(CapturedOutput { stdout, stderr, total_size })
            }
            _ => Err(SupervisorError::system("unexpected response to logs query")),
        }
    }

    async fn cancel(&self, task_id: TaskId, reason: Option<String>) -> Result<()> {
        let response = self
            .bus
            .request(
                TaskCancellationRequested { task_id, reason },
                self.config.event_request_timeout(),
            )
            .await?;
        match response {
            TaskEvent::TaskCancellationAck(TaskCancellationAck) => Ok(()),
            _ => Err(SupervisorError::system("unexpected response to cancellation request")),
        }
    }

    async fn retry(&self, task_id: TaskId) -> Result<Task> {
        let original = self
            .repository
            .find_by_id(&task_id)
            .await?
            .ok_or_else(|| SupervisorError::task_not_found(task_id.to_string()))?;
        let retry_task = Task::retry_of(&original);
        self.bus.emit(TaskDelegated { task: retry_task.clone() }).await?;
        Ok(retry_task)
    }
}
