//! The `Task` record and its lifecycle.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{ErrorKind, Result, SupervisorError};
use crate::ids::{TaskId, WorkerId};

/// Maximum prompt size, bytes. `prompt` must be non-empty and
/// size-bounded.
pub const MAX_PROMPT_BYTES: usize = 1_048_576;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    P0,
    P1,
    P2,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::P1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Whether `self -> next` is a valid transition:
    /// `QUEUED→RUNNING`, `QUEUED→CANCELLED`,
    /// `RUNNING→{COMPLETED,FAILED,CANCELLED}`.
    #[must_use]
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Queued, TaskStatus::Running)
                | (TaskStatus::Queued, TaskStatus::Cancelled)
                | (TaskStatus::Running, TaskStatus::Completed)
                | (TaskStatus::Running, TaskStatus::Failed)
                | (TaskStatus::Running, TaskStatus::Cancelled)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub prompt: String,
    pub priority: Priority,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub worker_id: Option<WorkerId>,
    pub exit_code: Option<i32>,
    pub duration_ms: Option<i64>,
    pub working_directory: Option<String>,
    pub timeout_ms: Option<u64>,
    pub max_output_buffer: Option<u64>,
    pub depends_on: HashSet<TaskId>,
    pub parent_task_id: Option<TaskId>,
    pub retry_count: u32,
    pub continue_from: Option<TaskId>,
    /// Set when a terminal transition was caused by something other
    /// than the subprocess exit code itself (dependency failure,
    /// timeout, recovery, user cancellation).
    pub failure_cause: Option<String>,
}

/// Request payload for delegating a new task.
#[derive(Debug, Clone, Default)]
pub struct DelegateRequest {
    pub prompt: String,
    pub priority: Option<Priority>,
    pub working_directory: Option<String>,
    pub timeout_ms: Option<u64>,
    pub max_output_buffer: Option<u64>,
    pub depends_on: Option<HashSet<TaskId>>,
    pub parent_task_id: Option<TaskId>,
    pub continue_from: Option<TaskId>,
}

impl Task {
    /// Builds a fresh `QUEUED` task from a delegate request. Validates
    /// `prompt` non-empty/size-bounded.
    pub fn from_delegate_request(req: DelegateRequest) -> Result<Self> {
        if req.prompt.is_empty() {
            return Err(SupervisorError::new(
                ErrorKind::InvalidPrompt,
                "prompt must not be empty",
            ));
        }
        if req.prompt.len() > MAX_PROMPT_BYTES {
            return Err(SupervisorError::new(
                ErrorKind::InvalidPrompt,
                format!("prompt exceeds {MAX_PROMPT_BYTES} bytes"),
            ));
        }
        Ok(Task {
            id: TaskId::generate(),
            prompt: req.prompt,
            priority: req.priority.unwrap_or_default(),
            status: TaskStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            worker_id: None,
            exit_code: None,
            duration_ms: None,
            working_directory: req.working_directory,
            timeout_ms: req.timeout_ms,
            max_output_buffer: req.max_output_buffer,
            depends_on: req.depends_on.unwrap_or_default(),
            parent_task_id: req.parent_task_id,
            retry_count: 0,
            continue_from: req.continue_from,
            failure_cause: None,
        })
    }

    /// Builds a retry task: a fresh `QUEUED` task that carries
    /// `parentTaskId` and an incremented `retryCount`.
    #[must_use]
    pub fn retry_of(original: &Task) -> Self {
        Task {
            id: TaskId::generate(),
            prompt: original.prompt.clone(),
            priority: original.priority,
            status: TaskStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            worker_id: None,
            exit_code: None,
            duration_ms: None,
            working_directory: original.working_directory.clone(),
            timeout_ms: original.timeout_ms,
            max_output_buffer: original.max_output_buffer,
            depends_on: HashSet::new(),
            parent_task_id: Some(original.id.clone()),
            retry_count: original.retry_count + 1,
            continue_from: original.continue_from.clone(),
            failure_cause: None,
        }
    }

    pub fn transition_to(&mut self, next: TaskStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(SupervisorError::new(
                ErrorKind::InvalidOperation,
                format!("invalid transition {:?} -> {:?}", self.status, next),
            ));
        }
        self.status = next;
        let now = Utc::now();
        match next {
            TaskStatus::Running => {
                self.started_at = Some(now);
            }
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => {
                self.completed_at = Some(now);
                if let Some(started) = self.started_at {
                    self.duration_ms = Some((now - started).num_milliseconds());
                }
            }
            TaskStatus::Queued => {}
        }
        Ok(())
    }

    #[must_use]
    pub fn is_blocked_candidate(&self) -> bool {
        !self.depends_on.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_prompt() {
        let req = DelegateRequest {
            prompt: String::new(),
            ..Default::default()
        };
        assert!(Task::from_delegate_request(req).is_err());
    }

    #[test]
    fn valid_transitions_succeed() {
        let mut t = Task::from_delegate_request(DelegateRequest {
            prompt: "echo hi".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(t.status, TaskStatus::Queued);
        t.transition_to(TaskStatus::Running).unwrap();
        assert!(t.started_at.is_some());
        t.transition_to(TaskStatus::Completed).unwrap();
        assert!(t.completed_at.is_some());
        assert!(t.duration_ms.unwrap() >= 0);
    }

    #[test]
    fn invalid_transitions_are_rejected() {
        let mut t = Task::from_delegate_request(DelegateRequest {
            prompt: "echo hi".into(),
            ..Default::default()
        })
        .unwrap();
        assert!(t.transition_to(TaskStatus::Completed).is_err());
    }

    #[test]
    fn terminal_states_are_absorbing() {
        assert!(!TaskStatus::Running.can_transition_to(TaskStatus::Queued));
        assert!(TaskStatus::Completed.is_terminal());
    }

    #[test]
    fn retry_increments_count_and_links_parent() {
        let original = Task::from_delegate_request(DelegateRequest {
            prompt: "echo hi".into(),
            ..Default::default()
        })
        .unwrap();
        let retry = Task::retry_of(&original);
        assert_eq!(retry.retry_count, 1);
        assert_eq!(retry.parent_task_id, Some(original.id));
        assert_eq!(retry.status, TaskStatus::Queued);
    }
}
