//! Tagged-union event payloads flowing over the event bus.
//!
//! Each event kind gets its own payload struct rather than a loosely
//! typed map; `EventType` is the discriminant the bus dispatches on,
//! `TaskEvent` carries the data.

use chrono::{DateTime, Utc};
use derive_more::From;
use uuid::Uuid;

use crate::domain::output::StreamKind;
use crate::domain::task::Task;
use crate::domain::worker::Worker;
use crate::ids::{CorrelationId, TaskId, WorkerId};

/// Why a task ended up `FAILED`, for logging/diagnostics; not part of
/// the state machine itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCause {
    NonZeroExit,
    DependencyFailed,
    Timeout,
    SpawnFailed,
    Recovery,
}

impl std::fmt::Display for FailureCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureCause::NonZeroExit => "non_zero_exit",
            FailureCause::DependencyFailed => "dependency_failed",
            FailureCause::Timeout => "timeout",
            FailureCause::SpawnFailed => "spawn_failed",
            FailureCause::Recovery => "recovery",
        };
        f.write_str(s)
    }
}

/// Discriminant used as the bus's subscription key. One entry per
/// `TaskEvent` variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    TaskDelegated,
    TaskPersisted,
    TaskQueued,
    TaskStarting,
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    TaskCancelled,
    TaskTimeout,
    TaskUnblocked,
    TaskDependencyFailed,
    WorkerSpawned,
    WorkerKilled,
    RequeueTask,
    TaskCancellationRequested,
    TaskStatusQuery,
    TaskStatusResponse,
    TaskLogsQuery,
    TaskLogsResponse,
    NextTaskQuery,
    NextTaskResponse,
    RecoveryStarted,
    RecoveryCompleted,
    ShutdownInitiated,
    ShutdownComplete,
    TaskOutputChunk,
    TaskCancellationAck,
}

#[derive(Debug, Clone)]
pub struct TaskDelegated {
    pub task: Task,
}

#[derive(Debug, Clone)]
pub struct TaskPersisted {
    pub task: Task,
}

#[derive(Debug, Clone)]
pub struct TaskQueued {
    pub task_id: TaskId,
}

#[derive(Debug, Clone)]
pub struct TaskStarting {
    pub task: Task,
}

#[derive(Debug, Clone)]
pub struct TaskStarted {
    pub task_id: TaskId,
    pub worker_id: WorkerId,
}

#[derive(Debug, Clone)]
pub struct TaskCompleted {
    pub task_id: TaskId,
    pub exit_code: i32,
}

#[derive(Debug, Clone)]
pub struct TaskFailed {
    pub task_id: TaskId,
    pub exit_code: Option<i32>,
    pub error: String,
    pub cause: FailureCause,
}

#[derive(Debug, Clone)]
pub struct TaskCancelled {
    pub task_id: TaskId,
}

#[derive(Debug, Clone)]
pub struct TaskTimeout {
    pub task_id: TaskId,
}

#[derive(Debug, Clone)]
pub struct TaskUnblocked {
    pub task_id: TaskId,
    pub task: Task,
}

#[derive(Debug, Clone)]
pub struct TaskDependencyFailed {
    pub task_id: TaskId,
    pub depends_on: TaskId,
}

#[derive(Debug, Clone)]
pub struct WorkerSpawned {
    pub worker: Worker,
    pub task_id: TaskId,
}

#[derive(Debug, Clone)]
pub struct WorkerKilled {
    pub worker_id: WorkerId,
    pub task_id: TaskId,
}

#[derive(Debug, Clone)]
pub struct RequeueTask {
    pub task: Task,
}

#[derive(Debug, Clone)]
pub struct TaskCancellationRequested {
    pub task_id: TaskId,
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TaskStatusQuery {
    pub task_id: Option<TaskId>,
}

#[derive(Debug, Clone)]
pub struct TaskStatusResponse {
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone)]
pub struct TaskLogsQuery {
    pub task_id: TaskId,
    pub tail: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct TaskLogsResponse {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub total_size: u64,
}

#[derive(Debug, Clone)]
pub struct NextTaskQuery;

#[derive(Debug, Clone)]
pub struct NextTaskResponse {
    pub task: Option<Task>,
}

#[derive(Debug, Clone)]
pub struct RecoveryStarted;

#[derive(Debug, Clone)]
pub struct RecoveryCompleted {
    pub tasks_recovered: u32,
    pub tasks_marked_failed: u32,
}

#[derive(Debug, Clone)]
pub struct ShutdownInitiated;

#[derive(Debug, Clone)]
pub struct ShutdownComplete;

/// Acknowledges a `TaskCancellationRequested` request/response round trip
/// so the caller gets back the precise error kind (`TASK_NOT_FOUND`,
/// `TASK_CANNOT_CANCEL`) instead of a generic aggregate.
#[derive(Debug, Clone)]
pub struct TaskCancellationAck;

/// One line of subprocess output, forwarded by the worker pool to the
/// output handler rather than written straight into the capture buffer.
#[derive(Debug, Clone)]
pub struct TaskOutputChunk {
    pub task_id: TaskId,
    pub stream: StreamKind,
    pub line: String,
}

/// The tagged union of every event that can cross the bus. `From` is
/// derived so each payload struct converts with a plain `.into()`
/// instead of spelling out its own variant.
#[derive(Debug, Clone, From)]
pub enum TaskEvent {
    TaskDelegated(TaskDelegated),
    TaskPersisted(TaskPersisted),
    TaskQueued(TaskQueued),
    TaskStarting(TaskStarting),
    TaskStarted(TaskStarted),
    TaskCompleted(TaskCompleted),
    TaskFailed(TaskFailed),
    TaskCancelled(TaskCancelled),
    TaskTimeout(TaskTimeout),
    TaskUnblocked(TaskUnblocked),
    TaskDependencyFailed(TaskDependencyFailed),
    WorkerSpawned(WorkerSpawned),
    WorkerKilled(WorkerKilled),
    RequeueTask(RequeueTask),
    TaskCancellationRequested(TaskCancellationRequested),
    TaskStatusQuery(TaskStatusQuery),
    TaskStatusResponse(TaskStatusResponse),
    TaskLogsQuery(TaskLogsQuery),
    TaskLogsResponse(TaskLogsResponse),
    NextTaskQuery(NextTaskQuery),
    NextTaskResponse(NextTaskResponse),
    RecoveryStarted(RecoveryStarted),
    RecoveryCompleted(RecoveryCompleted),
    ShutdownInitiated(ShutdownInitiated),
    ShutdownComplete(ShutdownComplete),
    TaskOutputChunk(TaskOutputChunk),
    TaskCancellationAck(TaskCancellationAck),
}

impl TaskEvent {
    #[must_use]
    pub fn kind(&self) -> EventType {
        match self {
            TaskEvent::TaskDelegated(_) => EventType::TaskDelegated,
            TaskEvent::TaskPersisted(_) => EventType::TaskPersisted,
            TaskEvent::TaskQueued(_) => EventType::TaskQueued,
            TaskEvent::TaskStarting(_) => EventType::TaskStarting,
            TaskEvent::TaskStarted(_) => EventType::TaskStarted,
            TaskEvent::TaskCompleted(_) => EventType::TaskCompleted,
            TaskEvent::TaskFailed(_) => EventType::TaskFailed,
            TaskEvent::TaskCancelled(_) => EventType::TaskCancelled,
            TaskEvent::TaskTimeout(_) => EventType::TaskTimeout,
            TaskEvent::TaskUnblocked(_) => EventType::TaskUnblocked,
            TaskEvent::TaskDependencyFailed(_) => EventType::TaskDependencyFailed,
            TaskEvent::WorkerSpawned(_) => EventType::WorkerSpawned,
            TaskEvent::WorkerKilled(_) => EventType::WorkerKilled,
            TaskEvent::RequeueTask(_) => EventType::RequeueTask,
            TaskEvent::TaskCancellationRequested(_) => EventType::TaskCancellationRequested,
            TaskEvent::TaskStatusQuery(_) => EventType::TaskStatusQuery,
            TaskEvent::TaskStatusResponse(_) => EventType::TaskStatusResponse,
            TaskEvent::TaskLogsQuery(_) => EventType::TaskLogsQuery,
            TaskEvent::TaskLogsResponse(_) => EventType::TaskLogsResponse,
            TaskEvent::NextTaskQuery(_) => EventType::NextTaskQuery,
            TaskEvent::NextTaskResponse(_) => EventType::NextTaskResponse,
            TaskEvent::RecoveryStarted(_) => EventType::RecoveryStarted,
            TaskEvent::RecoveryCompleted(_) => EventType::RecoveryCompleted,
            TaskEvent::ShutdownInitiated(_) => EventType::ShutdownInitiated,
            TaskEvent::ShutdownComplete(_) => EventType::ShutdownComplete,
            TaskEvent::TaskOutputChunk(_) => EventType::TaskOutputChunk,
            TaskEvent::TaskCancellationAck(_) => EventType::TaskCancellationAck,
        }
    }
}

/// The envelope wrapping every payload in flight.
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub correlation_id: Option<CorrelationId>,
    pub payload: TaskEvent,
}

impl EventEnvelope {
    #[must_use]
    pub fn new(source: impl Into<String>, payload: TaskEvent) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            correlation_id: None,
            payload,
        }
    }

    #[must_use]
    pub fn with_correlation(mut self, id: CorrelationId) -> Self {
        self.correlation_id = Some(id);
        self
    }
}

/// Convenience macro-free helper: build a `TaskEvent::Variant(Variant { .. })`
/// pair without repeating the variant name. Implemented as a trait so
/// each payload struct knows its own wrapping.
pub trait IntoTaskEvent {
    fn into_event(self) -> TaskEvent;
}

macro_rules! impl_into_task_event {
    ($($variant:ident),* $(,)?) => {
        $(
            impl IntoTaskEvent for $variant {
                fn into_event(self) -> TaskEvent {
                    self.into()
                }
            }
        )*
    };
}

impl_into_task_event!(
    TaskDelegated,
    TaskPersisted,
    TaskQueued,
    TaskStarting,
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    TaskCancelled,
    TaskTimeout,
    TaskUnblocked,
    TaskDependencyFailed,
    WorkerSpawned,
    WorkerKilled,
    RequeueTask,
    TaskCancellationRequested,
    TaskStatusQuery,
    TaskStatusResponse,
    TaskLogsQuery,
    TaskLogsResponse,
    NextTaskQuery,
    NextTaskResponse,
    RecoveryStarted,
    RecoveryCompleted,
    ShutdownInitiated,
    ShutdownComplete,
    TaskOutputChunk,
    TaskCancellationAck,
);
