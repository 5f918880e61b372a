//! # Error Taxonomy
//!
//! Every fallible operation in this crate returns a tagged
//! success-or-failure value; nothing crosses a component boundary via
//! panics or exceptions. `SupervisorError` carries a stable `ErrorKind`
//! (for callers that branch on error class), a human-readable message,
//! and a structured context map for logging.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

/// Stable, match-able error classification. Mirrors the taxonomy every
/// collaborator (event bus, repository, queue, pool, monitor) is
/// expected to raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    TaskNotFound,
    TaskAlreadyRunning,
    TaskCannotCancel,
    TaskTimeout,
    InsufficientResources,
    ResourceMonitoringFailed,
    ResourceLimitExceeded,
    ProcessSpawnFailed,
    ProcessKillFailed,
    ProcessNotFound,
    WorkerNotFound,
    WorkerSpawnFailed,
    InvalidInput,
    InvalidTaskId,
    InvalidPrompt,
    InvalidDirectory,
    InvalidOperation,
    QueueFull,
    QueueEmpty,
    ConfigurationError,
    SystemError,
    DependencyInjectionFailed,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::TaskNotFound => "TASK_NOT_FOUND",
            ErrorKind::TaskAlreadyRunning => "TASK_ALREADY_RUNNING",
            ErrorKind::TaskCannotCancel => "TASK_CANNOT_CANCEL",
            ErrorKind::TaskTimeout => "TASK_TIMEOUT",
            ErrorKind::InsufficientResources => "INSUFFICIENT_RESOURCES",
            ErrorKind::ResourceMonitoringFailed => "RESOURCE_MONITORING_FAILED",
            ErrorKind::ResourceLimitExceeded => "RESOURCE_LIMIT_EXCEEDED",
            ErrorKind::ProcessSpawnFailed => "PROCESS_SPAWN_FAILED",
            ErrorKind::ProcessKillFailed => "PROCESS_KILL_FAILED",
            ErrorKind::ProcessNotFound => "PROCESS_NOT_FOUND",
            ErrorKind::WorkerNotFound => "WORKER_NOT_FOUND",
            ErrorKind::WorkerSpawnFailed => "WORKER_SPAWN_FAILED",
            ErrorKind::InvalidInput => "INVALID_INPUT",
            ErrorKind::InvalidTaskId => "INVALID_TASK_ID",
            ErrorKind::InvalidPrompt => "INVALID_PROMPT",
            ErrorKind::InvalidDirectory => "INVALID_DIRECTORY",
            ErrorKind::InvalidOperation => "INVALID_OPERATION",
            ErrorKind::QueueFull => "QUEUE_FULL",
            ErrorKind::QueueEmpty => "QUEUE_EMPTY",
            ErrorKind::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorKind::SystemError => "SYSTEM_ERROR",
            ErrorKind::DependencyInjectionFailed => "DEPENDENCY_INJECTION_FAILED",
        };
        f.write_str(s)
    }
}

/// The crate-wide error type. Construct with [`SupervisorError::new`]
/// or one of the `ErrorKind`-specific helpers below.
#[derive(Debug, Error, Clone)]
#[error("{kind}: {message}")]
pub struct SupervisorError {
    pub kind: ErrorKind,
    pub message: String,
    pub context: HashMap<String, String>,
}

impl SupervisorError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn task_not_found(task_id: impl Into<String>) -> Self {
        let id = task_id.into();
        Self::new(ErrorKind::TaskNotFound, format!("task not found: {id}"))
            .with_context("task_id", id)
    }

    pub fn worker_not_found(worker_id: impl Into<String>) -> Self {
        let id = worker_id.into();
        Self::new(ErrorKind::WorkerNotFound, format!("worker not found: {id}"))
            .with_context("worker_id", id)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn system(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SystemError, message)
    }

    /// Whether retrying the operation that produced this error is
    /// plausibly worthwhile. Used by the spawn-retry backoff loop and
    /// by callers deciding whether to surface an error immediately.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::InsufficientResources
                | ErrorKind::ResourceMonitoringFailed
                | ErrorKind::ProcessSpawnFailed
                | ErrorKind::WorkerSpawnFailed
                | ErrorKind::QueueFull
        )
    }
}

pub type Result<T> = std::result::Result<T, SupervisorError>;

impl From<tokio::task::JoinError> for SupervisorError {
    fn from(err: tokio::task::JoinError) -> Self {
        SupervisorError::new(ErrorKind::SystemError, format!("task join failed: {err}"))
    }
}

impl From<std::io::Error> for SupervisorError {
    fn from(err: std::io::Error) -> Self {
        SupervisorError::new(ErrorKind::ProcessSpawnFailed, err.to_string())
    }
}
