//! Task repository: durable store of task records.
//!
//! The concrete on-disk persistence format is out of scope here; this
//! module defines the abstract contract as a trait and ships an
//! in-memory implementation behind it, so a durable backend could be
//! swapped in without touching any handler.

pub mod in_memory;

pub use in_memory::InMemoryTaskRepository;

use async_trait::async_trait;

use crate::domain::{Task, TaskStatus};
use crate::errors::Result;
use crate::ids::TaskId;

/// A patch applied to an existing task. Every field is optional; only
/// `Some` fields are written.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub worker_id: Option<Option<crate::ids::WorkerId>>,
    pub exit_code: Option<Option<i32>>,
    pub duration_ms: Option<Option<i64>>,
    pub failure_cause: Option<Option<String>>,
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Idempotent upsert: inserting twice with the same id has the
    /// same observable effect as inserting once.
    async fn save(&self, task: Task) -> Result<()>;

    async fn update(&self, id: &TaskId, patch: TaskPatch) -> Result<()>;

    async fn find_by_id(&self, id: &TaskId) -> Result<Option<Task>>;

    /// Ordered by `createdAt` descending. `limit` is capped at the
    /// configured default to protect memory even if the caller asks
    /// for more.
    async fn find_all(&self, limit: usize, offset: usize) -> Result<Vec<Task>>;

    /// Unbounded variant, used only by callers (recovery) that must
    /// see every task regardless of the default page size.
    async fn find_all_unbounded(&self) -> Result<Vec<Task>>;

    async fn find_by_status(&self, status: TaskStatus) -> Result<Vec<Task>>;

    async fn count(&self) -> Result<usize>;

    async fn delete(&self, id: &TaskId) -> Result<()>;

    async fn delete_all(&self) -> Result<()>;
}
