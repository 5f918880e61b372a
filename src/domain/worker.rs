//! `Worker` record. Owned exclusively by the worker pool.

use chrono::{DateTime, Utc};

use crate::ids::{TaskId, WorkerId};

#[derive(Debug, Clone)]
pub struct Worker {
    pub id: WorkerId,
    pub pid: u32,
    pub task_id: TaskId,
    pub started_at: DateTime<Utc>,
}
