//! Dependency edge record.

use chrono::{DateTime, Utc};

use crate::domain::task::TaskStatus;

/// Resolution state recorded on a dependency edge once its target
/// reaches a terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyResolution {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl DependencyResolution {
    #[must_use]
    pub fn from_task_status(status: TaskStatus) -> Option<Self> {
        match status {
            TaskStatus::Completed => Some(DependencyResolution::Completed),
            TaskStatus::Failed => Some(DependencyResolution::Failed),
            TaskStatus::Cancelled => Some(DependencyResolution::Cancelled),
            TaskStatus::Queued | TaskStatus::Running => None,
        }
    }

    #[must_use]
    pub fn is_pending(self) -> bool {
        matches!(self, DependencyResolution::Pending)
    }

    /// Whether this resolution should cause a dependent to fail
    /// (anything other than a clean completion propagates).
    #[must_use]
    pub fn propagates_failure(self) -> bool {
        matches!(
            self,
            DependencyResolution::Failed | DependencyResolution::Cancelled
        )
    }
}

#[derive(Debug, Clone)]
pub struct DependencyEdgeState {
    pub resolution: DependencyResolution,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Default for DependencyEdgeState {
    fn default() -> Self {
        Self {
            resolution: DependencyResolution::Pending,
            resolved_at: None,
        }
    }
}
