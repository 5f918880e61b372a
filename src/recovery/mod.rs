//! # Recovery
//!
//! Runs once during orchestrator boot, before the resource-monitor
//! sampler or bus GC ticker start. A task left `RUNNING` from a
//! previous process has no worker in this process's worker pool — the
//! pool starts empty on every boot — so it can never finish on its
//! own and is marked `FAILED` with [`FailureCause::Recovery`]. A task
//! left `QUEUED` was never lost; it just needs to be handed back to
//! the priority queue and re-announced with `TaskQueued`.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::domain::event::RecoveryCompleted;
use crate::domain::{FailureCause, TaskStatus};
use crate::errors::Result;
use crate::event_bus::EventBus;
use crate::queue::PriorityQueue;
use crate::repository::{TaskPatch, TaskRepository};

pub struct Recovery {
    bus: EventBus,
    repository: Arc<dyn TaskRepository>,
    queue: Arc<PriorityQueue>,
}

impl Recovery {
    #[must_use]
    pub fn new(bus: EventBus, repository: Arc<dyn TaskRepository>, queue: Arc<PriorityQueue>) -> Self {
        Self { bus, repository, queue }
    }

    /// Returns the same `(recovered, marked_failed)` counts carried by
    /// the `RecoveryCompleted` event it emits.
    pub async fn run(&self) -> Result<RecoveryCompleted> {
        self.bus.emit(crate::domain::event::RecoveryStarted).await.ok();

        let tasks = self.repository.find_all_unbounded().await?;

        let mut tasks_marked_failed = 0u32;
        let mut tasks_recovered = 0u32;

        for task in tasks {
            match task.status {
                TaskStatus::Running => {
                    self.repository
                        .update(
                            &task.id,
                            TaskPatch {
                                status: Some(TaskStatus::Failed),
                                completed_at: Some(Utc::now()),
                                failure_cause: Some(Some(FailureCause::Recovery.to_string())),
                                ..Default::default()
                            },
                        )
                        .await?;
                    tasks_marked_failed += 1;
                }
                TaskStatus::Queued => {
                    let task_id = task.id.clone();
                    self.queue.enqueue(task);
                    self.bus
                        .emit(crate::domain::event::TaskQueued { task_id })
                        .await
                        .ok();
                    tasks_recovered += 1;
                }
                _ => {}
            }
        }

        let summary = RecoveryCompleted { tasks_recovered, tasks_marked_failed };
        info!(tasks_recovered, tasks_marked_failed, "recovery complete");
        self.bus.emit(summary.clone()).await.ok();
        Ok(summary)
    }
}
