//! # Dependency Handler
//!
//! Wires `depends_on` edges into the dependency graph as tasks are
//! delegated, and walks the graph's dependents whenever a task reaches
//! a terminal state: each dependent edge resolves, and a dependent
//! whose every edge has now resolved either fails outright (if any
//! resolved as something other than a clean completion) or is handed
//! back to the queue via `TaskUnblocked`.

use std::sync::Arc;

use tracing::warn;

use crate::dependency_graph::DependencyGraph;
use crate::domain::event::{TaskCancelled, TaskCompleted, TaskDelegated, TaskFailed, TaskUnblocked};
use crate::domain::{DependencyResolution, EventType, FailureCause, TaskStatus};
use crate::errors::Result;
use crate::event_bus::EventBus;
use crate::ids::TaskId;
use crate::repository::TaskRepository;

pub struct DependencyHandler {
    bus: EventBus,
    dependency_graph: Arc<DependencyGraph>,
    repository: Arc<dyn TaskRepository>,
}

impl DependencyHandler {
    #[must_use]
    pub fn new(
        bus: EventBus,
        dependency_graph: Arc<DependencyGraph>,
        repository: Arc<dyn TaskRepository>,
    ) -> Self {
        Self { bus, dependency_graph, repository }
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
                for dependency in &task.depends_on {
                    match h.repository.find_by_id(dependency).await {
                        Ok(Some(_)) => {
                            if let Err(err) = h.dependency_graph.add_edge(&task.id, dependency) {
                                warn!(%err, task_id = %task.id, %dependency, "failed to record dependency edge");
                            }
                        }
                        Ok(None) => {
                            h.bus
                                .emit(crate::domain::event::TaskDependencyFailed {
                                    task_id: task.id.clone(),
                                    depends_on: dependency.clone(),
                                })
                                .await
                                .ok();
                        }
                        Err(err) => warn!(%err, %dependency, "failed to look up dependency"),
                    }
                }
                Ok(())
            }
        })?;

        let h = self.clone();
        self.bus.subscribe(EventType::TaskCompleted, move |env| {
            let h = h.clone();
            async move {
                if let crate::domain::TaskEvent::TaskCompleted(TaskCompleted { task_id, .. }) =
                    env.payload
                {
                    h.resolve_dependents(&task_id, DependencyResolution::Completed).await;
                }
                Ok(())
            }
        })?;

        let h = self.clone();
        self.bus.subscribe(EventType::TaskFailed, move |env| {
            let h = h.clone();
            async move {
                if let crate::domain::TaskEvent::TaskFailed(TaskFailed { task_id, .. }) = env.payload
                {
                    h.resolve_dependents(&task_id, DependencyResolution::Failed).await;
                }
                Ok(())
            }
        })?;

        let h = self.clone();
        self.bus.subscribe(EventType::TaskCancelled, move |env| {
            let h = h.clone();
            async move {
                if let crate::domain::TaskEvent::TaskCancelled(TaskCancelled { task_id }) =
                    env.payload
                {
                    h.resolve_dependents(&task_id, DependencyResolution::Cancelled).await;
                }
                Ok(())
            }
        })?;

        Ok(())
    }

    /// `to` just reached a terminal state: resolve every `from -> to`
    /// edge, then check each dependent `from` for a newly-complete
    /// resolution set.
    async fn resolve_dependents(&self, to: &TaskId, resolution: DependencyResolution) {
        let dependents = self.dependency_graph.get_dependents(to);
        for from in dependents {
            self.dependency_graph.resolve_dependency(&from, to, resolution);

            let Some(any_failed) = self.dependency_graph.all_resolved(&from) else {
                continue;
            };

            let task = match self.repository.find_by_id(&from).await {
                Ok(Some(task)) => task,
                Ok(None) => {
                    warn!(task_id = %from, "dependent task vanished before it could be unblocked");
                    continue;
                }
                Err(err) => {
                    warn!(%err, task_id = %from, "failed to load dependent task");
                    continue;
                }
            };

            if task.status != TaskStatus::Queued {
                continue;
            }

            if any_failed {
                self.bus
                    .emit(TaskFailed {
                        task_id: from.clone(),
                        exit_code: None,
                        error: format!("dependency {to} did not complete successfully"),
                        cause: FailureCause::DependencyFailed,
                    })
                    .await
                    .ok();
            } else {
                self.bus
                    .emit(TaskUnblocked { task_id: from.clone(), task })
                    .await
                    .ok();
            }
        }
    }
}
