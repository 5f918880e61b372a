//! # Worker Handler
//!
//! The spawn pipeline. `TaskQueued` triggers `process_next_task` under
//! a single-slot spawn lock so at most one spawn attempt is ever in
//! flight; `TaskCancellationRequested` looks up the live worker (if
//! any) and kills it, or drops a still-queued task directly.
//!
//! Each gate either advances the pipeline or reschedules a retry and
//! releases the lock — nothing here blocks holding the lock across a
//! sleep longer than the immediate gate check.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;

use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::config::Configuration;
use crate::domain::event::{
    NextTaskQuery, RequeueTask, TaskCancellationRequested, TaskFailed, TaskStarted, TaskStarting,
    TaskStatusQuery, WorkerKilled, WorkerSpawned,
};
use crate::domain::{EventType, FailureCause, TaskEvent, TaskStatus};
use crate::errors::{ErrorKind, Result, SupervisorError};
use crate::event_bus::EventBus;
use crate::ids::TaskId;
use crate::queue::PriorityQueue;
use crate::resource_monitor::ResourceMonitor;
use crate::worker_pool::WorkerPool;

pub struct WorkerHandler {
    bus: EventBus,
    resource_monitor: Arc<ResourceMonitor>,
    worker_pool: Arc<WorkerPool>,
    queue: Arc<PriorityQueue>,
    config: Configuration,
    spawn_lock: AsyncMutex<()>,
    last_spawn_time: StdMutex<Option<Instant>>,
}

impl WorkerHandler {
    #[must_use]
    pub fn new(
        bus: EventBus,
        resource_monitor: Arc<ResourceMonitor>,
        worker_pool: Arc<WorkerPool>,
        queue: Arc<PriorityQueue>,
        config: Configuration,
    ) -> Self {
        Self {
            bus,
            resource_monitor,
            worker_pool,
            queue,
            config,
            spawn_lock: AsyncMutex::new(()),
            last_spawn_time: StdMutex::new(None),
        }
    }

    pub fn register(self: &Arc<Self>) -> Result<()> {
        let h = self.clone();
        self.bus.subscribe(EventType::TaskQueued, move |_env| {
            let h = h.clone();
            async move {
                // Fire-and-forget: the spawn pipeline may need to
                // reschedule itself across real delays and must not
                // stall the emitter waiting on every subscriber.
                tokio::spawn(async move { h.process_next_task().await });
                Ok(())
            }
        })?;

        let h = self.clone();
        self.bus.subscribe(EventType::TaskCancellationRequested, move |env| {
            let h = h.clone();
            async move {
                let TaskEvent::TaskCancellationRequested(TaskCancellationRequested {
                    task_id,
                    ..
                }) = env.payload
                else {
                    return Ok(());
                };
                let correlation_id = env.correlation_id;
                match h.handle_cancellation(task_id).await {
                    Ok(()) => {
                        if let Some(correlation_id) = correlation_id {
                            h.bus.respond(correlation_id, crate::domain::event::TaskCancellationAck);
                        }
                        Ok(())
                    }
                    Err(err) => {
                        if let Some(correlation_id) = correlation_id {
                            h.bus.respond_error(correlation_id, err.clone());
                        }
                        Err(err)
                    }
                }
            }
        })?;

        Ok(())
    }

    /// The spawn pipeline, run strictly one invocation at a time across
    /// the whole process.
    async fn process_next_task(self: Arc<Self>) {
        let _guard = self.spawn_lock.lock().await;

        // Gate 1: minimum inter-spawn interval.
        let min_delay = self.config.min_spawn_delay();
        let wait = {
            let last = *self.last_spawn_time.lock().expect("spawn time mutex poisoned");
            last.and_then(|t| min_delay.checked_sub(t.elapsed()))
        };
        if let Some(remaining) = wait {
            self.reschedule(remaining);
            return;
        }

        // Gate 2: resource admission. Jitter the backoff so a resource
        // crunch doesn't line every denied task up to retry in lockstep.
        if !self.resource_monitor.can_spawn_worker() {
            self.reschedule(jittered(self.config.spawn_backoff()));
            return;
        }

        // Fetch the next ready task.
        let response = self
            .bus
            .request(NextTaskQuery, self.config.event_request_timeout())
            .await;
        let task = match response {
            Ok(TaskEvent::NextTaskResponse(resp)) => resp.task,
            Ok(_) => None,
            Err(err) => {
                warn!(%err, "next-task query failed");
                None
            }
        };
        let Some(task) = task else {
            return;
        };

        if let Err(err) = self.bus.emit(TaskStarting { task: task.clone() }).await {
            warn!(%err, task_id = %task.id, "TaskStarting rejected, requeuing without failing the task");
            self.bus.emit(RequeueTask { task }).await.ok();
            return;
        }

        match self.worker_pool.spawn(&task).await {
            Err(err) => {
                warn!(%err, task_id = %task.id, "spawn failed, requeuing and failing the task");
                self.bus.emit(RequeueTask { task: task.clone() }).await.ok();
                self.bus
                    .emit(TaskFailed {
                        task_id: task.id.clone(),
                        exit_code: Some(1),
                        error: err.message,
                        cause: FailureCause::SpawnFailed,
                    })
                    .await
                    .ok();
            }
            Ok(worker) => {
                *self.last_spawn_time.lock().expect("spawn time mutex poisoned") = Some(Instant::now());
                self.resource_monitor.increment_worker_count();
                self.resource_monitor.record_spawn();
                self.bus
                    .emit(WorkerSpawned { worker: worker.clone(), task_id: task.id.clone() })
                    .await
                    .ok();
                self.bus
                    .emit(TaskStarted { task_id: task.id.clone(), worker_id: worker.id })
                    .await
                    .ok();
                info!(task_id = %task.id, worker_id = %worker.id, "worker spawned");
            }
        }
    }

    fn reschedule(self: &Arc<Self>, after: std::time::Duration) {
        let h = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            h.process_next_task().await;
        });
    }



    async fn handle_cancellation(&self, task_id: TaskId) -> Result<()> {
        let response = self
            .bus
            .request(
                TaskStatusQuery { task_id: Some(task_id.clone()) },
                self.config.event_request_timeout(),
            )
            .await?;
        let TaskEvent::TaskStatusResponse(status) = response else {
            return Err(SupervisorError::system("unexpected response to status query"));
        };
        let task = status
            .tasks
            .into_iter()
            .next()
            .ok_or_else(|| SupervisorError::task_not_found(task_id.to_string()))?;

        if !matches!(task.status, TaskStatus::Queued | TaskStatus::Running) {
            return Err(SupervisorError::new(
                ErrorKind::TaskCannotCancel,
                format!("task {task_id} is already {:?}", task.status),
            ));
        }

        if let Some(worker) = self.worker_pool.get_worker_for_task(&task_id) {
            self.worker_pool.kill(worker.id)?;
            self.bus
                .emit(WorkerKilled { worker_id: worker.id, task_id: task_id.clone() })
                .await
                .ok();
            // The worker pool observes the process actually exit and
            // emits the terminal TaskCancelled itself.
        } else {
            self.queue.remove(&task_id);
            self.bus.emit(crate::domain::event::TaskCancelled { task_id }).await.ok();
        }
        Ok(())
    }
}

/// Adds up to 20% jitter on top of a backoff so repeated denials don't
/// retry in lockstep.
fn jittered(base: std::time::Duration) -> std::time::Duration {
    let extra_ms = (base.as_millis() as u64 / 5).max(1);
    base + std::time::Duration::from_millis(fastrand::u64(0..=extra_ms))
}
