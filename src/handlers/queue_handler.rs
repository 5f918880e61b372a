//! # Queue Handler
//!
//! The composition point between the priority queue and the dependency
//! graph: the queue itself has no notion of "blocked", so this handler
//! consults the graph before either admitting a task to the queue or
//! handing one back in response to `NextTaskQuery`.

use std::sync::Arc;

use crate::dependency_graph::DependencyGraph;
use crate::domain::event::{NextTaskResponse, RequeueTask, TaskPersisted, TaskQueued, TaskUnblocked};
use crate::domain::EventType;
use crate::errors::Result;
use crate::event_bus::EventBus;
use crate::queue::PriorityQueue;

pub struct QueueHandler {
    bus: EventBus,
    queue: Arc<PriorityQueue>,
    dependency_graph: Arc<DependencyGraph>,
}

impl QueueHandler {
    #[must_use]
    pub fn new(bus: EventBus, queue: Arc<PriorityQueue>, dependency_graph: Arc<DependencyGraph>) -> Self {
        Self {
            bus,
            queue,
            dependency_graph,
        }
    }

    pub fn register(self: &Arc<Self>) -> Result<()> {
        let h = self.clone();
        self.bus.subscribe(EventType::TaskPersisted, move |env| {
            let h = h.clone();
            async move {
                let crate::domain::TaskEvent::TaskPersisted(TaskPersisted { task }) = env.payload
                else {
                    return Ok(());
                };
                if !h.dependency_graph.is_blocked(&task.id) {
                    let task_id = task.id.clone();
                    h.queue.enqueue(task);
                    h.bus.emit(TaskQueued { task_id }).await.ok();
                }
                Ok(())
            }
        })?;

        let h = self.clone();
        self.bus.subscribe(EventType::TaskUnblocked, move |env| {
            let h = h.clone();
            async move {
                let crate::domain::TaskEvent::TaskUnblocked(TaskUnblocked { task, .. }) =
                    env.payload
                else {
                    return Ok(());
                };
                let task_id = task.id.clone();
                h.queue.enqueue(task);
                h.bus.emit(TaskQueued { task_id }).await.ok();
                Ok(())
            }
        })?;

        let h = self.clone();
        self.bus.subscribe(EventType::NextTaskQuery, move |env| {
            let h = h.clone();
            async move {
                let Some(correlation_id) = env.correlation_id else {
                    return Ok(());
                };
                let task = h.dequeue_ready();
                h.bus.respond(correlation_id, NextTaskResponse { task });
                Ok(())
            }
        })?;

        let h = self.clone();
        self.bus.subscribe(EventType::RequeueTask, move |env| {
            let h = h.clone();
            async move {
                let crate::domain::TaskEvent::RequeueTask(RequeueTask { task }) = env.payload
                else {
                    return Ok(());
                };
                let task_id = task.id.clone();
                h.queue.enqueue_at_head(task);
                h.bus.emit(TaskQueued { task_id }).await.ok();
                Ok(())
            }
        })?;

        Ok(())
    }

    /// Pops entries until it finds one the dependency graph doesn't
    /// consider blocked. Blocking only ever clears (never reappears)
    /// once a task has been enqueued, so this is a defensive skip, not
    /// the normal path; any skipped entries are put back so they are
    /// not lost.
    fn dequeue_ready(&self) -> Option<crate::domain::Task> {
        let mut skipped = Vec::new();
        let result = loop {
            let Some(candidate) = self.queue.dequeue() else {
                break None;
            };
            if self.dependency_graph.is_blocked(&candidate.id) {
                skipped.push(candidate);
                continue;
            }
            break Some(candidate);
        };
        for task in skipped {
            self.queue.enqueue(task);
        }
        result
    }
}
