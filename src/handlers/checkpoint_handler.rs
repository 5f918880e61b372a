//! # Checkpoint Handler
//!
//! Subscribes to the same terminal events the output and persistence
//! handlers already react to, and captures an advisory checkpoint
//! snapshot without interfering with the main lifecycle: it never
//! emits events of its own and never errors in a way that affects any
//! other subscriber's fan-out.

use std::sync::Arc;

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::domain::event::{TaskCancelled, TaskCompleted, TaskFailed, TaskTimeout};
use crate::domain::{EventType, FailureCause};
use crate::errors::Result;
use crate::event_bus::EventBus;
use crate::ids::TaskId;
use crate::output_capture::OutputCapture;

pub struct CheckpointHandler {
    bus: EventBus,
    output_capture: Arc<OutputCapture>,
    checkpoints: Arc<CheckpointStore>,
}

impl CheckpointHandler {
    #[must_use]
    pub fn new(
        bus: EventBus,
        output_capture: Arc<OutputCapture>,
        checkpoints: Arc<CheckpointStore>,
    ) -> Self {
        Self { bus, output_capture, checkpoints }
    }

    pub fn register(self: &Arc<Self>) -> Result<()> {
        let h = self.clone();
        self.bus.subscribe(EventType::TaskCompleted, move |env| {
            let h = h.clone();
            async move {
                if let crate::domain::TaskEvent::TaskCompleted(TaskCompleted { task_id, exit_code }) =
                    env.payload
                {
                    h.capture(&task_id, Some(exit_code), None);
                }
                Ok(())
            }
        })?;

        let h = self.clone();
        self.bus.subscribe(EventType::TaskFailed, move |env| {
            let h = h.clone();
            async move {
                if let crate::domain::TaskEvent::TaskFailed(TaskFailed { task_id, exit_code, cause, .. }) =
                    env.payload
                {
                    h.capture(&task_id, exit_code, Some(cause));
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
                    h.capture(&task_id, None, None);
                }
                Ok(())
            }
        })?;

        let h = self.clone();
        self.bus.subscribe(EventType::TaskTimeout, move |env| {
            let h = h.clone();
            async move {
                if let crate::domain::TaskEvent::TaskTimeout(TaskTimeout { task_id }) = env.payload {
                    h.capture(&task_id, None, Some(FailureCause::Timeout));
                }
                Ok(())
            }
        })?;

        Ok(())
    }

    fn capture(&self, task_id: &TaskId, exit_code: Option<i32>, failure_cause: Option<FailureCause>) {
        let output = self.output_capture.get_output(task_id, Some(crate::checkpoint::CHECKPOINT_TAIL_LINES));
        self.checkpoints.record(Checkpoint {
            task_id: task_id.clone(),
            exit_code,
            failure_cause,
            stdout_tail: output.stdout,
            stderr_tail: output.stderr,
            recorded_at: chrono::Utc::now(),
        });
    }
}
