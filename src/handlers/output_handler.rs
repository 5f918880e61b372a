//! # Output Handler
//!
//! Forwards per-line subprocess output from the worker pool into the
//! output capture buffer, and flushes each task's trailing partial
//! line once it reaches a terminal state.

use std::sync::Arc;

use crate::domain::event::{TaskCancelled, TaskCompleted, TaskFailed, TaskOutputChunk, TaskTimeout};
use crate::domain::EventType;
use crate::errors::Result;
use crate::event_bus::EventBus;
use crate::output_capture::OutputCapture;

pub struct OutputHandler {
    bus: EventBus,
    output_capture: Arc<OutputCapture>,
}

impl OutputHandler {
    #[must_use]
    pub fn new(bus: EventBus, output_capture: Arc<OutputCapture>) -> Self {
        Self { bus, output_capture }
    }

    pub fn register(self: &Arc<Self>) -> Result<()> {
        let h = self.clone();
        self.bus.subscribe(EventType::TaskOutputChunk, move |env| {
            let h = h.clone();
            async move {
                let crate::domain::TaskEvent::TaskOutputChunk(TaskOutputChunk {
                    task_id,
                    stream,
                    line,
                }) = env.payload
                else {
                    return Ok(());
                };
                // The line forwarder strips the newline reading with
                // `lines()`; put it back so capture() sees the same
                // boundary it would from a raw chunk.
                let mut chunk = line;
                chunk.push('\n');
                h.output_capture.capture(&task_id, stream, &chunk);
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
                    h.output_capture.finish(&task_id);
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
                    h.output_capture.finish(&task_id);
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
                    h.output_capture.finish(&task_id);
                }
                Ok(())
            }
        })?;

        let h = self.clone();
        self.bus.subscribe(EventType::TaskTimeout, move |env| {
            let h = h.clone();
            async move {
                if let crate::domain::TaskEvent::TaskTimeout(TaskTimeout { task_id }) = env.payload {
                    h.output_capture.finish(&task_id);
                }
                Ok(())
            }
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::domain::StreamKind;
    use crate::ids::TaskId;

    fn setup() -> (Arc<OutputHandler>, EventBus, Arc<OutputCapture>) {
        let config = Configuration::default();
        let bus = EventBus::new(config.clone());
        let output_capture = Arc::new(OutputCapture::new(config.max_output_buffer_bytes));
        let handler = Arc::new(OutputHandler::new(bus.clone(), output_capture.clone()));
        handler.register().unwrap();
        (handler, bus, output_capture)
    }

    #[tokio::test]
    async fn chunk_is_captured_with_newline_restored() {
        let (_h, bus, oc) = setup();
        let task_id = TaskId::new("t1").unwrap();
        bus.emit(TaskOutputChunk {
            task_id: task_id.clone(),
            stream: StreamKind::Stdout,
            line: "hello".into(),
        })
        .await
        .unwrap();
        let out = oc.get_output(&task_id, None);
        assert_eq!(out.stdout, vec!["hello"]);
    }

    #[tokio::test]
    async fn terminal_event_flushes_pending_partial_line() {
        let (_h, bus, oc) = setup();
        let task_id = TaskId::new("t1").unwrap();
        oc.capture(&task_id, StreamKind::Stdout, "partial-no-newline");
        assert!(oc.get_output(&task_id, None).stdout.is_empty());

        bus.emit(TaskCompleted { task_id: task_id.clone(), exit_code: 0 }).await.unwrap();
        assert_eq!(oc.get_output(&task_id, None).stdout, vec!["partial-no-newline"]);
    }
}
