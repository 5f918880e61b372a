//! # Query Handler
//!
//! Services the two request-style queries: `TaskStatusQuery` and
//! `TaskLogsQuery`. Both responses go back over the bus's
//! request/response channel using the correlation id carried on the
//! incoming envelope, never a direct return value.

use std::sync::Arc;

use crate::domain::event::{TaskLogsQuery, TaskStatusQuery, TaskStatusResponse};
use crate::domain::EventType;
use crate::errors::{ErrorKind, Result, SupervisorError};
use crate::event_bus::EventBus;
use crate::output_capture::OutputCapture;
use crate::repository::TaskRepository;

pub struct QueryHandler {
    bus: EventBus,
    repository: Arc<dyn TaskRepository>,
    output_capture: Arc<OutputCapture>,
}

impl QueryHandler {
    #[must_use]
    pub fn new(
        bus: EventBus,
        repository: Arc<dyn TaskRepository>,
        output_capture: Arc<OutputCapture>,
    ) -> Self {
        Self {
            bus,
            repository,
            output_capture,
        }
    }

    pub fn register(self: &Arc<Self>) -> Result<()> {
        let h = self.clone();
        self.bus.subscribe(EventType::TaskStatusQuery, move |env| {
            let h = h.clone();
            async move {
                let Some(correlation_id) = env.correlation_id else {
                    return Ok(());
                };
                let crate::domain::TaskEvent::TaskStatusQuery(TaskStatusQuery { task_id }) =
                    env.payload
                else {
                    return Ok(());
                };

                match task_id {
                    Some(id) => match h.repository.find_by_id(&id).await {
                        Ok(Some(task)) => {
                            h.bus.respond(correlation_id, TaskStatusResponse { tasks: vec![task] });
                        }
                        Ok(None) => {
                            h.bus.respond_error(correlation_id, SupervisorError::task_not_found(id.to_string()));
                        }
                        Err(err) => h.bus.respond_error(correlation_id, err),
                    },
                    None => match h.repository.find_all(usize::MAX, 0).await {
                        Ok(tasks) => h.bus.respond(correlation_id, TaskStatusResponse { tasks }),
                        Err(err) => h.bus.respond_error(correlation_id, err),
                    },
                }
                Ok(())
            }
        })?;

        let h = self.clone();
        self.bus.subscribe(EventType::TaskLogsQuery, move |env| {
            let h = h.clone();
            async move {
                let Some(correlation_id) = env.correlation_id else {
                    return Ok(());
                };
                let crate::domain::TaskEvent::TaskLogsQuery(TaskLogsQuery { task_id, tail }) =
                    env.payload
                else {
                    return Ok(());
                };

                match h.repository.find_by_id(&task_id).await {
                    Ok(Some(_)) => {
                        let output = h.output_capture.get_output(&task_id, tail);
                        h.bus.respond(
                            correlation_id,
                            crate::domain::event::TaskLogsResponse {
                                stdout: output.stdout,
                                stderr: output.stderr,
                                total_size: output.total_size,
                            },
                        );
                    }
                    Ok(None) => {
                        h.bus.respond_error(
                            correlation_id,
                            SupervisorError::task_not_found(task_id.to_string()),
                        );
                    }
                    Err(err) => h.bus.respond_error(correlation_id, err),
                }
                Ok(())
            }
        })?;

        Ok(())
    }
}
