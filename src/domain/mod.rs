//! Domain types: the core data model.

pub mod dependency;
pub mod event;
pub mod output;
pub mod task;
pub mod worker;

pub use dependency::{DependencyEdgeState, DependencyResolution};
pub use event::{EventEnvelope, EventType, FailureCause, IntoTaskEvent, TaskEvent};
pub use output::{CapturedOutput, StreamKind};
pub use task::{DelegateRequest, Priority, Task, TaskStatus};
pub use worker::Worker;
