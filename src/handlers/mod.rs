//! The Handler Mesh: one small struct per event-driven responsibility,
//! each holding only a bus handle and the grounded component(s) it
//! composes. No handler calls another directly; all coordination goes
//! through the bus.

pub mod checkpoint_handler;
pub mod dependency_handler;
pub mod output_handler;
pub mod persistence;
pub mod query;
pub mod queue_handler;
pub mod worker_handler;

pub use checkpoint_handler::CheckpointHandler;
pub use dependency_handler::DependencyHandler;
pub use output_handler::OutputHandler;
pub use persistence::PersistenceHandler;
pub use query::QueryHandler;
pub use queue_handler::QueueHandler;
pub use worker_handler::WorkerHandler;
