//! In-process task-delegation supervisor.
//!
//! An event-driven scheduler: callers delegate a shell command as a
//! [`domain::Task`] through [`supervisor::Supervisor`], the handler
//! mesh (`handlers`) reacts to the resulting event stream to persist
//! it, resolve its dependencies, queue it, spawn a subprocess worker
//! for it under resource governance, capture its output, and walk any
//! dependents once it reaches a terminal state. [`orchestrator::Orchestrator`]
//! is the single entry point that boots and tears down the whole
//! graph of collaborators.

pub mod checkpoint;
pub mod config;
pub mod container;
pub mod dependency_graph;
pub mod domain;
pub mod errors;
pub mod event_bus;
pub mod handlers;
pub mod ids;
pub mod orchestrator;
pub mod output_capture;
pub mod queue;
pub mod recovery;
pub mod repository;
pub mod resource_monitor;
pub mod supervisor;
pub mod worker_pool;

pub use config::Configuration;
pub use errors::{ErrorKind, Result, SupervisorError};
pub use orchestrator::Orchestrator;
pub use supervisor::{Supervisor, SupervisorHandle};
