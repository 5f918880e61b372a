//! # Orchestrator
//!
//! Boots every component in dependency order, wires the handler mesh
//! onto the bus, runs recovery, starts the two background tickers
//! (resource-monitor sampler, bus GC), and owns the shutdown sequence
//! that tears all of it back down in the reverse order.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::checkpoint::CheckpointStore;
use crate::config::Configuration;
use crate::container::Container;
use crate::dependency_graph::DependencyGraph;
use crate::domain::event::{ShutdownComplete, ShutdownInitiated};
use crate::errors::Result;
use crate::event_bus::EventBus;
use crate::handlers::{
    CheckpointHandler, DependencyHandler, OutputHandler, PersistenceHandler, QueryHandler,
    QueueHandler, WorkerHandler,
};
use crate::output_capture::OutputCapture;
use crate::queue::PriorityQueue;
use crate::recovery::Recovery;
use crate::repository::{InMemoryTaskRepository, TaskRepository};
use crate::resource_monitor::ResourceMonitor;
use crate::supervisor::SupervisorHandle;
use crate::worker_pool::WorkerPool;

/// Everything the orchestrator built during boot, handed back to the
/// caller so it can issue requests through [`SupervisorHandle`] and
/// later call [`Orchestrator::shutdown`].
pub struct Orchestrator {
    pub bus: EventBus,
    pub repository: Arc<dyn TaskRepository>,
    pub supervisor: SupervisorHandle,
    config: Configuration,
    worker_pool: Arc<WorkerPool>,
    container: Container,
    sampler_handle: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Orchestrator {
    /// Runs the full boot sequence: leaf components, handlers,
    /// subscription, recovery, then the background tickers. Returns
    /// once the process is ready to accept `Supervisor` calls.
    pub async fn boot(config: Configuration) -> Result<Self> {
        let bus = EventBus::new(config.clone());
        let repository: Arc<dyn TaskRepository> = Arc::new(InMemoryTaskRepository::new());
        let queue = Arc::new(PriorityQueue::new());
        let dependency_graph = Arc::new(DependencyGraph::new());
        let resource_monitor = Arc::new(ResourceMonitor::new(&config));
        let output_capture = Arc::new(OutputCapture::new(config.max_output_buffer_bytes));
        let checkpoints = Arc::new(CheckpointStore::new());
        let worker_pool = Arc::new(WorkerPool::new(bus.clone(), resource_monitor.clone(), config.clone()));

        // Only concrete singletons go in the container: trait objects
        // (the repository) aren't `Any`-keyable, and the orchestrator
        // already holds the handle it needs to them directly.
        let container = Container::new();
        container.register(queue.clone())?;
        container.register(dependency_graph.clone())?;
        container.register(resource_monitor.clone())?;
        container.register(output_capture.clone())?;
        container.register(checkpoints.clone())?;
        container.register(worker_pool.clone())?;
        container.register_disposable(Arc::new(bus.clone())).await;

        let persistence = Arc::new(PersistenceHandler::new(bus.clone(), repository.clone()));
        persistence.register()?;

        let query = Arc::new(QueryHandler::new(bus.clone(), repository.clone(), output_capture.clone()));
        query.register()?;

        let queue_handler = Arc::new(QueueHandler::new(bus.clone(), queue.clone(), dependency_graph.clone()));
        queue_handler.register()?;

        let worker_handler = Arc::new(WorkerHandler::new(
            bus.clone(),
            resource_monitor.clone(),
            worker_pool.clone(),
            queue.clone(),
            config.clone(),
        ));
        worker_handler.register()?;

        let output_handler = Arc::new(OutputHandler::new(bus.clone(), output_capture.clone()));
        output_handler.register()?;

        let dependency_handler =
            Arc::new(DependencyHandler::new(bus.clone(), dependency_graph.clone(), repository.clone()));
        dependency_handler.register()?;

        let checkpoint_handler =
            Arc::new(CheckpointHandler::new(bus.clone(), output_capture.clone(), checkpoints.clone()));
        checkpoint_handler.register()?;

        let recovery = Recovery::new(bus.clone(), repository.clone(), queue.clone());
        let summary = recovery.run().await?;
        info!(
            tasks_recovered = summary.tasks_recovered,
            tasks_marked_failed = summary.tasks_marked_failed,
            "boot recovery pass complete"
        );

        let sampler_handle = Self::start_resource_sampler(resource_monitor.clone(), &config);

        let supervisor = SupervisorHandle::new(bus.clone(), repository.clone(), config.clone());

        info!("orchestrator ready");

        Ok(Self {
            bus,
            repository,
            supervisor,
            config,
            worker_pool,
            container,
            sampler_handle: tokio::sync::Mutex::new(Some(sampler_handle)),
        })
    }

    /// Periodically samples resources purely for observability; the
    /// worker handler re-checks `can_spawn_worker` itself before every
    /// spawn attempt rather than relying on this ticker's cadence.
    fn start_resource_sampler(
        resource_monitor: Arc<ResourceMonitor>,
        config: &Configuration,
    ) -> tokio::task::JoinHandle<()> {
        let interval = Duration::from_millis(config.resource_monitor_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let snapshot = resource_monitor.get_resources();
                tracing::debug!(
                    cpu = snapshot.cpu_usage_percent,
                    available_memory = snapshot.available_memory_bytes,
                    worker_count = snapshot.worker_count,
                    "resource sample"
                );
            }
        })
    }

    /// Emits `ShutdownInitiated`, kills every live worker, disposes the
    /// container (which disposes the bus last, after every other
    /// teardown step that might still want to emit), joins the
    /// resource-monitor sampler, then emits `ShutdownComplete`.
    pub async fn shutdown(&self) -> Result<()> {
        self.bus.emit(ShutdownInitiated).await.ok();

        self.worker_pool.kill_all().await;

        if let Some(handle) = self.sampler_handle.lock().await.take() {
            handle.abort();
        }

        self.bus.emit(ShutdownComplete).await.ok();
        self.container.shutdown().await;

        Ok(())
    }

    #[must_use]
    pub fn config(&self) -> &Configuration {
        &self.config
    }
}
