//! # Supervisor Demo
//!
//! Thin binary wrapper that boots the orchestrator, delegates a couple
//! of illustrative tasks, waits for them to settle, prints their final
//! status and captured output, then shuts down cleanly. Demonstrates
//! the boot/delegate/status/logs/shutdown surface end to end without
//! any of the excluded RPC/CLI machinery.

use std::time::Duration;

use tokio::signal;
use tracing::info;

use tasker_supervisor::domain::{DelegateRequest, Priority};
use tasker_supervisor::supervisor::Supervisor;
use tasker_supervisor::{Configuration, Orchestrator};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    info!("starting tasker-supervisor demo");

    let orchestrator = Orchestrator::boot(Configuration::default())
        .await
        .map_err(|e| format!("failed to boot orchestrator: {e}"))?;

    let task = orchestrator
        .supervisor
        .delegate(DelegateRequest {
            prompt: "echo hello from the supervisor".into(),
            priority: Some(Priority::P1),
            ..Default::default()
        })
        .await
        .map_err(|e| format!("failed to delegate demo task: {e}"))?;

    info!(task_id = %task.id, "delegated demo task, waiting for it to finish");

    let finished = wait_for_terminal(&orchestrator, &task.id).await?;
    info!(task_id = %finished.id, status = ?finished.status, exit_code = ?finished.exit_code, "demo task finished");

    let logs = orchestrator.supervisor.logs(task.id, None).await?;
    for line in &logs.stdout {
        info!(%line, "stdout");
    }

    info!("press Ctrl+C to shut down, or it will shut down automatically in a few seconds");
    tokio::select! {
        _ = signal::ctrl_c() => info!("received Ctrl+C"),
        () = tokio::time::sleep(Duration::from_secs(3)) => {}
    }

    orchestrator.shutdown().await?;
    info!("demo shutdown complete");
    Ok(())
}

async fn wait_for_terminal(
    orchestrator: &Orchestrator,
    task_id: &tasker_supervisor::ids::TaskId,
) -> Result<tasker_supervisor::domain::Task, Box<dyn std::error::Error>> {
    for _ in 0..200 {
        let tasks = orchestrator.supervisor.status(Some(task_id.clone())).await?;
        if let Some(task) = tasks.into_iter().next() {
            if task.status.is_terminal() {
                return Ok(task);
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    Err(format!("task {task_id} did not reach a terminal status in time").into())
}
