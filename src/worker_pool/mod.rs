//! # Worker Pool
//!
//! Owns every live subprocess. `spawn` starts a task's command under
//! `tokio::process::Command`, lines its stdout/stderr out to the event
//! bus, and races the child's natural exit against a per-task timeout.
//! `kill` escalates SIGTERM to SIGKILL across a grace period, the same
//! two-step shutdown `tasker-worker` uses for its own child processes.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use dashmap::DashMap;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::config::Configuration;
use crate::domain::output::StreamKind;
use crate::domain::task::Task;
use crate::domain::worker::Worker;
use crate::event_bus::EventBus;
use crate::domain::event::{
    TaskCancelled, TaskCompleted, TaskFailed, TaskOutputChunk, TaskTimeout, WorkerKilled,
};
use crate::domain::FailureCause;
use crate::errors::{ErrorKind, Result, SupervisorError};
use crate::ids::{TaskId, WorkerId};
use crate::resource_monitor::ResourceMonitor;

/// Why a worker's supervising task tore the child down, decided by
/// whichever of {natural exit, timeout, cancellation} wins the race.
/// Drives which terminal event the pool emits once the child is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitReason {
    Natural,
    TimedOut,
    Cancelled,
}

struct WorkerEntry {
    worker: Worker,
    kill_tx: StdMutex<Option<oneshot::Sender<()>>>,
}

/// Runs and supervises task subprocesses.
pub struct WorkerPool {
    bus: EventBus,
    resource_monitor: Arc<ResourceMonitor>,
    config: Configuration,
    entries: Arc<DashMap<WorkerId, Arc<WorkerEntry>>>,
    by_task: Arc<DashMap<TaskId, WorkerId>>,
}

impl WorkerPool {
    #[must_use]
    pub fn new(bus: EventBus, resource_monitor: Arc<ResourceMonitor>, config: Configuration) -> Self {
        Self {
            bus,
            resource_monitor,
            config,
            entries: Arc::new(DashMap::new()),
            by_task: Arc::new(DashMap::new()),
        }
    }

    /// Starts `task`'s command under the shell, registers the worker,
    /// and hands the supervision loop to a background task. Returns
    /// once the child has been observed to start, not once it finishes.
    pub async fn spawn(&self, task: &Task) -> Result<Worker> {
        let mut command = Command::new("sh");
        command.arg("-c").arg(&task.prompt);
        command.stdout(std::process::Stdio::piped());
        command.stderr(std::process::Stdio::piped());
        command.stdin(std::process::Stdio::null());
        if let Some(dir) = &task.working_directory {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|err| {
            SupervisorError::new(
                ErrorKind::ProcessSpawnFailed,
                format!("failed to spawn task {}: {err}", task.id),
            )
        })?;

        let pid = child.id().ok_or_else(|| {
            SupervisorError::new(
                ErrorKind::ProcessSpawnFailed,
                "spawned child has no pid (already reaped)",
            )
        })?;

        let worker = Worker {
            id: WorkerId::generate(),
            pid,
            task_id: task.id.clone(),
            started_at: chrono::Utc::now(),
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (kill_tx, kill_rx) = oneshot::channel();

        let entry = Arc::new(WorkerEntry {
            worker: worker.clone(),
            kill_tx: StdMutex::new(Some(kill_tx)),
        });
        self.entries.insert(worker.id, entry);
        self.by_task.insert(task.id.clone(), worker.id);

        if let Some(stdout) = stdout {
            spawn_line_forwarder(self.bus.clone(), task.id.clone(), StreamKind::Stdout, stdout);
        }
        if let Some(stderr) = stderr {
            spawn_line_forwarder(self.bus.clone(), task.id.clone(), StreamKind::Stderr, stderr);
        }

        let timeout = self.config.effective_timeout(task.timeout_ms);
        let grace = self.config.kill_grace_period();

        let bus = self.bus.clone();
        let resource_monitor = self.resource_monitor.clone();
        let entries = self.entries.clone();
        let by_task = self.by_task.clone();
        let worker_id = worker.id;
        let task_id = task.id.clone();

        tokio::spawn(async move {
            let (status, reason) = run_until_exit(child, pid, timeout, grace, kill_rx).await;

            entries.remove(&worker_id);
            by_task.remove(&task_id);
            resource_monitor.decrement_worker_count();

            let exit_code = status.ok().and_then(|s| s.code());

            match reason {
                ExitReason::Cancelled => {
                    bus.emit(WorkerKilled {
                        worker_id,
                        task_id: task_id.clone(),
                    })
                    .await
                    .ok();
                    bus.emit(TaskCancelled {
                        task_id: task_id.clone(),
                    })
                    .await
                    .ok();
                }
                ExitReason::TimedOut => {
                    bus.emit(WorkerKilled {
                        worker_id,
                        task_id: task_id.clone(),
                    })
                    .await
                    .ok();
                    bus.emit(TaskTimeout {
                        task_id: task_id.clone(),
                    })
                    .await
                    .ok();
                }
                ExitReason::Natural => match exit_code {
                    Some(0) => {
                        bus.emit(TaskCompleted {
                            task_id: task_id.clone(),
                            exit_code: 0,
                        })
                        .await
                        .ok();
                    }
                    Some(code) => {
                        bus.emit(TaskFailed {
                            task_id: task_id.clone(),
                            exit_code: Some(code),
                            error: format!("process exited with status {code}"),
                            cause: FailureCause::NonZeroExit,
                        })
                        .await
                        .ok();
                    }
                    None => {
                        bus.emit(TaskFailed {
                            task_id: task_id.clone(),
                            exit_code: None,
                            error: "process terminated without an exit status".into(),
                            cause: FailureCause::NonZeroExit,
                        })
                        .await
                        .ok();
                    }
                },
            }
        });

        Ok(worker)
    }

    /// Requests graceful termination of the worker running `worker_id`.
    /// A no-op if the worker has already exited.
    pub fn kill(&self, worker_id: WorkerId) -> Result<()> {
        let entry = self
            .entries
            .get(&worker_id)
            .ok_or_else(|| SupervisorError::worker_not_found(worker_id.to_string()))?;
        if let Some(tx) = entry.kill_tx.lock().expect("kill_tx mutex poisoned").take() {
            let _ = tx.send(());
        }
        Ok(())
    }

    /// Kills every live worker concurrently, waiting for each kill
    /// signal to be delivered (not for the processes to finish exiting).
    pub async fn kill_all(&self) {
        let ids: Vec<WorkerId> = self.entries.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Err(err) = self.kill(id) {
                warn!(%err, worker_id = %id, "failed to signal worker during kill_all");
            }
        }
    }

    #[must_use]
    pub fn get_worker_for_task(&self, task_id: &TaskId) -> Option<Worker> {
        let worker_id = *self.by_task.get(task_id)?;
        self.entries.get(&worker_id).map(|e| e.worker.clone())
    }

    #[must_use]
    pub fn get_workers(&self) -> Vec<Worker> {
        self.entries.iter().map(|e| e.worker.clone()).collect()
    }

    #[must_use]
    pub fn get_worker_count(&self) -> usize {
        self.entries.len()
    }
}

/// Races the child's natural exit against a timeout and an external
/// kill signal. Once either fires, sends SIGTERM and gives the child
/// `grace` to exit before escalating to SIGKILL.
async fn run_until_exit(
    mut child: Child,
    pid: u32,
    timeout: Duration,
    grace: Duration,
    mut kill_rx: oneshot::Receiver<()>,
) -> (std::io::Result<std::process::ExitStatus>, ExitReason) {
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    let reason = loop {
        tokio::select! {
            status = child.wait() => return (status, ExitReason::Natural),
            () = &mut deadline => break ExitReason::TimedOut,
            _ = &mut kill_rx => break ExitReason::Cancelled,
        }
    };

    send_sigterm(pid);
    let grace_sleep = tokio::time::sleep(grace);
    tokio::pin!(grace_sleep);

    let status = tokio::select! {
        status = child.wait() => status,
        () = &mut grace_sleep => {
            info!(pid, "grace period elapsed, sending SIGKILL");
            let _ = child.start_kill();
            child.wait().await
        }
    };
    (status, reason)
}

#[cfg(unix)]
fn send_sigterm(pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    if let Err(err) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        warn!(pid, %err, "failed to send SIGTERM");
    }
}

#[cfg(not(unix))]
fn send_sigterm(_pid: u32) {
    // No graceful-termination signal on this platform; the grace-period
    // select falls through to `start_kill` below.
}

fn spawn_line_forwarder<R>(bus: EventBus, task_id: TaskId, stream: StreamKind, reader: R)
where
    R: tokio::io::AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    bus.emit(TaskOutputChunk {
                        task_id: task_id.clone(),
                        stream,
                        line,
                    })
                    .await
                    .ok();
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(%err, task_id = %task_id, "error reading subprocess output stream");
                    break;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DelegateRequest;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::atomic::AtomicBool;

    fn pool() -> WorkerPool {
        let config = Configuration::default();
        let bus = EventBus::new(config.clone());
        let monitor = Arc::new(ResourceMonitor::new(&config));
        WorkerPool::new(bus, monitor, config)
    }

    fn task(prompt: &str) -> Task {
        Task::from_delegate_request(DelegateRequest {
            prompt: prompt.into(),
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn spawn_runs_command_and_emits_completed_on_success() {
        let pool = pool();
        let completed = Arc::new(AtomicBool::new(false));
        let flag = completed.clone();
        pool.bus
            .subscribe(crate::domain::EventType::TaskCompleted, move |_env| {
                let flag = flag.clone();
                async move {
                    flag.store(true, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();

        let t = task("exit 0");
        let worker = pool.spawn(&t).await.unwrap();
        assert_eq!(worker.task_id, t.id);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(completed.load(Ordering::SeqCst));
        assert_eq!(pool.get_worker_count(), 0);
    }

    #[tokio::test]
    async fn spawn_runs_command_and_emits_failed_on_nonzero_exit() {
        let pool = pool();
        let failed = Arc::new(AtomicBool::new(false));
        let flag = failed.clone();
        pool.bus
            .subscribe(crate::domain::EventType::TaskFailed, move |_env| {
                let flag = flag.clone();
                async move {
                    flag.store(true, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();

        let t = task("exit 7");
        pool.spawn(&t).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(failed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn kill_terminates_a_running_worker_and_emits_cancelled() {
        let pool = pool();
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        pool.bus
            .subscribe(crate::domain::EventType::TaskCancelled, move |_env| {
                let flag = flag.clone();
                async move {
                    flag.store(true, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();

        let t = task("sleep 5");
        let worker = pool.spawn(&t).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        pool.kill(worker.id).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(cancelled.load(Ordering::SeqCst));
        assert_eq!(pool.get_worker_count(), 0);
    }

    #[tokio::test]
    async fn output_lines_are_forwarded_as_chunks() {
        let pool = pool();
        let lines = Arc::new(AtomicU32::new(0));
        let counter = lines.clone();
        pool.bus
            .subscribe(crate::domain::EventType::TaskOutputChunk, move |_env| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();

        let t = task("printf 'a\\nb\\n'");
        pool.spawn(&t).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(lines.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn kill_of_unknown_worker_errors() {
        let pool = pool();
        let err = pool.kill(WorkerId::generate()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::WorkerNotFound);
    }
}
