//! # Configuration
//!
//! `Configuration` is an immutable value constructed once at boot and
//! passed down to every component rather than read piecemeal from
//! global or environment state. Loading these fields from the
//! environment or a file is left to the embedding binary; this crate
//! only owns the value type and its defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// All recognized configuration keys, with their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Default per-task timeout (ms), capped at `max_timeout_ms`.
    pub timeout_ms: u64,
    /// Hard cap on any task's timeout, including an explicit override.
    pub max_timeout_ms: u64,
    /// Per-task output cap, in bytes.
    pub max_output_buffer_bytes: u64,
    /// CPU cores subtracted from host capacity for admission math.
    pub cpu_cores_reserved: u32,
    /// Memory subtracted from host capacity for admission math, bytes.
    pub memory_reserve_bytes: u64,
    pub max_listeners_per_event: usize,
    pub max_total_subscriptions: usize,
    pub kill_grace_period_ms: u64,
    pub resource_monitor_interval_ms: u64,
    pub min_spawn_delay_ms: u64,
    pub spawn_backoff_ms: u64,
    pub event_request_timeout_ms: u64,
    pub event_cleanup_interval_ms: u64,
    pub file_storage_threshold_bytes: u64,
    pub retry_initial_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub task_retention_days: u32,
    /// Resource monitor admission thresholds.
    pub max_cpu_percent: f64,
    pub min_memory_bytes: u64,
    /// Default page size for `findAll` when the caller doesn't specify one.
    pub default_page_size: usize,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            timeout_ms: 1_800_000,
            max_timeout_ms: 3_600_000,
            max_output_buffer_bytes: 10_485_760,
            cpu_cores_reserved: 0,
            memory_reserve_bytes: 0,
            max_listeners_per_event: 100,
            max_total_subscriptions: 1_000,
            kill_grace_period_ms: 5_000,
            resource_monitor_interval_ms: 5_000,
            min_spawn_delay_ms: 10_000,
            spawn_backoff_ms: 1_000,
            event_request_timeout_ms: 5_000,
            event_cleanup_interval_ms: 60_000,
            file_storage_threshold_bytes: 102_400,
            retry_initial_delay_ms: 1_000,
            retry_max_delay_ms: 30_000,
            task_retention_days: 7,
            max_cpu_percent: 80.0,
            min_memory_bytes: 1_073_741_824,
            default_page_size: 100,
        }
    }
}

impl Configuration {
    /// Effective timeout for a task, honoring an explicit override but
    /// never exceeding `max_timeout_ms`.
    #[must_use]
    pub fn effective_timeout(&self, requested_ms: Option<u64>) -> Duration {
        let ms = requested_ms.unwrap_or(self.timeout_ms).min(self.max_timeout_ms);
        Duration::from_millis(ms)
    }

    #[must_use]
    pub fn kill_grace_period(&self) -> Duration {
        Duration::from_millis(self.kill_grace_period_ms)
    }

    #[must_use]
    pub fn min_spawn_delay(&self) -> Duration {
        Duration::from_millis(self.min_spawn_delay_ms)
    }

    #[must_use]
    pub fn spawn_backoff(&self) -> Duration {
        Duration::from_millis(self.spawn_backoff_ms)
    }

    #[must_use]
    pub fn event_request_timeout(&self) -> Duration {
        Duration::from_millis(self.event_request_timeout_ms)
    }
}
