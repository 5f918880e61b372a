//! # Resource Monitor
//!
//! Polls host CPU/memory/load and admits or denies spawn attempts.
//! Backed by `sysinfo`.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use sysinfo::System;

use crate::config::Configuration;

#[derive(Debug, Clone, Copy)]
pub struct ResourceSnapshot {
    pub cpu_usage_percent: f64,
    pub available_memory_bytes: u64,
    pub total_memory_bytes: u64,
    pub load_average: [f64; 3],
    pub worker_count: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct ResourceThresholds {
    pub max_cpu_percent: f64,
    pub min_memory_bytes: u64,
}

/// Resource monitor. `worker_count` is owned exclusively here and
/// mutated only through `increment_worker_count`/`decrement_worker_count`
/// — the worker pool asks the monitor rather than tracking its own count.
pub struct ResourceMonitor {
    system: Mutex<System>,
    worker_count: AtomicUsize,
    spawn_count: AtomicU64,
    cpu_cores_reserved: u32,
    memory_reserve_bytes: u64,
    max_cpu_percent: f64,
    min_memory_bytes: u64,
}

impl ResourceMonitor {
    #[must_use]
    pub fn new(config: &Configuration) -> Self {
        let mut system = System::new_all();
        system.refresh_memory();
        system.refresh_cpu_usage();
        Self {
            system: Mutex::new(system),
            worker_count: AtomicUsize::new(0),
            spawn_count: AtomicU64::new(0),
            cpu_cores_reserved: config.cpu_cores_reserved,
            memory_reserve_bytes: config.memory_reserve_bytes,
            max_cpu_percent: config.max_cpu_percent,
            min_memory_bytes: config.min_memory_bytes,
        }
    }

    /// Refreshes the sample and returns the current reading. CPU usage
    /// is derived from load average, not sampled instantaneous CPU:
    /// `loadAverage[0] / cpuCount * 100`, clamped to `[0, 100]`.
    pub fn get_resources(&self) -> ResourceSnapshot {
        let mut system = self.system.lock().expect("resource monitor mutex poisoned");
        system.refresh_memory();
        system.refresh_cpu_usage();

        let cpu_count = (system.cpus().len() as u32)
            .saturating_sub(self.cpu_cores_reserved)
            .max(1) as f64;

        let load = System::load_average();
        let load_average = [load.one, load.five, load.fifteen];

        let cpu_usage_percent = (load.one / cpu_count * 100.0).clamp(0.0, 100.0);

        let total_memory_bytes = system.total_memory();
        let available_memory_bytes = system
            .available_memory()
            .saturating_sub(self.memory_reserve_bytes);

        ResourceSnapshot {
            cpu_usage_percent,
            available_memory_bytes,
            total_memory_bytes,
            load_average,
            worker_count: self.worker_count.load(Ordering::SeqCst),
        }
    }

    /// Deny on CPU, memory, or load pressure; otherwise admit.
    #[must_use]
    pub fn can_spawn_worker(&self) -> bool {
        let snapshot = self.get_resources();
        let cpu_count = self
            .system
            .lock()
            .expect("resource monitor mutex poisoned")
            .cpus()
            .len()
            .max(1) as f64;

        if snapshot.cpu_usage_percent >= self.max_cpu_percent {
            return false;
        }
        if snapshot.available_memory_bytes <= self.min_memory_bytes {
            return false;
        }
        if snapshot.load_average[0] > cpu_count * 3.0 {
            return false;
        }
        true
    }

    pub fn increment_worker_count(&self) {
        self.worker_count.fetch_add(1, Ordering::SeqCst);
    }

    pub fn decrement_worker_count(&self) {
        self.worker_count.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| {
            Some(c.saturating_sub(1))
        }).ok();
    }

    pub fn record_spawn(&self) {
        self.spawn_count.fetch_add(1, Ordering::SeqCst);
    }

    #[must_use]
    pub fn spawn_count(&self) -> u64 {
        self.spawn_count.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn get_thresholds(&self) -> ResourceThresholds {
        ResourceThresholds {
            max_cpu_percent: self.max_cpu_percent,
            min_memory_bytes: self.min_memory_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_count_tracks_increment_and_decrement() {
        let monitor = ResourceMonitor::new(&Configuration::default());
        assert_eq!(monitor.get_resources().worker_count, 0);
        monitor.increment_worker_count();
        monitor.increment_worker_count();
        assert_eq!(monitor.get_resources().worker_count, 2);
        monitor.decrement_worker_count();
        assert_eq!(monitor.get_resources().worker_count, 1);
    }

    #[test]
    fn decrement_below_zero_saturates() {
        let monitor = ResourceMonitor::new(&Configuration::default());
        monitor.decrement_worker_count();
        assert_eq!(monitor.get_resources().worker_count, 0);
    }

    #[test]
    fn thresholds_reflect_configuration() {
        let mut cfg = Configuration::default();
        cfg.max_cpu_percent = 50.0;
        let monitor = ResourceMonitor::new(&cfg);
        assert_eq!(monitor.get_thresholds().max_cpu_percent, 50.0);
    }
}
