#![allow(clippy::cast_precision_loss)] // Timing averages tolerate precision loss

//! Lightweight benchmarking for cache operations.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use sysinfo::System;
use tracing::debug;

/// Aggregate timings and process memory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceReport {
    /// Mean duration of completed benchmarks in milliseconds.
    pub average_response_time_ms: f64,
    /// Completed benchmarks.
    pub total_operations: u64,
    /// Resident memory of this process in bytes.
    pub memory_usage: u64,
}

/// Times labelled operations and reports process memory.
pub struct CachePerformanceMonitor {
    system: Mutex<System>,
    pid: u32,
    next_id: AtomicU64,
    active: Mutex<HashMap<String, Instant>>,
    completed: AtomicU64,
    total_micros: AtomicU64,
}

impl std::fmt::Debug for CachePerformanceMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachePerformanceMonitor")
            .field("pid", &self.pid)
            .field("completed", &self.completed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Default for CachePerformanceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl CachePerformanceMonitor {
    /// Monitor for the current process.
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            pid: std::process::id(),
            next_id: AtomicU64::new(0),
            active: Mutex::new(HashMap::new()),
            completed: AtomicU64::new(0),
            total_micros: AtomicU64::new(0),
        }
    }

    /// Start timing; the returned id contains `label`.
    pub fn start_benchmark(&self, label: &str) -> String {
        let seq = self.next_id.fetch_add(1, Ordering::Relaxed);
        let id = format!("{label}-{seq}");
        self.active.lock().insert(id.clone(), Instant::now());
        id
    }

    /// Stop timing; `None` for unknown or already finished ids.
    #[allow(clippy::cast_possible_truncation)] // Saturates at u64::MAX
    pub fn end_benchmark(&self, id: &str) -> Option<f64> {
        let started = self.active.lock().remove(id)?;
        let elapsed = started.elapsed();
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.total_micros.fetch_add(
            elapsed.as_micros().min(u128::from(u64::MAX)) as u64,
            Ordering::Relaxed,
        );
        let ms = elapsed.as_secs_f64() * 1000.0;
        debug!(id, duration_ms = ms, "benchmark finished");
        Some(ms)
    }

    /// Resident memory of this process in bytes, `0` if unavailable.
    pub fn get_memory_usage(&self) -> u64 {
        let mut system = self.system.lock();
        system.refresh_all();
        system
            .process(sysinfo::Pid::from(self.pid as usize))
            .map_or(0, sysinfo::Process::memory)
    }

    /// Averages over completed benchmarks plus current memory.
    pub fn get_performance_report(&self) -> PerformanceReport {
        let total_operations = self.completed.load(Ordering::Relaxed);
        let total_micros = self.total_micros.load(Ordering::Relaxed);
        let average_response_time_ms = if total_operations == 0 {
            0.0
        } else {
            total_micros as f64 / total_operations as f64 / 1000.0
        };
        PerformanceReport {
            average_response_time_ms,
            total_operations,
            memory_usage: self.get_memory_usage(),
        }
    }
}
