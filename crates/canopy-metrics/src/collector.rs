//! Performance collector: derives crawl performance from pool counters.
//!
//! Counters come from the shared `SchedulerState`; latencies and
//! efficiency signals are pushed in by workers and external collaborators.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use canopy_pool::SchedulerState;
use canopy_state::{epoch_secs, PerformanceSnapshot, SamplingError};

/// Recent task latencies kept for the average.
const LATENCY_WINDOW: usize = 500;

/// Latency at which the speed component reaches zero.
const SPEED_CEILING_SECS: f64 = 30.0;

/// Utilization the balance component rewards most.
const TARGET_UTILIZATION: f64 = 0.75;

struct Baseline {
    completed: u64,
    failed: u64,
    at: Instant,
}

pub struct PerformanceCollector {
    scheduler: Arc<SchedulerState>,
    /// Task latencies in microseconds, most recent last.
    latencies: Mutex<VecDeque<u64>>,
    /// Named resource-saving signals (0.0–1.0) from external collaborators.
    efficiency: RwLock<HashMap<String, f64>>,
    /// Utilization of an external pool (browser contexts, connections).
    external_utilization: RwLock<Option<f64>>,
    baseline: Mutex<Baseline>,
}

impl PerformanceCollector {
    pub fn new(scheduler: Arc<SchedulerState>) -> Self {
        Self {
            scheduler,
            latencies: Mutex::new(VecDeque::with_capacity(LATENCY_WINDOW)),
            efficiency: RwLock::new(HashMap::new()),
            external_utilization: RwLock::new(None),
            baseline: Mutex::new(Baseline {
                completed: 0,
                failed: 0,
                at: Instant::now(),
            }),
        }
    }

    /// Record how long a task took, successful or not.
    pub async fn record_task(&self, latency: Duration) {
        let mut latencies = self.latencies.lock().await;
        if latencies.len() == LATENCY_WINDOW {
            latencies.pop_front();
        }
        latencies.push_back(latency.as_micros() as u64);
    }

    /// Report a resource-saving signal, e.g. a cache hit ratio.
    pub async fn report_efficiency(&self, signal: &str, value: f64) {
        self.efficiency
            .write()
            .await
            .insert(signal.to_string(), value.clamp(0.0, 1.0));
    }

    /// Report utilization of an external pool, or clear it.
    pub async fn report_external_utilization(&self, value: Option<f64>) {
        *self.external_utilization.write().await = value;
    }

    /// Restart the success and throughput window from the current counters.
    pub async fn reset_window(&self) {
        let counters = self.scheduler.counters().await;
        *self.baseline.lock().await = Baseline {
            completed: counters.completed,
            failed: counters.failed,
            at: Instant::now(),
        };
        self.latencies.lock().await.clear();
        debug!("performance window reset");
    }

    /// Take a performance snapshot.
    pub async fn collect(&self) -> Result<PerformanceSnapshot, SamplingError> {
        let counters = self.scheduler.counters().await;
        let pool = self.scheduler.workers().stats().await;
        let busy = self.scheduler.busy_workers().await;

        let baseline = self.baseline.lock().await;
        let completed = counters.completed.saturating_sub(baseline.completed);
        let failed = counters.failed.saturating_sub(baseline.failed);
        let elapsed = baseline.at.elapsed().as_secs_f64();
        drop(baseline);

        let finished = (completed + failed).max(1) as f64;
        let success_rate = completed as f64 / finished;
        let error_rate = failed as f64 / finished;
        let throughput_per_second = if elapsed > 0.0 {
            completed as f64 / elapsed
        } else {
            0.0
        };

        let target = pool.max_workers.max(1) as f64;
        let worker_utilization = (busy as f64 / target).min(1.0);
        let queue_to_worker_ratio = counters.queued as f64 / target;

        let avg_latency_seconds = {
            let latencies = self.latencies.lock().await;
            if latencies.is_empty() {
                0.0
            } else {
                latencies.iter().sum::<u64>() as f64 / latencies.len() as f64 / 1_000_000.0
            }
        };

        let efficiency = {
            let signals = self.efficiency.read().await;
            if signals.is_empty() {
                0.0
            } else {
                signals.values().sum::<f64>() / signals.len() as f64
            }
        };

        let avg_utilization = match *self.external_utilization.read().await {
            Some(external) => (worker_utilization + external) / 2.0,
            None => worker_utilization,
        };

        let performance_score = performance_score(
            success_rate,
            avg_latency_seconds,
            efficiency,
            avg_utilization,
            error_rate,
        );

        for (field, value) in [
            ("avg_latency_seconds", avg_latency_seconds),
            ("throughput_per_second", throughput_per_second),
            ("performance_score", performance_score),
        ] {
            if !value.is_finite() {
                return Err(SamplingError::OutOfRange { field, value });
            }
        }

        Ok(PerformanceSnapshot {
            timestamp: epoch_secs(),
            success_rate,
            error_rate,
            avg_latency_seconds,
            throughput_per_second,
            worker_utilization,
            queue_depth: counters.queued,
            queue_to_worker_ratio,
            active_workers: pool.active,
            busy_workers: busy,
            target_workers: pool.max_workers,
            completed,
            failed,
            performance_score,
        })
    }
}

/// Weighted performance score, clamped to [0, 1].
pub fn performance_score(
    success_rate: f64,
    avg_latency_seconds: f64,
    efficiency: f64,
    avg_utilization: f64,
    error_rate: f64,
) -> f64 {
    let speed = (1.0 - avg_latency_seconds / SPEED_CEILING_SECS).max(0.0);
    let balance = 1.0 - (avg_utilization - TARGET_UTILIZATION).abs() / TARGET_UTILIZATION;
    let stability = 1.0 - error_rate;

    let score = 0.30 * success_rate
        + 0.25 * speed
        + 0.20 * efficiency
        + 0.15 * balance
        + 0.10 * stability;
    // NaN passes through clamp and is caught by the caller.
    score.clamp(0.0, 1.0)
}
