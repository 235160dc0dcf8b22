//! Metrics facade: one consistent set of derived values per period.
//!
//! `tick` samples the performance collector and the resource monitor once
//! each, computes every derived ratio, and publishes an immutable
//! `MetricsTick`. The scaling engine, the auto-tuner and any observer read
//! the same tick, so no two consumers can disagree about a ratio within a
//! period. A new tick replaces the previous one wholesale.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};

use canopy_resources::ResourceMonitor;
use canopy_state::{epoch_secs, PerformanceSnapshot, ResourceSnapshot};

use crate::collector::PerformanceCollector;

/// Workers served by one browser context in the pool-size recommendation.
const WORKERS_PER_BROWSER: u32 = 17;
const MAX_BROWSER_POOL: u32 = 6;

/// Everything a consumer needs for one scheduling period.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MetricsTick {
    /// Monotonic tick counter, starting at 1.
    pub sequence: u64,
    pub timestamp: u64,
    pub performance: PerformanceSnapshot,
    pub resources: ResourceSnapshot,
    /// 0.0–1.0.
    pub worker_utilization: f64,
    /// The same value as `worker_utilization`, scaled to 0–100.
    pub worker_utilization_percent: f64,
    pub queue_to_worker_ratio: f64,
    /// `min((90 - cpu)/90, (85 - mem)/85)`, floored at 0.
    pub resource_capacity: f64,
    pub scaling_capacity: f64,
    pub performance_score: f64,
    pub browser_pool_recommendation: u32,
    /// Set when the performance snapshot is a fallback.
    pub performance_degraded: bool,
    /// Set when the resource snapshot is a fallback.
    pub resources_degraded: bool,
}

impl MetricsTick {
    /// Derive a tick from one performance and one resource snapshot.
    pub fn derive(
        sequence: u64,
        performance: PerformanceSnapshot,
        resources: ResourceSnapshot,
    ) -> Self {
        let resource_capacity = ((90.0 - resources.cpu_percent) / 90.0)
            .min((85.0 - resources.memory_percent) / 85.0)
            .max(0.0);
        let browser_pool_recommendation =
            (performance.target_workers / WORKERS_PER_BROWSER).clamp(1, MAX_BROWSER_POOL);

        Self {
            sequence,
            timestamp: epoch_secs(),
            worker_utilization: performance.worker_utilization,
            worker_utilization_percent: performance.worker_utilization * 100.0,
            queue_to_worker_ratio: performance.queue_to_worker_ratio,
            resource_capacity,
            scaling_capacity: resources.scaling_capacity,
            performance_score: performance.performance_score,
            browser_pool_recommendation,
            performance,
            resources,
            performance_degraded: false,
            resources_degraded: false,
        }
    }
}

pub struct MetricsFacade {
    collector: Arc<PerformanceCollector>,
    monitor: Arc<ResourceMonitor>,
    sequence: AtomicU64,
    latest: watch::Sender<Option<Arc<MetricsTick>>>,
    performance_fallbacks: AtomicU64,
}

impl MetricsFacade {
    pub fn new(collector: Arc<PerformanceCollector>, monitor: Arc<ResourceMonitor>) -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            collector,
            monitor,
            sequence: AtomicU64::new(0),
            latest,
            performance_fallbacks: AtomicU64::new(0),
        }
    }

    pub fn collector(&self) -> &Arc<PerformanceCollector> {
        &self.collector
    }

    pub fn monitor(&self) -> &Arc<ResourceMonitor> {
        &self.monitor
    }

    /// Sample once, derive everything, publish and return the tick.
    pub async fn tick(&self) -> Arc<MetricsTick> {
        let now = epoch_secs();

        let (performance, performance_degraded) = match self.collector.collect().await {
            Ok(snapshot) => (snapshot, false),
            Err(e) => {
                let count = self.performance_fallbacks.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(error = %e, fallbacks = count, "performance collection failed, using fallback");
                (PerformanceSnapshot::fallback(now), true)
            }
        };

        let (resources, resources_degraded) = match self.monitor.sample().await {
            Ok(snapshot) => (snapshot, false),
            Err(e) => {
                warn!(error = %e, "resource sampling failed, using fallback");
                (ResourceSnapshot::fallback(now), true)
            }
        };

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let mut tick = MetricsTick::derive(sequence, performance, resources);
        tick.performance_degraded = performance_degraded;
        tick.resources_degraded = resources_degraded;

        debug!(
            sequence,
            score = tick.performance_score,
            utilization = tick.worker_utilization,
            queue_ratio = tick.queue_to_worker_ratio,
            capacity = tick.scaling_capacity,
            "metrics tick"
        );

        let tick = Arc::new(tick);
        self.latest.send_replace(Some(tick.clone()));
        tick
    }

    /// The most recently published tick.
    pub fn latest(&self) -> Option<Arc<MetricsTick>> {
        self.latest.borrow().clone()
    }

    /// Receive every published tick.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<MetricsTick>>> {
        self.latest.subscribe()
    }

    pub fn performance_fallback_count(&self) -> u64 {
        self.performance_fallbacks.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_pool::{SchedulerState, WorkerBounds};
    use canopy_resources::FixedSampler;

    fn test_facade(memory: f64, cpu: f64) -> (MetricsFacade, Arc<FixedSampler>) {
        let scheduler = Arc::new(SchedulerState::new(WorkerBounds { min: 1, max: 200 }, 50).unwrap());
        let sampler = Arc::new(FixedSampler::percent(memory, cpu, 30.0));
        let monitor = Arc::new(ResourceMonitor::new(sampler.clone()));
        let collector = Arc::new(PerformanceCollector::new(scheduler));
        (MetricsFacade::new(collector, monitor), sampler)
    }

    #[tokio::test]
    async fn tick_publishes_one_consistent_value() {
        let (facade, _) = test_facade(45.0, 40.0);
        let mut rx = facade.subscribe();
        assert!(facade.latest().is_none());

        let tick = facade.tick().await;
        rx.changed().await.unwrap();
        let observed = rx.borrow().clone().unwrap();

        assert!(Arc::ptr_eq(&tick, &observed));
        assert_eq!(tick.sequence, 1);
        assert_eq!(tick.worker_utilization, tick.performance.worker_utilization);
        assert_eq!(tick.worker_utilization_percent, tick.worker_utilization * 100.0);
        assert_eq!(tick.queue_to_worker_ratio, tick.performance.queue_to_worker_ratio);
        assert_eq!(tick.scaling_capacity, tick.resources.scaling_capacity);
    }

    #[tokio::test]
    async fn new_tick_replaces_previous() {
        let (facade, sampler) = test_facade(45.0, 40.0);
        let first = facade.tick().await;
        sampler.set(Some(canopy_resources::HostReading {
            memory_percent: 70.0,
            cpu_percent: 60.0,
            disk_percent: 30.0,
            memory_available_mb: 1024,
        }));
        let second = facade.tick().await;

        assert_eq!(second.sequence, first.sequence + 1);
        let latest = facade.latest().unwrap();
        assert_eq!(latest.resources.memory_percent, 70.0);
    }

    #[tokio::test]
    async fn derived_ratios() {
        let (facade, _) = test_facade(42.5, 45.0);
        let tick = facade.tick().await;

        // min((90-45)/90, (85-42.5)/85) = min(0.5, 0.5)
        assert!((tick.resource_capacity - 0.5).abs() < 1e-9);
        // 50 / 17 = 2
        assert_eq!(tick.browser_pool_recommendation, 2);
    }

    #[tokio::test]
    async fn resource_capacity_floors_at_zero() {
        let (facade, _) = test_facade(95.0, 99.0);
        assert_eq!(facade.tick().await.resource_capacity, 0.0);
    }

    #[tokio::test]
    async fn failed_resource_sample_marks_tick_degraded() {
        let (facade, sampler) = test_facade(45.0, 40.0);
        sampler.set(None);

        let tick = facade.tick().await;
        assert!(tick.resources_degraded);
        assert!(!tick.performance_degraded);
        assert_eq!(tick.resources.memory_percent, 50.0);
    }

    #[tokio::test]
    async fn failed_performance_sample_marks_tick_degraded() {
        let (facade, _) = test_facade(45.0, 40.0);
        facade
            .collector()
            .report_external_utilization(Some(f64::NAN))
            .await;

        let tick = facade.tick().await;
        assert!(tick.performance_degraded);
        assert_eq!(tick.performance.success_rate, 0.9);
        assert_eq!(facade.performance_fallback_count(), 1);
    }

    #[tokio::test]
    async fn tick_serializes_for_observers() {
        let (facade, _) = test_facade(45.0, 40.0);
        let tick = facade.tick().await;
        let json = serde_json::to_value(&*tick).unwrap();
        assert_eq!(json["sequence"], 1);
        assert!(json["resources"]["load_level"].is_string());
    }
}
