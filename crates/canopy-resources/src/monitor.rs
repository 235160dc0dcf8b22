//! Resource monitor: samples the host and keeps a short history.
//!
//! The scaling engine reads the latest snapshot through
//! `is_safe_to_scale_up` / `requires_scale_down`; the metrics facade calls
//! `sample_or_fallback` once per tick. `run` keeps an independent sampling
//! loop going and appends every snapshot to the journal when one is
//! configured.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use canopy_state::{
    epoch_secs, Journal, JournalEntry, LoadLevel, ResourceSnapshot, SamplingError, ScalingAction,
};

use crate::sampler::HostSampler;

const HISTORY_SIZE: usize = 100;
const TREND_POINTS: usize = 5;

/// Which column of the history a trend is computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceMetric {
    Memory,
    Cpu,
    Disk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

/// Direction of a resource over the most recent samples.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceTrend {
    pub direction: TrendDirection,
    /// Last value minus first value, in percentage points.
    pub change: f64,
    pub confidence: f64,
}

/// Resource-only view of whether the pool should grow or shrink.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRecommendation {
    pub action: ScalingAction,
    pub confidence: f64,
    pub reason: String,
}

pub struct ResourceMonitor {
    sampler: Arc<dyn HostSampler>,
    history: Mutex<VecDeque<ResourceSnapshot>>,
    fallbacks: AtomicU64,
    journal: Option<Arc<Journal>>,
}

impl ResourceMonitor {
    pub fn new(sampler: Arc<dyn HostSampler>) -> Self {
        Self {
            sampler,
            history: Mutex::new(VecDeque::with_capacity(HISTORY_SIZE)),
            fallbacks: AtomicU64::new(0),
            journal: None,
        }
    }

    /// Append every snapshot taken by `run` to `journal`.
    pub fn with_journal(mut self, journal: Arc<Journal>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Probe the host and record the snapshot.
    pub async fn sample(&self) -> Result<ResourceSnapshot, SamplingError> {
        let sampler = self.sampler.clone();
        let reading = tokio::task::spawn_blocking(move || sampler.probe())
            .await
            .map_err(|e| SamplingError::Probe(format!("probe task failed: {e}")))??;

        for (field, value) in [
            ("memory_percent", reading.memory_percent),
            ("cpu_percent", reading.cpu_percent),
            ("disk_percent", reading.disk_percent),
        ] {
            if !value.is_finite() || !(0.0..=100.0).contains(&value) {
                return Err(SamplingError::OutOfRange { field, value });
            }
        }

        let snapshot = ResourceSnapshot::new(
            epoch_secs(),
            reading.memory_percent,
            reading.cpu_percent,
            reading.disk_percent,
            reading.memory_available_mb,
        );

        let mut history = self.history.lock().await;
        if history.len() == HISTORY_SIZE {
            history.pop_front();
        }
        history.push_back(snapshot.clone());
        Ok(snapshot)
    }

    /// Like `sample`, but substitutes the fallback snapshot on failure.
    pub async fn sample_or_fallback(&self) -> ResourceSnapshot {
        match self.sample().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                let count = self.fallbacks.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(error = %e, fallbacks = count, "resource sampling failed, using fallback");
                ResourceSnapshot::fallback(epoch_secs())
            }
        }
    }

    /// Most recent successful snapshot.
    pub async fn latest(&self) -> Option<ResourceSnapshot> {
        self.history.lock().await.back().cloned()
    }

    pub async fn history(&self) -> Vec<ResourceSnapshot> {
        self.history.lock().await.iter().cloned().collect()
    }

    /// Number of times a fallback snapshot was substituted.
    pub fn fallback_count(&self) -> u64 {
        self.fallbacks.load(Ordering::Relaxed)
    }

    pub async fn is_safe_to_scale_up(&self) -> bool {
        self.current().await.is_safe_to_scale_up()
    }

    pub async fn requires_scale_down(&self) -> bool {
        self.current().await.requires_scale_down()
    }

    async fn current(&self) -> ResourceSnapshot {
        match self.latest().await {
            Some(s) => s,
            None => ResourceSnapshot::fallback(epoch_secs()),
        }
    }

    /// Direction of `metric` over the last few samples.
    pub async fn resource_trend(&self, metric: ResourceMetric) -> ResourceTrend {
        let history = self.history.lock().await;
        let values: Vec<f64> = history
            .iter()
            .rev()
            .take(TREND_POINTS)
            .rev()
            .map(|s| match metric {
                ResourceMetric::Memory => s.memory_percent,
                ResourceMetric::Cpu => s.cpu_percent,
                ResourceMetric::Disk => s.disk_percent,
            })
            .collect();
        drop(history);
        compute_trend(&values)
    }

    /// Resource-only scaling recommendation from the latest snapshot.
    pub async fn recommendation(&self) -> ResourceRecommendation {
        match self.latest().await {
            Some(latest) => recommend(&latest),
            None => ResourceRecommendation {
                action: ScalingAction::NoChange,
                confidence: 0.0,
                reason: "No resource data available".to_string(),
            },
        }
    }

    /// Sample every `interval` until shutdown.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "resource monitor started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let snapshot = self.sample_or_fallback().await;
                    debug!(
                        memory = snapshot.memory_percent,
                        cpu = snapshot.cpu_percent,
                        disk = snapshot.disk_percent,
                        load = ?snapshot.load_level,
                        "resource snapshot"
                    );
                    if let Some(journal) = &self.journal
                        && let Err(e) = journal.append(JournalEntry::ResourceSnapshot(snapshot)).await
                    {
                        warn!(error = %e, "failed to journal resource snapshot");
                    }
                }
                _ = shutdown.changed() => {
                    info!("resource monitor shutting down");
                    break;
                }
            }
        }
    }
}

// ── Internal helpers ──────────────────────────────────────────────

fn compute_trend(values: &[f64]) -> ResourceTrend {
    if values.len() < 2 {
        return ResourceTrend {
            direction: TrendDirection::Stable,
            change: 0.0,
            confidence: 0.0,
        };
    }

    let first = values[0];
    let last = values[values.len() - 1];
    let change = last - first;
    let change_percent = if first != 0.0 { change / first * 100.0 } else { 0.0 };

    let direction = if change_percent.abs() < 5.0 {
        TrendDirection::Stable
    } else if change_percent > 0.0 {
        TrendDirection::Increasing
    } else {
        TrendDirection::Decreasing
    };

    let confidence = if values.len() >= 5 {
        let mid = values.len() / 2;
        let first_half = values[..mid].iter().sum::<f64>() / mid as f64;
        let second_half = values[mid..].iter().sum::<f64>() / (values.len() - mid) as f64;
        let consistency = 1.0 - ((second_half - first_half) / (first_half + 1.0)).abs();
        consistency.clamp(0.3, 1.0)
    } else {
        0.5
    };

    ResourceTrend {
        direction,
        change,
        confidence,
    }
}

fn recommend(latest: &ResourceSnapshot) -> ResourceRecommendation {
    let mut down = Vec::new();
    let mut up = Vec::new();

    if latest.memory_percent > 85.0 {
        down.push(format!("High memory usage: {:.1}%", latest.memory_percent));
    } else if latest.memory_percent < 60.0 {
        up.push(format!("Low memory usage: {:.1}%", latest.memory_percent));
    }

    if latest.cpu_percent > 90.0 {
        down.push(format!("High CPU usage: {:.1}%", latest.cpu_percent));
    } else if latest.cpu_percent < 50.0 {
        up.push(format!("Low CPU usage: {:.1}%", latest.cpu_percent));
    }

    if latest.disk_percent > 90.0 {
        down.push(format!("High disk usage: {:.1}%", latest.disk_percent));
    }

    if latest.load_level == LoadLevel::Critical {
        down.push("Critical load level".to_string());
    }

    if down.len() >= 2 {
        ResourceRecommendation {
            action: ScalingAction::ScaleDown,
            confidence: 0.8,
            reason: down.join("; "),
        }
    } else if up.len() >= 2 && down.is_empty() {
        ResourceRecommendation {
            action: ScalingAction::ScaleUp,
            confidence: 0.7,
            reason: up.join("; "),
        }
    } else {
        ResourceRecommendation {
            action: ScalingAction::NoChange,
            confidence: 0.6,
            reason: "Resource levels within acceptable parameters".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::{FixedSampler, HostReading};

    fn test_monitor(memory: f64, cpu: f64, disk: f64) -> (ResourceMonitor, Arc<FixedSampler>) {
        let sampler = Arc::new(FixedSampler::percent(memory, cpu, disk));
        (ResourceMonitor::new(sampler.clone()), sampler)
    }

    fn reading(memory: f64, cpu: f64) -> Option<HostReading> {
        Some(HostReading {
            memory_percent: memory,
            cpu_percent: cpu,
            disk_percent: 30.0,
            memory_available_mb: 2048,
        })
    }

    #[tokio::test]
    async fn sample_classifies_and_records() {
        let (monitor, _) = test_monitor(45.0, 40.0, 30.0);
        let snap = monitor.sample().await.unwrap();

        assert_eq!(snap.load_level, LoadLevel::Low);
        assert!(monitor.is_safe_to_scale_up().await);
        assert!(!monitor.requires_scale_down().await);
        assert_eq!(monitor.history().await.len(), 1);
    }

    #[tokio::test]
    async fn memory_pressure_requires_scale_down() {
        let (monitor, _) = test_monitor(96.0, 20.0, 30.0);
        monitor.sample().await.unwrap();
        assert!(monitor.requires_scale_down().await);
        assert!(!monitor.is_safe_to_scale_up().await);
    }

    #[tokio::test]
    async fn failed_probe_falls_back() {
        let (monitor, sampler) = test_monitor(45.0, 40.0, 30.0);
        sampler.set(None);

        assert!(monitor.sample().await.is_err());
        let snap = monitor.sample_or_fallback().await;
        assert_eq!(snap.memory_percent, 50.0);
        assert_eq!(snap.cpu_percent, 25.0);
        assert_eq!(snap.load_level, LoadLevel::Normal);
        assert_eq!(monitor.fallback_count(), 1);
        assert!(monitor.latest().await.is_none());
    }

    #[tokio::test]
    async fn out_of_range_reading_rejected() {
        let (monitor, sampler) = test_monitor(45.0, 40.0, 30.0);
        sampler.set(reading(140.0, 10.0));
        assert!(matches!(
            monitor.sample().await,
            Err(SamplingError::OutOfRange { field: "memory_percent", .. })
        ));
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let (monitor, _) = test_monitor(45.0, 40.0, 30.0);
        for _ in 0..(HISTORY_SIZE + 10) {
            monitor.sample().await.unwrap();
        }
        assert_eq!(monitor.history().await.len(), HISTORY_SIZE);
    }

    #[tokio::test]
    async fn trend_detects_rising_memory() {
        let (monitor, sampler) = test_monitor(40.0, 20.0, 30.0);
        for mem in [40.0, 45.0, 50.0, 55.0, 60.0] {
            sampler.set(reading(mem, 20.0));
            monitor.sample().await.unwrap();
        }

        let trend = monitor.resource_trend(ResourceMetric::Memory).await;
        assert_eq!(trend.direction, TrendDirection::Increasing);
        assert_eq!(trend.change, 20.0);

        let cpu = monitor.resource_trend(ResourceMetric::Cpu).await;
        assert_eq!(cpu.direction, TrendDirection::Stable);
    }

    #[tokio::test]
    async fn recommendation_reflects_pressure() {
        let (monitor, sampler) = test_monitor(30.0, 20.0, 30.0);
        assert_eq!(monitor.recommendation().await.action, ScalingAction::NoChange);

        monitor.sample().await.unwrap();
        assert_eq!(monitor.recommendation().await.action, ScalingAction::ScaleUp);

        sampler.set(reading(92.0, 95.0));
        monitor.sample().await.unwrap();
        let rec = monitor.recommendation().await;
        assert_eq!(rec.action, ScalingAction::ScaleDown);
        assert!(rec.reason.contains("High memory usage"));
    }

    #[tokio::test]
    async fn run_journals_until_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resources.jsonl");
        let journal = Arc::new(Journal::open(&path).await.unwrap());

        let (monitor, _) = test_monitor(45.0, 40.0, 30.0);
        let monitor = Arc::new(monitor.with_journal(journal));
        let (tx, rx) = watch::channel(false);

        let m = monitor.clone();
        let handle = tokio::spawn(async move { m.run(Duration::from_millis(10), rx).await });

        tokio::time::sleep(Duration::from_millis(60)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        let records = Journal::read_all(&path).await.unwrap();
        assert!(!records.is_empty());
        assert!(records
            .iter()
            .all(|r| matches!(r.entry, JournalEntry::ResourceSnapshot(_))));
    }
}
