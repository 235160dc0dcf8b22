//! Pattern detection over the tuner's sample history.
//!
//! Detection is a pure function of the ordered samples and the current
//! `min_workers`, so the same sequence always yields the same patterns.

use std::collections::BTreeMap;

use serde::Serialize;

use canopy_autoscale::{linear_slope, sample_variance};
use canopy_metrics::MetricsTick;
use canopy_state::{PatternKind, PerformancePattern};

/// Samples considered by one detection pass.
pub const PATTERN_WINDOW: usize = 20;
/// Samples averaged by the peak-load and low-activity detectors.
const RECENT: usize = 5;
const MIN_SAMPLES: usize = 3;
const DEGRADING_MIN_SAMPLES: usize = 5;
const STEADY_MIN_SAMPLES: usize = 10;

/// The slice of a metrics tick the tuner keeps.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceSample {
    pub timestamp: u64,
    pub success_rate: f64,
    pub avg_latency_seconds: f64,
    pub error_rate: f64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub active_workers: u32,
    pub queue_depth: usize,
}

impl PerformanceSample {
    pub fn from_tick(tick: &MetricsTick) -> Self {
        Self {
            timestamp: tick.timestamp,
            success_rate: tick.performance.success_rate,
            avg_latency_seconds: tick.performance.avg_latency_seconds,
            error_rate: tick.performance.error_rate,
            cpu_percent: tick.resources.cpu_percent,
            memory_percent: tick.resources.memory_percent,
            active_workers: tick.performance.active_workers,
            queue_depth: tick.performance.queue_depth,
        }
    }
}

/// Detect every pattern present in the last [`PATTERN_WINDOW`] samples.
///
/// `sample_interval_secs` only scales the reported duration.
pub fn detect(
    samples: &[PerformanceSample],
    min_workers: u32,
    sample_interval_secs: u64,
) -> Vec<PerformancePattern> {
    if samples.len() < MIN_SAMPLES {
        return Vec::new();
    }
    let data = &samples[samples.len().saturating_sub(PATTERN_WINDOW)..];
    let duration_secs = data.len() as u64 * sample_interval_secs;

    [
        peak_load(data),
        degrading(data),
        low_activity(data, min_workers),
        steady_state(data),
    ]
    .into_iter()
    .flatten()
    .map(|(kind, confidence, characteristics)| PerformancePattern {
        kind,
        confidence: confidence.clamp(0.0, 1.0),
        duration_secs,
        characteristics,
        recommended_action: recommended_action(kind).to_string(),
    })
    .collect()
}

fn recommended_action(kind: PatternKind) -> &'static str {
    match kind {
        PatternKind::PeakLoad => "scale_down_workers",
        PatternKind::LowActivity => "scale_up_workers",
        PatternKind::Degrading => "optimize_configuration",
        PatternKind::SteadyState => "maintain_current",
    }
}

type Detection = (PatternKind, f64, BTreeMap<String, f64>);

fn characteristics(entries: &[(&str, f64)]) -> BTreeMap<String, f64> {
    entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

fn recent(data: &[PerformanceSample]) -> &[PerformanceSample] {
    &data[data.len().saturating_sub(RECENT)..]
}

fn mean_of(data: &[PerformanceSample], f: impl Fn(&PerformanceSample) -> f64) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().map(f).sum::<f64>() / data.len() as f64
}

fn peak_load(data: &[PerformanceSample]) -> Option<Detection> {
    let recent = recent(data);
    let latency = mean_of(recent, |s| s.avg_latency_seconds);
    let cpu = mean_of(recent, |s| s.cpu_percent);
    let errors = mean_of(recent, |s| s.error_rate);

    if latency > 10.0 || cpu > 70.0 || errors > 0.1 {
        let confidence = ((latency / 20.0 + cpu / 100.0 + errors * 5.0) / 3.0).min(1.0);
        return Some((
            PatternKind::PeakLoad,
            confidence,
            characteristics(&[
                ("avg_response_time", latency),
                ("avg_cpu_usage", cpu),
                ("avg_error_rate", errors),
            ]),
        ));
    }
    None
}

fn low_activity(data: &[PerformanceSample], min_workers: u32) -> Option<Detection> {
    let recent = recent(data);
    let cpu = mean_of(recent, |s| s.cpu_percent);
    let queue = mean_of(recent, |s| s.queue_depth as f64);
    let workers = mean_of(recent, |s| s.active_workers as f64);

    if cpu < 30.0 && queue < 2.0 && workers > (min_workers + 2) as f64 {
        return Some((
            PatternKind::LowActivity,
            (30.0 - cpu) / 30.0,
            characteristics(&[
                ("avg_cpu_usage", cpu),
                ("avg_queue_length", queue),
                ("avg_workers", workers),
            ]),
        ));
    }
    None
}

fn degrading(data: &[PerformanceSample]) -> Option<Detection> {
    if data.len() < DEGRADING_MIN_SAMPLES {
        return None;
    }
    let latency: Vec<f64> = data.iter().map(|s| s.avg_latency_seconds).collect();
    let success: Vec<f64> = data.iter().map(|s| s.success_rate).collect();
    let latency_slope = linear_slope(&latency);
    let success_slope = linear_slope(&success);

    if latency_slope > 0.1 || success_slope < -0.01 {
        return Some((
            PatternKind::Degrading,
            (latency_slope.abs() + success_slope.abs()).min(1.0),
            characteristics(&[
                ("response_time_trend", latency_slope),
                ("success_rate_trend", success_slope),
            ]),
        ));
    }
    None
}

fn steady_state(data: &[PerformanceSample]) -> Option<Detection> {
    if data.len() < STEADY_MIN_SAMPLES {
        return None;
    }
    let latency_cv = coefficient_of_variation(data.iter().map(|s| s.avg_latency_seconds));
    let success_cv = coefficient_of_variation(data.iter().map(|s| s.success_rate));
    let cpu_cv = coefficient_of_variation(data.iter().map(|s| s.cpu_percent));

    if latency_cv < 0.2 && success_cv < 0.1 && cpu_cv < 0.3 {
        return Some((
            PatternKind::SteadyState,
            1.0 - (latency_cv + success_cv + cpu_cv) / 3.0,
            characteristics(&[
                ("response_time_stability", latency_cv),
                ("success_rate_stability", success_cv),
                ("cpu_stability", cpu_cv),
            ]),
        ));
    }
    None
}

/// Sample standard deviation over mean; 1.0 when the mean is not positive.
pub fn coefficient_of_variation(values: impl Iterator<Item = f64>) -> f64 {
    let values: Vec<f64> = values.collect();
    if values.is_empty() {
        return 1.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    if mean <= 0.0 {
        return 1.0;
    }
    sample_variance(&values).sqrt() / mean
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_sample(cpu: f64, queue: usize, workers: u32) -> PerformanceSample {
        PerformanceSample {
            timestamp: 1000,
            success_rate: 0.95,
            avg_latency_seconds: 2.0,
            error_rate: 0.0,
            cpu_percent: cpu,
            memory_percent: 40.0,
            active_workers: workers,
            queue_depth: queue,
        }
    }

    fn kinds(patterns: &[PerformancePattern]) -> Vec<PatternKind> {
        patterns.iter().map(|p| p.kind).collect()
    }

    #[test]
    fn too_few_samples_detect_nothing() {
        let samples = vec![test_sample(90.0, 0, 10); 2];
        assert!(detect(&samples, 5, 20).is_empty());
    }

    #[test]
    fn quiet_host_with_idle_workers_is_low_activity() {
        let samples = vec![test_sample(12.0, 1, 30); 4];
        let patterns = detect(&samples, 20, 20);

        assert_eq!(kinds(&patterns), vec![PatternKind::LowActivity]);
        let p = &patterns[0];
        assert!((p.confidence - 0.6).abs() < 1e-9);
        assert_eq!(p.duration_secs, 80);
        assert_eq!(p.recommended_action, "scale_up_workers");
        assert_eq!(p.characteristics["avg_queue_length"], 1.0);
    }

    #[test]
    fn low_activity_needs_workers_above_min_plus_two() {
        let samples = vec![test_sample(12.0, 1, 22); 4];
        assert!(detect(&samples, 20, 20).is_empty());
    }

    #[test]
    fn hot_cpu_is_peak_load() {
        let samples = vec![test_sample(85.0, 40, 10); 5];
        let patterns = detect(&samples, 5, 20);

        assert_eq!(kinds(&patterns), vec![PatternKind::PeakLoad]);
        // (2/20 + 0.85 + 0) / 3
        assert!((patterns[0].confidence - 0.95 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn rising_latency_is_degrading() {
        let samples: Vec<_> = (0..6)
            .map(|i| PerformanceSample {
                avg_latency_seconds: 2.0 + 0.5 * i as f64,
                ..test_sample(50.0, 5, 10)
            })
            .collect();
        let patterns = detect(&samples, 5, 20);

        assert_eq!(kinds(&patterns), vec![PatternKind::Degrading]);
        assert!((patterns[0].confidence - 0.5).abs() < 1e-9);
        assert!((patterns[0].characteristics["response_time_trend"] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn flat_history_is_steady_state() {
        let samples = vec![test_sample(50.0, 5, 10); 12];
        let patterns = detect(&samples, 5, 20);

        assert_eq!(kinds(&patterns), vec![PatternKind::SteadyState]);
        assert_eq!(patterns[0].confidence, 1.0);
    }

    #[test]
    fn only_last_twenty_samples_count() {
        let mut samples: Vec<_> = (0..30)
            .map(|i| PerformanceSample {
                avg_latency_seconds: 30.0 - i as f64,
                ..test_sample(50.0, 5, 10)
            })
            .collect();
        for s in samples.iter_mut().skip(10) {
            s.avg_latency_seconds = 2.0;
        }
        let patterns = detect(&samples, 5, 20);
        assert_eq!(kinds(&patterns), vec![PatternKind::SteadyState]);
        assert_eq!(patterns[0].duration_secs, 400);
    }

    #[test]
    fn detection_is_deterministic() {
        let samples: Vec<_> = (0..15)
            .map(|i| PerformanceSample {
                cpu_percent: 20.0 + (i % 3) as f64,
                success_rate: 0.9 - 0.02 * i as f64,
                ..test_sample(0.0, 1, 30)
            })
            .collect();
        assert_eq!(detect(&samples, 20, 20), detect(&samples, 20, 20));
    }

    #[test]
    fn cv_of_non_positive_mean_is_one() {
        assert_eq!(coefficient_of_variation([0.0, 0.0].into_iter()), 1.0);
        assert_eq!(coefficient_of_variation(std::iter::empty()), 1.0);
        assert_eq!(coefficient_of_variation([3.0, 3.0, 3.0].into_iter()), 0.0);
    }
}
