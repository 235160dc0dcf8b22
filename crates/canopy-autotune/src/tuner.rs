//! AutoTuner: turns detected patterns into parameter changes.
//!
//! Samples arrive from the published metrics ticks. Every optimization
//! interval the tuner detects patterns, derives one recommendation per
//! parameter, and commits the confident ones through the shared
//! `TuningHandle`. Each applied change is kept in a bounded history and
//! journaled.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use canopy_core::TunerSettings;
use canopy_metrics::{MetricsFacade, MetricsTick};
use canopy_state::{
    epoch_secs, Journal, JournalEntry, PatternKind, PerformancePattern, TuningChange,
    TuningHandle, TuningParameters, TuningPatch, TuningRecommendation,
};

use crate::patterns::{self, PerformanceSample};

const PATTERN_HISTORY: usize = 100;
const TUNING_HISTORY: usize = 1000;
/// Patterns below this confidence produce no recommendations.
const PATTERN_CONFIDENCE_FLOOR: f64 = 0.5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TunerStats {
    pub optimization_cycles: u64,
    pub successful_tunings: u64,
    pub failed_tunings: u64,
    pub patterns_detected: u64,
}

/// Outcome of one optimization cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TuningCycle {
    pub patterns: Vec<PerformancePattern>,
    pub recommendations: Vec<TuningRecommendation>,
    pub applied: Vec<TuningChange>,
}

pub struct AutoTuner {
    tuning: TuningHandle,
    settings: TunerSettings,
    samples: VecDeque<PerformanceSample>,
    pattern_history: VecDeque<(u64, PerformancePattern)>,
    tuning_history: VecDeque<TuningChange>,
    stats: TunerStats,
    journal: Option<Arc<Journal>>,
}

impl AutoTuner {
    pub fn new(tuning: TuningHandle, settings: TunerSettings) -> Self {
        Self {
            tuning,
            samples: VecDeque::with_capacity(settings.history_size.min(1024)),
            settings,
            pattern_history: VecDeque::new(),
            tuning_history: VecDeque::new(),
            stats: TunerStats::default(),
            journal: None,
        }
    }

    pub fn with_journal(mut self, journal: Arc<Journal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn stats(&self) -> TunerStats {
        self.stats
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Applied changes, oldest first.
    pub fn tuning_history(&self) -> impl Iterator<Item = &TuningChange> {
        self.tuning_history.iter()
    }

    pub fn pattern_history(&self) -> impl Iterator<Item = &(u64, PerformancePattern)> {
        self.pattern_history.iter()
    }

    /// Record one tick's sample.
    pub fn observe(&mut self, tick: &MetricsTick) {
        self.push_sample(PerformanceSample::from_tick(tick));
    }

    pub fn push_sample(&mut self, sample: PerformanceSample) {
        if self.samples.len() >= self.settings.history_size.max(1) {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Detect patterns in the retained samples and record them.
    pub fn detect_patterns(&mut self, params: &TuningParameters) -> Vec<PerformancePattern> {
        let samples = self.samples.make_contiguous();
        let detected = patterns::detect(samples, params.min_workers, params.monitoring_interval_secs);

        let now = epoch_secs();
        for pattern in &detected {
            if self.pattern_history.len() == PATTERN_HISTORY {
                self.pattern_history.pop_front();
            }
            self.pattern_history.push_back((now, pattern.clone()));
        }
        self.stats.patterns_detected += detected.len() as u64;
        detected
    }

    /// Recommendations for `patterns`, one per parameter, most confident first.
    pub fn recommendations(
        &self,
        params: &TuningParameters,
        patterns: &[PerformancePattern],
    ) -> Vec<TuningRecommendation> {
        let all = patterns
            .iter()
            .filter(|p| p.confidence >= PATTERN_CONFIDENCE_FLOOR)
            .flat_map(|p| pattern_recommendations(p, params, &self.settings))
            .collect();
        prioritize(all)
    }

    /// Detect and recommend without applying anything.
    pub async fn dry_run(&mut self) -> Vec<TuningRecommendation> {
        let params = self.tuning.current().await;
        let patterns = self.detect_patterns(&params);
        self.recommendations(&params, &patterns)
    }

    /// Commit every recommendation at or above the apply threshold.
    ///
    /// Each recommendation is clamped to its declared bounds and committed
    /// on its own, so one rejected change does not block the rest.
    pub async fn apply(&mut self, recommendations: &[TuningRecommendation]) -> Vec<TuningChange> {
        let mut applied = Vec::new();

        for rec in recommendations {
            if rec.confidence < self.settings.apply_threshold {
                continue;
            }
            let Some(spec) = TuningParameters::spec(&rec.parameter) else {
                warn!(parameter = %rec.parameter, "recommendation for unknown parameter");
                self.stats.failed_tunings += 1;
                continue;
            };

            let old_value = self
                .tuning
                .current()
                .await
                .get(&rec.parameter)
                .unwrap_or(rec.current_value);
            let new_value = spec.clamp(rec.recommended_value);
            let patch = TuningPatch::from([(rec.parameter.clone(), new_value)]);

            match self.tuning.validate_then_commit(&patch).await {
                Ok(committed) => {
                    let change = TuningChange {
                        timestamp: epoch_secs(),
                        parameter: rec.parameter.clone(),
                        old_value,
                        new_value,
                        confidence: rec.confidence,
                        reason: rec.reason.clone(),
                        version: committed.version,
                    };
                    info!(
                        parameter = %change.parameter,
                        old = old_value,
                        new = new_value,
                        confidence = rec.confidence,
                        reason = %rec.reason,
                        "applied tuning"
                    );
                    self.record_change(change.clone()).await;
                    self.stats.successful_tunings += 1;
                    applied.push(change);
                }
                Err(e) => {
                    warn!(parameter = %rec.parameter, value = new_value, error = %e, "tuning rejected");
                    self.stats.failed_tunings += 1;
                }
            }
        }
        applied
    }

    async fn record_change(&mut self, change: TuningChange) {
        if let Some(journal) = &self.journal
            && let Err(e) = journal.append(JournalEntry::TuningChange(change.clone())).await
        {
            warn!(error = %e, "failed to journal tuning change");
        }
        if self.tuning_history.len() == TUNING_HISTORY {
            self.tuning_history.pop_front();
        }
        self.tuning_history.push_back(change);
    }

    /// Detect, recommend and apply.
    pub async fn run_cycle(&mut self) -> TuningCycle {
        let params = self.tuning.current().await;
        let patterns = self.detect_patterns(&params);
        let recommendations = self.recommendations(&params, &patterns);
        let applied = self.apply(&recommendations).await;
        self.stats.optimization_cycles += 1;

        debug!(
            cycle = self.stats.optimization_cycles,
            samples = self.samples.len(),
            patterns = patterns.len(),
            recommendations = recommendations.len(),
            applied = applied.len(),
            "tuning cycle complete"
        );

        TuningCycle {
            patterns,
            recommendations,
            applied,
        }
    }

    /// Run the tuning loop: sample every published tick and optimize on
    /// a fixed interval.
    pub async fn run(mut self, facade: Arc<MetricsFacade>, mut shutdown: watch::Receiver<bool>) {
        let interval = Duration::from_secs(self.settings.optimization_interval_secs);
        let mut ticks = facade.subscribe();
        info!(interval_secs = interval.as_secs(), "auto-tuner started");

        let mut next_cycle = tokio::time::Instant::now() + interval;
        loop {
            tokio::select! {
                changed = ticks.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let tick = ticks.borrow_and_update().clone();
                    if let Some(tick) = tick {
                        self.observe(&tick);
                    }
                }
                _ = tokio::time::sleep_until(next_cycle) => {
                    self.run_cycle().await;
                    next_cycle = tokio::time::Instant::now() + interval;
                }
                _ = shutdown.changed() => {
                    info!(
                        cycles = self.stats.optimization_cycles,
                        applied = self.stats.successful_tunings,
                        "auto-tuner shutting down"
                    );
                    break;
                }
            }
        }
    }
}

fn recommendation(
    params: &TuningParameters,
    parameter: &str,
    recommended_value: f64,
    confidence: f64,
    reason: String,
    expected_improvement: &str,
) -> TuningRecommendation {
    TuningRecommendation {
        parameter: parameter.to_string(),
        current_value: params.get(parameter).unwrap_or_default(),
        recommended_value,
        confidence,
        reason,
        expected_improvement: expected_improvement.to_string(),
    }
}

/// Parameter changes suggested by one pattern.
pub fn pattern_recommendations(
    pattern: &PerformancePattern,
    params: &TuningParameters,
    settings: &TunerSettings,
) -> Vec<TuningRecommendation> {
    let c = pattern.confidence;
    let mut recs = Vec::new();

    match pattern.kind {
        PatternKind::PeakLoad => {
            if params.max_workers > 5 {
                recs.push(recommendation(
                    params,
                    "max_workers",
                    params.max_workers.saturating_sub(3).max(5) as f64,
                    c,
                    format!("Peak load detected - reducing workers (confidence: {c:.2})"),
                    "Reduced system stress and improved stability",
                ));
            }
            if params.page_timeout_ms < 45_000 {
                recs.push(recommendation(
                    params,
                    "page_timeout_ms",
                    (params.page_timeout_ms + 10_000).min(45_000) as f64,
                    c * 0.8,
                    "Peak load - increase timeout tolerance".to_string(),
                    "Reduced timeout errors",
                ));
            }
        }
        PatternKind::LowActivity => {
            let ceiling = settings.low_activity_worker_ceiling;
            if params.max_workers < ceiling {
                recs.push(recommendation(
                    params,
                    "max_workers",
                    (params.max_workers + 3).min(ceiling) as f64,
                    c,
                    format!("Low activity - scaling up to utilize resources (confidence: {c:.2})"),
                    "Increased throughput with available resources",
                ));
            }
            if params.page_timeout_ms > 20_000 {
                recs.push(recommendation(
                    params,
                    "page_timeout_ms",
                    params.page_timeout_ms.saturating_sub(5_000).max(20_000) as f64,
                    c * 0.7,
                    "Low activity - optimize for speed".to_string(),
                    "Faster response times",
                ));
            }
        }
        PatternKind::Degrading => {
            recs.push(recommendation(
                params,
                "memory_cleanup_interval",
                params.memory_cleanup_interval.saturating_sub(20).max(50) as f64,
                c,
                "Performance degradation - increase cleanup frequency".to_string(),
                "Better memory management",
            ));
            recs.push(recommendation(
                params,
                "gc_threshold",
                params.gc_threshold.saturating_sub(10).max(20) as f64,
                c * 0.8,
                "Performance degradation - more aggressive garbage collection".to_string(),
                "Reduced memory pressure",
            ));
        }
        PatternKind::SteadyState => {
            let latency_cv = pattern
                .characteristics
                .get("response_time_stability")
                .copied()
                .unwrap_or(1.0);
            if latency_cv < 0.1 {
                recs.push(recommendation(
                    params,
                    "scale_up_success_rate_threshold",
                    (params.scale_up_success_rate_threshold + 0.01).min(0.98),
                    c * 0.6,
                    "Steady high performance - optimize scaling threshold".to_string(),
                    "More precise scaling decisions",
                ));
            }
        }
    }
    recs
}

/// Keep the most confident recommendation per parameter, most confident
/// first. Ties keep the earlier one.
pub fn prioritize(recommendations: Vec<TuningRecommendation>) -> Vec<TuningRecommendation> {
    let mut best: BTreeMap<String, TuningRecommendation> = BTreeMap::new();
    for rec in recommendations {
        match best.get(&rec.parameter) {
            Some(existing) if existing.confidence >= rec.confidence => {}
            _ => {
                best.insert(rec.parameter.clone(), rec);
            }
        }
    }
    let mut out: Vec<_> = best.into_values().collect();
    out.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_params() -> TuningParameters {
        TuningParameters {
            min_workers: 5,
            max_workers: 20,
            ..TuningParameters::default()
        }
    }

    fn test_tuner() -> AutoTuner {
        AutoTuner::new(TuningHandle::new(test_params()).unwrap(), TunerSettings::default())
    }

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

    fn test_pattern(kind: PatternKind, confidence: f64) -> PerformancePattern {
        PerformancePattern {
            kind,
            confidence,
            duration_secs: 60,
            characteristics: BTreeMap::new(),
            recommended_action: String::new(),
        }
    }

    #[test]
    fn low_activity_grows_max_workers_by_three() {
        let tuner = test_tuner();
        let recs = tuner.recommendations(&test_params(), &[test_pattern(PatternKind::LowActivity, 0.8)]);

        let max = recs.iter().find(|r| r.parameter == "max_workers").unwrap();
        assert_eq!(max.current_value, 20.0);
        assert_eq!(max.recommended_value, 23.0);
        assert_eq!(max.confidence, 0.8);

        let timeout = recs.iter().find(|r| r.parameter == "page_timeout_ms").unwrap();
        assert_eq!(timeout.recommended_value, 25_000.0);
        assert!((timeout.confidence - 0.56).abs() < 1e-9);
    }

    #[test]
    fn low_activity_respects_ceiling() {
        let params = TuningParameters {
            max_workers: 24,
            ..test_params()
        };
        let recs = pattern_recommendations(
            &test_pattern(PatternKind::LowActivity, 0.9),
            &params,
            &TunerSettings::default(),
        );
        assert_eq!(recs[0].recommended_value, 25.0);

        let params = TuningParameters {
            max_workers: 200,
            ..test_params()
        };
        let recs = pattern_recommendations(
            &test_pattern(PatternKind::LowActivity, 0.9),
            &params,
            &TunerSettings::default(),
        );
        assert!(recs.iter().all(|r| r.parameter != "max_workers"));
    }

    #[test]
    fn peak_load_shrinks_workers_and_raises_timeout() {
        let recs = pattern_recommendations(
            &test_pattern(PatternKind::PeakLoad, 0.7),
            &test_params(),
            &TunerSettings::default(),
        );
        assert_eq!(recs[0].parameter, "max_workers");
        assert_eq!(recs[0].recommended_value, 17.0);
        assert_eq!(recs[1].parameter, "page_timeout_ms");
        assert_eq!(recs[1].recommended_value, 40_000.0);
    }

    #[test]
    fn low_confidence_patterns_are_ignored() {
        let tuner = test_tuner();
        let recs = tuner.recommendations(&test_params(), &[test_pattern(PatternKind::Degrading, 0.4)]);
        assert!(recs.is_empty());
    }

    #[test]
    fn prioritize_keeps_most_confident_per_parameter() {
        let tuner = test_tuner();
        let recs = tuner.recommendations(
            &test_params(),
            &[
                test_pattern(PatternKind::PeakLoad, 0.6),
                test_pattern(PatternKind::LowActivity, 0.9),
            ],
        );

        let max: Vec<_> = recs.iter().filter(|r| r.parameter == "max_workers").collect();
        assert_eq!(max.len(), 1);
        assert_eq!(max[0].recommended_value, 23.0);
        assert!(recs.windows(2).all(|w| w[0].confidence >= w[1].confidence));
    }

    #[tokio::test]
    async fn apply_skips_below_threshold() {
        let mut tuner = test_tuner();
        let recs = vec![recommendation(
            &test_params(),
            "gc_threshold",
            40.0,
            0.59,
            "test".to_string(),
            "",
        )];
        assert!(tuner.apply(&recs).await.is_empty());
        assert_eq!(tuner.tuning.current().await.gc_threshold, 50);
    }

    #[tokio::test]
    async fn apply_clamps_to_declared_bounds() {
        let mut tuner = test_tuner();
        let recs = vec![recommendation(
            &test_params(),
            "page_timeout_ms",
            500_000.0,
            0.9,
            "test".to_string(),
            "",
        )];
        let applied = tuner.apply(&recs).await;
        assert_eq!(applied[0].new_value, 120_000.0);
        assert_eq!(tuner.tuning.current().await.page_timeout_ms, 120_000);
    }

    #[tokio::test]
    async fn rejected_change_does_not_block_others() {
        let mut tuner = test_tuner();
        let recs = vec![
            // Would put max_workers below min_workers.
            recommendation(&test_params(), "max_workers", 2.0, 0.9, "shrink".to_string(), ""),
            recommendation(&test_params(), "gc_threshold", 40.0, 0.8, "gc".to_string(), ""),
        ];
        let applied = tuner.apply(&recs).await;

        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].parameter, "gc_threshold");
        assert_eq!(tuner.stats().failed_tunings, 1);
        assert_eq!(tuner.tuning.current().await.max_workers, 20);
    }

    #[tokio::test]
    async fn sample_history_is_bounded() {
        let settings = TunerSettings {
            history_size: 10,
            ..TunerSettings::default()
        };
        let mut tuner = AutoTuner::new(TuningHandle::new(test_params()).unwrap(), settings);
        for _ in 0..25 {
            tuner.push_sample(test_sample(50.0, 3, 10));
        }
        assert_eq!(tuner.sample_count(), 10);
    }

    #[tokio::test]
    async fn cycle_applies_low_activity_tuning() {
        let mut tuner = test_tuner();
        for _ in 0..4 {
            tuner.push_sample(test_sample(10.0, 1, 12));
        }
        let cycle = tuner.run_cycle().await;

        assert_eq!(cycle.patterns.len(), 1);
        assert_eq!(cycle.patterns[0].kind, PatternKind::LowActivity);
        assert!(cycle.applied.iter().any(|c| c.parameter == "max_workers" && c.new_value == 23.0));
        assert_eq!(tuner.tuning.current().await.max_workers, 23);
        assert_eq!(tuner.stats().optimization_cycles, 1);
        assert_eq!(tuner.pattern_history().count(), 1);
    }
}
