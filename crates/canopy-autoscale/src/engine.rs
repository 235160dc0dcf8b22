//! Scaling engine: cooldown-gated, multi-signal worker scaling.
//!
//! Each tick reads the shared `TuningParameters`, folds the tick's
//! performance snapshot into a bounded history, and decides. Applying a
//! decision goes through a callback so the engine never owns the pool.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use canopy_metrics::{MetricsFacade, MetricsTick};
use canopy_pool::{SchedulerState, WorkerBounds};
use canopy_state::{
    epoch_secs, Journal, JournalEntry, PerformanceSnapshot, ScalingAction, ScalingDecision,
    TuningHandle, TuningParameters,
};

use crate::trend::{self, TrendAnalysis, TrendRecommendation};

const DECISION_HISTORY: usize = 50;
const PERFORMANCE_HISTORY: usize = 100;
const TREND_VOTE_CONFIDENCE: f64 = 0.6;
const CAPACITY_UP: f64 = 0.3;
const CAPACITY_DOWN: f64 = 0.2;

/// Callback type for applying a scaling decision.
///
/// The engine calls this with the bounds it validated against and the
/// new worker ceiling.
pub type ScaleCallback = Box<dyn Fn(WorkerBounds, u32) -> ScaleFuture + Send + Sync>;

pub type ScaleFuture = std::pin::Pin<
    Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>,
>;

/// A callback that syncs the pool's bounds and resizes it.
pub fn pool_scale_fn(state: Arc<SchedulerState>) -> ScaleCallback {
    Box::new(move |bounds: WorkerBounds, target: u32| -> ScaleFuture {
        let state = state.clone();
        Box::pin(async move {
            state.workers().set_bounds(bounds).await?;
            state.workers().resize(target).await?;
            Ok(())
        })
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScalingStats {
    pub total_decisions: u64,
    pub scale_ups: u64,
    pub scale_downs: u64,
    pub emergency_overrides: u64,
    /// Decisions that failed re-validation or whose callback errored.
    pub rejected: u64,
}

pub struct ScalingEngine {
    tuning: TuningHandle,
    target_workers: u32,
    last_scaling_time: Option<u64>,
    performance_history: VecDeque<PerformanceSnapshot>,
    decisions: VecDeque<ScalingDecision>,
    stats: ScalingStats,
    scale_fn: Option<ScaleCallback>,
    journal: Option<Arc<Journal>>,
}

impl ScalingEngine {
    pub fn new(tuning: TuningHandle, initial_workers: u32) -> Self {
        Self {
            tuning,
            target_workers: initial_workers,
            last_scaling_time: None,
            performance_history: VecDeque::with_capacity(PERFORMANCE_HISTORY),
            decisions: VecDeque::with_capacity(DECISION_HISTORY),
            stats: ScalingStats::default(),
            scale_fn: None,
            journal: None,
        }
    }

    /// Set the callback used to apply decisions.
    pub fn with_scale_fn(mut self, f: ScaleCallback) -> Self {
        self.scale_fn = Some(f);
        self
    }

    pub fn with_journal(mut self, journal: Arc<Journal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn target_workers(&self) -> u32 {
        self.target_workers
    }

    pub fn last_scaling_time(&self) -> Option<u64> {
        self.last_scaling_time
    }

    /// Most recent decisions, oldest first.
    pub fn decision_history(&self) -> impl Iterator<Item = &ScalingDecision> {
        self.decisions.iter()
    }

    pub fn stats(&self) -> ScalingStats {
        self.stats
    }

    /// Trend over the configured window of retained snapshots.
    pub fn trend_analysis(&self, params: &TuningParameters, now: u64) -> TrendAnalysis {
        trend::analyze(&self.performance_history, params.trend_window_secs(), now)
    }

    /// Pure decision for `tick` at `now`. Does not touch engine state.
    pub fn decide(
        &self,
        params: &TuningParameters,
        tick: &MetricsTick,
        trend: &TrendAnalysis,
        now: u64,
    ) -> ScalingDecision {
        let current = self.target_workers;

        if let Some(last) = self.last_scaling_time {
            let elapsed = now.saturating_sub(last);
            if elapsed < params.scaling_cooldown_secs {
                return ScalingDecision::no_change(
                    now,
                    current,
                    1.0,
                    format!(
                        "Cooldown period active ({}s remaining)",
                        params.scaling_cooldown_secs - elapsed
                    ),
                );
            }
        }

        if tick.resources.requires_scale_down() {
            return ScalingDecision {
                timestamp: now,
                action: ScalingAction::ScaleDown,
                current_workers: current,
                // Never above current, even when current is below min_workers.
                target_workers: current
                    .saturating_sub(params.max_scale_down_per_interval)
                    .max(params.min_workers)
                    .min(current),
                confidence: 1.0,
                reasoning: "Emergency scale down due to resource pressure".to_string(),
                safety_override: true,
            };
        }

        // Tuning may have moved the bounds past the current target.
        if current > params.max_workers || current < params.min_workers {
            let target = current.clamp(params.min_workers, params.max_workers);
            let action = if target < current {
                ScalingAction::ScaleDown
            } else {
                ScalingAction::ScaleUp
            };
            return ScalingDecision {
                timestamp: now,
                action,
                current_workers: current,
                target_workers: target,
                confidence: 1.0,
                reasoning: format!(
                    "Worker target {current} outside tuned bounds [{}, {}]",
                    params.min_workers, params.max_workers
                ),
                safety_override: false,
            };
        }

        let perf = &tick.performance;
        let mut up = 0u32;
        let mut down = 0u32;
        let mut reasons = Vec::new();

        if perf.success_rate >= params.scale_up_success_rate_threshold {
            up += 1;
            reasons.push(format!("High success rate ({:.2})", perf.success_rate));
        } else if perf.success_rate <= params.scale_down_success_rate_threshold {
            down += 1;
            reasons.push(format!("Low success rate ({:.2})", perf.success_rate));
        }

        if perf.avg_latency_seconds <= params.scale_up_response_time_threshold {
            up += 1;
            reasons.push(format!("Fast response time ({:.1}s)", perf.avg_latency_seconds));
        } else if perf.avg_latency_seconds >= params.scale_down_response_time_threshold {
            down += 1;
            reasons.push(format!("Slow response time ({:.1}s)", perf.avg_latency_seconds));
        }

        let capacity = tick.scaling_capacity;
        if tick.resources.is_safe_to_scale_up() && capacity > CAPACITY_UP {
            up += 1;
            reasons.push(format!("Resources available ({:.1}%)", capacity * 100.0));
        } else if capacity < CAPACITY_DOWN {
            down += 1;
            reasons.push(format!("Low resource availability ({:.1}%)", capacity * 100.0));
        }

        if trend.confidence > TREND_VOTE_CONFIDENCE {
            match trend.recommendation {
                TrendRecommendation::ScaleUp => {
                    up += 1;
                    reasons.push(format!("Positive performance trend ({:?})", trend.direction));
                }
                TrendRecommendation::ScaleDown => {
                    down += 1;
                    reasons.push(format!("Negative performance trend ({:?})", trend.direction));
                }
                _ => {}
            }
        }

        let (action, target, votes) = if up > down && up >= 2 {
            (
                ScalingAction::ScaleUp,
                current.saturating_add(params.scale_up_increment).min(params.max_workers),
                up,
            )
        } else if down > up && down >= 2 {
            (
                ScalingAction::ScaleDown,
                current.saturating_sub(params.scale_down_increment).max(params.min_workers),
                down,
            )
        } else {
            reasons.push("Balanced signals - maintaining current level".to_string());
            return ScalingDecision::no_change(now, current, 0.8, reasons.join("; "));
        };

        if target == current {
            reasons.push("Already at worker limit".to_string());
            return ScalingDecision::no_change(now, current, 0.8, reasons.join("; "));
        }

        ScalingDecision {
            timestamp: now,
            action,
            current_workers: current,
            target_workers: target,
            confidence: (votes as f64 / 4.0).min(1.0),
            reasoning: reasons.join("; "),
            safety_override: false,
        }
    }

    /// Record `tick` and decide, without applying.
    pub async fn evaluate(&mut self, tick: &MetricsTick) -> ScalingDecision {
        self.evaluate_at(tick, epoch_secs()).await
    }

    pub async fn evaluate_at(&mut self, tick: &MetricsTick, now: u64) -> ScalingDecision {
        let params = self.tuning.current().await;

        if self.performance_history.len() == PERFORMANCE_HISTORY {
            self.performance_history.pop_front();
        }
        self.performance_history.push_back(tick.performance.clone());

        let trend = self.trend_analysis(&params, now);
        let decision = self.decide(&params, tick, &trend, now);

        self.stats.total_decisions += 1;
        if decision.safety_override {
            self.stats.emergency_overrides += 1;
        }
        if self.decisions.len() == DECISION_HISTORY {
            self.decisions.pop_front();
        }
        self.decisions.push_back(decision.clone());

        debug!(
            action = ?decision.action,
            current = decision.current_workers,
            target = decision.target_workers,
            confidence = decision.confidence,
            trend = ?trend.direction,
            reasoning = %decision.reasoning,
            "scaling decision"
        );

        if let Some(journal) = &self.journal
            && let Err(e) = journal.append(JournalEntry::ScalingDecision(decision.clone())).await
        {
            warn!(error = %e, "failed to journal scaling decision");
        }

        decision
    }

    /// Apply a decision. The target is re-validated against the current
    /// bounds first. Returns true if the target changed.
    pub async fn execute(&mut self, decision: &ScalingDecision) -> bool {
        if !decision.is_change() {
            return false;
        }

        let params = self.tuning.current().await;
        let bounds = WorkerBounds {
            min: params.min_workers,
            max: params.max_workers,
        };
        let target = decision.target_workers;
        if !bounds.contains(target) {
            warn!(target, min = bounds.min, max = bounds.max, "scaling target outside bounds, skipping");
            self.stats.rejected += 1;
            return false;
        }

        if let Some(ref scale_fn) = self.scale_fn
            && let Err(e) = scale_fn(bounds, target).await
        {
            warn!(target, error = %e, "scaling action failed");
            self.stats.rejected += 1;
            return false;
        }

        let previous = self.target_workers;
        self.target_workers = target;
        self.last_scaling_time = Some(decision.timestamp);
        match decision.action {
            ScalingAction::ScaleUp => self.stats.scale_ups += 1,
            ScalingAction::ScaleDown => self.stats.scale_downs += 1,
            ScalingAction::NoChange => {}
        }

        info!(
            from = previous,
            to = target,
            confidence = decision.confidence,
            safety_override = decision.safety_override,
            "scaled workers"
        );
        true
    }

    /// Evaluate `tick` and apply the result.
    pub async fn step(&mut self, tick: &MetricsTick) -> ScalingDecision {
        self.step_at(tick, epoch_secs()).await
    }

    pub async fn step_at(&mut self, tick: &MetricsTick, now: u64) -> ScalingDecision {
        let decision = self.evaluate_at(tick, now).await;
        self.execute(&decision).await;
        decision
    }

    /// Run the scaling loop. Each period takes one facade tick; the period
    /// is re-read from the tuning parameters so tuning can change it.
    pub async fn run(mut self, facade: Arc<MetricsFacade>, mut shutdown: watch::Receiver<bool>) {
        info!(initial_workers = self.target_workers, "scaling engine started");

        loop {
            let interval = self.tuning.current().await.monitoring_interval();
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let tick = facade.tick().await;
                    self.step(&tick).await;
                }
                _ = shutdown.changed() => {
                    info!(
                        decisions = self.stats.total_decisions,
                        scale_ups = self.stats.scale_ups,
                        scale_downs = self.stats.scale_downs,
                        "scaling engine shutting down"
                    );
                    break;
                }
            }
        }
    }
}
