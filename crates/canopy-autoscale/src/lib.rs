//! canopy-autoscale: worker-count scaling decisions.
//!
//! `ScalingEngine` reads one `MetricsTick` per period plus a trend analysis
//! over its own performance history, and emits a `ScalingDecision`. Applied
//! decisions resize the worker pool through a callback.
//!
//! # Decision policy
//!
//! ```text
//! if now - last_scaling_time < cooldown:
//!     NoChange (confidence 1.0)                 // the only hard veto
//!
//! if resources.requires_scale_down():
//!     ScaleDown to max(min, current - max_scale_down_per_interval)
//!     (confidence 1.0, safety_override)
//!
//! votes:  success_rate  >= up_thr  → up     <= down_thr → down
//!         avg_latency   <= up_rt   → up     >= down_rt  → down
//!         safe && capacity > 0.3   → up     capacity < 0.2 → down
//!         trend scale_up/down with confidence > 0.6
//!
//! up > down && up >= 2     → ScaleUp   to min(max, current + up_inc)
//! down > up && down >= 2   → ScaleDown to max(min, current - down_inc)
//! otherwise                → NoChange (confidence 0.8)
//! confidence = min(1, votes / 4)
//! ```

pub mod engine;
pub mod trend;

pub use engine::{pool_scale_fn, ScaleCallback, ScaleFuture, ScalingEngine, ScalingStats};
pub use trend::{analyze, linear_slope, sample_variance, TrendAnalysis, TrendDirection, TrendRecommendation};
