//! canopy-metrics: performance collection and the metrics facade.
//!
//! `PerformanceCollector` turns the scheduler's task counters and recorded
//! task latencies into a `PerformanceSnapshot`. `MetricsFacade::tick`
//! samples the collector and the resource monitor exactly once per period,
//! derives every ratio in one place, and publishes the resulting
//! `MetricsTick` to all consumers.
//!
//! # Performance score
//!
//! ```text
//! score = 0.30 × success_rate
//!       + 0.25 × max(0, 1 - avg_latency / 30s)
//!       + 0.20 × efficiency              (mean of reported signals, 0 if none)
//!       + 0.15 × (1 - |avg_util - 0.75| / 0.75)
//!       + 0.10 × (1 - error_rate)
//! clamped to [0, 1]
//! ```

pub mod collector;
pub mod facade;
pub mod prometheus;

pub use collector::{performance_score, PerformanceCollector};
pub use facade::{MetricsFacade, MetricsTick};
pub use prometheus::render_prometheus;
