//! canopy-autotune: pattern-driven tuning of the scaling parameters.
//!
//! The tuner keeps its own bounded sample history, fed from the same
//! metrics ticks the scaling engine reads, and periodically looks at the
//! last 20 samples for four load shapes:
//!
//! ```text
//! peak_load     avg latency > 10s | avg cpu > 70% | avg errors > 0.1   (last 5)
//! low_activity  avg cpu < 30% & avg queue < 2 & avg workers > min + 2  (last 5)
//! degrading     latency slope > 0.1 | success slope < -0.01            (>= 5 samples)
//! steady_state  cv(latency) < 0.2 & cv(success) < 0.1 & cv(cpu) < 0.3 (>= 10 samples)
//! ```
//!
//! Patterns under 0.5 confidence are dropped. The rest map to parameter
//! recommendations, de-duplicated per parameter, and those at or above the
//! apply threshold are committed through `TuningHandle::validate_then_commit`.

pub mod patterns;
pub mod tuner;

pub use patterns::{detect, PerformanceSample, PATTERN_WINDOW};
pub use tuner::{pattern_recommendations, prioritize, AutoTuner, TunerStats, TuningCycle};
