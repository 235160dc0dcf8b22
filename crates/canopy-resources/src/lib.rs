//! canopy-resources: host resource monitoring.
//!
//! Samples memory, CPU and disk usage, classifies the host load level and
//! answers the two questions the scaling engine asks every tick: is it
//! safe to add workers, and must workers be shed right now.
//!
//! # Architecture
//!
//! ```text
//! ResourceMonitor
//!   ├── HostSampler (sysinfo, or a fixed reading in tests)
//!   │   └── probe() → HostReading        (blocking, run off the runtime)
//!   ├── ResourceSnapshot history (ring buffer, 100)
//!   ├── fallback counter
//!   └── optional Journal for resource snapshots
//! ```
//!
//! # Failure policy
//!
//! A failed probe never stops the control loop. `sample()` returns the
//! error so callers can see it; `sample_or_fallback()` logs it and hands
//! back `ResourceSnapshot::fallback`, a conservative mid-range reading.

pub mod monitor;
pub mod sampler;

pub use monitor::{ResourceMetric, ResourceMonitor, ResourceRecommendation, ResourceTrend, TrendDirection};
pub use sampler::{FixedSampler, HostReading, HostSampler, SysinfoSampler};
