//! canopy-state: shared state for the canopy crawl scheduler.
//!
//! Holds the immutable records exchanged between subsystems
//! (`PerformanceSnapshot`, `ResourceSnapshot`, `ScalingDecision`,
//! `PerformancePattern`), the one mutable configuration object
//! (`TuningParameters`, behind a `TuningHandle`), the error taxonomy, and
//! the append-only JSONL journal.
//!
//! # Architecture
//!
//! ```text
//!   PerformanceCollector ─┐
//!                         ├─► MetricsTick ─► ScalingEngine ─► ScalingDecision ─► Journal
//!   ResourceMonitor ──────┘         │               ▲
//!                                   ▼               │ reads every tick
//!                               AutoTuner ──► TuningHandle (validate_then_commit)
//! ```
//!
//! Snapshots and decisions are plain values: once built they are never
//! mutated and can be shared freely across tasks.

pub mod error;
pub mod journal;
pub mod tuning;
pub mod types;

pub use error::{CanopyError, CanopyResult, ConstraintViolation, SamplingError};
pub use journal::{Journal, JournalEntry, JournalRecord};
pub use tuning::{ParamKind, ParamSpec, TuningHandle, TuningParameters, TuningPatch};
pub use types::*;
