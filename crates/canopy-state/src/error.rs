//! Error types shared across the canopy crates.

use std::fmt;

use thiserror::Error;

/// Result type alias for canopy operations.
pub type CanopyResult<T> = Result<T, CanopyError>;

/// Errors that can occur anywhere in the scheduler.
#[derive(Debug, Error)]
pub enum CanopyError {
    /// A page fetch failed in a way that is worth retrying.
    #[error("transient fetch error: {0}")]
    TransientFetch(String),

    /// Retries are exhausted; the task is recorded failed.
    #[error("task {task_id} failed permanently after {attempts} attempts: {reason}")]
    PermanentTask {
        task_id: String,
        attempts: u32,
        reason: String,
    },

    /// A collector or monitor could not sample.
    #[error("metrics unavailable: {0}")]
    MetricsUnavailable(String),

    /// A configuration patch was rejected. Nothing was applied.
    #[error("configuration rejected: {}", join_violations(.0))]
    ConfigValidation(Vec<ConstraintViolation>),

    /// A resize request fell outside the configured worker bounds.
    #[error("requested worker ceiling {requested} outside [{min}, {max}]")]
    CapacityExceeded { requested: u32, min: u32, max: u32 },

    #[error("journal error: {0}")]
    Journal(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Failure to take a resource or performance sample.
///
/// Never fatal: callers substitute the snapshot type's `fallback()`.
#[derive(Debug, Error)]
pub enum SamplingError {
    #[error("host probe failed: {0}")]
    Probe(String),

    #[error("sample out of range: {field} = {value}")]
    OutOfRange { field: &'static str, value: f64 },

    #[error("collector unavailable: {0}")]
    Unavailable(String),
}

impl From<SamplingError> for CanopyError {
    fn from(e: SamplingError) -> Self {
        CanopyError::MetricsUnavailable(e.to_string())
    }
}

/// A single violated configuration constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintViolation {
    /// Parameter name, or the first parameter of a cross-field rule.
    pub key: String,
    pub message: String,
}

impl ConstraintViolation {
    pub fn new(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConstraintViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

fn join_violations(violations: &[ConstraintViolation]) -> String {
    violations
        .iter()
        .map(|v| v.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_validation_lists_every_violation() {
        let err = CanopyError::ConfigValidation(vec![
            ConstraintViolation::new("min_workers", "min_workers: value 0 below minimum 1"),
            ConstraintViolation::new("max_workers", "max_workers: value 5000 above maximum 1000"),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("min_workers: value 0 below minimum 1"));
        assert!(msg.contains("max_workers: value 5000 above maximum 1000"));
    }

    #[test]
    fn sampling_error_maps_to_metrics_unavailable() {
        let err: CanopyError = SamplingError::Probe("no /proc".into()).into();
        assert!(matches!(err, CanopyError::MetricsUnavailable(_)));
    }
}
