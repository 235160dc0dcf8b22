//! Tuning parameters: the single mutable configuration object.
//!
//! The scaling engine reads a copy every tick; the auto-tuner and the
//! configuration layer change it only through
//! [`TuningHandle::validate_then_commit`], which checks the whole patch
//! against per-field bounds and cross-field rules before swapping anything
//! in. A rejected patch leaves the current parameters and version intact.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{CanopyError, CanopyResult, ConstraintViolation};

/// A batch of named parameter updates.
pub type TuningPatch = BTreeMap<String, f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Integer,
    Float,
}

/// Declared type and inclusive bounds of a parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub min: f64,
    pub max: f64,
}

impl ParamSpec {
    const fn int(name: &'static str, min: f64, max: f64) -> Self {
        Self { name, kind: ParamKind::Integer, min, max }
    }

    const fn float(name: &'static str, min: f64, max: f64) -> Self {
        Self { name, kind: ParamKind::Float, min, max }
    }

    /// Clamp into bounds, rounding integers.
    pub fn clamp(&self, value: f64) -> f64 {
        let v = value.clamp(self.min, self.max);
        match self.kind {
            ParamKind::Integer => v.round(),
            ParamKind::Float => v,
        }
    }

    fn check(&self, value: f64) -> Option<ConstraintViolation> {
        let key = self.name;
        if !value.is_finite() {
            return Some(ConstraintViolation::new(key, format!("{key}: value is not a finite number")));
        }
        if self.kind == ParamKind::Integer && value.fract() != 0.0 {
            return Some(ConstraintViolation::new(key, format!("{key}: expected an integer, got {value}")));
        }
        if value < self.min {
            return Some(ConstraintViolation::new(
                key,
                format!("{key}: value {value} below minimum {}", self.min),
            ));
        }
        if value > self.max {
            return Some(ConstraintViolation::new(
                key,
                format!("{key}: value {value} above maximum {}", self.max),
            ));
        }
        None
    }
}

/// Every tunable parameter with its bounds.
pub const PARAMS: &[ParamSpec] = &[
    ParamSpec::int("min_workers", 1.0, 1000.0),
    ParamSpec::int("max_workers", 1.0, 1000.0),
    ParamSpec::float("scale_up_success_rate_threshold", 0.0, 1.0),
    ParamSpec::float("scale_down_success_rate_threshold", 0.0, 1.0),
    ParamSpec::float("scale_up_response_time_threshold", 0.1, 120.0),
    ParamSpec::float("scale_down_response_time_threshold", 0.1, 120.0),
    ParamSpec::int("scale_up_increment", 1.0, 50.0),
    ParamSpec::int("scale_down_increment", 1.0, 50.0),
    ParamSpec::int("max_scale_down_per_interval", 1.0, 50.0),
    ParamSpec::int("scaling_cooldown_secs", 0.0, 3600.0),
    ParamSpec::int("monitoring_interval_secs", 1.0, 3600.0),
    ParamSpec::int("trend_window_minutes", 1.0, 240.0),
    ParamSpec::int("page_timeout_ms", 5000.0, 120_000.0),
    ParamSpec::int("memory_cleanup_interval", 10.0, 10_000.0),
    ParamSpec::int("gc_threshold", 5.0, 1000.0),
];

/// Worker bounds, scaling thresholds and runtime knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningParameters {
    /// Bumped on every successful commit.
    pub version: u64,
    pub min_workers: u32,
    pub max_workers: u32,
    pub scale_up_success_rate_threshold: f64,
    pub scale_down_success_rate_threshold: f64,
    /// Seconds.
    pub scale_up_response_time_threshold: f64,
    /// Seconds.
    pub scale_down_response_time_threshold: f64,
    pub scale_up_increment: u32,
    pub scale_down_increment: u32,
    /// Step used by emergency scale-downs.
    pub max_scale_down_per_interval: u32,
    pub scaling_cooldown_secs: u64,
    pub monitoring_interval_secs: u64,
    pub trend_window_minutes: u64,
    pub page_timeout_ms: u64,
    pub memory_cleanup_interval: u64,
    pub gc_threshold: u64,
}

impl Default for TuningParameters {
    fn default() -> Self {
        Self {
            version: 0,
            min_workers: 20,
            max_workers: 200,
            scale_up_success_rate_threshold: 0.90,
            scale_down_success_rate_threshold: 0.80,
            scale_up_response_time_threshold: 1.5,
            scale_down_response_time_threshold: 6.0,
            scale_up_increment: 10,
            scale_down_increment: 5,
            max_scale_down_per_interval: 5,
            scaling_cooldown_secs: 45,
            monitoring_interval_secs: 20,
            trend_window_minutes: 15,
            page_timeout_ms: 30_000,
            memory_cleanup_interval: 100,
            gc_threshold: 50,
        }
    }
}

impl TuningParameters {
    /// Look up the declared bounds for a parameter.
    pub fn spec(name: &str) -> Option<&'static ParamSpec> {
        PARAMS.iter().find(|p| p.name == name)
    }

    /// Read a parameter by name.
    pub fn get(&self, name: &str) -> Option<f64> {
        let v = match name {
            "min_workers" => self.min_workers as f64,
            "max_workers" => self.max_workers as f64,
            "scale_up_success_rate_threshold" => self.scale_up_success_rate_threshold,
            "scale_down_success_rate_threshold" => self.scale_down_success_rate_threshold,
            "scale_up_response_time_threshold" => self.scale_up_response_time_threshold,
            "scale_down_response_time_threshold" => self.scale_down_response_time_threshold,
            "scale_up_increment" => self.scale_up_increment as f64,
            "scale_down_increment" => self.scale_down_increment as f64,
            "max_scale_down_per_interval" => self.max_scale_down_per_interval as f64,
            "scaling_cooldown_secs" => self.scaling_cooldown_secs as f64,
            "monitoring_interval_secs" => self.monitoring_interval_secs as f64,
            "trend_window_minutes" => self.trend_window_minutes as f64,
            "page_timeout_ms" => self.page_timeout_ms as f64,
            "memory_cleanup_interval" => self.memory_cleanup_interval as f64,
            "gc_threshold" => self.gc_threshold as f64,
            _ => return None,
        };
        Some(v)
    }

    // Callers have already checked kind and bounds.
    fn set(&mut self, name: &str, value: f64) {
        match name {
            "min_workers" => self.min_workers = value as u32,
            "max_workers" => self.max_workers = value as u32,
            "scale_up_success_rate_threshold" => self.scale_up_success_rate_threshold = value,
            "scale_down_success_rate_threshold" => self.scale_down_success_rate_threshold = value,
            "scale_up_response_time_threshold" => self.scale_up_response_time_threshold = value,
            "scale_down_response_time_threshold" => self.scale_down_response_time_threshold = value,
            "scale_up_increment" => self.scale_up_increment = value as u32,
            "scale_down_increment" => self.scale_down_increment = value as u32,
            "max_scale_down_per_interval" => self.max_scale_down_per_interval = value as u32,
            "scaling_cooldown_secs" => self.scaling_cooldown_secs = value as u64,
            "monitoring_interval_secs" => self.monitoring_interval_secs = value as u64,
            "trend_window_minutes" => self.trend_window_minutes = value as u64,
            "page_timeout_ms" => self.page_timeout_ms = value as u64,
            "memory_cleanup_interval" => self.memory_cleanup_interval = value as u64,
            "gc_threshold" => self.gc_threshold = value as u64,
            _ => {}
        }
    }

    /// Check every field bound and cross-field rule.
    pub fn validate(&self) -> Vec<ConstraintViolation> {
        let mut violations: Vec<ConstraintViolation> = PARAMS
            .iter()
            .filter_map(|spec| self.get(spec.name).and_then(|v| spec.check(v)))
            .collect();

        if self.min_workers > self.max_workers {
            violations.push(ConstraintViolation::new(
                "min_workers",
                "min_workers must not exceed max_workers",
            ));
        }
        if self.scale_up_success_rate_threshold <= self.scale_down_success_rate_threshold {
            violations.push(ConstraintViolation::new(
                "scale_up_success_rate_threshold",
                "scale_up_success_rate_threshold must be greater than scale_down_success_rate_threshold",
            ));
        }
        if self.scale_up_response_time_threshold >= self.scale_down_response_time_threshold {
            violations.push(ConstraintViolation::new(
                "scale_up_response_time_threshold",
                "scale_up_response_time_threshold must be less than scale_down_response_time_threshold",
            ));
        }
        violations
    }

    /// Validate `self` as a whole.
    pub fn validated(self) -> CanopyResult<Self> {
        let violations = self.validate();
        if violations.is_empty() {
            Ok(self)
        } else {
            Err(CanopyError::ConfigValidation(violations))
        }
    }

    /// Produce the parameters that would result from `patch`.
    ///
    /// The candidate carries the next version. Any violation rejects the
    /// whole patch.
    pub fn with_patch(&self, patch: &TuningPatch) -> CanopyResult<Self> {
        let mut candidate = self.clone();
        let mut violations = Vec::new();

        for (key, &value) in patch {
            match Self::spec(key) {
                None => violations.push(ConstraintViolation::new(
                    key.as_str(),
                    format!("{key}: unknown parameter"),
                )),
                Some(spec) => match spec.check(value) {
                    Some(v) => violations.push(v),
                    None => candidate.set(key, value),
                },
            }
        }

        if violations.is_empty() {
            violations = candidate.validate();
        }
        if !violations.is_empty() {
            return Err(CanopyError::ConfigValidation(violations));
        }

        candidate.version = self.version + 1;
        Ok(candidate)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.scaling_cooldown_secs)
    }

    pub fn monitoring_interval(&self) -> Duration {
        Duration::from_secs(self.monitoring_interval_secs)
    }

    pub fn trend_window_secs(&self) -> u64 {
        self.trend_window_minutes * 60
    }
}

/// Shared, lock-guarded `TuningParameters`.
///
/// Cloning the handle shares the same parameters.
#[derive(Debug, Clone)]
pub struct TuningHandle {
    inner: Arc<RwLock<TuningParameters>>,
}

impl TuningHandle {
    /// Wrap validated parameters.
    pub fn new(params: TuningParameters) -> CanopyResult<Self> {
        Ok(Self {
            inner: Arc::new(RwLock::new(params.validated()?)),
        })
    }

    /// Copy of the current parameters.
    pub async fn current(&self) -> TuningParameters {
        self.inner.read().await.clone()
    }

    pub async fn version(&self) -> u64 {
        self.inner.read().await.version
    }

    /// Validate `patch` against the current parameters and swap in the
    /// result. Returns the committed parameters.
    pub async fn validate_then_commit(&self, patch: &TuningPatch) -> CanopyResult<TuningParameters> {
        let mut params = self.inner.write().await;
        match params.with_patch(patch) {
            Ok(next) => {
                debug!(
                    version = next.version,
                    keys = patch.len(),
                    "tuning parameters committed"
                );
                *params = next.clone();
                Ok(next)
            }
            Err(e) => {
                warn!(error = %e, "tuning patch rejected");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patch(entries: &[(&str, f64)]) -> TuningPatch {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn defaults_are_valid() {
        assert!(TuningParameters::default().validate().is_empty());
    }

    #[test]
    fn every_declared_param_is_readable() {
        let params = TuningParameters::default();
        for spec in PARAMS {
            assert!(params.get(spec.name).is_some(), "missing getter for {}", spec.name);
        }
    }

    #[test]
    fn patch_applies_and_bumps_version() {
        let params = TuningParameters::default();
        let next = params
            .with_patch(&patch(&[("max_workers", 150.0), ("scale_up_increment", 8.0)]))
            .unwrap();
        assert_eq!(next.max_workers, 150);
        assert_eq!(next.scale_up_increment, 8);
        assert_eq!(next.version, 1);
    }

    #[test]
    fn out_of_range_rejects_whole_batch() {
        let params = TuningParameters::default();
        let err = params
            .with_patch(&patch(&[("max_workers", 150.0), ("min_workers", 0.0)]))
            .unwrap_err();
        match err {
            CanopyError::ConfigValidation(v) => {
                assert_eq!(v.len(), 1);
                assert_eq!(v[0].message, "min_workers: value 0 below minimum 1");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn cross_field_rule_enforced() {
        let params = TuningParameters::default();
        let err = params
            .with_patch(&patch(&[("scale_down_success_rate_threshold", 0.95)]))
            .unwrap_err();
        assert!(err
            .to_string()
            .contains("scale_up_success_rate_threshold must be greater than scale_down_success_rate_threshold"));
    }

    #[test]
    fn integer_params_reject_fractions() {
        let params = TuningParameters::default();
        assert!(params.with_patch(&patch(&[("scale_up_increment", 2.5)])).is_err());
    }

    #[test]
    fn unknown_key_rejected() {
        let params = TuningParameters::default();
        assert!(params.with_patch(&patch(&[("browser_flavour", 1.0)])).is_err());
    }

    #[test]
    fn clamp_respects_kind() {
        let spec = TuningParameters::spec("max_workers").unwrap();
        assert_eq!(spec.clamp(2000.0), 1000.0);
        assert_eq!(spec.clamp(12.6), 13.0);
    }

    #[tokio::test]
    async fn rejected_commit_leaves_state_untouched() {
        let handle = TuningHandle::new(TuningParameters::default()).unwrap();
        let before = handle.current().await;

        let result = handle
            .validate_then_commit(&patch(&[("max_workers", 120.0), ("min_workers", 500.0)]))
            .await;
        assert!(result.is_err());
        assert_eq!(handle.current().await, before);
        assert_eq!(handle.version().await, 0);
    }

    #[tokio::test]
    async fn clones_share_parameters() {
        let handle = TuningHandle::new(TuningParameters::default()).unwrap();
        let other = handle.clone();
        other
            .validate_then_commit(&patch(&[("scaling_cooldown_secs", 10.0)]))
            .await
            .unwrap();
        assert_eq!(handle.current().await.scaling_cooldown_secs, 10);
        assert_eq!(handle.version().await, 1);
    }
}
