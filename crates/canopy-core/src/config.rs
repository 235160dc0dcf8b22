//! canopy.toml configuration parser.
//!
//! Every field is optional. Missing values fall back to the defaults of the
//! resolved settings types, environment variables prefixed `CANOPY_` are
//! layered on top, and scaling values are funnelled through
//! `TuningParameters::with_patch` so a config file can never produce
//! parameters the runtime would reject.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::debug;

use canopy_state::{CanopyError, CanopyResult, ConstraintViolation, TuningParameters, TuningPatch};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CanopyConfig {
    pub crawl: Option<CrawlConfig>,
    pub retry: Option<RetryConfig>,
    pub scaling: Option<ScalingConfig>,
    pub tuning: Option<TuningConfig>,
    pub journal: Option<JournalConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlConfig {
    pub root: Option<String>,
    pub initial_workers: Option<u32>,
    pub idle_timeout_secs: Option<u64>,
    pub max_idle_timeouts: Option<u32>,
    pub worker_startup_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: Option<u32>,
    pub base_delay_secs: Option<f64>,
    pub multiplier: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScalingConfig {
    pub min_workers: Option<u32>,
    pub max_workers: Option<u32>,
    pub scale_up_success_rate_threshold: Option<f64>,
    pub scale_down_success_rate_threshold: Option<f64>,
    pub scale_up_response_time_threshold: Option<f64>,
    pub scale_down_response_time_threshold: Option<f64>,
    pub scale_up_increment: Option<u32>,
    pub scale_down_increment: Option<u32>,
    pub max_scale_down_per_interval: Option<u32>,
    pub scaling_cooldown_secs: Option<u64>,
    pub monitoring_interval_secs: Option<u64>,
    pub trend_window_minutes: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TuningConfig {
    pub optimization_interval_secs: Option<u64>,
    pub page_timeout_ms: Option<u64>,
    pub memory_cleanup_interval: Option<u64>,
    pub gc_threshold: Option<u64>,
    pub apply_threshold: Option<f64>,
    pub history_size: Option<usize>,
    pub low_activity_worker_ceiling: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JournalConfig {
    pub path: Option<PathBuf>,
}

// ── Resolved settings ─────────────────────────────────────────────

/// Largest accepted retry base delay: one day.
const MAX_RETRY_DELAY_SECS: f64 = 86_400.0;

fn reject(violations: Vec<ConstraintViolation>) -> CanopyResult<()> {
    if violations.is_empty() {
        Ok(())
    } else {
        Err(CanopyError::ConfigValidation(violations))
    }
}

/// Worker routine settings with defaults applied.
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlSettings {
    pub root: Option<String>,
    pub initial_workers: u32,
    pub idle_timeout_secs: u64,
    pub max_idle_timeouts: u32,
    pub worker_startup_delay_ms: u64,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            root: None,
            initial_workers: 50,
            idle_timeout_secs: 5,
            max_idle_timeouts: 3,
            worker_startup_delay_ms: 10,
        }
    }
}

/// Retry/backoff settings with defaults applied.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_secs: f64,
    pub multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_secs: 1.0,
            multiplier: 2.0,
        }
    }
}

/// Auto-tuner settings with defaults applied.
#[derive(Debug, Clone, PartialEq)]
pub struct TunerSettings {
    pub optimization_interval_secs: u64,
    pub apply_threshold: f64,
    pub history_size: usize,
    pub low_activity_worker_ceiling: u32,
}

impl Default for TunerSettings {
    fn default() -> Self {
        Self {
            optimization_interval_secs: 180,
            apply_threshold: 0.6,
            history_size: 1000,
            low_activity_worker_ceiling: 25,
        }
    }
}

impl CanopyConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: CanopyConfig = toml::from_str(&content)?;
        debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Layer `CANOPY_*` variables from the process environment.
    pub fn apply_env(&mut self) -> anyhow::Result<()> {
        self.apply_env_from(std::env::vars())
    }

    /// Layer `CANOPY_*` variables from `vars`. Unknown names are ignored.
    pub fn apply_env_from<I>(&mut self, vars: I) -> anyhow::Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix("CANOPY_") else {
                continue;
            };
            let parse_err = || format!("invalid value for {key}: {value:?}");
            match name {
                "MIN_WORKERS" => {
                    self.scaling.get_or_insert_default().min_workers =
                        Some(value.parse().with_context(parse_err)?);
                }
                "MAX_WORKERS" => {
                    self.scaling.get_or_insert_default().max_workers =
                        Some(value.parse().with_context(parse_err)?);
                }
                "INITIAL_WORKERS" => {
                    self.crawl.get_or_insert_default().initial_workers =
                        Some(value.parse().with_context(parse_err)?);
                }
                "MAX_RETRIES" => {
                    self.retry.get_or_insert_default().max_retries =
                        Some(value.parse().with_context(parse_err)?);
                }
                "JOURNAL" => {
                    self.journal.get_or_insert_default().path = Some(PathBuf::from(&value));
                }
                _ => continue,
            }
            debug!(%key, "config override from environment");
        }
        Ok(())
    }

    /// Resolve scaling and tuning values into validated parameters.
    pub fn tuning_parameters(&self) -> anyhow::Result<TuningParameters> {
        let mut patch = TuningPatch::new();
        let mut put = |key: &str, value: Option<f64>| {
            if let Some(v) = value {
                patch.insert(key.to_string(), v);
            }
        };

        if let Some(s) = &self.scaling {
            put("min_workers", s.min_workers.map(f64::from));
            put("max_workers", s.max_workers.map(f64::from));
            put("scale_up_success_rate_threshold", s.scale_up_success_rate_threshold);
            put("scale_down_success_rate_threshold", s.scale_down_success_rate_threshold);
            put("scale_up_response_time_threshold", s.scale_up_response_time_threshold);
            put("scale_down_response_time_threshold", s.scale_down_response_time_threshold);
            put("scale_up_increment", s.scale_up_increment.map(f64::from));
            put("scale_down_increment", s.scale_down_increment.map(f64::from));
            put("max_scale_down_per_interval", s.max_scale_down_per_interval.map(f64::from));
            put("scaling_cooldown_secs", s.scaling_cooldown_secs.map(|v| v as f64));
            put("monitoring_interval_secs", s.monitoring_interval_secs.map(|v| v as f64));
            put("trend_window_minutes", s.trend_window_minutes.map(|v| v as f64));
        }
        if let Some(t) = &self.tuning {
            put("page_timeout_ms", t.page_timeout_ms.map(|v| v as f64));
            put("memory_cleanup_interval", t.memory_cleanup_interval.map(|v| v as f64));
            put("gc_threshold", t.gc_threshold.map(|v| v as f64));
        }

        let mut params = TuningParameters::default().with_patch(&patch)?;
        // A fresh process starts at version 0 regardless of overrides.
        params.version = 0;
        Ok(params)
    }

    pub fn crawl_settings(&self) -> CrawlSettings {
        let d = CrawlSettings::default();
        let Some(c) = &self.crawl else { return d };
        CrawlSettings {
            root: c.root.clone(),
            initial_workers: c.initial_workers.unwrap_or(d.initial_workers),
            idle_timeout_secs: c.idle_timeout_secs.unwrap_or(d.idle_timeout_secs),
            max_idle_timeouts: c.max_idle_timeouts.unwrap_or(d.max_idle_timeouts),
            worker_startup_delay_ms: c.worker_startup_delay_ms.unwrap_or(d.worker_startup_delay_ms),
        }
    }

    /// Retry settings; rejects delays and multipliers a `Duration` cannot hold.
    pub fn retry_settings(&self) -> CanopyResult<RetrySettings> {
        let d = RetrySettings::default();
        let Some(r) = &self.retry else { return Ok(d) };
        let settings = RetrySettings {
            max_retries: r.max_retries.unwrap_or(d.max_retries),
            base_delay_secs: r.base_delay_secs.unwrap_or(d.base_delay_secs),
            multiplier: r.multiplier.unwrap_or(d.multiplier),
        };

        let mut violations = Vec::new();
        if !settings.base_delay_secs.is_finite()
            || settings.base_delay_secs < 0.0
            || settings.base_delay_secs > MAX_RETRY_DELAY_SECS
        {
            violations.push(ConstraintViolation::new(
                "base_delay_secs",
                format!(
                    "base_delay_secs: value {} must be within [0, {MAX_RETRY_DELAY_SECS}]",
                    settings.base_delay_secs
                ),
            ));
        }
        if !settings.multiplier.is_finite() || settings.multiplier < 1.0 {
            violations.push(ConstraintViolation::new(
                "multiplier",
                format!("multiplier: value {} must be finite and at least 1", settings.multiplier),
            ));
        }
        reject(violations)?;
        Ok(settings)
    }

    pub fn tuner_settings(&self) -> CanopyResult<TunerSettings> {
        let d = TunerSettings::default();
        let Some(t) = &self.tuning else { return Ok(d) };
        let settings = TunerSettings {
            optimization_interval_secs: t
                .optimization_interval_secs
                .unwrap_or(d.optimization_interval_secs),
            apply_threshold: t.apply_threshold.unwrap_or(d.apply_threshold),
            history_size: t.history_size.unwrap_or(d.history_size),
            low_activity_worker_ceiling: t
                .low_activity_worker_ceiling
                .unwrap_or(d.low_activity_worker_ceiling),
        };

        let mut violations = Vec::new();
        if settings.optimization_interval_secs < 1 {
            violations.push(ConstraintViolation::new(
                "optimization_interval_secs",
                "optimization_interval_secs: value 0 below minimum 1",
            ));
        }
        if !(0.0..=1.0).contains(&settings.apply_threshold) {
            violations.push(ConstraintViolation::new(
                "apply_threshold",
                format!(
                    "apply_threshold: value {} must be within [0, 1]",
                    settings.apply_threshold
                ),
            ));
        }
        reject(violations)?;
        Ok(settings)
    }

    pub fn journal_path(&self) -> Option<&Path> {
        self.journal.as_ref().and_then(|j| j.path.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_resolves_to_defaults() {
        let config: CanopyConfig = toml::from_str("").unwrap();
        assert_eq!(config.tuning_parameters().unwrap(), TuningParameters::default());
        assert_eq!(config.crawl_settings(), CrawlSettings::default());
        assert_eq!(config.retry_settings().unwrap().max_retries, 3);
        assert_eq!(config.tuner_settings().unwrap(), TunerSettings::default());
        assert!(config.journal_path().is_none());
    }

    #[test]
    fn parse_scaling_section() {
        let toml_str = r#"
[scaling]
min_workers = 5
max_workers = 40
scaling_cooldown_secs = 10

[journal]
path = "logs/canopy.jsonl"
"#;
        let config: CanopyConfig = toml::from_str(toml_str).unwrap();
        let params = config.tuning_parameters().unwrap();
        assert_eq!(params.min_workers, 5);
        assert_eq!(params.max_workers, 40);
        assert_eq!(params.scaling_cooldown_secs, 10);
        assert_eq!(params.version, 0);
        assert_eq!(config.journal_path(), Some(Path::new("logs/canopy.jsonl")));
    }

    #[test]
    fn invalid_bounds_are_rejected() {
        let toml_str = r#"
[scaling]
min_workers = 300
max_workers = 100
"#;
        let config: CanopyConfig = toml::from_str(toml_str).unwrap();
        let err = config.tuning_parameters().unwrap_err();
        assert!(err.to_string().contains("min_workers must not exceed max_workers"));
    }

    fn assert_rejected(err: CanopyError, key: &str) {
        match err {
            CanopyError::ConfigValidation(violations) => {
                assert!(violations.iter().any(|v| v.key == key), "{violations:?}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unbounded_retry_delay_is_rejected() {
        for value in ["inf", "nan", "1e300", "-1.0"] {
            let config: CanopyConfig =
                toml::from_str(&format!("[retry]\nbase_delay_secs = {value}\n")).unwrap();
            assert_rejected(config.retry_settings().unwrap_err(), "base_delay_secs");
        }
    }

    #[test]
    fn shrinking_or_infinite_multiplier_is_rejected() {
        for value in ["inf", "0.5"] {
            let config: CanopyConfig =
                toml::from_str(&format!("[retry]\nmultiplier = {value}\n")).unwrap();
            assert_rejected(config.retry_settings().unwrap_err(), "multiplier");
        }
    }

    #[test]
    fn valid_retry_section_resolves() {
        let config: CanopyConfig =
            toml::from_str("[retry]\nbase_delay_secs = 0.25\nmultiplier = 3.0\n").unwrap();
        let retry = config.retry_settings().unwrap();
        assert_eq!(retry.base_delay_secs, 0.25);
        assert_eq!(retry.multiplier, 3.0);
    }

    #[test]
    fn apply_threshold_outside_unit_range_is_rejected() {
        for value in ["1.5", "-0.1", "nan"] {
            let config: CanopyConfig =
                toml::from_str(&format!("[tuning]\napply_threshold = {value}\n")).unwrap();
            assert_rejected(config.tuner_settings().unwrap_err(), "apply_threshold");
        }
    }

    #[test]
    fn zero_optimization_interval_is_rejected() {
        let config: CanopyConfig =
            toml::from_str("[tuning]\noptimization_interval_secs = 0\n").unwrap();
        assert_rejected(config.tuner_settings().unwrap_err(), "optimization_interval_secs");
    }

    #[test]
    fn env_overrides_layer_on_top() {
        let mut config: CanopyConfig = toml::from_str("[scaling]\nmax_workers = 80\n").unwrap();
        config
            .apply_env_from(vec![
                ("CANOPY_MAX_WORKERS".to_string(), "120".to_string()),
                ("CANOPY_INITIAL_WORKERS".to_string(), "30".to_string()),
                ("HOME".to_string(), "/root".to_string()),
            ])
            .unwrap();

        assert_eq!(config.tuning_parameters().unwrap().max_workers, 120);
        assert_eq!(config.crawl_settings().initial_workers, 30);
    }

    #[test]
    fn bad_env_value_is_an_error() {
        let mut config = CanopyConfig::default();
        let result = config.apply_env_from(vec![(
            "CANOPY_MAX_RETRIES".to_string(),
            "lots".to_string(),
        )]);
        assert!(result.is_err());
    }

    #[test]
    fn from_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("canopy.toml");
        std::fs::write(&path, "[crawl]\nroot = \"/srv/docs\"\ninitial_workers = 12\n").unwrap();

        let config = CanopyConfig::from_file(&path).unwrap();
        let crawl = config.crawl_settings();
        assert_eq!(crawl.root.as_deref(), Some("/srv/docs"));
        assert_eq!(crawl.initial_workers, 12);
        assert!(config.to_toml_string().unwrap().contains("initial_workers = 12"));
    }
}
