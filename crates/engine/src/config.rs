//! Engine configuration via `cadbatch.toml`
//!
//! Every field has a default equal to the engine's built-in constants, so an
//! empty file (or no file at all) yields the stock behavior. Sections that are
//! omitted fall back to their defaults individually.

use cadbatch_concurrency::{AdmissionPolicy, DrainPolicy};
use cadbatch_core::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Conventional config file name
pub const CONFIG_FILE_NAME: &str = "cadbatch.toml";

/// Rolling-window and trend settings for operation metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Samples kept per tag for trend analysis
    pub window_capacity: usize,
    /// Samples required before a trend is reported
    pub trend_min_samples: usize,
    /// Relative change that counts as improving/degrading
    pub trend_threshold: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            window_capacity: 100,
            trend_min_samples: 10,
            trend_threshold: 0.2,
        }
    }
}

/// Tolerances for regression checks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegressionConfig {
    /// Average duration above `expected × duration_tolerance` is a regression
    pub duration_tolerance: f64,
    /// Average memory above `expected × memory_tolerance` is a regression
    pub memory_tolerance: f64,
}

impl Default for RegressionConfig {
    fn default() -> Self {
        Self {
            duration_tolerance: 1.2,
            memory_tolerance: 1.5,
        }
    }
}

/// Engine configuration loaded from `cadbatch.toml`.
///
/// # Example
///
/// ```toml
/// batching_enabled = true
///
/// [admission]
/// window_ms = 1000
/// burst_window_ms = 100
///
/// [drain]
/// interval_ms = 10
/// max_batch = 100
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Route bursts through the batch queue (false = always direct)
    pub batching_enabled: bool,
    /// Admission heuristic thresholds
    pub admission: AdmissionPolicy,
    /// Drain loop tunables
    pub drain: DrainPolicy,
    /// Metric window settings
    pub metrics: MetricsConfig,
    /// Regression tolerances
    pub regression: RegressionConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batching_enabled: true,
            admission: AdmissionPolicy::default(),
            drain: DrainPolicy::default(),
            metrics: MetricsConfig::default(),
            regression: RegressionConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Check every section is usable.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` naming the first offending setting.
    pub fn validate(&self) -> EngineResult<()> {
        self.admission.validate()?;
        self.drain.validate()?;

        if self.metrics.window_capacity == 0 {
            return Err(EngineError::invalid_config(
                "metrics.window_capacity must be non-zero",
            ));
        }
        if self.metrics.trend_min_samples < 2 {
            return Err(EngineError::invalid_config(
                "metrics.trend_min_samples must be at least 2",
            ));
        }
        let threshold = self.metrics.trend_threshold;
        if threshold.is_nan() || threshold <= 0.0 {
            return Err(EngineError::invalid_config(
                "metrics.trend_threshold must be positive",
            ));
        }
        let tolerances = [
            self.regression.duration_tolerance,
            self.regression.memory_tolerance,
        ];
        if tolerances.iter().any(|t| t.is_nan() || *t < 1.0) {
            return Err(EngineError::invalid_config(
                "regression tolerances must be at least 1.0",
            ));
        }
        Ok(())
    }

    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the document does not parse or validate.
    pub fn from_toml_str(content: &str) -> EngineResult<Self> {
        let config: EngineConfig = toml::from_str(content).map_err(|e| {
            EngineError::invalid_config(format!("Failed to parse engine config: {}", e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> EngineResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::internal(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            EngineError::InvalidConfig(reason) => {
                EngineError::invalid_config(format!("{} ({})", reason, path.display()))
            }
            other => other,
        })
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> EngineResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| EngineError::internal(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            EngineError::internal(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# cadbatch engine configuration
#
# Route bursts of same-tag calls through the batch queue (default: true).
# When false every call runs directly in its own session.
batching_enabled = true

# Admission heuristic: a call is queued when at least `burst_threshold`
# calls for its tag arrived in the last `burst_window_ms` AND at least
# `window_threshold` arrived in the last `window_ms`.
[admission]
window_ms = 1000
burst_window_ms = 100
burst_threshold = 3
window_threshold = 5

# Drain loop: wake every `interval_ms`, take at most `max_batch` operations
# or whatever arrives within `collect_deadline_us`. Every tag group of a
# batch runs on its own thread.
[drain]
interval_ms = 10
max_batch = 100
collect_deadline_us = 1000

# Rolling sample window per tag, and the trend sensitivity.
[metrics]
window_capacity = 100
trend_min_samples = 10
trend_threshold = 0.2

# Regression tolerances relative to recorded baselines.
[regression]
duration_tolerance = 1.2
memory_tolerance = 1.5
"#
    }
}
