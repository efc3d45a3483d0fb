//! Baselines and regression checks
//!
//! A baseline is an explicitly recorded expectation for one tag. Checks
//! compare the tag's live averages against it on demand:
//!
//! ```text
//! duration regressed  iff  average / expected > duration_tolerance   (1.2)
//! memory regressed    iff  expected_memory > 0
//!                          AND average_memory / expected_memory > memory_tolerance (1.5)
//! ```
//!
//! A regression is a reporting signal only. No baseline, or no samples for
//! the tag, means no opinion.

use crate::config::RegressionConfig;
use crate::metrics::OperationMetrics;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Expected performance for one tag
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Baseline {
    /// Expected mean duration
    pub expected_duration: Duration,
    /// Expected mean memory delta in bytes (0 = not tracked)
    pub expected_memory: u64,
    /// When the baseline was recorded
    pub recorded_at: DateTime<Utc>,
}

/// Result of comparing one tag against its baseline
#[derive(Debug, Clone, Serialize)]
pub struct RegressionCheck {
    /// Operation tag
    pub tag: String,
    /// Baseline compared against
    pub baseline: Baseline,
    /// Live mean duration
    pub observed_duration: Duration,
    /// Live mean memory delta, when measured
    pub observed_memory: Option<u64>,
    /// `observed_duration / expected_duration`
    pub duration_ratio: f64,
    /// `observed_memory / expected_memory`, when both are known
    pub memory_ratio: Option<f64>,
    /// Duration exceeded its tolerance
    pub duration_regressed: bool,
    /// Memory exceeded its tolerance
    pub memory_regressed: bool,
}

impl RegressionCheck {
    /// True if either dimension regressed
    pub fn is_regression(&self) -> bool {
        self.duration_regressed || self.memory_regressed
    }
}

/// Checks for every baselined tag
#[derive(Debug, Clone, Serialize)]
pub struct RegressionReport {
    /// When the report was produced
    pub generated_at: DateTime<Utc>,
    /// One check per baselined tag with samples, sorted by tag
    pub checks: Vec<RegressionCheck>,
    /// Baselined tags with no recorded executions yet
    pub unmeasured: Vec<String>,
}

impl RegressionReport {
    /// Report with no checks
    pub fn empty() -> Self {
        Self {
            generated_at: Utc::now(),
            checks: Vec::new(),
            unmeasured: Vec::new(),
        }
    }

    /// Checks that flagged a regression
    pub fn regressions(&self) -> impl Iterator<Item = &RegressionCheck> {
        self.checks.iter().filter(|check| check.is_regression())
    }

    /// True if any check regressed
    pub fn has_regressions(&self) -> bool {
        self.regressions().next().is_some()
    }
}

/// Baseline store
pub struct RegressionBaselines {
    config: RegressionConfig,
    baselines: DashMap<String, Baseline>,
}

impl Default for RegressionBaselines {
    fn default() -> Self {
        Self::new(RegressionConfig::default())
    }
}

impl RegressionBaselines {
    /// Create an empty store with the given tolerances
    pub fn new(config: RegressionConfig) -> Self {
        Self {
            config,
            baselines: DashMap::new(),
        }
    }

    /// Store or overwrite the baseline for `tag`
    pub fn set_baseline(&self, tag: &str, expected_duration: Duration, expected_memory: u64) {
        debug!(
            target: "cadbatch::metrics",
            tag,
            expected_us = expected_duration.as_micros() as u64,
            expected_memory,
            "Baseline recorded"
        );
        self.baselines.insert(
            tag.to_string(),
            Baseline {
                expected_duration,
                expected_memory,
                recorded_at: Utc::now(),
            },
        );
    }

    /// Baseline for `tag`, if any
    pub fn baseline(&self, tag: &str) -> Option<Baseline> {
        self.baselines.get(tag).map(|b| b.value().clone())
    }

    /// Drop the baseline for `tag`; true if one existed
    pub fn remove_baseline(&self, tag: &str) -> bool {
        self.baselines.remove(tag).is_some()
    }

    /// Drop every baseline
    pub fn clear(&self) {
        self.baselines.clear();
    }

    /// Number of baselines
    pub fn len(&self) -> usize {
        self.baselines.len()
    }

    /// True if no baselines are recorded
    pub fn is_empty(&self) -> bool {
        self.baselines.is_empty()
    }

    /// Compare `tag`'s live averages against its baseline
    ///
    /// `None` when the tag has no baseline or no recorded executions.
    pub fn check(&self, tag: &str, metrics: &OperationMetrics) -> Option<RegressionCheck> {
        let baseline = self.baseline(tag)?;
        let (observed_duration, observed_memory) =
            metrics.with_stats(tag, |s| (s.average_duration(), s.average_memory()))?;

        let duration_ratio = ratio(
            observed_duration.as_nanos() as f64,
            baseline.expected_duration.as_nanos() as f64,
        );
        let duration_regressed = duration_ratio > self.config.duration_tolerance;

        let memory_ratio = match observed_memory {
            Some(observed) if baseline.expected_memory > 0 => {
                Some(observed as f64 / baseline.expected_memory as f64)
            }
            _ => None,
        };
        let memory_regressed = memory_ratio.is_some_and(|r| r > self.config.memory_tolerance);

        Some(RegressionCheck {
            tag: tag.to_string(),
            baseline,
            observed_duration,
            observed_memory,
            duration_ratio,
            memory_ratio,
            duration_regressed,
            memory_regressed,
        })
    }

    /// Check every baselined tag
    pub fn report(&self, metrics: &OperationMetrics) -> RegressionReport {
        let mut tags: Vec<String> = self.baselines.iter().map(|e| e.key().clone()).collect();
        tags.sort();

        let mut checks = Vec::with_capacity(tags.len());
        let mut unmeasured = Vec::new();
        for tag in tags {
            match self.check(&tag, metrics) {
                Some(check) => checks.push(check),
                None => unmeasured.push(tag),
            }
        }

        RegressionReport {
            generated_at: Utc::now(),
            checks,
            unmeasured,
        }
    }
}

/// `observed / expected`; a zero expectation is infinitely exceeded by any
/// non-zero observation
fn ratio(observed: f64, expected: f64) -> f64 {
    if expected > 0.0 {
        observed / expected
    } else if observed > 0.0 {
        f64::INFINITY
    } else {
        1.0
    }
}
