//! Read-only performance reporting
//!
//! A `PerformanceReport` is a point-in-time copy of every statistic the engine
//! keeps. Building one takes each tag's lock briefly and never blocks
//! execution; the report itself holds no locks.

use crate::metrics::{OperationMetrics, OperationSnapshot, Trend};
use crate::regression::{RegressionBaselines, RegressionReport};
use cadbatch_concurrency::{SchedulerStats, SessionMetrics};
use cadbatch_core::{EngineError, EngineResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write as _;
use std::time::Duration;

/// Error rate above which a tag earns a recommendation
pub const ERROR_RATE_ALERT: f64 = 0.10;

/// Worst offenders listed per category in the summary
const TOP_N: usize = 5;

/// Everything the engine knows about its own performance
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceReport {
    /// When the report was produced
    pub generated_at: DateTime<Utc>,
    /// Executions across all tags
    pub total_executions: u64,
    /// Failures across all tags
    pub total_errors: u64,
    /// Per-tag statistics, sorted by tag
    pub operations: Vec<OperationSnapshot>,
    /// Baseline comparison
    pub regressions: RegressionReport,
    /// Session lifecycle counters
    pub sessions: SessionMetrics,
    /// Batch scheduler counters (absent when batching is disabled)
    pub scheduler: Option<SchedulerStats>,
    /// Suggested follow-ups
    pub recommendations: Vec<String>,
}

impl PerformanceReport {
    /// Collect a report from the engine's stores
    pub fn build(
        metrics: &OperationMetrics,
        baselines: &RegressionBaselines,
        sessions: SessionMetrics,
        scheduler: Option<SchedulerStats>,
    ) -> Self {
        let operations = metrics.snapshots();
        let regressions = baselines.report(metrics);
        let recommendations = recommendations(&operations, &regressions);

        Self {
            generated_at: Utc::now(),
            total_executions: operations.iter().map(|op| op.execution_count).sum(),
            total_errors: operations.iter().map(|op| op.error_count).sum(),
            operations,
            regressions,
            sessions,
            scheduler,
            recommendations,
        }
    }

    /// Tags with the highest average latency, slowest first
    pub fn slowest(&self, n: usize) -> Vec<&OperationSnapshot> {
        let mut ops: Vec<_> = self.operations.iter().collect();
        ops.sort_by(|a, b| b.average_duration.cmp(&a.average_duration));
        ops.truncate(n);
        ops
    }

    /// Tags with the highest error rate, worst first (error-free tags omitted)
    pub fn most_failing(&self, n: usize) -> Vec<&OperationSnapshot> {
        let mut ops: Vec<_> = self
            .operations
            .iter()
            .filter(|op| op.error_count > 0)
            .collect();
        ops.sort_by(|a, b| b.error_rate.total_cmp(&a.error_rate));
        ops.truncate(n);
        ops
    }

    /// Tags whose latency trend is degrading
    pub fn degrading(&self) -> Vec<&OperationSnapshot> {
        self.operations
            .iter()
            .filter(|op| op.trend == Trend::Degrading)
            .collect()
    }

    /// Serialize the report as pretty-printed JSON
    pub fn to_json(&self) -> EngineResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| EngineError::internal(format!("Failed to serialize report: {}", e)))
    }

    /// Human-readable multi-line summary
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "=== cadbatch performance summary ===");
        let _ = writeln!(
            out,
            "Generated: {}",
            self.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        let _ = writeln!(
            out,
            "Operations: {} tags, {} executions, {} errors",
            self.operations.len(),
            self.total_executions,
            self.total_errors
        );
        let _ = writeln!(
            out,
            "Sessions: {} started, {} committed, {} aborted, {} active",
            self.sessions.total_started,
            self.sessions.total_committed,
            self.sessions.total_aborted,
            self.sessions.active_count
        );
        if self.sessions.nested_started > 0 {
            let _ = writeln!(
                out,
                "Queued operation scopes: {} folded, {} rolled back",
                self.sessions.nested_committed, self.sessions.nested_aborted
            );
        }
        if let Some(scheduler) = &self.scheduler {
            let _ = writeln!(
                out,
                "Batching: {} drains, {} groups, {} queued operations ({} failed, {} cancelled)",
                scheduler.batches_drained,
                scheduler.groups_dispatched,
                scheduler.operations_executed,
                scheduler.operations_failed,
                scheduler.operations_cancelled
            );
        }

        if self.operations.is_empty() {
            let _ = writeln!(out, "\nNo operations recorded.");
            return out;
        }

        let _ = writeln!(out, "\nSlowest operations (by average):");
        for op in self.slowest(TOP_N) {
            let _ = writeln!(
                out,
                "  {:<24} avg {:>10}  min {:>10}  max {:>10}  n={}",
                op.tag,
                fmt_duration(op.average_duration),
                fmt_duration(op.min_duration),
                fmt_duration(op.max_duration),
                op.execution_count
            );
        }

        let failing = self.most_failing(TOP_N);
        if !failing.is_empty() {
            let _ = writeln!(out, "\nHighest error rates:");
            for op in failing {
                let _ = writeln!(
                    out,
                    "  {:<24} {:>5.1}%  ({}/{}) last: {}",
                    op.tag,
                    op.error_rate * 100.0,
                    op.error_count,
                    op.execution_count,
                    op.last_error.as_deref().unwrap_or("-")
                );
            }
        }

        let degrading = self.degrading();
        if !degrading.is_empty() {
            let _ = writeln!(out, "\nDegrading trends:");
            for op in degrading {
                let _ = writeln!(
                    out,
                    "  {:<24} {:+.0}%",
                    op.tag,
                    op.trend_ratio.unwrap_or_default() * 100.0
                );
            }
        }

        if self.regressions.has_regressions() {
            let _ = writeln!(out, "\nRegressions:");
            for check in self.regressions.regressions() {
                let _ = writeln!(
                    out,
                    "  {:<24} {} vs expected {} (x{:.2}){}",
                    check.tag,
                    fmt_duration(check.observed_duration),
                    fmt_duration(check.baseline.expected_duration),
                    check.duration_ratio,
                    match check.memory_ratio {
                        Some(r) if check.memory_regressed => format!(", memory x{:.2}", r),
                        _ => String::new(),
                    }
                );
            }
        }

        if !self.recommendations.is_empty() {
            let _ = writeln!(out, "\nRecommendations:");
            for rec in &self.recommendations {
                let _ = writeln!(out, "  - {}", rec);
            }
        }
        out
    }
}

fn recommendations(
    operations: &[OperationSnapshot],
    regressions: &RegressionReport,
) -> Vec<String> {
    let mut recs = Vec::new();
    for op in operations {
        if op.trend == Trend::Degrading {
            recs.push(format!(
                "'{}' is getting slower ({:+.0}% across its recent window); review recent changes",
                op.tag,
                op.trend_ratio.unwrap_or_default() * 100.0
            ));
        }
        if op.error_rate > ERROR_RATE_ALERT {
            recs.push(format!(
                "'{}' fails {:.1}% of the time; inspect its last error: {}",
                op.tag,
                op.error_rate * 100.0,
                op.last_error.as_deref().unwrap_or("(none recorded)")
            ));
        }
    }
    for check in regressions.regressions() {
        if check.duration_regressed {
            recs.push(format!(
                "'{}' runs at {:.2}x its baseline duration",
                check.tag, check.duration_ratio
            ));
        }
        if check.memory_regressed {
            recs.push(format!(
                "'{}' allocates {:.2}x its baseline memory",
                check.tag,
                check.memory_ratio.unwrap_or_default()
            ));
        }
    }
    recs
}

fn fmt_duration(d: Duration) -> String {
    let micros = d.as_micros();
    if micros >= 1_000_000 {
        format!("{:.2}s", d.as_secs_f64())
    } else if micros >= 1_000 {
        format!("{:.2}ms", micros as f64 / 1_000.0)
    } else {
        format!("{}us", micros)
    }
}
