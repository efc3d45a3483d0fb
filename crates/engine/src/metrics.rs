//! Per-tag operation statistics
//!
//! Each tag owns a `TagStats` behind its own mutex; the map itself is a
//! `DashMap`, so recording for one tag never blocks another. Statistics are
//! never reset implicitly, only through `reset`/`reset_tag`.
//!
//! # Trend
//!
//! The most recent `window_capacity` durations are kept in insertion order.
//! With at least `trend_min_samples` of them, the window is split in halves
//! and the relative change of the averages classifies the tag:
//!
//! ```text
//! ratio = (second_avg - first_avg) / first_avg
//! ratio <= -threshold  → Improving
//! ratio >= +threshold  → Degrading
//! otherwise            → Stable
//! ```

use crate::config::MetricsConfig;
use cadbatch_concurrency::{OperationObserver, OperationOutcome};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

/// Direction of recent latency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    /// Recent half is faster by at least the threshold
    Improving,
    /// Within the threshold
    Stable,
    /// Recent half is slower by at least the threshold
    Degrading,
    /// Too few samples to judge
    InsufficientData,
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Trend::Improving => "improving",
            Trend::Stable => "stable",
            Trend::Degrading => "degrading",
            Trend::InsufficientData => "insufficient data",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: Instant,
    duration: Duration,
}

fn mean_nanos<'a>(samples: impl Iterator<Item = &'a Sample>, count: usize) -> f64 {
    samples.map(|s| s.duration.as_nanos() as f64).sum::<f64>() / count as f64
}

/// Accumulated statistics for one tag
#[derive(Debug)]
pub struct TagStats {
    execution_count: u64,
    error_count: u64,
    total_duration: Duration,
    min_duration: Option<Duration>,
    max_duration: Duration,
    total_memory: u64,
    memory_samples: u64,
    last_error: Option<String>,
    last_executed: Option<DateTime<Utc>>,
    window: VecDeque<Sample>,
    capacity: usize,
}

impl TagStats {
    fn new(capacity: usize) -> Self {
        Self {
            execution_count: 0,
            error_count: 0,
            total_duration: Duration::ZERO,
            min_duration: None,
            max_duration: Duration::ZERO,
            total_memory: 0,
            memory_samples: 0,
            last_error: None,
            last_executed: None,
            window: VecDeque::with_capacity(capacity.min(128)),
            capacity,
        }
    }

    fn record(&mut self, duration: Duration, memory: Option<u64>, error: Option<&str>) {
        self.execution_count += 1;
        self.total_duration = self.total_duration.saturating_add(duration);
        self.min_duration = Some(self.min_duration.map_or(duration, |min| min.min(duration)));
        self.max_duration = self.max_duration.max(duration);

        if let Some(bytes) = memory {
            self.total_memory = self.total_memory.saturating_add(bytes);
            self.memory_samples += 1;
        }
        if let Some(error) = error {
            self.error_count += 1;
            self.last_error = Some(error.to_string());
        }
        self.last_executed = Some(Utc::now());

        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(Sample {
            at: Instant::now(),
            duration,
        });
    }

    /// Executions recorded
    pub fn execution_count(&self) -> u64 {
        self.execution_count
    }

    /// Failed executions recorded
    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    /// Mean duration over every execution
    pub fn average_duration(&self) -> Duration {
        if self.execution_count == 0 {
            return Duration::ZERO;
        }
        let nanos = self.total_duration.as_nanos() / u128::from(self.execution_count);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// Mean memory delta over executions that measured one
    pub fn average_memory(&self) -> Option<u64> {
        (self.memory_samples > 0).then(|| self.total_memory / self.memory_samples)
    }

    /// Failed fraction of executions (0.0 when nothing ran)
    pub fn error_rate(&self) -> f64 {
        if self.execution_count == 0 {
            0.0
        } else {
            self.error_count as f64 / self.execution_count as f64
        }
    }

    /// Trend over the rolling window and the ratio behind it
    ///
    /// A zero first-half average yields `Stable` with no ratio.
    pub fn trend(&self, min_samples: usize, threshold: f64) -> (Trend, Option<f64>) {
        let len = self.window.len();
        if len < min_samples.max(2) {
            return (Trend::InsufficientData, None);
        }

        let half = len / 2;
        let first = mean_nanos(self.window.iter().take(half), half);
        let second = mean_nanos(self.window.iter().skip(half), len - half);

        if first == 0.0 {
            return (Trend::Stable, None);
        }
        let ratio = (second - first) / first;
        let trend = if ratio <= -threshold {
            Trend::Improving
        } else if ratio >= threshold {
            Trend::Degrading
        } else {
            Trend::Stable
        };
        (trend, Some(ratio))
    }

    /// Samples currently in the rolling window
    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    /// Time between the oldest and newest sample in the window
    pub fn window_span(&self) -> Duration {
        match (self.window.front(), self.window.back()) {
            (Some(oldest), Some(newest)) => newest.at.saturating_duration_since(oldest.at),
            _ => Duration::ZERO,
        }
    }
}

fn as_micros<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(duration.as_micros()).unwrap_or(u64::MAX))
}

/// Serializable view of one tag's statistics
///
/// Durations serialize as whole microseconds.
#[derive(Debug, Clone, Serialize)]
pub struct OperationSnapshot {
    /// Operation tag
    pub tag: String,
    /// Executions recorded
    pub execution_count: u64,
    /// Failed executions
    pub error_count: u64,
    /// `error_count / execution_count`
    pub error_rate: f64,
    /// Mean duration
    #[serde(rename = "average_duration_us", serialize_with = "as_micros")]
    pub average_duration: Duration,
    /// Fastest execution
    #[serde(rename = "min_duration_us", serialize_with = "as_micros")]
    pub min_duration: Duration,
    /// Slowest execution
    #[serde(rename = "max_duration_us", serialize_with = "as_micros")]
    pub max_duration: Duration,
    /// Sum of all durations
    #[serde(rename = "total_duration_us", serialize_with = "as_micros")]
    pub total_duration: Duration,
    /// Mean memory delta in bytes, when measured
    pub average_memory: Option<u64>,
    /// Most recent failure message
    pub last_error: Option<String>,
    /// Wall-clock time of the latest execution
    pub last_executed: Option<DateTime<Utc>>,
    /// Samples in the rolling window
    pub window_len: usize,
    /// Time covered by the rolling window
    #[serde(rename = "window_span_us", serialize_with = "as_micros")]
    pub window_span: Duration,
    /// Latency direction
    pub trend: Trend,
    /// Relative change behind `trend`
    pub trend_ratio: Option<f64>,
}

/// Per-tag statistics store
pub struct OperationMetrics {
    config: MetricsConfig,
    tags: DashMap<String, Arc<Mutex<TagStats>>>,
}

impl Default for OperationMetrics {
    fn default() -> Self {
        Self::new(MetricsConfig::default())
    }
}

impl OperationMetrics {
    /// Create an empty store
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            config,
            tags: DashMap::new(),
        }
    }

    /// Window and trend settings in use
    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    fn stats_for(&self, tag: &str) -> Arc<Mutex<TagStats>> {
        if let Some(existing) = self.tags.get(tag) {
            return Arc::clone(existing.value());
        }
        let capacity = self.config.window_capacity;
        Arc::clone(
            self.tags
                .entry(tag.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(TagStats::new(capacity))))
                .value(),
        )
    }

    /// Record one execution; `error` marks it failed
    pub fn record(&self, tag: &str, duration: Duration, memory: Option<u64>, error: Option<&str>) {
        let stats = self.stats_for(tag);
        stats.lock().record(duration, memory, error);
        trace!(
            target: "cadbatch::metrics",
            tag,
            duration_us = duration.as_micros() as u64,
            failed = error.is_some(),
            "Recorded execution"
        );
    }

    /// Record a successful execution
    pub fn record_success(&self, tag: &str, duration: Duration) {
        self.record(tag, duration, None, None);
    }

    /// Record a successful execution with its memory delta
    pub fn record_success_with_memory(&self, tag: &str, duration: Duration, bytes: u64) {
        self.record(tag, duration, Some(bytes), None);
    }

    /// Record a failed execution
    pub fn record_failure(&self, tag: &str, duration: Duration, error: &str) {
        self.record(tag, duration, None, Some(error));
    }

    /// Record a failed execution with its memory delta
    pub fn record_failure_with_memory(
        &self,
        tag: &str,
        duration: Duration,
        bytes: u64,
        error: &str,
    ) {
        self.record(tag, duration, Some(bytes), Some(error));
    }

    /// Run `f` against a tag's statistics, if the tag has any
    pub fn with_stats<R>(&self, tag: &str, f: impl FnOnce(&TagStats) -> R) -> Option<R> {
        let stats = self.tags.get(tag).map(|s| Arc::clone(s.value()))?;
        let guard = stats.lock();
        Some(f(&guard))
    }

    /// Mean duration for `tag`, if it has executions
    pub fn average_duration(&self, tag: &str) -> Option<Duration> {
        self.with_stats(tag, |s| s.average_duration())
    }

    /// Mean memory delta for `tag`, if measured
    pub fn average_memory(&self, tag: &str) -> Option<u64> {
        self.with_stats(tag, |s| s.average_memory()).flatten()
    }

    /// True if `tag` has recorded executions
    pub fn contains(&self, tag: &str) -> bool {
        self.tags.contains_key(tag)
    }

    /// Snapshot of one tag
    pub fn snapshot(&self, tag: &str) -> Option<OperationSnapshot> {
        let threshold = self.config.trend_threshold;
        let min_samples = self.config.trend_min_samples;
        self.with_stats(tag, |s| {
            let (trend, trend_ratio) = s.trend(min_samples, threshold);
            OperationSnapshot {
                tag: tag.to_string(),
                execution_count: s.execution_count,
                error_count: s.error_count,
                error_rate: s.error_rate(),
                average_duration: s.average_duration(),
                min_duration: s.min_duration.unwrap_or_default(),
                max_duration: s.max_duration,
                total_duration: s.total_duration,
                average_memory: s.average_memory(),
                last_error: s.last_error.clone(),
                last_executed: s.last_executed,
                window_len: s.window.len(),
                window_span: s.window_span(),
                trend,
                trend_ratio,
            }
        })
    }

    /// Snapshots of every tag, sorted by tag
    pub fn snapshots(&self) -> Vec<OperationSnapshot> {
        let mut tags = self.tags();
        tags.sort();
        tags.iter().filter_map(|tag| self.snapshot(tag)).collect()
    }

    /// Tags with recorded executions (unordered)
    pub fn tags(&self) -> Vec<String> {
        self.tags.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Forget every tag
    pub fn reset(&self) {
        self.tags.clear();
    }

    /// Forget one tag; true if it existed
    pub fn reset_tag(&self, tag: &str) -> bool {
        self.tags.remove(tag).is_some()
    }
}

impl OperationObserver for OperationMetrics {
    fn on_complete(&self, outcome: &OperationOutcome<'_>) {
        self.record(outcome.tag, outcome.elapsed, outcome.memory_delta, outcome.error);
    }
}
