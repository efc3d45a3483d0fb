//! Execution engine for cadbatch
//!
//! This crate sits on top of the concurrency layer:
//! - ExecutionFacade: the entry point domain code calls
//! - OperationMetrics: per-tag latency, memory, error rate and trend
//! - RegressionBaselines: expected performance and drift detection
//! - PerformanceReport: read-only reporting surface
//! - EngineConfig: tunables loaded from `cadbatch.toml`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod facade;
pub mod metrics;
pub mod regression;
pub mod report;

pub use config::{EngineConfig, MetricsConfig, RegressionConfig, CONFIG_FILE_NAME};
pub use facade::{ExecutionFacade, FacadeBuilder};
pub use metrics::{OperationMetrics, OperationSnapshot, TagStats, Trend};
pub use regression::{Baseline, RegressionBaselines, RegressionCheck, RegressionReport};
pub use report::{PerformanceReport, ERROR_RATE_ALERT};
