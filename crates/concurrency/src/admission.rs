//! Burst detection for batch admission
//!
//! Every tagged call records its timestamp. A call is routed to the batch
//! queue only when it is part of a genuine burst:
//!
//! ```text
//! window_count = calls for the tag in the last `window_ms`        (default 1000)
//! recent_burst = calls for the tag in the last `burst_window_ms`  (default 100)
//!
//! queued  iff  recent_burst >= burst_threshold (3)  AND  window_count >= window_threshold (5)
//! ```
//!
//! Isolated calls never pay batching latency. Each tag has its own timestamp
//! queue behind its own lock, so tags never contend with each other.

use cadbatch_core::{EngineError, EngineResult};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source of monotonic time for the heuristic
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> Instant;
}

/// Wall clock backed by `Instant::now()`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
///
/// Starts at the instant it was created.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    /// Create a clock frozen at the current instant
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }

    /// Move the clock to `offset` past its origin (never backwards)
    pub fn set_elapsed(&self, offset: Duration) {
        let mut current = self.offset.lock();
        if offset > *current {
            *current = offset;
        }
    }

    /// Time elapsed since the origin
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }
}

/// Thresholds for the admission heuristic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionPolicy {
    /// Sliding window over which calls are counted (ms)
    pub window_ms: u64,
    /// Short window that detects a burst (ms)
    pub burst_window_ms: u64,
    /// Minimum calls inside the burst window
    pub burst_threshold: usize,
    /// Minimum calls inside the sliding window
    pub window_threshold: usize,
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self {
            window_ms: 1000,
            burst_window_ms: 100,
            burst_threshold: 3,
            window_threshold: 5,
        }
    }
}

impl AdmissionPolicy {
    /// Sliding window as a Duration
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Burst window as a Duration
    pub fn burst_window(&self) -> Duration {
        Duration::from_millis(self.burst_window_ms)
    }

    /// Check the thresholds are usable
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if a window or threshold is zero, or the burst window
    /// is longer than the sliding window.
    pub fn validate(&self) -> EngineResult<()> {
        if self.window_ms == 0 || self.burst_window_ms == 0 {
            return Err(EngineError::invalid_config(
                "admission windows must be non-zero",
            ));
        }
        if self.burst_window_ms > self.window_ms {
            return Err(EngineError::invalid_config(format!(
                "burst_window_ms ({}) exceeds window_ms ({})",
                self.burst_window_ms, self.window_ms
            )));
        }
        if self.burst_threshold == 0 || self.window_threshold == 0 {
            return Err(EngineError::invalid_config(
                "admission thresholds must be non-zero",
            ));
        }
        Ok(())
    }
}

/// Routing decision for one call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Run immediately on the calling thread
    Direct,
    /// Enqueue for the next drain
    Queued,
}

/// Per-tag burst detector
pub struct AdmissionController {
    policy: AdmissionPolicy,
    clock: Arc<dyn Clock>,
    history: DashMap<String, Arc<Mutex<VecDeque<Instant>>>>,
}

impl AdmissionController {
    /// Create a controller over `clock`
    pub fn new(policy: AdmissionPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            clock,
            history: DashMap::new(),
        }
    }

    /// Controller on the system clock with default thresholds
    pub fn with_defaults() -> Self {
        Self::new(AdmissionPolicy::default(), Arc::new(SystemClock))
    }

    /// Thresholds in use
    pub fn policy(&self) -> &AdmissionPolicy {
        &self.policy
    }

    /// Record a call for `tag` and decide its route
    pub fn admit(&self, tag: &str) -> Admission {
        let history = self.history_for(tag);
        let window = self.policy.window();
        let burst_window = self.policy.burst_window();

        // Sampled under the lock so each tag's stamps stay in arrival order
        let mut stamps = history.lock();
        let now = self.clock.now();
        while let Some(&oldest) = stamps.front() {
            if now.saturating_duration_since(oldest) > window {
                stamps.pop_front();
            } else {
                break;
            }
        }
        stamps.push_back(now);

        let window_count = stamps.len();
        let recent_burst = stamps
            .iter()
            .rev()
            .take_while(|&&stamp| now.saturating_duration_since(stamp) <= burst_window)
            .count();

        if recent_burst >= self.policy.burst_threshold
            && window_count >= self.policy.window_threshold
        {
            Admission::Queued
        } else {
            Admission::Direct
        }
    }

    /// Record a call for `tag`; true if it should be queued
    pub fn should_batch(&self, tag: &str) -> bool {
        self.admit(tag) == Admission::Queued
    }

    /// Calls recorded for `tag` inside the sliding window (without recording one)
    pub fn window_count(&self, tag: &str) -> usize {
        let Some(history) = self.history.get(tag).map(|h| Arc::clone(h.value())) else {
            return 0;
        };
        let now = self.clock.now();
        let window = self.policy.window();
        let stamps = history.lock();
        stamps
            .iter()
            .filter(|&&stamp| now.saturating_duration_since(stamp) <= window)
            .count()
    }

    /// Forget all recorded calls
    pub fn reset(&self) {
        self.history.clear();
    }

    fn history_for(&self, tag: &str) -> Arc<Mutex<VecDeque<Instant>>> {
        if let Some(existing) = self.history.get(tag) {
            return Arc::clone(existing.value());
        }
        Arc::clone(
            self.history
                .entry(tag.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(VecDeque::new())))
                .value(),
        )
    }
}
