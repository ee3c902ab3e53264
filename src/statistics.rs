//! Rolling sample history and the standard deviation noise margin

use crate::lock;
use chrono::{DateTime, Duration, Utc};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Retention rules for a [`RollingHistory`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryPolicy {
    /// Always keep at least this many of the newest samples
    pub min_retain: usize,
    /// Keep every sample younger than this
    pub max_age: Duration,
}

impl HistoryPolicy {
    pub fn new(min_retain: usize, max_age: Duration) -> Self {
        Self {
            min_retain,
            max_age,
        }
    }

    /// Samples required before the standard deviation is trusted
    pub fn min_for_stddev(&self) -> usize {
        self.min_retain.div_ceil(2)
    }
}

impl Default for HistoryPolicy {
    fn default() -> Self {
        Self::new(10, Duration::minutes(2))
    }
}

/// Timestamp keyed window of recent samples
#[derive(Debug, Clone)]
pub struct RollingHistory {
    policy: HistoryPolicy,
    samples: BTreeMap<DateTime<Utc>, f64>,
}

impl RollingHistory {
    pub fn new(policy: HistoryPolicy) -> Self {
        Self {
            policy,
            samples: BTreeMap::new(),
        }
    }

    /// Insert a sample taken at `now` and trim the window.
    ///
    /// A sample with an existing timestamp replaces the old one. Walking from
    /// newest to oldest, a sample survives while fewer than `min_retain` have
    /// been kept so far or while it is younger than `now - max_age`.
    pub fn record(&mut self, now: DateTime<Utc>, value: f64) {
        self.samples.insert(now, value);

        let cutoff = now - self.policy.max_age;
        let mut kept = 0usize;
        let mut expired = Vec::new();
        for ts in self.samples.keys().rev() {
            if kept < self.policy.min_retain || *ts > cutoff {
                kept += 1;
            } else {
                expired.push(*ts);
            }
        }
        for ts in expired {
            self.samples.remove(&ts);
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<f64> {
        self.samples.values().next_back().copied()
    }

    /// Population standard deviation, or 0 while too few samples exist
    pub fn stddev(&self) -> f64 {
        if self.samples.len() < self.policy.min_for_stddev() || self.samples.is_empty() {
            return 0.0;
        }
        let sd = self.samples.values().population_std_dev();
        if sd.is_finite() { sd } else { 0.0 }
    }
}

#[derive(Debug)]
struct SampledState {
    current: Option<f64>,
    history: RollingHistory,
}

/// Cached latest reading plus its rolling history
///
/// Written only by the owning reader's `update`; read by the coordinator.
#[derive(Debug)]
pub struct SampledCurrent {
    state: Mutex<SampledState>,
}

impl SampledCurrent {
    pub fn new(policy: HistoryPolicy) -> Self {
        Self {
            state: Mutex::new(SampledState {
                current: None,
                history: RollingHistory::new(policy),
            }),
        }
    }

    /// Store the outcome of a fetch. Failed fetches clear the current value
    /// but leave the history untouched.
    pub fn store(&self, now: DateTime<Utc>, value: Option<f64>) {
        let mut state = lock(&self.state);
        state.current = value;
        if let Some(value) = value {
            state.history.record(now, value);
        }
    }

    pub fn current(&self) -> Option<f64> {
        lock(&self.state).current
    }

    pub fn stddev(&self) -> f64 {
        lock(&self.state).history.stddev()
    }

    pub fn history_len(&self) -> usize {
        lock(&self.state).history.len()
    }
}
