//! Streaming metrics aggregation
//!
//! Ingests [`Outcome`]s and maintains per-metric histograms plus exact
//! counters without ever buffering raw samples: memory is bounded by the
//! bucket layout regardless of how many requests a run issues.
//!
//! The histogram is log-linear: values below 128 units are exact, and each
//! power-of-two range above that is split into 128 linear sub-buckets, so
//! the worst-case relative error of any recorded value is 1/128 (< 1%).
//! Merging is bucket-wise addition, which is associative and commutative,
//! so worker-sharded aggregates can be combined in any order with
//! bit-identical results.
//!
//! Durations are recorded in microseconds; throughput in milli-tokens/sec.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::executor::{Outcome, OutcomeStatus};

/// Sub-buckets per power-of-two range; bounds relative error to 1/128
const SUB_BUCKETS: u64 = 128;
/// log2(SUB_BUCKETS)
const SUB_BITS: u32 = 7;

/// Fixed-memory log-linear histogram over `u64` values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyHistogram {
    counts: Vec<u64>,
    count: u64,
    sum: u64,
    min: u64,
    max: u64,
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencyHistogram {
    /// Create an empty histogram
    #[must_use]
    pub fn new() -> Self {
        Self {
            counts: Vec::new(),
            count: 0,
            sum: 0,
            min: u64::MAX,
            max: 0,
        }
    }

    fn index_of(value: u64) -> usize {
        if value < SUB_BUCKETS {
            return value as usize;
        }
        let msb = 63 - u64::from(value.leading_zeros());
        let segment = msb - u64::from(SUB_BITS);
        let sub = (value - (1 << msb)) >> (msb - u64::from(SUB_BITS));
        (SUB_BUCKETS + segment * SUB_BUCKETS + sub) as usize
    }

    /// Lower bound of the bucket at `index`
    fn bucket_floor(index: usize) -> u64 {
        let index = index as u64;
        if index < SUB_BUCKETS {
            return index;
        }
        let segment = (index - SUB_BUCKETS) / SUB_BUCKETS;
        let sub = (index - SUB_BUCKETS) % SUB_BUCKETS;
        let msb = segment + u64::from(SUB_BITS);
        (1 << msb) + (sub << (msb - u64::from(SUB_BITS)))
    }

    /// Record one value; O(1) amortized
    pub fn record(&mut self, value: u64) {
        let index = Self::index_of(value);
        if index >= self.counts.len() {
            self.counts.resize(index + 1, 0);
        }
        self.counts[index] += 1;
        self.count += 1;
        self.sum = self.sum.saturating_add(value);
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    /// Record a duration in microseconds
    pub fn record_duration(&mut self, duration: Duration) {
        self.record(u64::try_from(duration.as_micros()).unwrap_or(u64::MAX));
    }

    /// Values recorded
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Smallest recorded value, None when empty
    #[must_use]
    pub fn min(&self) -> Option<u64> {
        (self.count > 0).then_some(self.min)
    }

    /// Largest recorded value, None when empty
    #[must_use]
    pub fn max(&self) -> Option<u64> {
        (self.count > 0).then_some(self.max)
    }

    /// Arithmetic mean of recorded values, None when empty
    #[must_use]
    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum as f64 / self.count as f64)
    }

    /// Value at quantile `q` in `[0, 1]`, None when empty
    ///
    /// Returns the floor of the bucket holding the rank, clamped to the
    /// observed min/max so the readout never invents values outside the
    /// recorded range.
    #[must_use]
    pub fn quantile(&self, q: f64) -> Option<u64> {
        if self.count == 0 {
            return None;
        }
        let rank = ((q.clamp(0.0, 1.0) * self.count as f64).ceil() as u64).max(1);
        let mut seen = 0u64;
        for (index, &bucket) in self.counts.iter().enumerate() {
            seen += bucket;
            if seen >= rank {
                return Some(Self::bucket_floor(index).clamp(self.min, self.max));
            }
        }
        Some(self.max)
    }

    /// Bucket-wise addition; associative and commutative
    pub fn merge(&mut self, other: &Self) {
        if other.counts.len() > self.counts.len() {
            self.counts.resize(other.counts.len(), 0);
        }
        for (mine, theirs) in self.counts.iter_mut().zip(other.counts.iter()) {
            *mine += theirs;
        }
        self.count += other.count;
        self.sum = self.sum.saturating_add(other.sum);
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }
}

/// Point-in-time aggregation snapshot; also the report-sink surface
///
/// Serialization to JSON/CSV/Prometheus is an external exporter concern;
/// this struct only guarantees a complete, serde-able view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AggregatedReport {
    /// Outcomes folded in (success + failed + cancelled)
    pub total: u64,
    /// Requests that completed successfully
    pub success: u64,
    /// Requests that failed terminally, by error classification
    pub failed_by_kind: HashMap<ErrorKind, u64>,
    /// Requests cancelled before reaching a terminal backend response
    pub cancelled: u64,
    /// Attempts across all outcomes, retries included
    pub attempts: u64,
    /// Tokens generated by successful requests
    pub tokens: u64,
    /// Time to first token, microseconds
    pub ttft: LatencyHistogram,
    /// Total request duration, microseconds
    pub total_latency: LatencyHistogram,
    /// Inter-token gaps, microseconds
    pub inter_token: LatencyHistogram,
    /// Per-request throughput, milli-tokens/second
    pub tokens_per_second: LatencyHistogram,
}

impl AggregatedReport {
    /// Create an empty report
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests that failed terminally
    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failed_by_kind.values().sum()
    }

    /// Fraction of folded outcomes that succeeded
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.success as f64 / self.total as f64
    }

    /// Fold one outcome; O(1) in the number of outcomes already seen
    pub fn fold(&mut self, outcome: &Outcome) {
        self.total += 1;
        self.attempts += outcome.attempts as u64;
        match &outcome.status {
            OutcomeStatus::Success => {
                self.success += 1;
                if let Some(metrics) = &outcome.metrics {
                    if let Some(ttft) = metrics.ttft {
                        self.ttft.record_duration(ttft);
                    }
                    self.total_latency.record_duration(metrics.total);
                    for gap in &metrics.inter_token {
                        self.inter_token.record_duration(*gap);
                    }
                    self.tokens += metrics.tokens as u64;
                    self.tokens_per_second
                        .record((metrics.tokens_per_second() * 1000.0) as u64);
                }
            }
            OutcomeStatus::Failed(kind) => {
                *self.failed_by_kind.entry(*kind).or_insert(0) += 1;
            }
            OutcomeStatus::Cancelled => {
                self.cancelled += 1;
            }
        }
    }

    /// Combine with another report; associative and commutative
    pub fn merge(&mut self, other: &Self) {
        self.total += other.total;
        self.success += other.success;
        self.cancelled += other.cancelled;
        self.attempts += other.attempts;
        self.tokens += other.tokens;
        for (kind, count) in &other.failed_by_kind {
            *self.failed_by_kind.entry(*kind).or_insert(0) += count;
        }
        self.ttft.merge(&other.ttft);
        self.total_latency.merge(&other.total_latency);
        self.inter_token.merge(&other.inter_token);
        self.tokens_per_second.merge(&other.tokens_per_second);
    }
}

/// Thread-safe aggregator shared across worker tasks
///
/// Ingestion takes a short lock around an O(1) fold; snapshots clone the
/// accumulated state out so readers never hold up writers for longer than
/// a copy. For fully contention-free sharding, give each worker its own
/// aggregator and [`merge`](AggregatedReport::merge) at the end.
#[derive(Debug, Default)]
pub struct MetricsAggregator {
    inner: Mutex<AggregatedReport>,
}

impl MetricsAggregator {
    /// Create an empty aggregator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one outcome in
    pub fn record(&self, outcome: &Outcome) {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .fold(outcome);
    }

    /// Point-in-time copy of the accumulated report
    #[must_use]
    pub fn snapshot(&self) -> AggregatedReport {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Merge a sharded report into this aggregator
    pub fn absorb(&self, report: &AggregatedReport) {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .merge(report);
    }

    /// Consume the aggregator, yielding the final report
    #[must_use]
    pub fn into_report(self) -> AggregatedReport {
        self.inner
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
