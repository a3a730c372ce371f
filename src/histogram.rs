//! Latency tracking using HDR Histogram.
//!
//! Percentiles come from an HdrHistogram digest so memory stays bounded on
//! long replays. Count, min, max, mean and population standard deviation are
//! tracked exactly alongside the digest.
//!
//! # Percentile rule
//! Nearest rank over the digest: the reported value is the highest value
//! equivalent (at 3 significant digits) to the sample at rank
//! `ceil(q * count)`, clamped to the exact observed `[min, max]`.

use hdrhistogram::{CreationError, Histogram};
use serde::Serialize;

/// Lowest latency resolved by the digest: 1µs.
const LOWEST_DISCERNIBLE_NS: u64 = 1_000;

/// Highest latency tracked by the digest: 1 hour. Larger samples saturate.
const HIGHEST_TRACKABLE_NS: u64 = 3_600_000_000_000;

const SIGNIFICANT_DIGITS: u8 = 3;

/// Latency statistics for a set of requests, in nanoseconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyStats {
    pub count: u64,
    pub min: u64,
    pub max: u64,
    pub mean: f64,
    pub stddev: f64,
    pub p50: u64,
    pub p75: u64,
    pub p90: u64,
    pub p95: u64,
    pub p99: u64,
}

/// Latency recorder. Not synchronized; owned by the completion tracker.
pub struct LatencyHistogram {
    digest: Histogram<u64>,
    count: u64,
    min: u64,
    max: u64,
    mean: f64,
    // Sum of squared deviations from the running mean (Welford).
    m2: f64,
}

impl LatencyHistogram {
    pub fn new() -> Result<Self, CreationError> {
        let digest = Histogram::new_with_bounds(
            LOWEST_DISCERNIBLE_NS,
            HIGHEST_TRACKABLE_NS,
            SIGNIFICANT_DIGITS,
        )?;

        Ok(Self {
            digest,
            count: 0,
            min: u64::MAX,
            max: 0,
            mean: 0.0,
            m2: 0.0,
        })
    }

    /// Record one latency sample in nanoseconds.
    pub fn record(&mut self, latency_ns: u64) {
        self.digest.saturating_record(latency_ns);

        self.count += 1;
        self.min = self.min.min(latency_ns);
        self.max = self.max.max(latency_ns);

        let value = latency_ns as f64;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn len(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Value at quantile `q` in `[0, 1]`. None when empty.
    pub fn percentile(&self, q: f64) -> Option<u64> {
        if self.is_empty() {
            return None;
        }
        let value = self.digest.value_at_quantile(q.clamp(0.0, 1.0));
        Some(value.clamp(self.min, self.max))
    }

    /// Returns None if no samples have been recorded.
    pub fn stats(&self) -> Option<LatencyStats> {
        if self.is_empty() {
            return None;
        }

        let at = |q: f64| self.percentile(q).unwrap_or(self.max);

        Some(LatencyStats {
            count: self.count,
            min: self.min,
            max: self.max,
            mean: self.mean,
            stddev: (self.m2 / self.count as f64).sqrt(),
            p50: at(0.50),
            p75: at(0.75),
            p90: at(0.90),
            p95: at(0.95),
            p99: at(0.99),
        })
    }
}

/// Nanoseconds to fractional milliseconds.
pub fn ns_to_ms(ns: f64) -> f64 {
    ns / 1_000_000.0
}
