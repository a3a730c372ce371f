//! End-of-run statistics block.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::histogram::{ns_to_ms, LatencyStats};

/// Aggregate outcome of a completed replay.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub total: u64,
    pub successful: u64,
    pub errors: u64,
    /// Error count per error code, e.g. `HTTP_503` or `TIMEOUT`
    pub errors_by_kind: BTreeMap<String, u64>,
    /// Latency of every finished request, in nanoseconds
    pub latency: Option<LatencyStats>,
}

/// Latency figures converted to milliseconds for the JSON report.
#[derive(Debug, Serialize)]
struct LatencyMs {
    min: f64,
    max: f64,
    mean: f64,
    stddev: f64,
    p50: f64,
    p75: f64,
    p90: f64,
    p95: f64,
    p99: f64,
}

impl From<&LatencyStats> for LatencyMs {
    fn from(stats: &LatencyStats) -> Self {
        let ms = |ns: u64| round2(ns_to_ms(ns as f64));
        Self {
            min: ms(stats.min),
            max: ms(stats.max),
            mean: round2(ns_to_ms(stats.mean)),
            stddev: round2(ns_to_ms(stats.stddev)),
            p50: ms(stats.p50),
            p75: ms(stats.p75),
            p90: ms(stats.p90),
            p95: ms(stats.p95),
            p99: ms(stats.p99),
        }
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    total: u64,
    successful: u64,
    errors: u64,
    errors_by_kind: &'a BTreeMap<String, u64>,
    latency_ms: Option<LatencyMs>,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl RunReport {
    /// Renders the report as a JSON document with latencies in milliseconds.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&JsonReport {
            total: self.total,
            successful: self.successful,
            errors: self.errors,
            errors_by_kind: &self.errors_by_kind,
            latency_ms: self.latency.as_ref().map(LatencyMs::from),
        })
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- REPLAY SUMMARY ---")?;
        writeln!(f, "Total requests:  {}", self.total)?;
        writeln!(f, "Successful:      {}", self.successful)?;
        writeln!(f, "Errors:          {}", self.errors)?;
        for (kind, count) in &self.errors_by_kind {
            writeln!(f, "  {:<14} {}", kind, count)?;
        }

        if let Some(stats) = &self.latency {
            let ms = |ns: u64| ns_to_ms(ns as f64);
            writeln!(f, "Latency (ms):")?;
            writeln!(f, "  min:    {:.2}", ms(stats.min))?;
            writeln!(f, "  max:    {:.2}", ms(stats.max))?;
            writeln!(f, "  mean:   {:.2}", ns_to_ms(stats.mean))?;
            writeln!(f, "  stddev: {:.2}", ns_to_ms(stats.stddev))?;
            writeln!(f, "  p50:    {:.2}", ms(stats.p50))?;
            writeln!(f, "  p75:    {:.2}", ms(stats.p75))?;
            writeln!(f, "  p90:    {:.2}", ms(stats.p90))?;
            writeln!(f, "  p95:    {:.2}", ms(stats.p95))?;
            writeln!(f, "  p99:    {:.2}", ms(stats.p99))?;
        }

        write!(f, "--- END OF SUMMARY ---")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_report() -> RunReport {
        let mut errors_by_kind = BTreeMap::new();
        errors_by_kind.insert("HTTP_404".to_string(), 1);
        errors_by_kind.insert("TIMEOUT".to_string(), 2);

        RunReport {
            total: 10,
            successful: 7,
            errors: 3,
            errors_by_kind,
            latency: Some(LatencyStats {
                count: 10,
                min: 1_000_000,
                max: 60_000_000,
                mean: 12_345_678.0,
                stddev: 5_000_000.0,
                p50: 10_000_000,
                p75: 15_000_000,
                p90: 20_000_000,
                p95: 25_000_000,
                p99: 59_999_999,
            }),
        }
    }

    #[test]
    fn test_text_report_two_decimals() {
        let text = sample_report().to_string();

        assert!(text.contains("Total requests:  10"));
        assert!(text.contains("Successful:      7"));
        assert!(text.contains("Errors:          3"));
        assert!(text.contains("HTTP_404"));
        assert!(text.contains("min:    1.00"));
        assert!(text.contains("mean:   12.35"));
        assert!(text.contains("p99:    60.00"));
    }

    #[test]
    fn test_text_report_without_latency() {
        let report = RunReport {
            total: 0,
            successful: 0,
            errors: 0,
            errors_by_kind: BTreeMap::new(),
            latency: None,
        };
        let text = report.to_string();
        assert!(!text.contains("Latency"));
    }

    #[test]
    fn test_json_report_uses_milliseconds() {
        let json = sample_report().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["total"], 10);
        assert_eq!(value["errors_by_kind"]["TIMEOUT"], 2);
        assert_eq!(value["latency_ms"]["min"], 1.0);
        assert_eq!(value["latency_ms"]["mean"], 12.35);
    }
}
