//! Benchmark statistics.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Counters and timings of one benchmark run.
///
/// Mutated only by the loop that owns it. Parallel runs build one per worker
/// and merge them after every worker joined.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub requests_total: u64,
    pub requests_succeeded: u64,
    pub requests_failed_validation: u64,
    pub requests_failed_other: u64,
    /// Logical requests completed; a batch of N counts N.
    pub units_of_work: u64,
    /// Sum of per-iteration latencies.
    pub busy_secs: f64,
    pub wall_secs: f64,
    /// Fixed by [`Stats::finalize`] or by a parallel merge.
    pub mean_latency_secs: f64,
    /// Failure count per failure kind.
    #[serde(default)]
    pub failures_by_kind: BTreeMap<String, u64>,
    #[serde(default)]
    pub last_failure: Option<String>,
    #[serde(default)]
    pub cancelled: bool,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self, units: u64, latency: Duration) {
        self.requests_total += 1;
        self.requests_succeeded += 1;
        self.units_of_work += units;
        self.busy_secs += latency.as_secs_f64();
    }

    pub fn record_validation_failure(&mut self, reason: String, latency: Duration) {
        self.requests_total += 1;
        self.requests_failed_validation += 1;
        self.busy_secs += latency.as_secs_f64();
        self.record_failure("validation", reason);
    }

    pub fn record_transport_failure(&mut self, kind: &str, reason: String, latency: Duration) {
        self.requests_total += 1;
        self.requests_failed_other += 1;
        self.busy_secs += latency.as_secs_f64();
        self.record_failure(kind, reason);
    }

    fn record_failure(&mut self, kind: &str, reason: String) {
        *self.failures_by_kind.entry(kind.to_string()).or_default() += 1;
        self.last_failure = Some(reason);
    }

    /// Fixes wall time and mean latency at the end of a serial run.
    pub fn finalize(&mut self, wall: Duration) {
        self.wall_secs = wall.as_secs_f64();
        self.mean_latency_secs = if self.requests_succeeded > 0 {
            self.wall_secs / self.requests_succeeded as f64
        } else {
            0.0
        };
    }

    /// Combines per-worker stats.
    ///
    /// Counters are summed. Mean latency is the unweighted mean of the worker
    /// means. Wall time is measured by the caller across all workers.
    pub fn merge(workers: &[Stats], wall: Duration) -> Stats {
        let mut merged = Stats::new();
        for stats in workers {
            merged.requests_total += stats.requests_total;
            merged.requests_succeeded += stats.requests_succeeded;
            merged.requests_failed_validation += stats.requests_failed_validation;
            merged.requests_failed_other += stats.requests_failed_other;
            merged.units_of_work += stats.units_of_work;
            merged.busy_secs += stats.busy_secs;
            merged.mean_latency_secs += stats.mean_latency_secs;
            for (kind, count) in &stats.failures_by_kind {
                *merged.failures_by_kind.entry(kind.clone()).or_default() += count;
            }
            if stats.last_failure.is_some() {
                merged.last_failure.clone_from(&stats.last_failure);
            }
            merged.cancelled |= stats.cancelled;
        }
        if !workers.is_empty() {
            merged.mean_latency_secs /= workers.len() as f64;
        }
        merged.wall_secs = wall.as_secs_f64();
        merged
    }

    pub fn requests_failed(&self) -> u64 {
        self.requests_failed_validation + self.requests_failed_other
    }

    pub fn wall_time(&self) -> Duration {
        Duration::from_secs_f64(self.wall_secs.max(0.0))
    }

    pub fn mean_latency(&self) -> Duration {
        Duration::from_secs_f64(self.mean_latency_secs.max(0.0))
    }

    /// Units of work per wall-clock second.
    pub fn throughput(&self) -> f64 {
        if self.wall_secs > 0.0 {
            self.units_of_work as f64 / self.wall_secs
        } else {
            0.0
        }
    }

    /// Successes over `total + 1`, so an empty run reads 0 rather than NaN.
    pub fn success_rate(&self) -> f64 {
        self.requests_succeeded as f64 / (self.requests_total + 1) as f64
    }

    /// Share of attempts that failed with `kind`.
    pub fn failure_rate(&self, kind: &str) -> f64 {
        let count = self.failures_by_kind.get(kind).copied().unwrap_or(0);
        if self.requests_total > 0 {
            count as f64 / self.requests_total as f64
        } else {
            0.0
        }
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "- Took: {:.1} seconds", self.wall_secs)?;
        writeln!(f, "- Total exchanges: {}", self.requests_total)?;
        writeln!(f, "- Units of work: {}", self.units_of_work)?;
        writeln!(f, "- Success rate: {:.3}%", self.success_rate() * 100.0)?;
        for kind in self.failures_by_kind.keys() {
            writeln!(
                f,
                "- Failed ({}): {:.3}%",
                kind,
                self.failure_rate(kind) * 100.0
            )?;
        }
        writeln!(
            f,
            "- Mean latency: {:.1} microseconds",
            self.mean_latency_secs * 1e6
        )?;
        write!(f, "- Mean bandwidth: {:.1} units/s", self.throughput())?;
        if let Some(ref failure) = self.last_failure {
            write!(f, "\n- Last failure: {}", failure)?;
        }
        if self.cancelled {
            write!(f, "\n- Cancelled before the budget was spent")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_stats() {
        let mut stats = Stats::new();
        stats.finalize(Duration::from_secs(1));
        assert_eq!(stats.mean_latency_secs, 0.0);
        assert_eq!(stats.success_rate(), 0.0);
        assert_eq!(stats.throughput(), 0.0);
        assert_eq!(stats.failure_rate("timeout"), 0.0);
    }

    #[test]
    fn test_derived_metrics() {
        let mut stats = Stats::new();
        for _ in 0..3 {
            stats.record_success(8, Duration::from_millis(10));
        }
        stats.record_transport_failure("timeout", "no response".into(), Duration::from_millis(50));
        stats.finalize(Duration::from_secs(2));

        assert_eq!(stats.requests_total, 4);
        assert_eq!(stats.units_of_work, 24);
        assert_eq!(stats.throughput(), 12.0);
        assert_eq!(stats.success_rate(), 3.0 / 5.0);
        assert!((stats.mean_latency_secs - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.failure_rate("timeout"), 0.25);
        assert_eq!(stats.last_failure.as_deref(), Some("no response"));
    }

    #[test]
    fn test_merge_averages_means() {
        let mut a = Stats::new();
        a.record_success(1, Duration::from_millis(1));
        a.mean_latency_secs = 0.002;
        let mut b = Stats::new();
        b.record_success(1, Duration::from_millis(1));
        b.record_validation_failure("wrong sum".into(), Duration::from_millis(1));
        b.mean_latency_secs = 0.004;

        let merged = Stats::merge(&[a, b], Duration::from_secs(1));
        assert_eq!(merged.requests_total, 3);
        assert_eq!(merged.requests_succeeded, 2);
        assert_eq!(merged.requests_failed_validation, 1);
        assert!((merged.mean_latency_secs - 0.003).abs() < 1e-12);
        assert_eq!(merged.wall_secs, 1.0);
        assert_eq!(merged.failures_by_kind.get("validation"), Some(&1));
    }

    #[test]
    fn test_display() {
        let mut stats = Stats::new();
        stats.record_success(1, Duration::from_millis(1));
        stats.finalize(Duration::from_millis(500));
        let text = stats.to_string();
        assert!(text.contains("Total exchanges: 1"));
        assert!(text.contains("Mean bandwidth: 2.0 units/s"));
    }

    #[test]
    fn test_display_counts_units_of_work() {
        let mut stats = Stats::new();
        stats.record_success(8, Duration::from_millis(1));
        stats.finalize(Duration::from_secs(1));
        let text = stats.to_string();
        assert!(text.contains("Total exchanges: 1"));
        assert!(text.contains("Mean bandwidth: 8.0 units/s"));
    }

    proptest! {
        #[test]
        fn test_counters_add_up(outcomes in prop::collection::vec(0u8..3, 0..200)) {
            let mut stats = Stats::new();
            for outcome in &outcomes {
                let latency = Duration::from_micros(10);
                match outcome {
                    0 => stats.record_success(1, latency),
                    1 => stats.record_validation_failure("bad".into(), latency),
                    _ => stats.record_transport_failure("connection", "down".into(), latency),
                }
            }
            stats.finalize(Duration::from_millis(5));

            prop_assert_eq!(
                stats.requests_succeeded + stats.requests_failed_validation + stats.requests_failed_other,
                stats.requests_total
            );
            prop_assert_eq!(stats.requests_total, outcomes.len() as u64);
            prop_assert!(stats.mean_latency_secs >= 0.0);
            prop_assert!(stats.success_rate() < 1.0);
        }
    }
}
