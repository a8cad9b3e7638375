//! JSON report of a whole benchmark session.

use crate::error::RunnerError;
use crate::stats::Stats;
use crate::workload::Suite;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One suite run with one worker count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteReport {
    pub suite: Suite,
    pub workers: usize,
    pub stats: Stats,
    pub throughput: f64,
    pub success_rate: f64,
}

impl SuiteReport {
    pub fn new(suite: Suite, workers: usize, stats: Stats) -> Self {
        Self {
            suite,
            workers,
            throughput: stats.throughput(),
            success_rate: stats.success_rate(),
            stats,
        }
    }
}

/// All runs of a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub target: String,
    pub framing: String,
    pub runs: Vec<SuiteReport>,
}

impl Report {
    pub fn new(target: impl Into<String>, framing: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            framing: framing.into(),
            runs: Vec::new(),
        }
    }

    pub fn push(&mut self, run: SuiteReport) {
        self.runs.push(run);
    }

    /// Writes the report as pretty-printed JSON.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), RunnerError> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| RunnerError::Report(path.to_path_buf(), e))
    }
}
