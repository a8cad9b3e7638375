//! # rpcbench-runner
//!
//! Measurement side of rpcbench.
//!
//! This crate provides:
//! - `Stats`, the per-run accumulator with derived throughput and success rate
//! - `BenchmarkRunner`, serial loops and multi-worker fan-out over OS threads
//! - The canned workloads (`fresh`, `reusing`, `batch`) driving an RPC client
//! - YAML and environment configuration, and the JSON report

pub mod config;
pub mod error;
pub mod report;
pub mod runner;
pub mod stats;
pub mod workload;

pub use config::Config;
pub use error::{ConfigError, RunnerError};
pub use report::{Report, SuiteReport};
pub use runner::{
    from_fn, Attempt, BenchmarkRunner, CancelFlag, Classify, FnWorkload, RunnerConfig, Workload,
};
pub use stats::Stats;
pub use workload::{BatchWorkload, Suite, SumWorkload};
