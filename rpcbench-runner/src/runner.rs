//! Timed request loops, serial and fanned out across worker threads.

use crate::error::{ConfigError, RunnerError};
use crate::stats::Stats;
use rpcbench_client::ClientError;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Outcome of one workload iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt {
    /// Completed, with the number of logical requests it covered.
    Success(u64),
    /// A response arrived but failed a check.
    ValidationFailure(String),
    /// Anything else: connection, timeout, malformed frame, remote error.
    TransportFailure { kind: &'static str, reason: String },
}

impl Attempt {
    pub fn is_success(&self) -> bool {
        matches!(self, Attempt::Success(_))
    }
}

/// Maps a call outcome to an [`Attempt`].
pub trait Classify {
    fn classify(self) -> Attempt;
}

impl Classify for ClientError {
    fn classify(self) -> Attempt {
        if self.is_validation() {
            Attempt::ValidationFailure(self.to_string())
        } else {
            Attempt::TransportFailure {
                kind: self.kind(),
                reason: self.to_string(),
            }
        }
    }
}

impl Classify for Result<u64, ClientError> {
    fn classify(self) -> Attempt {
        match self {
            Ok(units) => Attempt::Success(units),
            Err(e) => e.classify(),
        }
    }
}

/// Something the runner can call in a loop.
pub trait Workload {
    fn attempt(&mut self) -> Attempt;
}

impl<W: Workload + ?Sized> Workload for Box<W> {
    fn attempt(&mut self) -> Attempt {
        (**self).attempt()
    }
}

/// Workload backed by a closure, see [`from_fn`].
pub struct FnWorkload<F>(F);

impl<F: FnMut() -> Attempt> Workload for FnWorkload<F> {
    fn attempt(&mut self) -> Attempt {
        (self.0)()
    }
}

/// Wraps a closure as a [`Workload`].
pub fn from_fn<F: FnMut() -> Attempt>(f: F) -> FnWorkload<F> {
    FnWorkload(f)
}

/// Shared stop flag, checked between iterations.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Clears the flag so the next run starts fresh.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Budgets shared by every loop of a run.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Iterations per loop.
    pub requests: u64,
    /// Time budget per loop.
    pub duration: Duration,
    /// Log progress this often, if set.
    pub progress_interval: Option<Duration>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            requests: 100_000,
            duration: Duration::from_secs(10),
            progress_interval: None,
        }
    }
}

impl RunnerConfig {
    pub fn new(requests: u64, duration: Duration) -> Self {
        Self {
            requests,
            duration,
            progress_interval: None,
        }
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = Some(interval);
        self
    }
}

/// Drives workloads and collects [`Stats`].
#[derive(Debug, Clone, Default)]
pub struct BenchmarkRunner {
    config: RunnerConfig,
    cancel: CancelFlag,
}

impl BenchmarkRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            cancel: CancelFlag::new(),
        }
    }

    /// Shares an existing flag, e.g. one wired to Ctrl-C.
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    /// Runs `workload` until the request or time budget is spent.
    pub fn run_serial<W: Workload + ?Sized>(&self, workload: &mut W) -> Stats {
        self.run_loop(workload, None)
    }

    /// Runs one loop per worker on its own thread.
    ///
    /// `make_workload` is called on the worker thread with the worker index,
    /// so every worker owns its own connection.
    pub fn run_parallel<F, W>(&self, workers: usize, make_workload: F) -> Result<Stats, RunnerError>
    where
        F: Fn(usize) -> W + Sync,
        W: Workload,
    {
        if workers == 0 {
            return Err(ConfigError::Validation("at least one worker is required".to_string()).into());
        }
        if workers == 1 {
            let mut workload = make_workload(0);
            return Ok(self.run_serial(&mut workload));
        }

        let slots: Vec<AtomicU64> = (0..workers).map(|_| AtomicU64::new(0)).collect();
        let started = Instant::now();

        let results = thread::scope(|scope| {
            let handles: Vec<_> = slots
                .iter()
                .enumerate()
                .map(|(index, slot)| {
                    let make_workload = &make_workload;
                    thread::Builder::new()
                        .name(format!("rpcbench-worker-{}", index))
                        .spawn_scoped(scope, move || {
                            let mut workload = make_workload(index);
                            self.run_loop(&mut workload, Some(slot))
                        })
                })
                .collect();

            if let Some(interval) = self.config.progress_interval {
                self.watch_progress(&slots, &handles, interval, started);
            }

            // Join every worker before looking at any result.
            let joined: Vec<_> = handles
                .into_iter()
                .enumerate()
                .map(|(index, handle)| match handle {
                    Ok(handle) => handle.join().map_err(|_| RunnerError::WorkerPanicked(index)),
                    Err(e) => {
                        tracing::error!("Failed to spawn worker {}: {}", index, e);
                        Err(RunnerError::WorkerPanicked(index))
                    }
                })
                .collect();
            joined.into_iter().collect::<Result<Vec<_>, _>>()
        })?;

        let stats = Stats::merge(&results, started.elapsed());
        tracing::debug!(
            "{} workers finished: {} requests in {:.2}s",
            workers,
            stats.requests_total,
            stats.wall_secs
        );
        Ok(stats)
    }

    fn run_loop<W: Workload + ?Sized>(&self, workload: &mut W, slot: Option<&AtomicU64>) -> Stats {
        let mut stats = Stats::new();
        let started = Instant::now();
        // Serial runs report their own progress.
        let mut next_report = match (slot, self.config.progress_interval) {
            (None, Some(interval)) => Some(started + interval),
            _ => None,
        };

        for _ in 0..self.config.requests {
            if self.cancel.is_cancelled() {
                stats.cancelled = true;
                break;
            }

            let t1 = Instant::now();
            let attempt = workload.attempt();
            let latency = t1.elapsed();

            match attempt {
                Attempt::Success(units) => stats.record_success(units, latency),
                Attempt::ValidationFailure(reason) => {
                    stats.record_validation_failure(reason, latency)
                }
                Attempt::TransportFailure { kind, reason } => {
                    stats.record_transport_failure(kind, reason, latency)
                }
            }

            if let Some(slot) = slot {
                slot.store(stats.requests_total, Ordering::Relaxed);
            }
            if let (Some(at), Some(interval)) = (next_report, self.config.progress_interval) {
                if Instant::now() >= at {
                    tracing::info!(
                        "Progress: {} requests ({} ok)",
                        stats.requests_total,
                        stats.requests_succeeded
                    );
                    next_report = Some(at + interval);
                }
            }
            if started.elapsed() > self.config.duration {
                break;
            }
        }

        stats.finalize(started.elapsed());
        stats
    }

    fn watch_progress<T>(
        &self,
        slots: &[AtomicU64],
        handles: &[std::io::Result<thread::ScopedJoinHandle<'_, T>>],
        interval: Duration,
        started: Instant,
    ) {
        loop {
            let running = handles.iter().any(|handle| match handle {
                Ok(handle) => !handle.is_finished(),
                Err(_) => false,
            });
            if !running {
                return;
            }
            thread::sleep(interval);
            let done: u64 = slots.iter().map(|slot| slot.load(Ordering::Relaxed)).sum();
            tracing::info!(
                "Progress: {} requests across {} workers in {:.1}s",
                done,
                slots.len(),
                started.elapsed().as_secs_f64()
            );
        }
    }
}
