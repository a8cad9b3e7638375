//! rpcbench - JSON-RPC benchmark driver
//!
//! Runs the configured suites against one server for every configured worker
//! count and prints throughput, latency and failure rates.

use rpcbench_runner::{BenchmarkRunner, CancelFlag, Config, Report, SuiteReport};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if RPCBENCH_CONFIG is set, then env overrides)
    let config = match Config::load() {
        Ok(c) => {
            if let Ok(path) = std::env::var("RPCBENCH_CONFIG") {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };

    if let Err(e) = config.validate() {
        tracing::error!("Invalid configuration: {}", e);
        return Err(e.into());
    }

    let target = config.target.connection_config();
    if let Err(e) = target.validate() {
        tracing::error!("Invalid target: {}", e);
        return Err(e.into());
    }
    let identity = config.target.identity();

    tracing::info!("Benchmarking {} ({})", target.addr(), target.framing);
    tracing::info!("  Suites: {:?}", config.bench.suites);
    tracing::info!("  Workers: {:?}", config.bench.workers);
    tracing::info!(
        "  Budget: {} requests or {:.1}s per worker",
        config.bench.requests,
        config.bench.seconds
    );

    // Ctrl-C stops the current run; partial stats are still reported
    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            tracing::info!("Received interrupt, stopping...");
            cancel.cancel();
        })?;
    }

    let runner = BenchmarkRunner::new(config.bench.runner_config()).with_cancel_flag(cancel.clone());
    let mut report = Report::new(target.addr(), target.framing.to_string());

    'suites: for suite in &config.bench.suites {
        for &workers in &config.bench.workers {
            println!("{} on {} workers", suite, workers);

            let stats = runner.run_parallel(workers, |_| {
                suite.workload(&target, identity, config.bench.batch_blocks)
            })?;
            println!("{}\n", stats);

            let cancelled = stats.cancelled;
            report.push(SuiteReport::new(*suite, workers, stats));
            if cancelled {
                break 'suites;
            }
        }
    }

    if let Some(ref path) = config.report.json_path {
        report.write(path)?;
        tracing::info!("Report written to {}", path.display());
    }

    Ok(())
}
