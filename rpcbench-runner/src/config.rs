//! Benchmark configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via RPCBENCH_CONFIG)
//! 3. Environment variables

use crate::error::ConfigError;
use crate::runner::RunnerConfig;
use crate::workload::Suite;
use rpcbench_client::{ConnectionConfig, TlsClientConfig};
use rpcbench_protocol::{Framing, DEFAULT_PORT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Benchmark configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server to benchmark.
    pub target: TargetConfig,
    /// Budgets and suites.
    pub bench: BenchConfig,
    /// Report output.
    pub report: ReportConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("RPCBENCH_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        self.target.apply_env_overrides();
        self.bench.apply_env_overrides();
        self.report.apply_env_overrides();
    }

    /// Rejects budgets and combinations that cannot run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.target.validate()?;
        self.bench.validate()
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Ok(())
    }
}

/// Target server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub host: String,
    pub port: u16,
    pub framing: Framing,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    /// Wait for the first bytes of a raw-framed response.
    pub raw_read_timeout_ms: u64,
    pub read_buffer_size: usize,
    /// Fixed request id. Defaults to the process id.
    pub identity: Option<i64>,
    pub tls: TlsConfig,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            framing: Framing::Http,
            connect_timeout_ms: 10_000,
            request_timeout_ms: 30_000,
            raw_read_timeout_ms: 50,
            read_buffer_size: 4096,
            identity: None,
            tls: TlsConfig::default(),
        }
    }
}

impl TargetConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("RPCBENCH_HOST") {
            self.host = host;
        }

        if let Ok(port) = std::env::var("RPCBENCH_PORT") {
            if let Ok(parsed) = port.parse() {
                self.port = parsed;
            }
        }

        if let Ok(framing) = std::env::var("RPCBENCH_FRAMING") {
            if let Ok(parsed) = framing.parse() {
                self.framing = parsed;
            }
        }

        self.tls.apply_env_overrides();
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tls.enabled && self.framing == Framing::Raw {
            return Err(ConfigError::Validation(
                "TLS requires HTTP framing".to_string(),
            ));
        }
        Ok(())
    }

    /// Request id used by the workloads.
    pub fn identity(&self) -> i64 {
        self.identity.unwrap_or_else(|| i64::from(std::process::id()))
    }

    /// Builds the client connection configuration.
    pub fn connection_config(&self) -> ConnectionConfig {
        let mut config = ConnectionConfig::new(self.host.clone(), self.port)
            .with_framing(self.framing)
            .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms))
            .with_request_timeout(Duration::from_millis(self.request_timeout_ms))
            .with_raw_read_timeout(Duration::from_millis(self.raw_read_timeout_ms))
            .with_read_buffer_size(self.read_buffer_size);
        if self.tls.enabled {
            config = config.with_tls(self.tls.client_config());
        }
        config
    }
}

/// TLS configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Enable TLS.
    pub enabled: bool,
    /// Path to PEM-encoded CA certificate(s). Bundled web roots if unset.
    pub ca_cert_path: Option<PathBuf>,
    /// Path to PEM-encoded client certificate (mTLS).
    pub client_cert_path: Option<PathBuf>,
    /// Path to PEM-encoded client private key (mTLS).
    pub client_key_path: Option<PathBuf>,
    /// Skip server certificate verification.
    pub insecure: bool,
    /// SNI override.
    pub server_name: Option<String>,
    pub session_resumption: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ca_cert_path: None,
            client_cert_path: None,
            client_key_path: None,
            insecure: false,
            server_name: None,
            session_resumption: true,
        }
    }
}

impl TlsConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(enabled) = std::env::var("RPCBENCH_TLS") {
            self.enabled = enabled == "1" || enabled.to_lowercase() == "true";
        }
        if let Ok(insecure) = std::env::var("RPCBENCH_INSECURE") {
            self.insecure = insecure == "1" || insecure.to_lowercase() == "true";
        }
    }

    pub fn client_config(&self) -> TlsClientConfig {
        TlsClientConfig {
            enabled: self.enabled,
            ca_cert_path: self.ca_cert_path.clone(),
            client_cert_path: self.client_cert_path.clone(),
            client_key_path: self.client_key_path.clone(),
            insecure: self.insecure,
            server_name: self.server_name.clone(),
            session_resumption: self.session_resumption,
        }
    }
}

/// Budgets and suites.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Worker counts, each run in turn.
    pub workers: Vec<usize>,
    /// Iterations per worker.
    pub requests: u64,
    /// Time budget per worker.
    pub seconds: f64,
    pub suites: Vec<Suite>,
    /// Copies of the mixed block per batch.
    pub batch_blocks: usize,
    pub progress_interval_ms: Option<u64>,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            workers: vec![1, 2, 4, 8, 16],
            requests: 100_000,
            seconds: 10.0,
            suites: Suite::ALL.to_vec(),
            batch_blocks: 1,
            progress_interval_ms: None,
        }
    }
}

impl BenchConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(workers) = std::env::var("RPCBENCH_WORKERS") {
            if let Ok(parsed) = parse_list(&workers) {
                self.workers = parsed;
            }
        }

        if let Ok(requests) = std::env::var("RPCBENCH_REQUESTS") {
            if let Ok(n) = requests.parse() {
                self.requests = n;
            }
        }

        if let Ok(seconds) = std::env::var("RPCBENCH_SECONDS") {
            if let Ok(secs) = seconds.parse() {
                self.seconds = secs;
            }
        }

        if let Ok(suites) = std::env::var("RPCBENCH_SUITES") {
            if let Ok(parsed) = parse_list(&suites) {
                self.suites = parsed;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers.is_empty() || self.workers.contains(&0) {
            return Err(ConfigError::Validation(
                "worker counts must be non-empty and positive".to_string(),
            ));
        }
        if self.requests == 0 {
            return Err(ConfigError::Validation(
                "request budget must be positive".to_string(),
            ));
        }
        if !(self.seconds > 0.0 && self.seconds.is_finite()) {
            return Err(ConfigError::Validation(
                "time budget must be positive".to_string(),
            ));
        }
        if self.suites.is_empty() {
            return Err(ConfigError::Validation("no suites selected".to_string()));
        }
        Ok(())
    }

    /// Returns the time budget as Duration.
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.seconds)
    }

    pub fn runner_config(&self) -> RunnerConfig {
        let config = RunnerConfig::new(self.requests, self.duration());
        match self.progress_interval_ms {
            Some(ms) if ms > 0 => config.with_progress_interval(Duration::from_millis(ms)),
            _ => config,
        }
    }
}

/// Report output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Write a JSON report here after all suites ran.
    pub json_path: Option<PathBuf>,
}

impl ReportConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("RPCBENCH_REPORT") {
            self.json_path = Some(PathBuf::from(path));
        }
    }
}

fn parse_list<T: std::str::FromStr>(value: &str) -> Result<Vec<T>, T::Err> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::parse)
        .collect()
}
