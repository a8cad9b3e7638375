//! rpcbench-cli - one-shot JSON-RPC calls
//!
//! Sends a single call or notification and prints the result in the
//! requested format.

mod commands;

use clap::{Parser, ValueEnum};
use colored::Colorize;
use rpcbench_client::{Client, ConnectionConfig, TlsClientConfig};
use rpcbench_protocol::{Framing, DEFAULT_PORT};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rpcbench-cli")]
#[command(about = "Send one JSON-RPC 2.0 call and print the result")]
#[command(version)]
pub struct Cli {
    /// Server host
    #[arg(long, default_value = "127.0.0.1", env = "RPCBENCH_HOST")]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "RPCBENCH_PORT")]
    port: u16,

    /// Send bare JSON instead of HTTP
    #[arg(long)]
    raw: bool,

    /// Response timeout in milliseconds
    #[arg(long, default_value_t = 30_000)]
    timeout_ms: u64,

    // ===== TLS Options =====
    /// Enable TLS connection
    #[arg(long, env = "RPCBENCH_TLS")]
    tls: bool,

    /// Path to CA certificate for server verification
    #[arg(long, env = "RPCBENCH_CA_CERT")]
    ca_cert: Option<PathBuf>,

    /// Path to client certificate (for mTLS)
    #[arg(long, env = "RPCBENCH_CLIENT_CERT")]
    client_cert: Option<PathBuf>,

    /// Path to client private key (for mTLS)
    #[arg(long, env = "RPCBENCH_CLIENT_KEY")]
    client_key: Option<PathBuf>,

    /// Skip server certificate verification (INSECURE)
    #[arg(long, short = 'k')]
    insecure: bool,

    /// Server name for TLS SNI (defaults to the host)
    #[arg(long)]
    server_name: Option<String>,

    // ===== Call =====
    /// Method name
    pub method: String,

    /// Named parameters as KEY[:TYPE]=VALUE
    pub params: Vec<String>,

    /// Positional parameter as VALUE[:TYPE] (repeatable)
    #[arg(short = 'a', long = "positional", allow_hyphen_values = true)]
    pub positional: Vec<String>,

    /// Named binary parameter read from a file, KEY=PATH (repeatable)
    #[arg(short = 'f', long = "file")]
    pub files: Vec<String>,

    /// Named image parameter read from a file, KEY=PATH (repeatable)
    #[arg(short = 'i', long = "image")]
    pub images: Vec<String>,

    /// How to print the result
    #[arg(long, value_enum, default_value_t = OutputFormat::Auto)]
    pub format: OutputFormat,

    /// Write decoded bytes, arrays or images to this file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Send as a notification (no id, no result)
    #[arg(long)]
    pub notify: bool,

    /// Fixed request id instead of a random one
    #[arg(long)]
    pub id: Option<i64>,
}

/// Result presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// The full response envelope
    Raw,
    /// The result as JSON
    Json,
    /// The result decoded from base64
    Bytes,
    /// The result decoded as an NPY array
    Array,
    /// The result decoded as an image
    Image,
    /// Sniff the result
    Auto,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    // Build TLS config if any TLS option is set
    let tls_config =
        if cli.tls || cli.ca_cert.is_some() || cli.client_cert.is_some() || cli.insecure {
            let mut tls = TlsClientConfig::new();
            tls.enabled = true;

            if let Some(ref path) = cli.ca_cert {
                tls.ca_cert_path = Some(path.clone());
            }
            if let (Some(cert), Some(key)) = (&cli.client_cert, &cli.client_key) {
                tls.client_cert_path = Some(cert.clone());
                tls.client_key_path = Some(key.clone());
            } else if cli.client_cert.is_some() || cli.client_key.is_some() {
                eprintln!(
                    "{}: --client-cert and --client-key must be used together",
                    "Error".red()
                );
                std::process::exit(1);
            }
            tls.insecure = cli.insecure;
            tls.server_name = cli.server_name.clone();

            Some(tls)
        } else {
            None
        };

    let framing = if cli.raw { Framing::Raw } else { Framing::Http };
    let mut config = ConnectionConfig::new(cli.host.clone(), cli.port)
        .with_framing(framing)
        .with_request_timeout(Duration::from_millis(cli.timeout_ms));
    if let Some(tls) = tls_config {
        config = config.with_tls(tls);
    }
    if let Err(e) = config.validate() {
        eprintln!("{}: {}", "Error".red(), e);
        std::process::exit(1);
    }

    let mut client = Client::new(config);
    if let Some(id) = cli.id {
        client = client.with_identity(id);
    }

    match commands::execute(&mut client, &cli) {
        Ok(output) => {
            println!("{}", output);
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }

    client.close();
    Ok(())
}
