//! TLS echo server (v1)
//!
//! Accepts many TLS clients on one multiplexing thread and answers their
//! messages from a fixed pool of worker threads.
//!
//! # Architecture Overview
//!
//! ```text
//!   Clients ──TLS──▶ ┌──────────┐   ready set   ┌────────────┐  WorkItem  ┌─────────┐
//!                    │  poller  │──────────────▶│ dispatcher │───────────▶│  queue  │
//!                    │ (mio)    │◀── accept ────│            │            └────┬────┘
//!                    └──────────┘   register    └─────┬──────┘                 │
//!                          ▲                          │ evict                  ▼
//!                          │ wake                     ▼                 ┌────────────┐
//!                          └──────────────────── registry ◀─ handle ──  │  workers   │
//!   Clients ◀──TLS─────────────────────────────────────────── response ─│  (N threads)│
//!                                                                        └─────┬──────┘
//!                                                                              ▼
//!                                                                        exchange log
//! ```

use std::path::PathBuf;

use clap::Parser;

use tls_echo_server::config::{load_config, AppConfig};
use tls_echo_server::observability::{logging, metrics};
use tls_echo_server::Server;

#[derive(Debug, Parser)]
#[command(name = "tls-echo-server", version, about = "Multiplexed TLS echo server")]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the certificate path from the configuration.
    #[arg(long)]
    cert: Option<PathBuf>,

    /// Override the private key path from the configuration.
    #[arg(long)]
    key: Option<PathBuf>,

    /// Print the exchange report as JSON instead of text.
    #[arg(long)]
    json_report: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };

    logging::init_logging(&config.observability.log_level)?;
    tracing::info!("tls-echo-server v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        metrics::init_metrics(config.observability.metrics_address.parse()?)?;
    }

    let cert = cli.cert.unwrap_or_else(|| PathBuf::from(&config.tls.cert_path));
    let key = cli.key.unwrap_or_else(|| PathBuf::from(&config.tls.key_path));

    tracing::info!(
        ip_address = %config.server.ip_address,
        port = config.server.port,
        max_data_size = config.server.max_data_size,
        workers = config.server.number_working_threads,
        "Configuration loaded"
    );

    let mut server = Server::bind(config.server, &cert, &key)?;
    let outcome = server.start();
    server.disconnect();
    outcome?;

    if cli.json_report {
        println!("{}", server.exchange_log().to_json()?);
    } else {
        print!("{}", server.report());
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
