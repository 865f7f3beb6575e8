//! # Client Binary Entry Point
//!
//! Thin wrapper that wires the mailbox client together and feeds it commands
//! from stdin.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin client -- --config config/client.toml
//! ```
//!
//! Then, one command per line:
//! ```text
//! 0                 # register a mailbox  -> "<index> <hex address>"
//! 1 0 48656c6c6f    # write "Hello" to 0  -> "0 ok"
//! ```
//!
//! With metrics:
//! ```bash
//! cargo run --bin client -- --config config/client.toml \
//!   --metrics-output ./metrics/client.json < commands.txt
//! ```
//!
//! The client will:
//! 1. Load and validate configuration from the specified TOML file
//! 2. Load or generate its box identity
//! 3. Build the share engine and the TLS dialer
//! 4. Dispatch stdin commands until end of input
//! 5. Export metrics to JSON (if metrics-output specified)

use clap::Parser;
use env_logger::Builder;
use log::{info, LevelFilter};
use std::io::Write;
use std::sync::Arc;

use mailbox_client::client::{ClientCore, ClientMetrics, ClientMiddleware};
use mailbox_client::common::config::{load_config, ClientConfig};
use mailbox_client::common::tls::TlsDialer;
use mailbox_client::encryption::ClientIdentity;
use mailbox_client::engine::LinearShareEngine;

/// Command-line arguments for the client binary
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the client configuration file (TOML format)
    ///
    /// Example: config/client.toml
    #[arg(short, long)]
    config: String,

    /// Mailbox size in bytes (overrides mailbox.data_size)
    #[arg(long)]
    data_size: Option<u32>,

    /// Engine slots (overrides mailbox.num_slots)
    #[arg(long)]
    num_slots: Option<usize>,

    /// Path to write metrics JSON output (optional)
    #[arg(long)]
    metrics_output: Option<String>,

    /// Log level: error, warn, info, debug or trace
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,
}

/// Initialize the logging system with timestamp, level, and message formatting.
///
/// Logs go to stderr so stdout carries only command results.
/// Format: `[HH:MM:SS] [LEVEL] message`
fn init_logger(level: LevelFilter) {
    Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] [{}] {}",
                chrono::Local::now().format("%H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter_level(level)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    // Initialize logging
    init_logger(args.log_level);

    // Load client configuration from TOML file
    let mut config: ClientConfig = load_config(&args.config)?;
    if let Some(data_size) = args.data_size {
        config.mailbox.data_size = data_size;
    }
    if let Some(num_slots) = args.num_slots {
        config.mailbox.num_slots = num_slots;
    }
    config.validate()?;

    let identity = match config.identity()? {
        Some(identity) => identity,
        None => {
            let identity = ClientIdentity::generate()?;
            info!(
                "Generated client identity, public key {}",
                identity.public_key_hex()
            );
            identity
        }
    };
    let peers = config.peer_keys()?;

    let engine = LinearShareEngine::new(config.mailbox.num_slots, config.mailbox.num_existing_rows);
    let dialer = TlsDialer::from_pem_file(
        &config.servers.ca_cert,
        config.servers.server_name.clone(),
        config.connect_timeout(),
    )?;

    // Create the client core (runs the protocols)
    let core = Arc::new(
        ClientCore::new(
            config.client.name.clone(),
            config.server_pair(),
            dialer,
            engine,
            identity,
            peers,
        )
        .with_io_timeout(config.io_timeout()),
    );

    // Create the client middleware (dispatches commands)
    let mut middleware = ClientMiddleware::new(core, config.mailbox.data_size);

    // Initialize metrics if output path is specified
    let metrics = if args.metrics_output.is_some() {
        let m = Arc::new(std::sync::Mutex::new(ClientMetrics::new(
            config.client.name.clone(),
        )));
        middleware = middleware.with_metrics(m.clone());
        Some(m)
    } else {
        None
    };

    info!(
        "{} using leader {} and follower {} ({} slots)",
        config.client.name, config.servers.leader, config.servers.follower, config.mailbox.num_slots
    );

    // Run until stdin is exhausted
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    middleware.run(stdin, tokio::io::stdout()).await?;

    // Export metrics if enabled
    if let (Some(metrics), Some(output_path)) = (metrics, args.metrics_output) {
        let metrics = metrics
            .lock()
            .map_err(|_| anyhow::anyhow!("metrics lock poisoned"))?;
        metrics.export_to_json(&output_path)?;
        info!("Metrics exported to: {}", output_path);
    }

    Ok(())
}
