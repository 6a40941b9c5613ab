//! ChainStream CLI: stream blockchain logs for a block range.
//!
//! # Commands
//! ```text
//! chainstream logs-in-range --from <block> --to <block> [--topic <hash>]... [--address <addr>]...
//! chainstream info
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};

use chainstream_core::TimeoutPolicy;

mod cmd_logs;
mod logging;

const TRANSFER_TOPIC: &str = "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

#[derive(Parser)]
#[command(
    name = "chainstream",
    about = "Ack-gated log range streaming over HyperSync",
    long_about = "
ChainStream CLI: stream event logs for a block range from a HyperSync server,
one acknowledged batch at a time.

ENVIRONMENT VARIABLES:
  CHAINSTREAM_URL          HyperSync endpoint (default: https://eth.hypersync.xyz)
  ENVIO_API_TOKEN          Bearer token sent with every query
  CHAINSTREAM_TIMEOUT_MS   Per-request HTTP timeout in milliseconds
  RUST_LOG                 Overrides --log-level and --log-directive
",
    version
)]
struct Cli {
    /// Log level: trace | debug | info | warn | error
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Extra filter directive, repeatable: e.g. chainstream_core=debug
    #[arg(long = "log-directive", global = true)]
    log_directives: Vec<String>,

    /// Emit JSON structured logs
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream logs for [from, to) and report totals
    #[command(name = "logs-in-range")]
    LogsInRange {
        /// HyperSync endpoint (overrides CHAINSTREAM_URL)
        #[arg(long)]
        url: Option<String>,
        /// First block, inclusive
        #[arg(long, default_value_t = 20_000_000)]
        from: u64,
        /// Last block, exclusive
        #[arg(long, default_value_t = 20_001_000)]
        to: u64,
        /// Blocks per request
        #[arg(long, default_value_t = 50)]
        batch_size: u64,
        /// Batches that may be outstanding without an ack
        #[arg(long, default_value_t = 1)]
        window: usize,
        /// Accepted topic0 values (default: ERC-20 Transfer)
        #[arg(long = "topic", default_values_t = [TRANSFER_TOPIC.to_string()])]
        topics: Vec<String>,
        /// Only logs from these contracts
        #[arg(long = "address")]
        addresses: Vec<String>,
        /// Seconds to wait for the next batch before giving up
        #[arg(long, default_value_t = 150)]
        timeout_secs: u64,
        /// What to do when the wait expires: cancel | warn
        #[arg(long, default_value_t = TimeoutPolicy::Cancel)]
        on_timeout: TimeoutPolicy,
        /// Retries per batch on transient backend errors
        #[arg(long, default_value_t = 3)]
        retries: u32,
    },

    /// Show version and defaults
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init_tracing(&logging::LogConfig {
        level: cli.log_level,
        directives: cli.log_directives,
        json: cli.json_logs,
    });

    match cli.command {
        Commands::LogsInRange {
            url,
            from,
            to,
            batch_size,
            window,
            topics,
            addresses,
            timeout_secs,
            on_timeout,
            retries,
        } => {
            cmd_logs::run(cmd_logs::LogsArgs {
                url,
                from,
                to,
                batch_size,
                window,
                topics,
                addresses,
                timeout_secs,
                on_timeout,
                retries,
            })
            .await
        }

        Commands::Info => cmd_info(),
    }
}

fn cmd_info() -> Result<()> {
    let config = chainstream_hypersync::HyperSyncConfig::from_env();
    println!("ChainStream v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Backend:");
    println!("  url              {}", config.url);
    println!("  api token        {}", if config.api_token.is_some() { "set" } else { "not set" });
    println!("  request timeout  {} ms", config.request_timeout_ms);
    println!();
    println!("Stream defaults:");
    let options = chainstream_core::StreamOptions::default();
    println!("  batch size       {} blocks", options.batch_size);
    println!("  window           {}", options.window);
    println!(
        "  inactivity       {} s",
        chainstream_core::consumer::DEFAULT_INACTIVITY_TIMEOUT.as_secs()
    );
    Ok(())
}
