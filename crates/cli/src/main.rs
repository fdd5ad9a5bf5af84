use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use warpscan_core::{config::AppConfig, logging::init_logging, CoreContext};

mod commands;
use commands::{
    handle_config_command, run_cache_clear, run_cache_stats, run_detect_node, run_gas, run_query, run_status, run_watch,
    utils::{print_error, OutputFormat},
    ConfigCommands, WatchOptions,
};

#[derive(Parser)]
#[command(name = "warpscan")]
#[command(about = "warpscan - terminal ledger explorer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the configuration file
    #[arg(short, long, env = "WARPSCAN_CONFIG", default_value = "config/warpscan.toml", global = true)]
    config: String,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Look up a block number, address, transaction hash or block hash
    Query {
        /// Search input
        input: String,
    },

    /// Stream new blocks, reorgs and optionally gas prices and contract logs
    Watch {
        /// Include gas price ticks
        #[arg(long)]
        gas: bool,

        /// Also stream logs emitted by this contract
        #[arg(long)]
        contract: Option<String>,

        /// Stop after this many events
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },

    /// Current gas price tiers
    Gas,

    /// Chain head and endpoint pool health
    Status,

    /// Cache statistics (including entries restored from the persistent tier)
    CacheStats,

    /// Drop every cached entry, in memory and on disk
    CacheClear,

    /// Look for a local development node on the usual ports
    DetectNode,

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::from_file(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config))?;

    if let Err(e) = init_logging(&config.logging) {
        print_error(&e.to_string());
    }

    let format = OutputFormat::from_flag(cli.json);

    let command = match cli.command {
        Commands::Config(command) => return handle_config_command(command, &cli.config, config),
        Commands::DetectNode => return run_detect_node(format).await,
        command => command,
    };
    let ctx = CoreContext::from_config(config).await.context("failed to initialize")?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("interrupt received");
            interrupt.cancel();
        }
    });

    match command {
        Commands::Query { input } => run_query(&ctx, &input, format, &cancel).await,
        Commands::Watch { gas, contract, count } => {
            run_watch(&ctx, WatchOptions { gas, contract, count }, format, &cancel).await
        }
        Commands::Gas => run_gas(&ctx, format, &cancel).await,
        Commands::Status => run_status(&ctx, format, &cancel).await,
        Commands::CacheStats => run_cache_stats(&ctx, format),
        Commands::CacheClear => run_cache_clear(&ctx, format).await,
        Commands::Config(_) | Commands::DetectNode => Ok(()),
    }
}
