//! Block stream daemon: runs the block buffer against a simulated producer,
//! transport and consumer.

mod config;
mod shutdown;
mod simulation;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use blockstream_buffer::{BlockBufferService, BufferMetrics};
use blockstream_utils::{format_duration, init_logging, LogFormat};

use crate::config::DaemonConfig;
use crate::shutdown::{RunStop, StopReason};
use crate::simulation::{LoggingConnectionManager, Simulation};

#[derive(Parser)]
#[command(name = "blockstream-daemon", about = "Block stream buffer daemon")]
struct Cli {
    /// Path to a TOML configuration file. If provided, file settings
    /// are used as the base; CLI flags and env vars override them.
    #[arg(long, env = "BLOCKSTREAM_CONFIG")]
    config: Option<PathBuf>,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[arg(long, env = "BLOCKSTREAM_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format: "human" or "json".
    #[arg(long, env = "BLOCKSTREAM_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// Subcommand.
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Produce blocks through the buffer with a simulated consumer.
    Run {
        /// Blocks to produce (0 runs until interrupted).
        #[arg(long)]
        blocks: Option<u64>,

        /// How many blocks the consumer trails behind.
        #[arg(long)]
        ack_lag: Option<u64>,

        /// Stop acknowledging after this block number.
        #[arg(long)]
        stall_after: Option<i64>,
    },
    /// Print the effective configuration as TOML.
    PrintConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => DaemonConfig::from_toml_file(path)?,
        None => DaemonConfig::default(),
    };
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }

    match cli.command {
        Command::PrintConfig => {
            println!("{}", config.to_toml_string()?);
        }
        Command::Run {
            blocks,
            ack_lag,
            stall_after,
        } => {
            if let Some(blocks) = blocks {
                config.simulation.blocks = blocks;
            }
            if let Some(ack_lag) = ack_lag {
                config.simulation.ack_lag = ack_lag;
            }
            if stall_after.is_some() {
                config.simulation.stall_after = stall_after;
            }
            init_logging(config.logging.format, &config.logging.level);
            run(config).await?;
        }
    }

    Ok(())
}

async fn run(config: DaemonConfig) -> anyhow::Result<()> {
    let connections = Arc::new(LoggingConnectionManager::new());
    let metrics = Arc::new(BufferMetrics::new());
    let buffer = BlockBufferService::new(
        config.block_stream.clone(),
        connections.clone(),
        metrics.clone(),
    )?;

    tracing::info!(
        block_period = %format_duration(config.block_stream.block_period),
        block_ttl = %format_duration(config.block_stream.buffer.block_ttl),
        ideal_max_buffer_size = buffer.ideal_max_buffer_size(),
        blocks = config.simulation.blocks,
        ack_lag = config.simulation.ack_lag,
        stall_after = ?config.simulation.stall_after,
        "starting block stream simulation"
    );

    let stop = Arc::new(RunStop::new());
    let pruner = buffer.start(stop.subscribe());
    let signals = {
        let stop = Arc::clone(&stop);
        tokio::spawn(async move { stop.stop_on_signal().await })
    };

    let summary = Simulation::new(buffer.clone(), config.simulation.clone())
        .run(stop.subscribe())
        .await?;

    stop.stop(StopReason::Completed);
    signals.abort();
    if let Some(pruner) = pruner {
        let _ = pruner.await;
    }

    tracing::info!(
        reason = %stop.reason().unwrap_or(StopReason::Completed),
        blocks_produced = summary.blocks_produced,
        highest_acked = summary.highest_acked,
        time_blocked = %format_duration(summary.time_blocked),
        reselections = connections.reselection_count(),
        saturation_percent = ?summary.last_prune.as_ref().map(|r| r.saturation_percent),
        "simulation finished"
    );
    match metrics.encode_text() {
        Ok(text) => tracing::debug!(metrics = %text, "final buffer metrics"),
        Err(e) => tracing::warn!(error = %e, "failed to encode metrics"),
    }

    Ok(())
}
