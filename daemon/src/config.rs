//! Daemon configuration: logging, the block stream itself, and the
//! simulated workload.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

use blockstream_buffer::BlockStreamConfig;
use blockstream_utils::LogFormat;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub block_stream: BlockStreamConfig,

    #[serde(default)]
    pub simulation: SimulationConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// "human" or "json".
    #[serde(default)]
    pub format: LogFormat,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Blocks to produce before exiting. Zero runs until interrupted.
    #[serde(default = "default_blocks")]
    pub blocks: u64,

    /// Data items per block, besides the header and proof.
    #[serde(default = "default_items_per_block")]
    pub items_per_block: usize,

    /// Payload size of each data item in bytes.
    #[serde(default = "default_item_size")]
    pub item_size: usize,

    /// How many blocks the consumer trails behind the producer.
    #[serde(default = "default_ack_lag")]
    pub ack_lag: u64,

    /// The consumer stops acknowledging after this block.
    #[serde(default)]
    pub stall_after: Option<i64>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_blocks() -> u64 {
    100
}

fn default_items_per_block() -> usize {
    32
}

fn default_item_size() -> usize {
    128
}

fn default_ack_lag() -> u64 {
    2
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: default_log_level(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            blocks: default_blocks(),
            items_per_block: default_items_per_block(),
            item_size: default_item_size(),
            ack_lag: default_ack_lag(),
            stall_after: None,
        }
    }
}

impl DaemonConfig {
    pub fn from_toml_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(s).context("failed to parse config")?;
        config.block_stream.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        toml::to_string_pretty(self).context("failed to serialize config")
    }
}
