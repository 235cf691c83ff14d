//! Block stream configuration with TOML file support.
//!
//! Durations are written as human-readable strings (`"2s"`, `"5m"`).
//!
//! ```toml
//! writer_mode = "file_and_grpc"
//! block_period = "2s"
//! block_item_batch_size = 256
//!
//! [buffer]
//! block_ttl = "5m"
//! prune_interval = "1s"
//! action_stage_threshold = 20.0
//! action_grace_period = "20s"
//! recovery_threshold = 100.0
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::BufferError;

/// Where produced blocks are written.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriterMode {
    /// Local files only; the streaming buffer is not engaged.
    File,
    /// Stream to a downstream consumer only.
    Grpc,
    /// Write files and stream to a downstream consumer.
    #[default]
    FileAndGrpc,
}

impl WriterMode {
    /// Whether this mode includes the streaming transport.
    pub fn streams_to_consumer(&self) -> bool {
        matches!(self, WriterMode::Grpc | WriterMode::FileAndGrpc)
    }
}

/// Configuration of the block stream producer side.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockStreamConfig {
    /// Selects whether the streaming buffer is engaged at all.
    #[serde(default)]
    pub writer_mode: WriterMode,

    /// Expected wall-clock spacing between produced blocks.
    #[serde(default = "default_block_period", with = "humantime_serde")]
    pub block_period: Duration,

    /// Maximum number of items per request sent to the consumer.
    #[serde(default = "default_block_item_batch_size")]
    pub block_item_batch_size: usize,

    #[serde(default)]
    pub buffer: BlockBufferConfig,
}

/// Sizing and pressure thresholds of the block buffer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockBufferConfig {
    /// Window used to size the buffer. Blocks do not expire individually.
    #[serde(default = "default_block_ttl", with = "humantime_serde")]
    pub block_ttl: Duration,

    /// Cadence of the pruning task. Zero disables the scheduled task.
    #[serde(default = "default_prune_interval", with = "humantime_serde")]
    pub prune_interval: Duration,

    /// Saturation percent at which a new consumer is requested.
    #[serde(default = "default_action_stage_threshold")]
    pub action_stage_threshold: f64,

    /// Minimum spacing between two consumer reselection requests.
    #[serde(default = "default_action_grace_period", with = "humantime_serde")]
    pub action_grace_period: Duration,

    /// Saturation percent at or below which backpressure is lifted.
    #[serde(default = "default_recovery_threshold")]
    pub recovery_threshold: f64,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_block_period() -> Duration {
    Duration::from_secs(2)
}

fn default_block_item_batch_size() -> usize {
    256
}

fn default_block_ttl() -> Duration {
    Duration::from_secs(300)
}

fn default_prune_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_action_stage_threshold() -> f64 {
    20.0
}

fn default_action_grace_period() -> Duration {
    Duration::from_secs(20)
}

fn default_recovery_threshold() -> f64 {
    100.0
}

// ── Impl ───────────────────────────────────────────────────────────────

impl BlockStreamConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, BufferError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| BufferError::Config(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, BufferError> {
        toml::from_str(s).map_err(|e| BufferError::Config(e.to_string()))
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, BufferError> {
        toml::to_string_pretty(self).map_err(|e| BufferError::Config(e.to_string()))
    }

    /// Whether the buffer participates in streaming at all.
    pub fn streaming_enabled(&self) -> bool {
        self.writer_mode.streams_to_consumer()
    }

    /// Number of blocks expected to accumulate within one TTL window at the
    /// nominal production rate. This is the denominator of saturation.
    pub fn ideal_max_buffer_size(&self) -> u64 {
        if self.block_period.is_zero() {
            return 1;
        }
        let blocks = self.buffer.block_ttl.as_nanos() / self.block_period.as_nanos();
        u64::try_from(blocks).unwrap_or(u64::MAX).max(1)
    }

    /// Reject settings the saturation engine cannot work with.
    pub fn validate(&self) -> Result<(), BufferError> {
        if self.block_period.is_zero() {
            return Err(BufferError::Config("block_period must be positive".into()));
        }
        if self.block_item_batch_size == 0 {
            return Err(BufferError::Config(
                "block_item_batch_size must be positive".into(),
            ));
        }
        let buffer = &self.buffer;
        if !buffer.action_stage_threshold.is_finite() || buffer.action_stage_threshold <= 0.0 {
            return Err(BufferError::Config(format!(
                "action_stage_threshold must be a positive percent, got {}",
                buffer.action_stage_threshold
            )));
        }
        if buffer.action_stage_threshold >= 100.0 {
            return Err(BufferError::Config(format!(
                "action_stage_threshold must be below 100, got {}",
                buffer.action_stage_threshold
            )));
        }
        if !buffer.recovery_threshold.is_finite() || buffer.recovery_threshold <= 0.0 {
            return Err(BufferError::Config(format!(
                "recovery_threshold must be a positive percent, got {}",
                buffer.recovery_threshold
            )));
        }
        Ok(())
    }
}

impl Default for BlockStreamConfig {
    fn default() -> Self {
        Self {
            writer_mode: WriterMode::default(),
            block_period: default_block_period(),
            block_item_batch_size: default_block_item_batch_size(),
            buffer: BlockBufferConfig::default(),
        }
    }
}

impl Default for BlockBufferConfig {
    fn default() -> Self {
        Self {
            block_ttl: default_block_ttl(),
            prune_interval: default_prune_interval(),
            action_stage_threshold: default_action_stage_threshold(),
            action_grace_period: default_action_grace_period(),
            recovery_threshold: default_recovery_threshold(),
        }
    }
}
