//! Block staging buffer with ack-driven eviction and backpressure.
//!
//! The buffer sits between a block producer and a streaming transport:
//! - Stores open and closed blocks keyed by block number
//! - Batches block items into transport requests
//! - Tracks the highest block acknowledged downstream
//! - Periodically evicts acknowledged blocks and measures saturation
//! - Asks the connection manager for a new consumer when the backlog grows
//! - Stalls production through a backpressure gate when the buffer is full

pub mod action_stage;
pub mod block;
pub mod buffer;
pub mod config;
pub mod error;
pub mod gate;
pub mod metrics;
pub mod prune;
pub mod scheduler;

pub use action_stage::ActionDecision;
pub use block::{BlockRequest, BlockState};
pub use buffer::BlockBufferService;
pub use config::{BlockBufferConfig, BlockStreamConfig, WriterMode};
pub use error::BufferError;
pub use gate::{BackpressureGate, GateSlot, GateState};
pub use metrics::BufferMetrics;
pub use prune::{saturation_percent, PruneResult};
