//! Shared types for the block stream buffer.
//!
//! This crate defines the values every other crate in the workspace passes
//! around (timestamps, block items) and the interfaces of the collaborators
//! the buffer talks to but does not own: the clock, the connection manager
//! that picks a downstream consumer, and the metrics sink.

pub mod clock;
pub mod connection;
pub mod item;
pub mod metrics;
pub mod time;

pub use clock::{Clock, SystemClock};
pub use connection::ConnectionManager;
pub use item::BlockItem;
pub use metrics::MetricsSink;
pub use time::Timestamp;

/// Sentinel block number meaning "no block".
pub const NO_BLOCK: i64 = -1;
