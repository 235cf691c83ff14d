//! Nullable infrastructure for deterministic testing.
//!
//! Every collaborator the block buffer talks to (clock, connection manager,
//! metrics) is abstracted behind a trait in `blockstream-types`. This crate
//! provides test-friendly implementations that:
//! - Return deterministic values
//! - Record every call for later assertions
//! - Never touch the network or a metrics backend
//!
//! Usage: swap real implementations for nullables in tests.

pub mod clock;
pub mod connection;
pub mod metrics;

pub use clock::NullClock;
pub use connection::NullConnectionManager;
pub use metrics::NullMetricsSink;
