use thiserror::Error;

/// Contract violations raised synchronously to the producer pipeline.
///
/// None of these are retried by the buffer. Being saturated is not an error;
/// it only shows up as waiting in `ensure_new_blocks_permitted`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("block number must be non-negative, got {0}")]
    NegativeBlockNumber(i64),

    #[error("cannot open block {number}: block {highest_acked} has already been acknowledged")]
    BlockRegression { number: i64, highest_acked: i64 },

    #[error("block {0} proof has already been sent")]
    ProofAlreadySent(i64),

    #[error("empty item rejected for block {0}")]
    EmptyItem(i64),

    #[error("block {0} state not found")]
    BlockNotFound(i64),

    #[error("block {0} is closed")]
    BlockClosed(i64),

    #[error("block {number} has no request at index {index}")]
    RequestNotFound { number: i64, index: usize },

    #[error("config error: {0}")]
    Config(String),
}
