//! Interface to the metrics collaborator.

/// Receives buffer health readings.
///
/// Called once per pruning cycle for saturation and oldest-block age, and on
/// every acknowledgment for the watermark.
pub trait MetricsSink: Send + Sync {
    fn update_block_buffer_saturation(&self, percent: f64);

    /// Closed timestamp (epoch millis) of the oldest unacknowledged block, or
    /// `-1` when every buffered block has been acknowledged.
    fn set_oldest_unacknowledged_block_time(&self, epoch_millis: i64);

    fn set_latest_acknowledged_block_number(&self, block_number: i64);
}
