//! Prometheus metrics for the block buffer.
//!
//! [`BufferMetrics`] owns a dedicated [`Registry`] that an exporter can
//! encode into the Prometheus text exposition format, and implements
//! [`MetricsSink`] so it can be handed straight to the buffer.

use blockstream_types::MetricsSink;
use prometheus::{
    register_gauge_with_registry, register_int_gauge_with_registry, Encoder, Gauge, IntGauge,
    Opts, Registry, TextEncoder,
};

pub struct BufferMetrics {
    /// The Prometheus registry that owns every metric below.
    pub registry: Registry,

    /// Unacknowledged backlog as a percent of the ideal buffer size.
    pub saturation_percent: Gauge,
    /// Close time (epoch millis) of the oldest unacknowledged block, `-1` if none.
    pub oldest_unacked_block_time_ms: IntGauge,
    /// Highest block number acknowledged by the consumer.
    pub latest_acked_block_number: IntGauge,
}

impl BufferMetrics {
    /// Create a fresh set of metrics, all registered under a new
    /// [`Registry`].
    pub fn new() -> Self {
        let registry = Registry::new();

        let saturation_percent = register_gauge_with_registry!(
            Opts::new(
                "blockstream_buffer_saturation_percent",
                "Unacknowledged blocks as a percent of the ideal buffer size"
            ),
            registry
        )
        .expect("failed to register saturation_percent gauge");

        let oldest_unacked_block_time_ms = register_int_gauge_with_registry!(
            Opts::new(
                "blockstream_oldest_unacked_block_time_ms",
                "Close time of the oldest unacknowledged block in epoch millis"
            ),
            registry
        )
        .expect("failed to register oldest_unacked_block_time_ms gauge");

        let latest_acked_block_number = register_int_gauge_with_registry!(
            Opts::new(
                "blockstream_latest_acked_block_number",
                "Highest block number acknowledged downstream"
            ),
            registry
        )
        .expect("failed to register latest_acked_block_number gauge");

        oldest_unacked_block_time_ms.set(-1);
        latest_acked_block_number.set(-1);

        Self {
            registry,
            saturation_percent,
            oldest_unacked_block_time_ms,
            latest_acked_block_number,
        }
    }

    /// Encode every metric in the registry as Prometheus text.
    pub fn encode_text(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl Default for BufferMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSink for BufferMetrics {
    fn update_block_buffer_saturation(&self, percent: f64) {
        self.saturation_percent.set(percent);
    }

    fn set_oldest_unacknowledged_block_time(&self, epoch_millis: i64) {
        self.oldest_unacked_block_time_ms.set(epoch_millis);
    }

    fn set_latest_acknowledged_block_number(&self, block_number: i64) {
        self.latest_acked_block_number.set(block_number);
    }
}
