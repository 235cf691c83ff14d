//! Nullable metrics sink: keeps every reading in memory.

use blockstream_types::MetricsSink;
use std::sync::Mutex;

#[derive(Default)]
pub struct NullMetricsSink {
    saturation: Mutex<Vec<f64>>,
    oldest_unacked: Mutex<Vec<i64>>,
    acked: Mutex<Vec<i64>>,
}

impl NullMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saturation_readings(&self) -> Vec<f64> {
        self.saturation.lock().unwrap().clone()
    }

    pub fn oldest_unacknowledged_times(&self) -> Vec<i64> {
        self.oldest_unacked.lock().unwrap().clone()
    }

    pub fn acknowledged_block_numbers(&self) -> Vec<i64> {
        self.acked.lock().unwrap().clone()
    }

    /// Whether nothing has ever been reported.
    pub fn is_untouched(&self) -> bool {
        self.saturation.lock().unwrap().is_empty()
            && self.oldest_unacked.lock().unwrap().is_empty()
            && self.acked.lock().unwrap().is_empty()
    }
}

impl MetricsSink for NullMetricsSink {
    fn update_block_buffer_saturation(&self, percent: f64) {
        self.saturation.lock().unwrap().push(percent);
    }

    fn set_oldest_unacknowledged_block_time(&self, epoch_millis: i64) {
        self.oldest_unacked.lock().unwrap().push(epoch_millis);
    }

    fn set_latest_acknowledged_block_number(&self, block_number: i64) {
        self.acked.lock().unwrap().push(block_number);
    }
}
