//! A collaborator that panics must not stall pruning, freeze the watermark or
//! leave the backpressure gate stuck.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use blockstream_buffer::{BlockBufferConfig, BlockBufferService, BlockStreamConfig, WriterMode};
use blockstream_nullables::{NullClock, NullConnectionManager, NullMetricsSink};
use blockstream_types::{ConnectionManager, MetricsSink};
use tokio::sync::broadcast;
use tokio::time::timeout;

// ---------------------------------------------------------------------------
// Failing collaborators
// ---------------------------------------------------------------------------

/// Panics on the first `failures` saturation reports, then records like the
/// null sink.
struct FlakyMetrics {
    failures: AtomicUsize,
    inner: NullMetricsSink,
}

impl FlakyMetrics {
    fn failing(failures: usize) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
            inner: NullMetricsSink::new(),
        }
    }
}

impl MetricsSink for FlakyMetrics {
    fn update_block_buffer_saturation(&self, percent: f64) {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            panic!("metrics backend unavailable");
        }
        self.inner.update_block_buffer_saturation(percent);
    }

    fn set_oldest_unacknowledged_block_time(&self, epoch_millis: i64) {
        self.inner.set_oldest_unacknowledged_block_time(epoch_millis);
    }

    fn set_latest_acknowledged_block_number(&self, block_number: i64) {
        self.inner.set_latest_acknowledged_block_number(block_number);
    }
}

/// Panics on every call.
struct BrokenConnections {
    calls: AtomicUsize,
}

impl ConnectionManager for BrokenConnections {
    fn open_block(&self, _block_number: i64) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        panic!("connection manager offline");
    }

    fn select_new_block_node_for_streaming(&self, _is_immediate: bool) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        panic!("connection manager offline");
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// One block per second, `ttl_secs` blocks of ideal capacity.
fn config(ttl_secs: u64, prune_interval: Duration) -> BlockStreamConfig {
    BlockStreamConfig {
        writer_mode: WriterMode::Grpc,
        block_period: Duration::from_secs(1),
        block_item_batch_size: 8,
        buffer: BlockBufferConfig {
            block_ttl: Duration::from_secs(ttl_secs),
            prune_interval,
            action_stage_threshold: 50.0,
            action_grace_period: Duration::from_secs(30),
            recovery_threshold: 100.0,
        },
    }
}

fn fill(buffer: &BlockBufferService, count: i64) {
    for n in 0..count {
        buffer.open_block(n).expect("open");
        buffer.close_block(n);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scheduled_pruning_survives_panicking_metrics() {
    let metrics = Arc::new(FlakyMetrics::failing(1));
    let buffer = BlockBufferService::with_clock(
        config(5, Duration::from_millis(10)),
        Arc::new(NullConnectionManager::new()),
        metrics.clone(),
        Arc::new(NullClock::new(0)),
    )
    .expect("valid config");
    let (shutdown, _) = broadcast::channel::<()>(1);
    let handle = buffer.start(shutdown.subscribe()).expect("task spawned");

    fill(&buffer, 5);
    timeout(Duration::from_secs(1), async {
        while !buffer.is_backpressure_active() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("first cycle engages backpressure despite the panic");

    buffer.set_latest_acknowledged_block(4);
    timeout(Duration::from_secs(1), buffer.ensure_new_blocks_permitted())
        .await
        .expect("later cycle releases backpressure");
    timeout(Duration::from_secs(1), async {
        while buffer.block_count() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("acknowledged blocks evicted");
    assert!(!handle.is_finished());
    assert!(!metrics.inner.saturation_readings().is_empty());

    let _ = shutdown.send(());
    timeout(Duration::from_secs(1), handle)
        .await
        .expect("task stops on shutdown")
        .expect("joined");
}

#[test]
fn reconnect_request_sent_even_when_metrics_panic() {
    let connections = Arc::new(NullConnectionManager::new());
    let metrics = Arc::new(FlakyMetrics::failing(1));
    let buffer = BlockBufferService::with_clock(
        config(10, Duration::ZERO),
        connections.clone(),
        metrics.clone(),
        Arc::new(NullClock::new(0)),
    )
    .expect("valid config");

    fill(&buffer, 6);
    let first = buffer.prune().expect("cycle completes");
    assert_eq!(first.saturation_percent, 60.0);
    assert_eq!(connections.selection_requests(), vec![false]);
    assert!(metrics.inner.saturation_readings().is_empty());
    assert_eq!(metrics.inner.oldest_unacknowledged_times(), vec![0]);

    // Inside the grace period: no second request, metrics flow again.
    buffer.prune();
    assert_eq!(connections.selection_requests(), vec![false]);
    assert_eq!(metrics.inner.saturation_readings(), vec![60.0]);
}

#[test]
fn panicking_connection_manager_leaves_buffer_consistent() {
    let connections = Arc::new(BrokenConnections {
        calls: AtomicUsize::new(0),
    });
    let metrics = Arc::new(NullMetricsSink::new());
    let buffer = BlockBufferService::with_clock(
        config(4, Duration::ZERO),
        connections.clone(),
        metrics.clone(),
        Arc::new(NullClock::new(0)),
    )
    .expect("valid config");

    fill(&buffer, 4);
    assert_eq!(buffer.block_count(), 4);
    assert_eq!(buffer.last_block_number_produced(), 3);

    let saturated = buffer.prune().expect("cycle completes");
    assert!(saturated.is_saturated);
    assert!(buffer.is_backpressure_active());
    // Four opens plus one reconnect request, all of which panicked.
    assert_eq!(connections.calls.load(Ordering::SeqCst), 5);
    assert_eq!(metrics.saturation_readings(), vec![100.0]);

    buffer.set_latest_acknowledged_block(3);
    assert_eq!(buffer.highest_acked_block_number(), 3);
    let recovered = buffer.prune().expect("cycle completes");
    assert_eq!(recovered.num_blocks_pruned, 4);
    assert!(!buffer.is_backpressure_active());
    assert_eq!(buffer.block_count(), 0);
}
