//! Block buffer service: stages produced blocks until the downstream
//! consumer acknowledges them.
//!
//! The producer opens a block, appends items and closes it. Acknowledgments
//! raise a monotonic watermark. A periodic pruning cycle (see
//! [`crate::prune`]) evicts acknowledged blocks, measures how far the
//! consumer has fallen behind and engages backpressure when the buffer is
//! full. Before opening a new block the producer awaits
//! [`BlockBufferService::ensure_new_blocks_permitted`].
//!
//! When the configured writer mode does not stream, the service is inert:
//! every mutation is a silent no-op and no collaborator is ever called.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;

use blockstream_types::{BlockItem, Clock, ConnectionManager, MetricsSink, SystemClock, NO_BLOCK};

use crate::block::BlockState;
use crate::config::BlockStreamConfig;
use crate::gate::GateSlot;
use crate::prune::{PruneResult, PruneState};
use crate::BufferError;

/// Handle to the block buffer. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct BlockBufferService {
    pub(crate) inner: Arc<Shared>,
}

pub(crate) struct Shared {
    pub(crate) config: BlockStreamConfig,
    pub(crate) streaming_enabled: bool,
    pub(crate) ideal_max_buffer_size: u64,
    pub(crate) blocks: DashMap<i64, Arc<BlockState>>,
    pub(crate) highest_acked: AtomicI64,
    pub(crate) last_produced: AtomicI64,
    pub(crate) gate: GateSlot,
    pub(crate) latest_prune: ArcSwapOption<PruneResult>,
    /// Run guard for pruning cycles; also owns the last reconnect trigger time.
    pub(crate) prune_state: Mutex<PruneState>,
    pub(crate) connection_manager: Arc<dyn ConnectionManager>,
    pub(crate) metrics: Arc<dyn MetricsSink>,
    pub(crate) clock: Arc<dyn Clock>,
}

impl BlockBufferService {
    /// Create a buffer driven by the system clock.
    pub fn new(
        config: BlockStreamConfig,
        connection_manager: Arc<dyn ConnectionManager>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self, BufferError> {
        Self::with_clock(config, connection_manager, metrics, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: BlockStreamConfig,
        connection_manager: Arc<dyn ConnectionManager>,
        metrics: Arc<dyn MetricsSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, BufferError> {
        config.validate()?;
        let streaming_enabled = config.streaming_enabled();
        let ideal_max_buffer_size = config.ideal_max_buffer_size();
        tracing::info!(
            streaming_enabled,
            ideal_max_buffer_size,
            writer_mode = ?config.writer_mode,
            "block buffer created"
        );
        Ok(Self {
            inner: Arc::new(Shared {
                config,
                streaming_enabled,
                ideal_max_buffer_size,
                blocks: DashMap::new(),
                highest_acked: AtomicI64::new(NO_BLOCK),
                last_produced: AtomicI64::new(NO_BLOCK),
                gate: GateSlot::new(),
                latest_prune: ArcSwapOption::empty(),
                prune_state: Mutex::new(PruneState::default()),
                connection_manager,
                metrics,
                clock,
            }),
        })
    }

    pub fn config(&self) -> &BlockStreamConfig {
        &self.inner.config
    }

    pub fn is_streaming_enabled(&self) -> bool {
        self.inner.streaming_enabled
    }

    /// Saturation denominator: blocks expected within one TTL window.
    pub fn ideal_max_buffer_size(&self) -> u64 {
        self.inner.ideal_max_buffer_size
    }

    /// Open (or replace) the block `number`.
    ///
    /// Fails if the number is negative, lower than the acknowledged
    /// watermark, or names a buffered block whose proof has already been sent.
    pub fn open_block(&self, number: i64) -> Result<(), BufferError> {
        if !self.inner.streaming_enabled {
            return Ok(());
        }
        if number < 0 {
            return Err(BufferError::NegativeBlockNumber(number));
        }
        let highest_acked = self.inner.highest_acked.load(Ordering::Acquire);
        if number < highest_acked {
            return Err(BufferError::BlockRegression {
                number,
                highest_acked,
            });
        }

        let replaced = match self.inner.blocks.entry(number) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_block_proof_sent() {
                    return Err(BufferError::ProofAlreadySent(number));
                }
                entry.insert(Arc::new(BlockState::new(number)));
                true
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(BlockState::new(number)));
                false
            }
        };

        self.inner.last_produced.fetch_max(number, Ordering::AcqRel);
        tracing::debug!(block = number, replaced, "opened block");
        notify("connection_manager", || self.inner.connection_manager.open_block(number));
        Ok(())
    }

    /// Append an item to an open block.
    pub fn add_item(&self, number: i64, item: BlockItem) -> Result<(), BufferError> {
        if !self.inner.streaming_enabled {
            return Ok(());
        }
        if item.is_empty() {
            return Err(BufferError::EmptyItem(number));
        }
        let block = self
            .get_block_state(number)
            .ok_or(BufferError::BlockNotFound(number))?;
        block.add_item(item)
    }

    /// Close a block. Absent blocks are ignored since closing may race with
    /// eviction.
    pub fn close_block(&self, number: i64) {
        if !self.inner.streaming_enabled {
            return;
        }
        match self.get_block_state(number) {
            Some(block) => {
                block.close(self.inner.clock.now());
                tracing::debug!(block = number, items = block.item_count(), "closed block");
            }
            None => tracing::trace!(block = number, "close for unknown block ignored"),
        }
    }

    /// Batch the pending items of a buffered block with the configured
    /// batch size. Returns the number of requests created.
    pub fn process_block_items(&self, number: i64) -> Result<usize, BufferError> {
        if !self.inner.streaming_enabled {
            return Ok(0);
        }
        let block = self
            .get_block_state(number)
            .ok_or(BufferError::BlockNotFound(number))?;
        Ok(block.process_pending_items(self.inner.config.block_item_batch_size))
    }

    pub fn get_block_state(&self, number: i64) -> Option<Arc<BlockState>> {
        self.inner.blocks.get(&number).map(|entry| Arc::clone(entry.value()))
    }

    /// Lowest buffered block number, or `-1` if the buffer is empty.
    pub fn earliest_available_block_number(&self) -> i64 {
        self.inner
            .blocks
            .iter()
            .map(|entry| *entry.key())
            .min()
            .unwrap_or(NO_BLOCK)
    }

    pub fn last_block_number_produced(&self) -> i64 {
        self.inner.last_produced.load(Ordering::Acquire)
    }

    pub fn highest_acked_block_number(&self) -> i64 {
        self.inner.highest_acked.load(Ordering::Acquire)
    }

    pub fn is_acked(&self, number: i64) -> bool {
        number <= self.highest_acked_block_number()
    }

    pub fn block_count(&self) -> usize {
        self.inner.blocks.len()
    }

    /// Record an acknowledgment from the consumer.
    ///
    /// The watermark only moves forward; a lower number is accepted and
    /// leaves it unchanged. The current watermark is always reported.
    pub fn set_latest_acknowledged_block(&self, number: i64) {
        if !self.inner.streaming_enabled {
            return;
        }
        let previous = self.inner.highest_acked.fetch_max(number, Ordering::AcqRel);
        let current = previous.max(number);
        if current > previous {
            tracing::trace!(block = current, "acknowledgment watermark advanced");
        }
        notify("metrics", || {
            self.inner.metrics.set_latest_acknowledged_block_number(current)
        });
    }

    /// Wait while backpressure is engaged.
    ///
    /// Returns immediately when streaming is disabled or no gate is active.
    /// Otherwise waits for the gate observed at call time to complete. There
    /// is no built-in timeout; wrap in `tokio::time::timeout` if needed.
    pub async fn ensure_new_blocks_permitted(&self) {
        if !self.inner.streaming_enabled {
            return;
        }
        if let Some(gate) = self.inner.gate.current() {
            tracing::info!("block production waiting on buffer backpressure");
            gate.wait().await;
            tracing::info!("block production resumed");
        }
    }

    /// Blocking form of [`ensure_new_blocks_permitted`](Self::ensure_new_blocks_permitted)
    /// for producers on plain threads. Must not be called from an async task.
    pub fn ensure_new_blocks_permitted_blocking(&self) {
        if !self.inner.streaming_enabled {
            return;
        }
        if let Some(gate) = self.inner.gate.current() {
            tracing::info!("block production waiting on buffer backpressure");
            gate.wait_blocking();
            tracing::info!("block production resumed");
        }
    }

    pub fn is_backpressure_active(&self) -> bool {
        self.inner.gate.is_active()
    }

    /// Snapshot of the most recent pruning cycle, if one has run.
    pub fn latest_prune_result(&self) -> Option<Arc<PruneResult>> {
        self.inner.latest_prune.load_full()
    }
}

/// Run a collaborator call, logging a panic instead of unwinding into the
/// buffer. Buffer state is always committed before this is called.
pub(crate) fn notify(collaborator: &'static str, call: impl FnOnce()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(call)) {
        let reason = payload
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
            .unwrap_or("non-string panic payload");
        tracing::warn!(collaborator, reason, "collaborator call panicked, continuing");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WriterMode;
    use blockstream_nullables::{NullClock, NullConnectionManager, NullMetricsSink};
    use std::time::Duration;

    struct Harness {
        buffer: BlockBufferService,
        connections: Arc<NullConnectionManager>,
        metrics: Arc<NullMetricsSink>,
    }

    fn harness(writer_mode: WriterMode) -> Harness {
        let config = BlockStreamConfig {
            writer_mode,
            block_period: Duration::from_secs(1),
            ..BlockStreamConfig::default()
        };
        let connections = Arc::new(NullConnectionManager::new());
        let metrics = Arc::new(NullMetricsSink::new());
        let buffer = BlockBufferService::with_clock(
            config,
            connections.clone(),
            metrics.clone(),
            Arc::new(NullClock::new(1_000)),
        )
        .unwrap();
        Harness {
            buffer,
            connections,
            metrics,
        }
    }

    #[test]
    fn open_block_tracks_last_produced_and_notifies() {
        let h = harness(WriterMode::Grpc);
        assert_eq!(h.buffer.last_block_number_produced(), -1);
        h.buffer.open_block(3).unwrap();
        h.buffer.open_block(1).unwrap();
        assert_eq!(h.buffer.last_block_number_produced(), 3);
        assert_eq!(h.connections.opened_blocks(), vec![3, 1]);
        assert_eq!(h.buffer.block_count(), 2);
    }

    #[test]
    fn negative_block_number_rejected() {
        let h = harness(WriterMode::Grpc);
        assert_eq!(
            h.buffer.open_block(-1),
            Err(BufferError::NegativeBlockNumber(-1))
        );
        assert_eq!(h.buffer.last_block_number_produced(), -1);
        assert!(h.connections.opened_blocks().is_empty());
    }

    #[test]
    fn opening_below_watermark_rejected() {
        let h = harness(WriterMode::Grpc);
        h.buffer.set_latest_acknowledged_block(10);
        assert_eq!(
            h.buffer.open_block(9),
            Err(BufferError::BlockRegression {
                number: 9,
                highest_acked: 10
            })
        );
        assert!(h.buffer.open_block(10).is_ok());
        assert!(h.buffer.open_block(11).is_ok());
    }

    #[test]
    fn add_item_requires_existing_block() {
        let h = harness(WriterMode::Grpc);
        assert_eq!(
            h.buffer.add_item(5, BlockItem::Data(vec![1])),
            Err(BufferError::BlockNotFound(5))
        );
        h.buffer.open_block(5).unwrap();
        h.buffer.add_item(5, BlockItem::Data(vec![1])).unwrap();
        assert_eq!(h.buffer.get_block_state(5).unwrap().item_count(), 1);
    }

    #[test]
    fn add_item_rejects_empty_item() {
        let h = harness(WriterMode::Grpc);
        h.buffer.open_block(0).unwrap();
        assert_eq!(
            h.buffer.add_item(0, BlockItem::Header(Vec::new())),
            Err(BufferError::EmptyItem(0))
        );
    }

    #[test]
    fn close_block_stamps_clock_and_tolerates_missing_block() {
        let h = harness(WriterMode::Grpc);
        h.buffer.close_block(42);
        h.buffer.open_block(1).unwrap();
        h.buffer.close_block(1);
        let block = h.buffer.get_block_state(1).unwrap();
        assert!(block.is_closed());
        assert_eq!(block.closed_timestamp().unwrap().as_millis(), 1_000);
    }

    #[test]
    fn earliest_available_block_number() {
        let h = harness(WriterMode::Grpc);
        assert_eq!(h.buffer.earliest_available_block_number(), -1);
        h.buffer.open_block(7).unwrap();
        h.buffer.open_block(4).unwrap();
        h.buffer.open_block(9).unwrap();
        assert_eq!(h.buffer.earliest_available_block_number(), 4);
    }

    #[test]
    fn watermark_is_monotonic_and_always_reported() {
        let h = harness(WriterMode::Grpc);
        h.buffer.set_latest_acknowledged_block(5);
        h.buffer.set_latest_acknowledged_block(3);
        assert_eq!(h.buffer.highest_acked_block_number(), 5);
        assert!(h.buffer.is_acked(5));
        assert!(!h.buffer.is_acked(6));
        assert_eq!(h.metrics.acknowledged_block_numbers(), vec![5, 5]);
    }

    #[test]
    fn reopen_replaces_block_until_proof_sent() {
        let h = harness(WriterMode::Grpc);
        h.buffer.open_block(2).unwrap();
        h.buffer.add_item(2, BlockItem::Proof(vec![9])).unwrap();
        assert_eq!(h.buffer.process_block_items(2), Ok(1));
        let first = h.buffer.get_block_state(2).unwrap();

        h.buffer.open_block(2).unwrap();
        let second = h.buffer.get_block_state(2).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.item_count(), 0);

        second.add_item(BlockItem::Proof(vec![9])).unwrap();
        second.process_pending_items(1);
        second.mark_request_sent(0).unwrap();
        assert!(second.is_block_proof_sent());
        assert_eq!(h.buffer.open_block(2), Err(BufferError::ProofAlreadySent(2)));
    }

    #[test]
    fn disabled_streaming_is_a_no_op_sink() {
        let h = harness(WriterMode::File);
        assert!(!h.buffer.is_streaming_enabled());
        h.buffer.open_block(1).unwrap();
        h.buffer.add_item(1, BlockItem::Data(vec![1])).unwrap();
        h.buffer.close_block(1);
        h.buffer.set_latest_acknowledged_block(1);

        assert_eq!(h.buffer.block_count(), 0);
        assert_eq!(h.buffer.last_block_number_produced(), -1);
        assert_eq!(h.buffer.highest_acked_block_number(), -1);
        assert!(h.connections.is_untouched());
        assert!(h.metrics.is_untouched());
    }

    #[tokio::test]
    async fn no_gate_means_production_permitted() {
        let h = harness(WriterMode::Grpc);
        tokio::time::timeout(Duration::from_millis(100), h.buffer.ensure_new_blocks_permitted())
            .await
            .expect("no gate installed");
    }
}
