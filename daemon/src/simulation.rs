//! Simulated block stream: a producer that opens a block every block
//! period, a transport that batches and "sends" its requests, and a consumer
//! that acknowledges with a configurable lag (or stops acknowledging
//! altogether to show backpressure).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;

use blockstream_buffer::{BlockBufferService, BufferError, PruneResult};
use blockstream_types::{BlockItem, ConnectionManager};

use crate::config::SimulationConfig;

/// Connection manager for the simulation: there is only one consumer, so
/// reselection requests are logged and counted.
#[derive(Default)]
pub struct LoggingConnectionManager {
    reselections: AtomicU64,
}

impl LoggingConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reselection_count(&self) -> u64 {
        self.reselections.load(Ordering::Relaxed)
    }
}

impl ConnectionManager for LoggingConnectionManager {
    fn open_block(&self, block_number: i64) {
        tracing::trace!(block = block_number, "streaming block");
    }

    fn select_new_block_node_for_streaming(&self, is_immediate: bool) {
        self.reselections.fetch_add(1, Ordering::Relaxed);
        tracing::info!(is_immediate, "consumer reselection requested (single consumer, ignored)");
    }
}

#[derive(Debug)]
pub struct SimulationSummary {
    pub blocks_produced: u64,
    pub highest_acked: i64,
    pub time_blocked: Duration,
    pub last_prune: Option<Arc<PruneResult>>,
}

pub struct Simulation {
    buffer: BlockBufferService,
    config: SimulationConfig,
    block_period: Duration,
}

impl Simulation {
    pub fn new(buffer: BlockBufferService, config: SimulationConfig) -> Self {
        let block_period = buffer.config().block_period;
        Self {
            buffer,
            config,
            block_period,
        }
    }

    /// Run until the configured block count is reached or `shutdown` fires.
    pub async fn run(
        self,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<SimulationSummary, BufferError> {
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let consumer = tokio::spawn(consume(
            self.buffer.clone(),
            sent_rx,
            self.config.ack_lag,
            self.config.stall_after,
        ));

        let mut ticker = tokio::time::interval(self.block_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut produced = 0u64;
        let mut time_blocked = Duration::ZERO;
        let mut number = self.buffer.last_block_number_produced() + 1;

        loop {
            if self.config.blocks != 0 && produced >= self.config.blocks {
                break;
            }
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = ticker.tick() => {}
            }

            let waited = Instant::now();
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = self.buffer.ensure_new_blocks_permitted() => {}
            }
            time_blocked += waited.elapsed();

            self.produce_block(number)?;
            let requests = self.send_block(number)?;
            tracing::debug!(block = number, requests, "block sent");
            // The consumer only goes away once we drop the sender.
            let _ = sent_tx.send(number);

            produced += 1;
            number += 1;
        }

        drop(sent_tx);
        let _ = consumer.await;

        Ok(SimulationSummary {
            blocks_produced: produced,
            highest_acked: self.buffer.highest_acked_block_number(),
            time_blocked,
            last_prune: self.buffer.latest_prune_result(),
        })
    }

    fn produce_block(&self, number: i64) -> Result<(), BufferError> {
        self.buffer.open_block(number)?;
        self.buffer
            .add_item(number, BlockItem::Header(number.to_be_bytes().to_vec()))?;
        for i in 0..self.config.items_per_block {
            let mut payload = vec![0u8; self.config.item_size.max(1)];
            payload[0] = i as u8;
            self.buffer.add_item(number, BlockItem::Data(payload))?;
        }
        self.buffer
            .add_item(number, BlockItem::Proof(number.to_le_bytes().to_vec()))?;
        self.buffer.close_block(number);
        Ok(())
    }

    /// Batch the block and hand every request to the (simulated) transport.
    fn send_block(&self, number: i64) -> Result<usize, BufferError> {
        self.buffer.process_block_items(number)?;
        let Some(block) = self.buffer.get_block_state(number) else {
            return Ok(0);
        };
        let mut sent = 0;
        while let Some(index) = block.next_unsent_request() {
            block.mark_request_sent(index)?;
            sent += 1;
        }
        Ok(sent)
    }
}

/// Acknowledge received blocks `ack_lag` blocks behind, unless stalled.
async fn consume(
    buffer: BlockBufferService,
    mut received: mpsc::UnboundedReceiver<i64>,
    ack_lag: u64,
    stall_after: Option<i64>,
) {
    let mut stalled = false;
    while let Some(number) = received.recv().await {
        let target = number - ack_lag as i64;
        if let Some(limit) = stall_after {
            if target > limit {
                if !stalled {
                    tracing::warn!(block = limit, "consumer stalled, acknowledgments stop");
                    stalled = true;
                }
                continue;
            }
        }
        if target >= 0 {
            buffer.set_latest_acknowledged_block(target);
        }
    }
    // Drain the trailing lag once production ends.
    if !stalled {
        let last = buffer.last_block_number_produced();
        let target = stall_after.map_or(last, |limit| limit.min(last));
        buffer.set_latest_acknowledged_block(target);
    }
}
