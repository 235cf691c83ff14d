//! Saturation and pruning engine.
//!
//! Each cycle:
//! 1. snapshots the acknowledgment watermark and evicts every buffered block
//!    at or below it,
//! 2. measures saturation as the unacknowledged backlog over the ideal
//!    buffer size (values above 100% are kept as-is),
//! 3. runs the action stage (ask for a new consumer, rate-limited by the
//!    grace period, see [`crate::action_stage`]),
//! 4. engages the backpressure gate when fully saturated, or releases it once
//!    saturation drops to the recovery threshold,
//! 5. publishes a [`PruneResult`] snapshot and reports metrics.
//!
//! Collaborators are notified only after the cycle's own state is committed.
//! A panicking collaborator is logged and skipped; it never undoes the cycle
//! or stops the next one.
//! Cycles never overlap: scheduled and on-demand invocations share one guard.

use std::sync::Arc;

use blockstream_types::{Timestamp, NO_BLOCK};

use crate::action_stage::{self, ActionDecision};
use crate::buffer::notify;
use crate::BlockBufferService;

/// Outcome of one pruning cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct PruneResult {
    /// Watermark the cycle pruned against.
    pub highest_acked_block_number: i64,
    pub ideal_max_buffer_size: u64,
    pub num_blocks_checked: usize,
    pub num_blocks_pending_ack: usize,
    pub num_blocks_pruned: usize,
    pub saturation_percent: f64,
    pub is_saturated: bool,
    /// Close time of the earliest closed block still awaiting acknowledgment.
    pub oldest_unacked_closed_at: Option<Timestamp>,
}

impl PruneResult {
    /// Epoch millis reported as the oldest unacknowledged block time.
    pub fn oldest_unacked_millis(&self) -> i64 {
        self.oldest_unacked_closed_at
            .map(|ts| ts.as_millis() as i64)
            .unwrap_or(NO_BLOCK)
    }
}

/// State carried between cycles. Guarded by the cycle run lock.
#[derive(Debug, Default)]
pub(crate) struct PruneState {
    pub(crate) last_action_trigger: Option<Timestamp>,
    pub(crate) cycles: u64,
}

/// `100 * pending / ideal`, unclamped.
pub fn saturation_percent(pending: usize, ideal_max_buffer_size: u64) -> f64 {
    if ideal_max_buffer_size == 0 {
        return 0.0;
    }
    100.0 * pending as f64 / ideal_max_buffer_size as f64
}

impl BlockBufferService {
    /// Run one pruning cycle now.
    ///
    /// Waits for a cycle already in progress to finish first. Returns `None`
    /// when streaming is disabled.
    pub fn prune(&self) -> Option<Arc<PruneResult>> {
        if !self.inner.streaming_enabled {
            return None;
        }
        let inner = &self.inner;
        let mut state = inner.prune_state.lock();
        state.cycles += 1;

        let highest_acked = inner.highest_acked.load(std::sync::atomic::Ordering::Acquire);
        let mut checked = 0usize;
        let mut pruned = 0usize;
        inner.blocks.retain(|&number, _| {
            checked += 1;
            if number <= highest_acked {
                pruned += 1;
                false
            } else {
                true
            }
        });

        let mut pending = 0usize;
        let mut oldest: Option<(i64, Timestamp)> = None;
        for entry in inner.blocks.iter() {
            let number = *entry.key();
            if number <= highest_acked {
                continue;
            }
            pending += 1;
            if let Some(closed_at) = entry.value().closed_timestamp() {
                if oldest.map_or(true, |(n, _)| number < n) {
                    oldest = Some((number, closed_at));
                }
            }
        }

        let saturation = saturation_percent(pending, inner.ideal_max_buffer_size);
        let is_saturated = saturation >= 100.0;
        let result = Arc::new(PruneResult {
            highest_acked_block_number: highest_acked,
            ideal_max_buffer_size: inner.ideal_max_buffer_size,
            num_blocks_checked: checked,
            num_blocks_pending_ack: pending,
            num_blocks_pruned: pruned,
            saturation_percent: saturation,
            is_saturated,
            oldest_unacked_closed_at: oldest.map(|(_, ts)| ts),
        });

        let decision = action_stage::decide(
            &mut state.last_action_trigger,
            saturation,
            &inner.config.buffer,
            inner.clock.now(),
        );

        if is_saturated {
            if inner.gate.engage().is_some() {
                tracing::warn!(
                    saturation_percent = saturation,
                    pending_ack = pending,
                    "block buffer saturated, engaging backpressure"
                );
            }
        } else if saturation <= inner.config.buffer.recovery_threshold
            && inner.gate.release().is_some()
        {
            tracing::info!(
                saturation_percent = saturation,
                pending_ack = pending,
                "block buffer recovered, releasing backpressure"
            );
        }

        inner.latest_prune.store(Some(Arc::clone(&result)));
        tracing::debug!(
            cycle = state.cycles,
            highest_acked,
            checked,
            pruned,
            pending_ack = pending,
            saturation_percent = saturation,
            "block buffer pruned"
        );

        // The trigger time is already recorded, so the request goes out first.
        if let ActionDecision::Trigger { is_immediate } = decision {
            tracing::info!(
                saturation_percent = saturation,
                is_immediate,
                "requesting new block node for streaming"
            );
            notify("connection_manager", || {
                inner
                    .connection_manager
                    .select_new_block_node_for_streaming(is_immediate)
            });
        }
        notify("metrics", || inner.metrics.update_block_buffer_saturation(saturation));
        notify("metrics", || {
            inner
                .metrics
                .set_oldest_unacknowledged_block_time(result.oldest_unacked_millis())
        });

        Some(result)
    }
}
