//! Periodic pruning task.

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::BlockBufferService;

impl BlockBufferService {
    /// Spawn the pruning task on the current tokio runtime.
    ///
    /// Returns `None` when streaming is disabled or the prune interval is
    /// zero; [`BlockBufferService::prune`] can still be called on demand.
    /// The task stops when `shutdown` fires or its sender is dropped.
    pub fn start(&self, mut shutdown: broadcast::Receiver<()>) -> Option<JoinHandle<()>> {
        if !self.inner.streaming_enabled {
            return None;
        }
        let period = self.inner.config.buffer.prune_interval;
        if period.is_zero() {
            tracing::info!("block buffer prune interval is zero, scheduled pruning disabled");
            return None;
        }

        let service = self.clone();
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // A slow cycle delays the next one instead of bursting to catch up.
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        tracing::debug!("block buffer pruning task shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        service.prune();
                    }
                }
            }
        }))
    }
}
