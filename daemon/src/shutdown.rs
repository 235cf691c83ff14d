//! Stop signal for a simulation run.
//!
//! The pruning task and the simulation both hold a receiver. The run stops
//! on the first trigger, whether the workload finished or the process was
//! interrupted, and that first reason is what the run summary reports.

use std::fmt;
use std::sync::OnceLock;

use tokio::signal;
use tokio::sync::broadcast;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// The configured number of blocks was produced.
    Completed,
    /// SIGINT (Ctrl-C).
    Interrupted,
    /// SIGTERM.
    Terminated,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Completed => write!(f, "completed"),
            StopReason::Interrupted => write!(f, "interrupted"),
            StopReason::Terminated => write!(f, "terminated"),
        }
    }
}

pub struct RunStop {
    tx: broadcast::Sender<()>,
    reason: OnceLock<StopReason>,
}

impl RunStop {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            reason: OnceLock::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Stop the run. Only the first call notifies receivers and sets the
    /// reason; returns whether this call did.
    pub fn stop(&self, reason: StopReason) -> bool {
        if self.reason.set(reason).is_err() {
            return false;
        }
        let _ = self.tx.send(());
        true
    }

    pub fn reason(&self) -> Option<StopReason> {
        self.reason.get().copied()
    }

    /// Stop the run on SIGINT or SIGTERM.
    pub async fn stop_on_signal(&self) {
        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "SIGTERM handler unavailable, only Ctrl-C stops the run");
                    std::future::pending::<()>().await;
                }
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        let reason = tokio::select! {
            _ = signal::ctrl_c() => StopReason::Interrupted,
            _ = terminate => StopReason::Terminated,
        };
        if self.stop(reason) {
            tracing::info!(%reason, "stopping block stream simulation");
        }
    }
}

impl Default for RunStop {
    fn default() -> Self {
        Self::new()
    }
}
