//! Backpressure gate: a one-shot, multi-waiter signal that stalls block
//! production while the buffer is fully saturated.
//!
//! A gate starts [`GateState::Pending`] and moves to
//! [`GateState::Permitted`] exactly once. Completion wakes every task waiting
//! on that instance. A completed gate is never reused: the next saturation
//! episode installs a fresh one.
//!
//! At most one gate is active at a time, held by [`GateSlot`]. Waiters clone
//! the `Arc` out of the slot, so clearing the slot never invalidates a gate a
//! waiter already holds.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::{Condvar, Mutex};
use tokio::sync::watch;

/// Lifecycle of a gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateState {
    Pending,
    Permitted,
}

#[derive(Debug)]
pub struct BackpressureGate {
    state: watch::Sender<GateState>,
    /// Mirror of `state` for threads outside the async runtime.
    permitted: Mutex<bool>,
    released: Condvar,
}

impl BackpressureGate {
    pub fn new() -> Self {
        let (state, _) = watch::channel(GateState::Pending);
        Self {
            state,
            permitted: Mutex::new(false),
            released: Condvar::new(),
        }
    }

    pub fn state(&self) -> GateState {
        *self.state.borrow()
    }

    pub fn is_completed(&self) -> bool {
        self.state() == GateState::Permitted
    }

    /// Complete the gate, releasing every waiter.
    ///
    /// Returns `true` if this call performed the transition.
    pub fn complete(&self) -> bool {
        let transitioned = self.state.send_if_modified(|state| {
            if *state == GateState::Pending {
                *state = GateState::Permitted;
                true
            } else {
                false
            }
        });
        if transitioned {
            *self.permitted.lock() = true;
            self.released.notify_all();
        }
        transitioned
    }

    /// Wait until the gate is completed. Returns immediately if it already is.
    pub async fn wait(&self) -> GateState {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let state = match rx.wait_for(|state| *state != GateState::Pending).await {
            Ok(state) => *state,
            Err(_) => GateState::Permitted,
        };
        state
    }

    /// Block the calling thread until the gate is completed.
    ///
    /// For producers running on plain threads. Must not be called from an
    /// async task; use [`wait`](Self::wait) there.
    pub fn wait_blocking(&self) -> GateState {
        let mut permitted = self.permitted.lock();
        while !*permitted {
            self.released.wait(&mut permitted);
        }
        GateState::Permitted
    }
}

impl Default for BackpressureGate {
    fn default() -> Self {
        Self::new()
    }
}

/// The single shared slot holding the active gate, if any.
#[derive(Debug, Default)]
pub struct GateSlot {
    active: ArcSwapOption<BackpressureGate>,
}

impl GateSlot {
    pub fn new() -> Self {
        Self {
            active: ArcSwapOption::empty(),
        }
    }

    /// The currently installed gate.
    pub fn current(&self) -> Option<Arc<BackpressureGate>> {
        self.active.load_full()
    }

    pub fn is_active(&self) -> bool {
        self.active.load().is_some()
    }

    /// Install a new pending gate unless one is already active.
    ///
    /// Returns the newly installed gate, or `None` if a gate was already in
    /// place (which is left untouched).
    pub fn engage(&self) -> Option<Arc<BackpressureGate>> {
        let fresh = Arc::new(BackpressureGate::new());
        let previous = self.active.rcu(|current| match current {
            Some(existing) => Some(Arc::clone(existing)),
            None => Some(Arc::clone(&fresh)),
        });
        match previous {
            Some(_) => None,
            None => Some(fresh),
        }
    }

    /// Clear the slot and complete the gate that was in it.
    ///
    /// Returns the released gate, or `None` if no gate was active.
    pub fn release(&self) -> Option<Arc<BackpressureGate>> {
        let released = self.active.swap(None)?;
        released.complete();
        Some(released)
    }
}
