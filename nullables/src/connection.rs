//! Nullable connection manager: records requests instead of reconnecting.

use blockstream_types::ConnectionManager;
use std::sync::Mutex;

/// A connection manager that records every call.
#[derive(Default)]
pub struct NullConnectionManager {
    opened: Mutex<Vec<i64>>,
    selections: Mutex<Vec<bool>>,
}

impl NullConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block numbers announced through `open_block`, in call order.
    pub fn opened_blocks(&self) -> Vec<i64> {
        self.opened.lock().unwrap().clone()
    }

    /// The `is_immediate` flag of every reselection request, in call order.
    pub fn selection_requests(&self) -> Vec<bool> {
        self.selections.lock().unwrap().clone()
    }

    /// Whether no method has ever been called.
    pub fn is_untouched(&self) -> bool {
        self.opened.lock().unwrap().is_empty() && self.selections.lock().unwrap().is_empty()
    }
}

impl ConnectionManager for NullConnectionManager {
    fn open_block(&self, block_number: i64) {
        self.opened.lock().unwrap().push(block_number);
    }

    fn select_new_block_node_for_streaming(&self, is_immediate: bool) {
        self.selections.lock().unwrap().push(is_immediate);
    }
}
