//! Per-block state: the ordered items of one block and the requests they
//! are batched into for the transport.
//!
//! Items are append-only while the block is open. Batching turns the
//! not-yet-batched tail of the item list into requests of at most
//! `batch_size` items; the transport marks requests sent one by one. Once the
//! request carrying the proof item has been sent, the block is frozen.

use blockstream_types::{BlockItem, Timestamp};
use parking_lot::Mutex;

use crate::BufferError;

/// A contiguous run of a block's items handed to the transport as one unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockRequest {
    items: Vec<BlockItem>,
    sent: bool,
}

impl BlockRequest {
    pub fn items(&self) -> &[BlockItem] {
        &self.items
    }

    pub fn is_sent(&self) -> bool {
        self.sent
    }

    pub fn contains_proof(&self) -> bool {
        self.items.iter().any(BlockItem::is_proof)
    }
}

/// One buffered block.
///
/// Shared as `Arc<BlockState>` between the producer, the transport and the
/// pruning engine; all mutation goes through the internal lock.
#[derive(Debug)]
pub struct BlockState {
    number: i64,
    inner: Mutex<BlockInner>,
}

#[derive(Debug, Default)]
struct BlockInner {
    items: Vec<BlockItem>,
    /// Number of leading items already placed in a request.
    batched: usize,
    requests: Vec<BlockRequest>,
    closed_at: Option<Timestamp>,
    proof_sent: bool,
}

impl BlockState {
    pub fn new(number: i64) -> Self {
        Self {
            number,
            inner: Mutex::new(BlockInner::default()),
        }
    }

    pub fn number(&self) -> i64 {
        self.number
    }

    /// Append an item.
    pub fn add_item(&self, item: BlockItem) -> Result<(), BufferError> {
        if item.is_empty() {
            return Err(BufferError::EmptyItem(self.number));
        }
        let mut inner = self.inner.lock();
        if inner.proof_sent {
            return Err(BufferError::ProofAlreadySent(self.number));
        }
        if inner.closed_at.is_some() {
            return Err(BufferError::BlockClosed(self.number));
        }
        inner.items.push(item);
        Ok(())
    }

    pub fn item_count(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn items(&self) -> Vec<BlockItem> {
        self.inner.lock().items.clone()
    }

    /// Items appended but not yet placed in a request.
    pub fn pending_item_count(&self) -> usize {
        let inner = self.inner.lock();
        inner.items.len() - inner.batched
    }

    /// Mark the block closed. The first close wins; later calls keep the
    /// original timestamp.
    pub fn close(&self, now: Timestamp) {
        let mut inner = self.inner.lock();
        if inner.closed_at.is_none() {
            inner.closed_at = Some(now);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed_at.is_some()
    }

    pub fn closed_timestamp(&self) -> Option<Timestamp> {
        self.inner.lock().closed_at
    }

    /// Batch every not-yet-batched item into requests of at most
    /// `batch_size` items, preserving arrival order.
    ///
    /// Returns the number of requests created. Items already batched are
    /// never batched again.
    pub fn process_pending_items(&self, batch_size: usize) -> usize {
        let batch_size = batch_size.max(1);
        let mut inner = self.inner.lock();
        let start = inner.batched;
        let pending: Vec<BlockRequest> = inner.items[start..]
            .chunks(batch_size)
            .map(|chunk| BlockRequest {
                items: chunk.to_vec(),
                sent: false,
            })
            .collect();
        let created = pending.len();
        inner.batched = inner.items.len();
        inner.requests.extend(pending);
        created
    }

    pub fn request_count(&self) -> usize {
        self.inner.lock().requests.len()
    }

    pub fn request(&self, index: usize) -> Option<BlockRequest> {
        self.inner.lock().requests.get(index).cloned()
    }

    /// Index of the first request not yet handed to the transport.
    pub fn next_unsent_request(&self) -> Option<usize> {
        self.inner.lock().requests.iter().position(|r| !r.sent)
    }

    /// Mark a request as handed to the transport.
    ///
    /// Sending the request that carries the proof freezes the block.
    pub fn mark_request_sent(&self, index: usize) -> Result<(), BufferError> {
        let mut inner = self.inner.lock();
        let request = inner
            .requests
            .get_mut(index)
            .ok_or(BufferError::RequestNotFound {
                number: self.number,
                index,
            })?;
        request.sent = true;
        let carries_proof = request.contains_proof();
        if carries_proof {
            inner.proof_sent = true;
        }
        Ok(())
    }

    pub fn is_block_proof_sent(&self) -> bool {
        self.inner.lock().proof_sent
    }
}
