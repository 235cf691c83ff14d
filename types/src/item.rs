//! Block items: the opaque payloads a block is assembled from.

use serde::{Deserialize, Serialize};

/// One item appended to a block.
///
/// The buffer never looks inside the payload. The variant only tells it
/// which item closes the block (the proof).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockItem {
    Header(Vec<u8>),
    Data(Vec<u8>),
    Proof(Vec<u8>),
}

impl BlockItem {
    pub fn payload(&self) -> &[u8] {
        match self {
            BlockItem::Header(bytes) | BlockItem::Data(bytes) | BlockItem::Proof(bytes) => bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.payload().len()
    }

    /// An item with no payload carries nothing and is never accepted by the buffer.
    pub fn is_empty(&self) -> bool {
        self.payload().is_empty()
    }

    pub fn is_proof(&self) -> bool {
        matches!(self, BlockItem::Proof(_))
    }
}
