//! Interface to the component that owns downstream consumer selection.

/// Manages the connection to the downstream block consumer.
///
/// The buffer only informs the manager; transport selection and health
/// tracking live entirely behind this trait. Implementations must not block
/// for longer than a normal method dispatch.
pub trait ConnectionManager: Send + Sync {
    /// A new block has been opened in the buffer.
    fn open_block(&self, block_number: i64);

    /// Ask the manager to consider switching to a different consumer.
    ///
    /// `is_immediate` signals urgency (the buffer is fully saturated).
    fn select_new_block_node_for_streaming(&self, is_immediate: bool);
}
