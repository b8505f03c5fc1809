/// Recoverable failure of the frame allocator.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    /// The free list is empty.
    #[error("out of memory")]
    OutOfMemory,
}
