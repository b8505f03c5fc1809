//! Runtime configuration of the frame allocator.

/// Knobs that change how the allocator treats frame contents.
///
/// None of them affect reference counting.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AllocatorConfig {
    /// Overwrite frames with [`ALLOC_JUNK`](kernel_info::memory::ALLOC_JUNK)
    /// when handed out and with [`FREE_JUNK`](kernel_info::memory::FREE_JUNK)
    /// when their last reference is dropped.
    pub junk_fill: bool,
}

impl AllocatorConfig {
    /// Junk filling follows `debug_assertions`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            junk_fill: cfg!(debug_assertions),
        }
    }

    #[must_use]
    pub const fn with_junk_fill(mut self, junk_fill: bool) -> Self {
        self.junk_fill = junk_fill;
        self
    }
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self::new()
    }
}
