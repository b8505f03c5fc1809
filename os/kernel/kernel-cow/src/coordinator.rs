//! # Copy-on-Write Coordinator
//!
//! Owns nothing but a shared reference to the frame allocator, the pid
//! counter and the statistics. Processes and their address spaces are
//! handed in by the caller.
//!
//! Lock order: a process's address-space lock, then the allocator lock.
//! The allocator never calls back out, so the order cannot invert.

use crate::error::GrowError;
use crate::process::{Pid, Process};
use crate::stats::{CowCounters, CowStats};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};
use kernel_alloc::FrameAllocator;
use kernel_memory_addresses::{PAGE_SIZE, VirtualAddress, VirtualPage};
use kernel_vmem::{AddressSpace, MapError, PageEntryBits, PageMap, PhysMapper};

/// Address of the page `n` pages above `start`, saturating at the top of
/// the address space.
const fn nth_page_address(start: VirtualPage, n: u64) -> VirtualAddress {
    VirtualAddress::new(
        start
            .base()
            .as_u64()
            .saturating_add(n.saturating_mul(PAGE_SIZE)),
    )
}

/// A process whose address space is a [`PageMap`] over the allocator's mapper.
pub type UserProcess<'f, M> = Process<PageMap<'f, M>>;

/// Forks processes by sharing frames and resolves the write faults that
/// sharing causes.
pub struct CowCoordinator<'f, M: PhysMapper> {
    pub(crate) frames: &'f FrameAllocator<M>,
    pub(crate) counters: CowCounters,
    next_pid: AtomicU32,
}

impl<'f, M: PhysMapper> CowCoordinator<'f, M> {
    #[must_use]
    pub const fn new(frames: &'f FrameAllocator<M>) -> Self {
        Self {
            frames,
            counters: CowCounters::new(),
            next_pid: AtomicU32::new(1),
        }
    }

    #[inline]
    #[must_use]
    pub const fn frames(&self) -> &'f FrameAllocator<M> {
        self.frames
    }

    #[must_use]
    pub fn stats(&self) -> CowStats {
        self.counters.snapshot()
    }

    pub(crate) fn next_pid(&self) -> Pid {
        Pid::new(self.next_pid.fetch_add(1, Ordering::Relaxed))
    }

    /// Creates a process with an empty page map.
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`] if the root table cannot be allocated.
    pub fn spawn(&self) -> Result<UserProcess<'f, M>, MapError> {
        let space = PageMap::new(self.frames.mapper(), self.frames)?;
        Ok(self.adopt(space))
    }

    /// Wraps an existing address space into a new process.
    ///
    /// The frames mapped in `space` must have been obtained from this
    /// coordinator's allocator, one reference per mapping.
    pub fn adopt<A: AddressSpace>(&self, space: A) -> Process<A> {
        let pid = self.next_pid();
        log::debug!("process {pid} created");
        Process::new(pid, None, space)
    }

    /// Write faults delivered to `process` so far.
    #[must_use]
    pub fn page_fault_count<A>(&self, process: &Process<A>) -> u64 {
        process.page_fault_count()
    }

    /// Maps `pages` fresh zeroed frames at `start` with `flags`.
    ///
    /// New mappings are never COW-eligible. On failure every page mapped by
    /// this call is unmapped and its frame released.
    ///
    /// # Errors
    /// - [`GrowError::OutOfMemory`] when the allocator runs dry.
    /// - [`GrowError::AlreadyMapped`] when a page in the range is in use.
    /// - [`GrowError::Map`] when a page cannot be mapped.
    pub fn map_anonymous<A: AddressSpace>(
        &self,
        process: &Process<A>,
        start: VirtualPage,
        pages: usize,
        flags: PageEntryBits,
    ) -> Result<(), GrowError> {
        let mut space = process.lock_space();
        let mut mapped = Vec::with_capacity(pages);

        let result = (0..pages as u64).try_for_each(|i| {
            let page = start
                .checked_add_pages(i)
                .ok_or_else(|| MapError::OutOfRange(nth_page_address(start, i)))?;
            if space.lookup(page).is_some() {
                return Err(GrowError::AlreadyMapped(page));
            }

            let frame = self.frames.allocate().map_err(|_| GrowError::OutOfMemory)?;
            self.frames.zero_frame(frame);
            if let Err(e) = space.install(self.frames, page, frame, flags.with_cow(false)) {
                self.frames.free(frame);
                return Err(e.into());
            }
            mapped.push(page);
            Ok(())
        });

        if let Err(e) = result {
            log::warn!(
                "process {}: growth at {start} failed after {} of {pages} pages: {e}",
                process.pid(),
                mapped.len()
            );
            for page in mapped {
                if let Some(frame) = space.remove(page) {
                    space.flush_page(page);
                    self.frames.free(frame);
                }
            }
            return Err(e);
        }
        Ok(())
    }

    /// Tears down `process`: every mapping is removed and its frame freed,
    /// shared or not, then the page tables are released.
    ///
    /// Returns the number of mappings released.
    pub fn exit<A: AddressSpace>(&self, process: Process<A>) -> usize {
        let pid = process.pid();
        let mut space = process.into_space();

        let pages = space.mapped_pages();
        for &page in &pages {
            if let Some(frame) = space.remove(page) {
                self.frames.free(frame);
            }
        }
        space.destroy(self.frames);

        log::debug!("process {pid} exited, {} pages released", pages.len());
        pages.len()
    }
}
