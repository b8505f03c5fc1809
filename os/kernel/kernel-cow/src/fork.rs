//! # Fork by Sharing
//!
//! The child receives the parent's frames, not copies of them. For each
//! mapped page, in increasing address order:
//!
//! 1. look up the frame,
//! 2. add a reference to it,
//! 3. map it in the child with write access removed,
//! 4. remove write access in the parent as well.
//!
//! Pages that were writable (or already shared) carry the COW bit on both
//! sides afterwards. Genuinely read-only pages are shared as they are.
//!
//! The whole walk runs under the parent's address-space lock. If the child
//! cannot take a mapping, every reference taken so far is dropped, the
//! parent's entries are restored and the child's tables are released.

use crate::coordinator::CowCoordinator;
use crate::error::ForkError;
use crate::process::Process;
use alloc::vec::Vec;
use kernel_memory_addresses::VirtualPage;
use kernel_vmem::{AddressSpace, PageEntryBits, PhysMapper};

impl<M: PhysMapper> CowCoordinator<'_, M> {
    /// Duplicates `parent`'s address space into a new child process.
    ///
    /// The child starts with a page-fault count of zero.
    ///
    /// # Errors
    /// - [`ForkError::OutOfMemory`] if the child's root table cannot be
    ///   allocated.
    /// - [`ForkError::AddressSpaceExhausted`] if the child cannot accept a
    ///   mapping. The parent is left exactly as it was.
    pub fn fork_address_space<A: AddressSpace>(
        &self,
        parent: &Process<A>,
    ) -> Result<Process<A>, ForkError> {
        let mut parent_space = parent.lock_space();
        let mut child_space = parent_space.new_sibling(self.frames).map_err(|e| {
            log::warn!("fork of {}: no child root table: {e}", parent.pid());
            ForkError::OutOfMemory
        })?;

        // Parent entries as they were before the fork touched them.
        let mut shared: Vec<(VirtualPage, PageEntryBits)> = Vec::new();

        for page in parent_space.mapped_pages() {
            let Some(entry) = parent_space.lookup(page) else {
                continue;
            };
            let frame = entry.frame();
            let flags = entry.permissions().shared_for_fork();

            self.frames.increment_reference(frame);
            if let Err(e) = child_space.install(self.frames, page, frame, flags) {
                log::warn!("fork of {}: child cannot map {page}: {e}", parent.pid());
                self.frames.free(frame);
                self.unwind_fork(&mut *parent_space, child_space, &shared);
                return Err(ForkError::AddressSpaceExhausted(page.base()));
            }
            shared.push((page, entry));

            if flags != entry.permissions() {
                // Cannot fail: the page was just looked up under the same lock.
                let downgraded = parent_space.set_permissions(page, flags);
                debug_assert!(downgraded.is_ok(), "fork: parent lost {page}");
                parent_space.flush_page(page);
            }
        }

        let child = Process::new(self.next_pid(), Some(parent.pid()), child_space);
        self.counters.forked();
        log::debug!(
            "fork {} -> {}: {} pages shared",
            parent.pid(),
            child.pid(),
            shared.len()
        );
        Ok(child)
    }

    /// Reverts a partial fork: the child's references go back to the
    /// allocator and the parent gets its original permissions back.
    fn unwind_fork<A: AddressSpace>(
        &self,
        parent_space: &mut A,
        mut child_space: A,
        shared: &[(VirtualPage, PageEntryBits)],
    ) {
        for &(page, original) in shared.iter().rev() {
            if let Some(frame) = child_space.remove(page) {
                self.frames.free(frame);
            }
            if parent_space.lookup(page) != Some(original) {
                let restored = parent_space.set_permissions(page, original.permissions());
                debug_assert!(restored.is_ok(), "fork unwind: parent lost {page}");
                parent_space.flush_page(page);
            }
        }
        child_space.destroy(self.frames);
        self.counters.unwound();
        log::debug!("fork unwound after {} pages", shared.len());
    }
}
