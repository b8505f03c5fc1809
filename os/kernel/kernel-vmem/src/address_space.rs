//! # Address Space Boundary
//!
//! The narrow interface the fork and fault paths use to read and change a
//! process's mappings. It answers one question per page: *which frame backs
//! this page, and with which permissions*.
//!
//! Page-table pages are drawn from a [`FrameAlloc`] passed into every call
//! that may need one. Running out of them is the only way a mapping can
//! fail to be installed, and surfaces as [`MapError::OutOfMemory`].
//!
//! ## TLB maintenance
//!
//! Changing a live mapping requires the stale translation to be flushed.
//! Callers invoke [`AddressSpace::flush_page`] after every permission
//! downgrade or frame replacement.

use crate::{FrameAlloc, PageEntryBits};
use alloc::vec::Vec;
use kernel_memory_addresses::{PhysicalPage, VirtualAddress, VirtualPage};

/// Why a mapping could not be changed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    /// No frame was available for a page-table page.
    #[error("out of memory for page-table pages")]
    OutOfMemory,
    /// The address lies outside the user address range.
    #[error("virtual address {0} is outside the user address range")]
    OutOfRange(VirtualAddress),
    /// The page has no present mapping.
    #[error("page {0} is not mapped")]
    NotMapped(VirtualPage),
}

/// One process's set of page mappings.
pub trait AddressSpace: Sized {
    /// The present leaf entry for `page`, or `None` if there is none.
    ///
    /// The entry carries the backing frame ([`PageEntryBits::frame`]) and the
    /// permissions.
    fn lookup(&self, page: VirtualPage) -> Option<PageEntryBits>;

    /// Replaces the permissions of an existing mapping, keeping its frame.
    ///
    /// The present bit is forced on.
    ///
    /// # Errors
    /// [`MapError::NotMapped`] if `page` has no present mapping.
    fn set_permissions(&mut self, page: VirtualPage, flags: PageEntryBits) -> Result<(), MapError>;

    /// Maps `page` to `frame` with `flags`, creating intermediate tables from
    /// `tables` as needed.
    ///
    /// Returns the frame previously mapped at `page`, if any. The caller owns
    /// that frame's reference.
    ///
    /// # Errors
    /// - [`MapError::OutOfRange`] if `page` is not a user page.
    /// - [`MapError::OutOfMemory`] if an intermediate table cannot be allocated.
    fn install<A: FrameAlloc + ?Sized>(
        &mut self,
        tables: &A,
        page: VirtualPage,
        frame: PhysicalPage,
        flags: PageEntryBits,
    ) -> Result<Option<PhysicalPage>, MapError>;

    /// Unmaps `page`, returning the frame it mapped.
    fn remove(&mut self, page: VirtualPage) -> Option<PhysicalPage>;

    /// Every mapped page, in increasing virtual-address order.
    fn mapped_pages(&self) -> Vec<VirtualPage>;

    /// Creates a new, empty address space of the same kind.
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`] if the root table cannot be allocated.
    fn new_sibling<A: FrameAlloc + ?Sized>(&self, tables: &A) -> Result<Self, MapError>;

    /// Releases the page-table pages. Every mapping must have been removed.
    fn destroy<A: FrameAlloc + ?Sized>(self, tables: &A);

    /// Invalidates any cached translation of `page`.
    #[inline]
    fn flush_page(&self, _page: VirtualPage) {}
}
