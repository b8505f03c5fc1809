//! # Virtual Memory Support
//!
//! The page-table side of the kernel's memory management: everything the
//! copy-on-write fork and fault paths need to know about a process's
//! address space, and nothing more.
//!
//! ## What you get
//! - [`PageEntryBits`]: an x86-64 style page-table entry with a software
//!   copy-on-write bit.
//! - [`PageTable`]: a 4 KiB-aligned page of 512 entries.
//! - [`AddressSpace`]: the narrow boundary fork and fault resolution consume
//!   (lookup, permission update, install, remove).
//! - [`PageMap`]: a three-level radix page table implementing
//!   [`AddressSpace`], whose tables live in physical frames.
//! - A tiny allocator/mapper interface ([`FrameAlloc`], [`PhysMapper`]).
//!
//! ## Virtual Address → Physical Address Walk
//!
//! Each 39-bit virtual address is divided into four fields:
//!
//! ```text
//! | 38‒30 | 29‒21 | 20‒12 | 11‒0   |
//! |  L2   |  L1   |  L0   | Offset |
//! ```
//!
//! The walk uses the fields as indices into three levels of tables, each
//! with 512 entries of 8 bytes. L2 and L1 entries link to the next table,
//! L0 entries map one 4 KiB frame. User addresses stop at
//! [`USER_VA_END`](info::USER_VA_END).

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

extern crate alloc;

pub mod address_space;
mod page_entry_bits;
mod page_map;
mod page_table;

pub use crate::address_space::{AddressSpace, MapError};
pub use crate::page_entry_bits::PageEntryBits;
pub use crate::page_map::PageMap;
pub use crate::page_table::PageTable;

use kernel_memory_addresses::{PhysicalAddress, PhysicalPage};

/// Re-export constants as info module.
pub use kernel_info::memory as info;

/// Minimal frame allocator used to obtain **physical** 4 KiB frames
/// for page tables.
///
/// Takes `&self`: implementations synchronize internally so that many
/// address spaces can draw from one shared pool.
pub trait FrameAlloc {
    /// Allocate one 4 KiB *physical* frame. Returns `None` on out-of-memory.
    fn alloc_4k(&self) -> Option<PhysicalPage>;

    /// Return a frame obtained from [`alloc_4k`](Self::alloc_4k).
    fn free_4k(&self, frame: PhysicalPage);
}

/// Converts physical addresses to usable pointers in the current virtual
/// address space (e.g., via identity map or a higher-half direct map, HHDM).
///
/// Typical patterns:
/// - **Kernel**: uses HHDM; adds a constant offset before returning a pointer.
/// - **Tests**: a heap-backed arena standing in for RAM.
pub trait PhysMapper {
    /// Pointer to the byte at physical address `pa`.
    ///
    /// Producing the pointer is safe; dereferencing it is not.
    fn phys_to_ptr(&self, pa: PhysicalAddress) -> *mut u8;

    /// Convert a *physical* address to a typed mutable reference.
    ///
    /// # Safety
    /// - `pa` must be mapped writable and suitably aligned for `T`.
    /// - Lifetime `'a` is purely borrow-checked; the mapping must remain valid
    ///   for `'a` and no other reference to the same bytes may be live.
    /// - Type `T` must match the bytes at `pa`.
    #[inline]
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        unsafe { &mut *self.phys_to_ptr(pa).cast::<T>() }
    }
}
