//! # Virtual and Physical Memory Address Types
//!
//! Strongly typed wrappers for raw memory addresses and 4 KiB page bases used
//! by the frame allocator and the page-table code.
//!
//! ## Overview
//!
//! The types prevent mixing virtual and physical addresses at compile time
//! while remaining zero-cost wrappers around `u64` values.
//!
//! | Type | Meaning |
//! |----------|----------|
//! | [`PhysicalAddress`] | Any byte address in physical memory. |
//! | [`PhysicalPage`] | The 4 KiB-aligned base of a physical frame. |
//! | [`VirtualAddress`] | Any byte address in a process's address space. |
//! | [`VirtualPage`] | The 4 KiB-aligned base of a virtual page. |
//!
//! Only the base page size ([`PAGE_SIZE`]) exists; there are no huge pages.
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0x0000_0040_0000_1234);
//! let page = va.page();
//! assert_eq!(page.base().as_u64(), 0x0000_0040_0000_1000);
//! assert_eq!(va.page_offset(), 0x234);
//! assert_eq!(page.join(va.page_offset()), va);
//!
//! let pa = PhysicalAddress::new(0x8000_2042);
//! assert_eq!(pa.page().base(), PhysicalAddress::new(0x8000_2000));
//! ```
//!
//! ## Radix Indices
//!
//! [`VirtualPage::table_indices`] splits a page into the three 9-bit indices
//! of a 39-bit, three-level page table (top level first):
//!
//! ```text
//! 38        30 29        21 20        12 11          0
//! ┌───────────┬────────────┬────────────┬─────────────┐
//! │  level 2  │  level 1   │  level 0   │   offset    │
//! └───────────┴────────────┴────────────┴─────────────┘
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::inline_always)]

use core::fmt;
use core::ops::{Add, AddAssign};

pub use kernel_info::memory::{PAGE_SHIFT, PAGE_SIZE};

/// Mask of the in-page offset bits.
const OFFSET_MASK: u64 = PAGE_SIZE - 1;

/// Number of index bits consumed by each page-table level.
pub const INDEX_BITS: u32 = 9;

/// Number of entries in one page-table page.
pub const ENTRIES_PER_TABLE: usize = 1 << INDEX_BITS;

/// Number of page-table levels.
pub const LEVELS: usize = 3;

#[inline(always)]
const fn align_down(v: u64) -> u64 {
    v & !OFFSET_MASK
}

#[inline(always)]
const fn align_up(v: u64) -> Option<u64> {
    match v.checked_add(OFFSET_MASK) {
        Some(v) => Some(align_down(v)),
        None => None,
    }
}

/// Physical memory address.
///
/// Carries the *kind* of address at the type level so a physical address is
/// never handed to code expecting a virtual one.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalAddress(u64);

impl PhysicalAddress {
    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// The frame containing this address.
    #[inline]
    #[must_use]
    pub const fn page(self) -> PhysicalPage {
        PhysicalPage(align_down(self.0))
    }

    /// Byte offset of this address inside its frame.
    #[inline]
    #[must_use]
    pub const fn page_offset(self) -> u64 {
        self.0 & OFFSET_MASK
    }

    #[inline]
    #[must_use]
    pub const fn is_page_aligned(self) -> bool {
        self.page_offset() == 0
    }

    #[inline]
    #[must_use]
    pub const fn align_down(self) -> Self {
        Self(align_down(self.0))
    }

    /// Rounds up to the next frame boundary, or `None` if that would overflow.
    #[inline]
    #[must_use]
    pub const fn align_up(self) -> Option<Self> {
        match align_up(self.0) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn checked_add(self, rhs: u64) -> Option<Self> {
        match self.0.checked_add(rhs) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }
}

impl fmt::Debug for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PA(0x{:016X})", self.0)
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl Add<u64> for PhysicalAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u64> for PhysicalAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}

impl From<u64> for PhysicalAddress {
    #[inline]
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<PhysicalAddress> for u64 {
    #[inline]
    fn from(value: PhysicalAddress) -> Self {
        value.0
    }
}

/// Virtual memory address.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualAddress(u64);

impl VirtualAddress {
    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// The page containing this address.
    #[inline]
    #[must_use]
    pub const fn page(self) -> VirtualPage {
        VirtualPage(align_down(self.0))
    }

    #[inline]
    #[must_use]
    pub const fn page_offset(self) -> u64 {
        self.0 & OFFSET_MASK
    }

    #[inline]
    #[must_use]
    pub const fn is_page_aligned(self) -> bool {
        self.page_offset() == 0
    }

    #[inline]
    #[must_use]
    pub const fn align_down(self) -> Self {
        Self(align_down(self.0))
    }

    #[inline]
    #[must_use]
    pub const fn align_up(self) -> Option<Self> {
        match align_up(self.0) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn checked_add(self, rhs: u64) -> Option<Self> {
        match self.0.checked_add(rhs) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VA(0x{:016X})", self.0)
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl Add<u64> for VirtualAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u64> for VirtualAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}

impl From<u64> for VirtualAddress {
    #[inline]
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<VirtualAddress> for u64 {
    #[inline]
    fn from(value: VirtualAddress) -> Self {
        value.0
    }
}

/// The 4 KiB-aligned base of a physical frame.
///
/// ### Invariants
/// - The wrapped value always has its low [`PAGE_SHIFT`] bits cleared.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalPage(u64);

impl PhysicalPage {
    /// The frame containing `addr`.
    #[inline]
    #[must_use]
    pub const fn containing_address(addr: PhysicalAddress) -> Self {
        addr.page()
    }

    /// Interprets an aligned address as a frame base.
    ///
    /// Returns `None` if `base` is not frame-aligned.
    #[inline]
    #[must_use]
    pub const fn from_base(base: PhysicalAddress) -> Option<Self> {
        if base.is_page_aligned() {
            Some(Self(base.as_u64()))
        } else {
            None
        }
    }

    /// Builds a frame from its physical frame number (`base >> PAGE_SHIFT`).
    #[inline]
    #[must_use]
    pub const fn from_number(pfn: u64) -> Self {
        Self(pfn << PAGE_SHIFT)
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress(self.0)
    }

    /// The physical frame number.
    #[inline]
    #[must_use]
    pub const fn number(self) -> u64 {
        self.0 >> PAGE_SHIFT
    }

    /// Address of byte `offset` inside this frame.
    ///
    /// The offset is masked to the frame size.
    #[inline]
    #[must_use]
    pub const fn join(self, offset: u64) -> PhysicalAddress {
        PhysicalAddress(self.0 | (offset & OFFSET_MASK))
    }

    /// The frame `count` frames above this one.
    #[inline]
    #[must_use]
    pub const fn checked_add_pages(self, count: u64) -> Option<Self> {
        match count.checked_mul(PAGE_SIZE) {
            Some(bytes) => match self.0.checked_add(bytes) {
                Some(v) => Some(Self(v)),
                None => None,
            },
            None => None,
        }
    }
}

impl fmt::Debug for PhysicalPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame(0x{:016X})", self.0)
    }
}

impl fmt::Display for PhysicalPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl From<PhysicalPage> for PhysicalAddress {
    #[inline]
    fn from(value: PhysicalPage) -> Self {
        value.base()
    }
}

/// The 4 KiB-aligned base of a virtual page.
///
/// ### Invariants
/// - The wrapped value always has its low [`PAGE_SHIFT`] bits cleared.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualPage(u64);

impl VirtualPage {
    #[inline]
    #[must_use]
    pub const fn containing_address(addr: VirtualAddress) -> Self {
        addr.page()
    }

    /// Returns `None` if `base` is not page-aligned.
    #[inline]
    #[must_use]
    pub const fn from_base(base: VirtualAddress) -> Option<Self> {
        if base.is_page_aligned() {
            Some(Self(base.as_u64()))
        } else {
            None
        }
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> VirtualAddress {
        VirtualAddress(self.0)
    }

    #[inline]
    #[must_use]
    pub const fn join(self, offset: u64) -> VirtualAddress {
        VirtualAddress(self.0 | (offset & OFFSET_MASK))
    }

    #[inline]
    #[must_use]
    pub const fn checked_add_pages(self, count: u64) -> Option<Self> {
        match count.checked_mul(PAGE_SIZE) {
            Some(bytes) => match self.0.checked_add(bytes) {
                Some(v) => Some(Self(v)),
                None => None,
            },
            None => None,
        }
    }

    /// Page-table index of this page at `level` (0 is the leaf level).
    ///
    /// # Panics
    /// Panics if `level >= LEVELS`.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn table_index(self, level: usize) -> usize {
        assert!(level < LEVELS, "page-table level out of range");
        let shift = PAGE_SHIFT + INDEX_BITS * level as u32;
        ((self.0 >> shift) as usize) & (ENTRIES_PER_TABLE - 1)
    }

    /// The three page-table indices of this page, top level first.
    #[inline]
    #[must_use]
    pub const fn table_indices(self) -> [usize; LEVELS] {
        [self.table_index(2), self.table_index(1), self.table_index(0)]
    }

    /// Inverse of [`table_indices`](Self::table_indices).
    ///
    /// Indices are masked to 9 bits.
    #[inline]
    #[must_use]
    pub const fn from_table_indices(indices: [usize; LEVELS]) -> Self {
        let mask = (ENTRIES_PER_TABLE - 1) as u64;
        let l2 = (indices[0] as u64) & mask;
        let l1 = (indices[1] as u64) & mask;
        let l0 = (indices[2] as u64) & mask;
        Self(
            (l2 << (PAGE_SHIFT + 2 * INDEX_BITS))
                | (l1 << (PAGE_SHIFT + INDEX_BITS))
                | (l0 << PAGE_SHIFT),
        )
    }
}

impl fmt::Debug for VirtualPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Page(0x{:016X})", self.0)
    }
}

impl fmt::Display for VirtualPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl From<VirtualPage> for VirtualAddress {
    #[inline]
    fn from(value: VirtualPage) -> Self {
        value.base()
    }
}
