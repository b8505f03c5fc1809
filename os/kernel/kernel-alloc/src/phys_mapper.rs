//! # Physical Memory Mappers
//!
//! [`PhysMapper`] implementations for the two places the allocator runs:
//!
//! - [`HhdmPhysMapper`]: inside the kernel, where all of physical memory is
//!   visible at a constant offset (a higher-half direct map, or the identity
//!   map with offset zero).
//! - [`PhysArena`]: on a host, where a heap allocation stands in for a range
//!   of RAM. Tests use it to observe frame contents.
//!
//! ## Example
//! ```rust
//! use kernel_alloc::phys_mapper::PhysArena;
//! use kernel_memory_addresses::PhysicalAddress;
//! use kernel_vmem::PhysMapper;
//!
//! let ram = PhysArena::new(PhysicalAddress::new(0x8000_0000), 2);
//! let p = ram.phys_to_ptr(PhysicalAddress::new(0x8000_1004));
//! unsafe { p.write(7) };
//! assert_eq!(unsafe { p.read() }, 7);
//! ```

use alloc::boxed::Box;
use core::cell::UnsafeCell;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress};
use kernel_vmem::PhysMapper;

#[allow(clippy::cast_possible_truncation)]
const FRAME_BYTES: usize = PAGE_SIZE as usize;

/// [`PhysMapper`] for kernels that see physical memory at `pa + offset`.
///
/// # Safety
/// - The direct map must be present and cover the referenced physical range.
/// - The returned pointer must only be used for valid, mapped, and writable memory.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HhdmPhysMapper {
    offset: u64,
}

impl HhdmPhysMapper {
    #[must_use]
    pub const fn new(offset: u64) -> Self {
        Self { offset }
    }

    /// Physical memory is identity mapped.
    #[must_use]
    pub const fn identity() -> Self {
        Self::new(0)
    }

    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }
}

impl PhysMapper for HhdmPhysMapper {
    #[allow(clippy::cast_possible_truncation)]
    fn phys_to_ptr(&self, pa: PhysicalAddress) -> *mut u8 {
        pa.as_u64().wrapping_add(self.offset) as usize as *mut u8
    }
}

#[repr(C, align(4096))]
struct Frame(UnsafeCell<[u8; FRAME_BYTES]>);

/// Heap-backed stand-in for a contiguous range of physical RAM.
///
/// Physical address `base + n` is byte `n` of the arena. Frames start
/// zeroed.
pub struct PhysArena {
    base: PhysicalAddress,
    frames: Box<[Frame]>,
}

// SAFETY: the arena only hands out raw pointers. Whoever dereferences them
// follows the frame ownership rules of the allocator.
unsafe impl Sync for PhysArena {}

impl PhysArena {
    /// An arena of `frames` frames starting at `base`.
    ///
    /// # Panics
    /// Panics if `base` is not frame-aligned.
    #[must_use]
    pub fn new(base: PhysicalAddress, frames: usize) -> Self {
        assert!(base.is_page_aligned(), "phys arena: unaligned base {base}");
        let frames = (0..frames)
            .map(|_| Frame(UnsafeCell::new([0; FRAME_BYTES])))
            .collect();
        Self { base, frames }
    }

    #[must_use]
    pub const fn base(&self) -> PhysicalAddress {
        self.base
    }

    /// One past the last byte.
    #[must_use]
    pub fn end(&self) -> PhysicalAddress {
        self.base + self.frames.len() as u64 * PAGE_SIZE
    }

    #[must_use]
    pub fn frames(&self) -> usize {
        self.frames.len()
    }
}

impl PhysMapper for PhysArena {
    /// # Panics
    /// Panics if `pa` is outside the arena.
    #[allow(clippy::cast_possible_truncation)]
    fn phys_to_ptr(&self, pa: PhysicalAddress) -> *mut u8 {
        assert!(
            pa >= self.base && pa < self.end(),
            "phys arena: {pa} outside [{}, {})",
            self.base,
            self.end()
        );
        let rel = pa.as_u64() - self.base.as_u64();
        let frame = &self.frames[(rel / PAGE_SIZE) as usize];
        // SAFETY: the offset is below the frame size.
        unsafe { frame.0.get().cast::<u8>().add(pa.page_offset() as usize) }
    }
}
