//! # Reference-Counted Physical Frame Allocator
//!
//! Hands out 4 KiB frames from a contiguous managed range and counts how
//! many mappings share each one. A frame returns to the free list exactly
//! when its last reference is dropped.
//!
//! ## Lifecycle
//!
//! ```text
//!            register_range            allocate
//! Reserved(1) ───────────► Free(0) ──────────────► Referenced(1)
//!                            ▲                         │  ▲
//!                            │ free (last)             │  │ increment_reference
//!                            └─────────────────────────┘  │
//!                                  Referenced(n) ◄─────────┘
//! ```
//!
//! ## Locking
//!
//! All bookkeeping sits behind one [`SpinLock`]. The lock is held only for
//! the table transition (and, on the last `free`, the junk fill) and never
//! while calling into another component, so the allocator may be called
//! from any context that does not already hold it.
//!
//! The lock does not mask interrupts. An interrupt handler that allocates
//! or frees on a CPU already inside the allocator spins forever, so such
//! handlers must not touch frames, or the embedding kernel must mask
//! interrupts around allocator calls.
//!
//! ## Invariant violations
//!
//! Freeing a free frame, incrementing a free frame, or passing an address
//! that is unaligned or outside the managed range panics. Such a call means
//! the kernel's bookkeeping is already wrong.

use crate::config::AllocatorConfig;
use crate::error::AllocError;
use crate::frame_table::FrameTable;
use core::ops::Range;
use kernel_info::memory::{ALLOC_JUNK, FREE_JUNK};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, PhysicalPage};
use kernel_sync::SpinLock;
use kernel_vmem::{FrameAlloc, PhysMapper};

#[allow(clippy::cast_possible_truncation)]
const FRAME_BYTES: usize = PAGE_SIZE as usize;

/// A point-in-time view of the allocator's counters.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Frames in the managed range.
    pub total_frames: usize,
    /// Frames on the free list.
    pub free_frames: usize,
    /// Frames with a reference count of at least one.
    pub used_frames: usize,
}

/// The physical frame allocator.
///
/// Construct once at boot and share by reference.
pub struct FrameAllocator<M: PhysMapper> {
    table: SpinLock<FrameTable>,
    mapper: M,
    config: AllocatorConfig,
}

impl<M: PhysMapper> FrameAllocator<M> {
    /// Creates an allocator for the whole frames inside `range`.
    ///
    /// Every frame starts reserved; nothing can be allocated until the
    /// usable part is handed over with [`register_range`](Self::register_range).
    #[must_use]
    pub fn new(mapper: M, range: Range<PhysicalAddress>, config: AllocatorConfig) -> Self {
        let start = range.start.align_up().unwrap_or(range.end.align_down());
        let end = range.end.align_down().max(start);
        let frames = (end.as_u64() - start.as_u64()) / PAGE_SIZE;

        #[allow(clippy::cast_possible_truncation)]
        let table = FrameTable::new(start.page(), frames as usize);
        Self {
            table: SpinLock::named("frame_table", table),
            mapper,
            config,
        }
    }

    /// Builds the allocator for `[kernel_end, phys_top)` and frees every
    /// frame in it.
    ///
    /// In the kernel `phys_top` is the configured RAM ceiling:
    ///
    /// ```rust
    /// use kernel_alloc::{AllocatorConfig, FrameAllocator, phys_mapper::HhdmPhysMapper};
    /// use kernel_info::memory::{KERNEL_BASE, PAGE_SIZE, PHYS_TOP};
    /// use kernel_memory_addresses::PhysicalAddress;
    ///
    /// // A 2 MiB kernel image at the bottom of RAM.
    /// let kernel_end = PhysicalAddress::new(KERNEL_BASE + 0x20_0000);
    /// let frames = FrameAllocator::boot(
    ///     HhdmPhysMapper::identity(),
    ///     kernel_end,
    ///     PhysicalAddress::new(PHYS_TOP),
    ///     AllocatorConfig::new().with_junk_fill(false),
    /// );
    /// let expected = (PHYS_TOP - kernel_end.as_u64()) / PAGE_SIZE;
    /// assert_eq!(frames.stats().free_frames as u64, expected);
    /// ```
    #[must_use]
    pub fn boot(
        mapper: M,
        kernel_end: PhysicalAddress,
        phys_top: PhysicalAddress,
        config: AllocatorConfig,
    ) -> Self {
        let allocator = Self::new(mapper, kernel_end..phys_top, config);
        allocator.register_range(kernel_end, phys_top);
        allocator
    }

    /// Hands every whole frame in `[start, end)` to the free list.
    ///
    /// `start` is rounded up to a frame boundary. Each frame goes through
    /// [`free`](Self::free), so registering a frame twice is caught as an
    /// underflow. Returns the number of frames registered.
    ///
    /// # Panics
    /// Panics if a frame lies outside the managed range or was already
    /// registered.
    pub fn register_range(&self, start: PhysicalAddress, end: PhysicalAddress) -> usize {
        let Some(mut frame) = start.align_up() else {
            return 0;
        };

        let mut count = 0;
        while frame
            .checked_add(PAGE_SIZE)
            .is_some_and(|next| next <= end)
        {
            self.free(frame);
            frame += PAGE_SIZE;
            count += 1;
        }

        log::info!(
            "frame allocator: registered {count} frames in [{start}, {end}), {} free",
            self.stats().free_frames
        );
        count
    }

    /// Takes one frame off the free list with a reference count of 1.
    ///
    /// # Errors
    /// [`AllocError::OutOfMemory`] when no frame is free.
    pub fn allocate(&self) -> Result<PhysicalPage, AllocError> {
        let frame = self.table.lock().pop().ok_or(AllocError::OutOfMemory)?;

        // The frame is ours alone now, no need to hold the lock.
        if self.config.junk_fill {
            self.fill(frame, ALLOC_JUNK);
        }
        Ok(frame)
    }

    /// Drops one reference to `frame`. At zero the frame is junk-filled
    /// (if configured) and put back on the free list.
    ///
    /// # Panics
    /// Panics on refcount underflow, or if `frame` is unaligned or outside
    /// the managed range.
    pub fn free(&self, frame: impl Into<PhysicalAddress>) {
        let pa = frame.into();
        let mut table = self.table.lock();
        let index = table.index_of("free", pa);

        // Fill before the push: once listed, another CPU may pop it.
        if self.config.junk_fill && table.is_last_reference(index) {
            self.fill(pa.page(), FREE_JUNK);
        }
        table.release(index);
    }

    /// Adds a reference to an already referenced `frame`.
    ///
    /// # Panics
    /// Panics if the frame is free, its count would overflow, or the address
    /// is unaligned or outside the managed range.
    pub fn increment_reference(&self, frame: impl Into<PhysicalAddress>) {
        let pa = frame.into();
        let mut table = self.table.lock();
        let index = table.index_of("increment_reference", pa);
        table.acquire(index);
    }

    /// Current reference count of `frame` (0 if free).
    ///
    /// # Panics
    /// Panics if the address is unaligned or outside the managed range.
    #[must_use]
    pub fn refcount(&self, frame: impl Into<PhysicalAddress>) -> u32 {
        let pa = frame.into();
        let table = self.table.lock();
        let index = table.index_of("refcount", pa);
        table.refcount(index)
    }

    #[must_use]
    pub fn stats(&self) -> AllocatorStats {
        let table = self.table.lock();
        AllocatorStats {
            total_frames: table.len(),
            free_frames: table.free_frames(),
            used_frames: table.len() - table.free_frames(),
        }
    }

    /// The frame-aligned range this allocator was built for.
    #[must_use]
    pub fn managed_range(&self) -> Range<PhysicalAddress> {
        let table = self.table.lock();
        table.base()..table.end()
    }

    /// Whether `frame` lies inside the managed range.
    #[must_use]
    pub fn manages(&self, frame: PhysicalPage) -> bool {
        self.managed_range().contains(&frame.base())
    }

    #[inline]
    #[must_use]
    pub const fn mapper(&self) -> &M {
        &self.mapper
    }

    /// Copies all bytes of `src` into `dst`.
    ///
    /// `dst` must be exclusively owned by the caller (freshly allocated) and
    /// `src` must not be written concurrently.
    pub fn copy_frame(&self, src: PhysicalPage, dst: PhysicalPage) {
        debug_assert_ne!(src, dst, "copy_frame: source and destination coincide");
        let from = self.mapper.phys_to_ptr(src.base());
        let to = self.mapper.phys_to_ptr(dst.base());
        // SAFETY: both pointers cover one whole frame and distinct frames
        // never overlap.
        unsafe { core::ptr::copy_nonoverlapping(from, to, FRAME_BYTES) };
    }

    /// Clears `frame` to zero. The caller must own it exclusively.
    pub fn zero_frame(&self, frame: PhysicalPage) {
        self.fill(frame, 0);
    }

    /// Reads `buf.len()` bytes at `offset` inside `frame`.
    ///
    /// # Panics
    /// Panics if the access crosses the end of the frame.
    pub fn read_bytes(&self, frame: PhysicalPage, offset: usize, buf: &mut [u8]) {
        check_span("read_bytes", frame, offset, buf.len());
        let from = self.mapper.phys_to_ptr(frame.join(offset as u64));
        // SAFETY: the span lies inside one frame (checked above).
        unsafe { core::ptr::copy_nonoverlapping(from, buf.as_mut_ptr(), buf.len()) };
    }

    /// Writes `data` at `offset` inside `frame`.
    ///
    /// # Panics
    /// Panics if the access crosses the end of the frame.
    pub fn write_bytes(&self, frame: PhysicalPage, offset: usize, data: &[u8]) {
        check_span("write_bytes", frame, offset, data.len());
        let to = self.mapper.phys_to_ptr(frame.join(offset as u64));
        // SAFETY: the span lies inside one frame (checked above).
        unsafe { core::ptr::copy_nonoverlapping(data.as_ptr(), to, data.len()) };
    }

    fn fill(&self, frame: PhysicalPage, byte: u8) {
        let to = self.mapper.phys_to_ptr(frame.base());
        // SAFETY: one whole frame, owned by the caller or by the free path.
        unsafe { core::ptr::write_bytes(to, byte, FRAME_BYTES) };
    }
}

fn check_span(op: &str, frame: PhysicalPage, offset: usize, len: usize) {
    assert!(
        offset.checked_add(len).is_some_and(|end| end <= FRAME_BYTES),
        "{op}: {len} bytes at offset {offset} cross the end of frame {frame}"
    );
}

/// Page-table pages come from the same pool as data frames.
impl<M: PhysMapper> FrameAlloc for FrameAllocator<M> {
    fn alloc_4k(&self) -> Option<PhysicalPage> {
        self.allocate().ok()
    }

    fn free_4k(&self, frame: PhysicalPage) {
        self.free(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phys_mapper::PhysArena;

    const BASE: u64 = 0x8000_0000;

    fn allocator(frames: usize, junk_fill: bool) -> FrameAllocator<PhysArena> {
        let base = PhysicalAddress::new(BASE);
        FrameAllocator::boot(
            PhysArena::new(base, frames),
            base,
            base + frames as u64 * PAGE_SIZE,
            AllocatorConfig::new().with_junk_fill(junk_fill),
        )
    }

    fn bytes(a: &FrameAllocator<PhysArena>, frame: PhysicalPage) -> [u8; FRAME_BYTES] {
        let mut buf = [0u8; FRAME_BYTES];
        a.read_bytes(frame, 0, &mut buf);
        buf
    }

    #[test]
    fn boot_registers_every_frame() {
        let a = allocator(8, false);
        assert_eq!(
            a.stats(),
            AllocatorStats {
                total_frames: 8,
                free_frames: 8,
                used_frames: 0
            }
        );
        let range = a.managed_range();
        assert_eq!(range.start, PhysicalAddress::new(BASE));
        assert_eq!(range.end, PhysicalAddress::new(BASE + 8 * PAGE_SIZE));
    }

    #[test]
    fn new_rounds_to_whole_frames() {
        let base = PhysicalAddress::new(BASE);
        let a = FrameAllocator::new(
            PhysArena::new(base, 4),
            PhysicalAddress::new(BASE + 0x10)..PhysicalAddress::new(BASE + 3 * PAGE_SIZE + 0x800),
            AllocatorConfig::default(),
        );
        let range = a.managed_range();
        assert_eq!(range.start, PhysicalAddress::new(BASE + PAGE_SIZE));
        assert_eq!(range.end, PhysicalAddress::new(BASE + 3 * PAGE_SIZE));
        assert_eq!(a.stats().free_frames, 0);
        assert_eq!(a.allocate(), Err(AllocError::OutOfMemory));
    }

    #[test]
    fn register_range_rounds_start_up_and_skips_partial_tail() {
        let base = PhysicalAddress::new(BASE);
        let a = FrameAllocator::new(
            PhysArena::new(base, 4),
            base..base + 4 * PAGE_SIZE,
            AllocatorConfig::default(),
        );
        let n = a.register_range(base + 0x123, base + 3 * PAGE_SIZE + 0x10);
        assert_eq!(n, 2);
        assert_eq!(a.refcount(base), 1, "rounded-off head stays reserved");
        assert_eq!(a.refcount(base + PAGE_SIZE), 0);
        assert_eq!(a.refcount(base + 2 * PAGE_SIZE), 0);
        assert_eq!(a.refcount(base + 3 * PAGE_SIZE), 1, "partial tail stays reserved");
    }

    #[test]
    fn allocate_until_exhausted() {
        let a = allocator(3, false);
        let frames: Vec<_> = (0..3).map(|_| a.allocate().expect("frame")).collect();
        assert_eq!(a.allocate(), Err(AllocError::OutOfMemory));
        for f in &frames {
            assert_eq!(a.refcount(*f), 1);
        }
        assert_eq!(a.stats().used_frames, 3);

        a.free(frames[1]);
        assert_eq!(a.allocate(), Ok(frames[1]));
    }

    #[test]
    fn shared_frame_returns_to_free_list_on_last_free() {
        let a = allocator(2, false);
        let f = a.allocate().expect("frame");
        a.increment_reference(f);
        a.increment_reference(f);
        assert_eq!(a.refcount(f), 3);

        a.free(f);
        a.free(f);
        assert_eq!(a.refcount(f), 1);
        assert_eq!(a.stats().free_frames, 1);

        a.free(f);
        assert_eq!(a.refcount(f), 0);
        assert_eq!(a.stats().free_frames, 2);
    }

    #[test]
    fn junk_fill_marks_allocated_and_freed_frames() {
        let a = allocator(2, true);
        let f = a.allocate().expect("frame");
        assert!(bytes(&a, f).iter().all(|&b| b == ALLOC_JUNK));

        a.write_bytes(f, 10, b"hello");
        a.increment_reference(f);
        a.free(f);
        // Still referenced: contents untouched.
        let mut buf = [0u8; 5];
        a.read_bytes(f, 10, &mut buf);
        assert_eq!(&buf, b"hello");

        a.free(f);
        assert!(bytes(&a, f).iter().all(|&b| b == FREE_JUNK));
    }

    #[test]
    fn junk_fill_off_leaves_contents_alone() {
        let a = allocator(1, false);
        let f = a.allocate().expect("frame");
        a.write_bytes(f, 0, &[0x42; 16]);
        a.free(f);
        let g = a.allocate().expect("frame");
        assert_eq!(f, g);
        let mut buf = [0u8; 16];
        a.read_bytes(g, 0, &mut buf);
        assert_eq!(buf, [0x42; 16]);
    }

    #[test]
    fn copy_and_zero() {
        let a = allocator(2, true);
        let src = a.allocate().expect("frame");
        let dst = a.allocate().expect("frame");
        a.write_bytes(src, FRAME_BYTES - 3, &[1, 2, 3]);
        a.copy_frame(src, dst);
        assert_eq!(bytes(&a, src), bytes(&a, dst));

        a.zero_frame(dst);
        assert!(bytes(&a, dst).iter().all(|&b| b == 0));
    }

    #[test]
    fn frame_alloc_seam_uses_the_same_pool() {
        let a = allocator(1, false);
        let f = a.alloc_4k().expect("frame");
        assert_eq!(a.refcount(f), 1);
        assert_eq!(a.alloc_4k(), None);
        a.free_4k(f);
        assert_eq!(a.stats().free_frames, 1);
    }

    #[test]
    #[should_panic(expected = "cross the end of frame")]
    fn write_past_frame_end_panics() {
        let a = allocator(1, false);
        let f = a.allocate().expect("frame");
        a.write_bytes(f, FRAME_BYTES - 1, &[0, 0]);
    }

    #[test]
    #[should_panic(expected = "free: refcount underflow")]
    fn double_registration_panics() {
        let a = allocator(2, false);
        let base = PhysicalAddress::new(BASE);
        a.register_range(base, base + 2 * PAGE_SIZE);
    }
}
