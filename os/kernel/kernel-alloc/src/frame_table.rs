//! # Frame State Table
//!
//! One [`FrameState`] per managed frame. Free frames double as the nodes of
//! an index-linked stack, so the free list costs no memory beyond the table
//! and push/pop are O(1).
//!
//! ```text
//! free_head ─► [7] Free{next: 3} ─► [3] Free{next: 0} ─► [0] Free{next: None}
//!              [1] Referenced(2)
//!              [2] Referenced(1)
//! ```
//!
//! Every transition happens here, and every illegal one panics with the
//! operation name and the frame address. Callers hold the allocator lock.

use alloc::boxed::Box;
use alloc::vec;
use core::num::NonZeroU32;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, PhysicalPage};

/// The state of a single managed frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FrameState {
    /// On the free list; `next` is the index of the following free frame.
    Free { next: Option<u32> },
    /// Mapped or otherwise owned `count` times.
    Referenced(NonZeroU32),
}

const ONE: NonZeroU32 = NonZeroU32::MIN;

pub struct FrameTable {
    base: PhysicalPage,
    states: Box<[FrameState]>,
    free_head: Option<u32>,
    free_frames: usize,
}

impl FrameTable {
    /// A table of `frames` frames starting at `base`, all reserved
    /// (`Referenced(1)`). They become allocatable once freed.
    ///
    /// # Panics
    /// Panics if `frames` does not fit the free-list links or the range
    /// overflows the physical address space.
    pub fn new(base: PhysicalPage, frames: usize) -> Self {
        assert!(
            u32::try_from(frames).is_ok(),
            "frame table: {frames} frames exceed the free-list index width"
        );
        assert!(
            base.checked_add_pages(frames as u64).is_some(),
            "frame table: range starting at {base} overflows"
        );

        Self {
            base,
            states: vec![FrameState::Referenced(ONE); frames].into_boxed_slice(),
            free_head: None,
            free_frames: 0,
        }
    }

    #[inline]
    pub const fn base(&self) -> PhysicalAddress {
        self.base.base()
    }

    /// One past the last managed byte.
    #[inline]
    pub fn end(&self) -> PhysicalAddress {
        self.base.base() + self.states.len() as u64 * PAGE_SIZE
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    #[inline]
    pub const fn free_frames(&self) -> usize {
        self.free_frames
    }

    #[inline]
    pub fn state(&self, index: usize) -> FrameState {
        self.states[index]
    }

    #[inline]
    pub fn frame_at(&self, index: usize) -> PhysicalPage {
        // Cannot overflow: checked in `new`.
        PhysicalPage::from_number(self.base.number() + index as u64)
    }

    /// Index of the frame at `pa`.
    ///
    /// # Panics
    /// Panics if `pa` is not frame-aligned or lies outside the table.
    #[allow(clippy::cast_possible_truncation)]
    pub fn index_of(&self, op: &str, pa: PhysicalAddress) -> usize {
        if !pa.is_page_aligned() {
            panic!("{op}: unaligned frame address {pa}");
        }
        if pa < self.base() || pa >= self.end() {
            panic!(
                "{op}: frame {pa} outside managed range [{}, {})",
                self.base(),
                self.end()
            );
        }
        // Bounded by `len()`, which fits in a `usize`.
        ((pa.as_u64() - self.base().as_u64()) / PAGE_SIZE) as usize
    }

    /// Current reference count, 0 for free frames.
    pub fn refcount(&self, index: usize) -> u32 {
        match self.states[index] {
            FrameState::Free { .. } => 0,
            FrameState::Referenced(n) => n.get(),
        }
    }

    /// Pops the head of the free list and marks it `Referenced(1)`.
    ///
    /// # Panics
    /// Panics if the head is not actually free.
    pub fn pop(&mut self) -> Option<PhysicalPage> {
        let head = self.free_head? as usize;
        let FrameState::Free { next } = self.states[head] else {
            panic!(
                "allocate: free-list head {} is referenced (corrupted free list)",
                self.frame_at(head)
            );
        };

        self.states[head] = FrameState::Referenced(ONE);
        self.free_head = next;
        self.free_frames -= 1;
        Some(self.frame_at(head))
    }

    /// Whether dropping one reference from `index` frees it.
    pub fn is_last_reference(&self, index: usize) -> bool {
        self.states[index] == FrameState::Referenced(ONE)
    }

    /// Drops one reference. On the last one the frame is pushed onto the
    /// free list. Returns the remaining count.
    ///
    /// # Panics
    /// Panics on refcount underflow (the frame is already free).
    pub fn release(&mut self, index: usize) -> u32 {
        match self.states[index] {
            FrameState::Free { .. } => {
                panic!("free: refcount underflow at {}", self.frame_at(index));
            }
            FrameState::Referenced(n) => match NonZeroU32::new(n.get() - 1) {
                Some(rest) => {
                    self.states[index] = FrameState::Referenced(rest);
                    rest.get()
                }
                None => {
                    self.push(index);
                    0
                }
            },
        }
    }

    /// Adds one reference. Returns the new count.
    ///
    /// # Panics
    /// Panics if the frame is free or the count would overflow.
    pub fn acquire(&mut self, index: usize) -> u32 {
        match self.states[index] {
            FrameState::Free { .. } => {
                panic!(
                    "increment_reference: frame {} is free (refcount 0)",
                    self.frame_at(index)
                );
            }
            FrameState::Referenced(n) => {
                let Some(more) = n.checked_add(1) else {
                    panic!(
                        "increment_reference: refcount overflow at {}",
                        self.frame_at(index)
                    );
                };
                self.states[index] = FrameState::Referenced(more);
                more.get()
            }
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn push(&mut self, index: usize) {
        self.states[index] = FrameState::Free {
            next: self.free_head,
        };
        // Fits: `new` rejects tables with more than `u32::MAX` frames.
        self.free_head = Some(index as u32);
        self.free_frames += 1;
    }

    /// Walks the free list and checks it against the states.
    ///
    /// # Panics
    /// Panics if the list and the table disagree.
    #[cfg(test)]
    pub fn check_consistency(&self) {
        let mut seen = 0;
        let mut cursor = self.free_head;
        while let Some(i) = cursor {
            let FrameState::Free { next } = self.states[i as usize] else {
                panic!("free list links referenced frame {i}");
            };
            seen += 1;
            assert!(seen <= self.states.len(), "free list has a cycle");
            cursor = next;
        }
        let free_states = self
            .states
            .iter()
            .filter(|s| matches!(s, FrameState::Free { .. }))
            .count();
        assert_eq!(seen, free_states);
        assert_eq!(seen, self.free_frames);
    }
}
