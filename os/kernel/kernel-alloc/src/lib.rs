//! # Kernel Physical Frame Allocation
//!
//! The leaf of the kernel's memory management: a reference-counted
//! allocator of 4 KiB physical frames. It knows nothing about processes or
//! page tables; it only counts how many owners each frame has.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │            Copy-on-write fork / fault               │
//! │    • shares frames at fork (increment_reference)    │
//! │    • copies or promotes on write faults             │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │           Physical Frame Allocator                  │
//! │    • allocate / free / increment_reference          │
//! │    • tagged per-frame state, intrusive free stack   │
//! │    • one spin lock around all bookkeeping           │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │              Physical Mapper                        │
//! │    • HHDM / identity map in the kernel              │
//! │    • heap-backed arena on the host                  │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Components
//!
//! ### Frame Allocator ([`frame_alloc`])
//!
//! * **Tagged states**: every frame is either `Free` or `Referenced(n ≥ 1)`;
//!   the free list is threaded through the `Free` states.
//! * **Boot-sized table**: the managed range is discovered at boot and the
//!   table is sized to it.
//! * **Fatal misuse**: underflow, incrementing a free frame and foreign
//!   addresses panic with the operation and address.
//!
//! ### Configuration ([`config`])
//!
//! Junk filling of allocated and freed frames, on by default in debug
//! builds.
//!
//! ### Physical Mapper ([`phys_mapper`])
//!
//! Turns physical addresses into pointers so that frames can be filled,
//! copied and read.
//!
//! ## Usage
//! ```rust
//! use kernel_alloc::{AllocatorConfig, FrameAllocator, phys_mapper::PhysArena};
//! use kernel_memory_addresses::PhysicalAddress;
//!
//! let base = PhysicalAddress::new(0x8000_0000);
//! let ram = PhysArena::new(base, 16);
//! let end = ram.end();
//! let frames = FrameAllocator::boot(ram, base, end, AllocatorConfig::default());
//!
//! let f = frames.allocate().expect("free frame");
//! frames.increment_reference(f);
//! frames.free(f);
//! assert_eq!(frames.refcount(f), 1);
//! frames.free(f);
//! assert_eq!(frames.stats().free_frames, 16);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

pub mod config;
mod error;
pub mod frame_alloc;
mod frame_table;
pub mod phys_mapper;

pub use crate::config::AllocatorConfig;
pub use crate::error::AllocError;
pub use crate::frame_alloc::{AllocatorStats, FrameAllocator};
