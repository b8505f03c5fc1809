//! # Copy-on-Write Fork and Fault Handling
//!
//! The primary client of the frame allocator. At fork time frames are shared
//! instead of copied; at write-fault time sharing is resolved by copying or
//! by restoring write access in place.
//!
//! ## Per-mapping lifecycle
//!
//! ```text
//! Unmapped ─► Mapped(writable) ─fork─► Mapped(COW, refcount ≥ 2)
//!                                          │
//!                 ┌─ fault, refcount == 1 ─┤
//!                 ▼                        ▼ fault, refcount > 1
//!         Mapped(writable)         Mapped(writable, new frame)
//! ```
//!
//! On exit every mapping is removed and its frame freed, COW or not.
//!
//! ## Usage
//! ```rust
//! use kernel_alloc::{AllocatorConfig, FrameAllocator, phys_mapper::PhysArena};
//! use kernel_cow::CowCoordinator;
//! use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
//! use kernel_vmem::PageEntryBits;
//!
//! let base = PhysicalAddress::new(0x8000_0000);
//! let ram = PhysArena::new(base, 32);
//! let end = ram.end();
//! let frames = FrameAllocator::boot(ram, base, end, AllocatorConfig::default());
//! let cow = CowCoordinator::new(&frames);
//!
//! let parent = cow.spawn().expect("root table");
//! let va = VirtualAddress::new(0x1000);
//! cow.map_anonymous(&parent, va.page(), 1, PageEntryBits::user_rw()).expect("frame");
//!
//! let child = cow.fork_address_space(&parent).expect("fork");
//! cow.write_user(&child, va, b"child").expect("write");
//! assert_eq!(child.page_fault_count(), 1);
//!
//! cow.exit(child);
//! cow.exit(parent);
//! assert_eq!(frames.stats().used_frames, 0);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

extern crate alloc;

mod coordinator;
mod error;
mod fault;
mod fork;
mod process;
mod stats;
mod uaccess;

pub use crate::coordinator::{CowCoordinator, UserProcess};
pub use crate::error::{Fatal, FatalReason, ForkError, GrowError};
pub use crate::fault::FaultOutcome;
pub use crate::process::{Pid, Process};
pub use crate::stats::CowStats;
