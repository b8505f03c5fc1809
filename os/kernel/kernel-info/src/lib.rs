//! # Kernel Memory Configuration
//!
//! Compile-time memory layout shared by the frame allocator, the page-table
//! code and the copy-on-write fork machinery. Everything here is a `const` so
//! that every consumer agrees on the same numbers without runtime plumbing.
//!
//! ## Physical Memory Layout
//!
//! ```text
//! Physical Memory Layout:
//! KERNEL_BASE ┌─────────────────────────────────┐ 0x8000_0000
//!             │       Kernel Image              │
//!             │   (Text, Data, BSS)             │
//! kernel end  ├─────────────────────────────────┤ (linker symbol, rounded up)
//!             │    Managed Frames               │
//!             │  (free list + refcount table)   │
//! PHYS_TOP    └─────────────────────────────────┘ KERNEL_BASE + 128 MiB
//! ```
//!
//! The frame allocator manages `[round_up(kernel end), PHYS_TOP)`. The exact
//! lower bound is only known at boot, which is why the refcount table is
//! sized when the range is registered rather than at build time.
//!
//! ## Debug Fill Patterns
//!
//! [`ALLOC_JUNK`](memory::ALLOC_JUNK) and [`FREE_JUNK`](memory::FREE_JUNK) are
//! written over frames on allocation and release when junk filling is
//! enabled, to make reads of uninitialized or dangling memory stand out.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod memory;
