//! # Kernel synchronization primitives
//!
//! A single busy-waiting lock, [`SpinLock`], guards both the frame
//! allocator's table and every per-process address space. Locks carry a
//! static name so that diagnostics can say *which* lock a thread holds.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod spin_lock;

pub use spin_lock::{SpinLock, SpinLockGuard};
