//! Copy-on-write counters, kept per coordinator.

use core::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct CowCounters {
    faults: AtomicU64,
    pages_copied: AtomicU64,
    promoted_in_place: AtomicU64,
    forks: AtomicU64,
    fork_unwinds: AtomicU64,
}

impl CowCounters {
    pub(crate) const fn new() -> Self {
        Self {
            faults: AtomicU64::new(0),
            pages_copied: AtomicU64::new(0),
            promoted_in_place: AtomicU64::new(0),
            forks: AtomicU64::new(0),
            fork_unwinds: AtomicU64::new(0),
        }
    }

    pub(crate) fn fault(&self) {
        self.faults.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn copied(&self) {
        self.pages_copied.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn promoted(&self) {
        self.promoted_in_place.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn forked(&self) {
        self.forks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn unwound(&self) {
        self.fork_unwinds.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CowStats {
        CowStats {
            faults: self.faults.load(Ordering::Relaxed),
            pages_copied: self.pages_copied.load(Ordering::Relaxed),
            promoted_in_place: self.promoted_in_place.load(Ordering::Relaxed),
            forks: self.forks.load(Ordering::Relaxed),
            fork_unwinds: self.fork_unwinds.load(Ordering::Relaxed),
        }
    }
}

/// Copy-on-write statistics snapshot.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CowStats {
    /// Write faults delivered, including fatal ones.
    pub faults: u64,
    /// Faults resolved by copying a shared frame.
    pub pages_copied: u64,
    /// Faults resolved by making a sole-owner mapping writable again.
    pub promoted_in_place: u64,
    /// Successful forks.
    pub forks: u64,
    /// Forks that failed and were rolled back.
    pub fork_unwinds: u64,
}
