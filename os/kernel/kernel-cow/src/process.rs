use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use kernel_memory_addresses::VirtualPage;
use kernel_sync::{SpinLock, SpinLockGuard};
use kernel_vmem::{AddressSpace, PageEntryBits};

/// Process identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(u32);

impl Pid {
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The memory side of a process: its address space behind a lock, and its
/// page-fault counter.
///
/// A process must be torn down with
/// [`CowCoordinator::exit`](crate::CowCoordinator::exit); dropping it
/// leaks its frames.
pub struct Process<A> {
    pid: Pid,
    parent: Option<Pid>,
    space: SpinLock<A>,
    page_faults: AtomicU64,
}

impl<A> Process<A> {
    pub(crate) const fn new(pid: Pid, parent: Option<Pid>, space: A) -> Self {
        Self {
            pid,
            parent,
            space: SpinLock::named("address_space", space),
            page_faults: AtomicU64::new(0),
        }
    }

    #[inline]
    #[must_use]
    pub const fn pid(&self) -> Pid {
        self.pid
    }

    #[inline]
    #[must_use]
    pub const fn parent(&self) -> Option<Pid> {
        self.parent
    }

    /// Write faults delivered to this process so far.
    #[inline]
    #[must_use]
    pub fn page_fault_count(&self) -> u64 {
        self.page_faults.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn record_fault(&self) {
        self.page_faults.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn lock_space(&self) -> SpinLockGuard<'_, A> {
        self.space.lock()
    }

    pub(crate) fn into_space(self) -> A {
        self.space.into_inner()
    }

    /// Runs `f` on the address space under the process lock.
    pub fn with_space<R>(&self, f: impl FnOnce(&A) -> R) -> R {
        f(&self.space.lock())
    }
}

impl<A: AddressSpace> Process<A> {
    /// The present mapping of `page`, if any.
    #[must_use]
    pub fn lookup(&self, page: VirtualPage) -> Option<PageEntryBits> {
        self.space.lock().lookup(page)
    }
}

impl<A> fmt::Debug for Process<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("parent", &self.parent)
            .field("page_faults", &self.page_fault_count())
            .finish_non_exhaustive()
    }
}
