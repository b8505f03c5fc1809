use crate::process::Pid;
use kernel_memory_addresses::{VirtualAddress, VirtualPage};
use kernel_vmem::MapError;

/// Why a fork did not produce a child. The parent is left unchanged.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ForkError {
    /// No frame for the child's root table.
    #[error("out of memory")]
    OutOfMemory,
    /// The child could not take over the mapping at this address.
    #[error("child address space cannot map {0}")]
    AddressSpaceExhausted(VirtualAddress),
}

/// Why anonymous memory could not be added. Nothing is left half-mapped.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GrowError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("page {0} is already mapped")]
    AlreadyMapped(VirtualPage),
    #[error(transparent)]
    Map(#[from] MapError),
}

/// A fault that kills the faulting process, and only that process.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
#[error("process {pid} killed at {address}: {reason}")]
pub struct Fatal {
    pub pid: Pid,
    pub address: VirtualAddress,
    pub reason: FatalReason,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FatalReason {
    /// No frame to copy a shared page into.
    #[error("out of memory")]
    OutOfMemory,
    /// Write to a page that is read-only for a reason other than sharing.
    #[error("write to a read-only page")]
    ProtectionViolation,
    #[error("access to an unmapped page")]
    NotMapped,
    #[error("address space update failed: {0}")]
    AddressSpace(MapError),
}
