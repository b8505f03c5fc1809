//! # Write-Fault Resolution
//!
//! A write to a present, read-only, COW-marked page is resolved by looking
//! at the frame's reference count:
//!
//! - **1**: this mapping is the last owner. Write access is restored in
//!   place and the frame stays.
//! - **more than 1**: a fresh frame receives a full copy, replaces the
//!   shared one in this mapping only, and the shared frame loses one
//!   reference.
//!
//! The new frame becomes visible only after the copy completes. A write to
//! a read-only page without the COW mark is a protection violation.

use crate::coordinator::CowCoordinator;
use crate::error::{Fatal, FatalReason};
use crate::process::Process;
use kernel_memory_addresses::{PhysicalPage, VirtualAddress};
use kernel_vmem::{AddressSpace, PhysMapper};

/// How a write fault was resolved.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FaultOutcome {
    /// The mapping was already writable, e.g. resolved by another CPU.
    Spurious,
    /// The process was the sole owner; write access was restored in place.
    PromotedInPlace { frame: PhysicalPage },
    /// The shared frame was copied into a private one.
    Copied {
        from: PhysicalPage,
        to: PhysicalPage,
    },
}

impl<M: PhysMapper> CowCoordinator<'_, M> {
    /// Resolves a write fault by `process` at `address`.
    ///
    /// Every call counts as one page fault of the process, whatever the
    /// outcome.
    ///
    /// # Errors
    /// A [`Fatal`] for the process if the page is unmapped, genuinely
    /// read-only, or no frame is left for the copy.
    pub fn resolve_write_fault<A: AddressSpace>(
        &self,
        process: &Process<A>,
        address: VirtualAddress,
    ) -> Result<FaultOutcome, Fatal> {
        process.record_fault();
        self.counters.fault();

        let fatal = |reason| Fatal {
            pid: process.pid(),
            address,
            reason,
        };

        let page = address.page();
        let mut space = process.lock_space();
        let Some(entry) = space.lookup(page) else {
            return Err(fatal(FatalReason::NotMapped));
        };
        if entry.writable() {
            return Ok(FaultOutcome::Spurious);
        }
        if !entry.is_cow_eligible() {
            return Err(fatal(FatalReason::ProtectionViolation));
        }

        let old = entry.frame();
        let flags = entry.permissions().resolved_cow();

        // Only a fork of this process could raise a count of 1, and that
        // needs the lock held here.
        if self.frames.refcount(old) == 1 {
            space
                .set_permissions(page, flags)
                .map_err(|e| fatal(FatalReason::AddressSpace(e)))?;
            space.flush_page(page);
            self.counters.promoted();
            log::trace!("process {}: {page} promoted in place ({old})", process.pid());
            return Ok(FaultOutcome::PromotedInPlace { frame: old });
        }

        let Ok(new) = self.frames.allocate() else {
            log::warn!("process {}: no frame to copy {page}", process.pid());
            return Err(fatal(FatalReason::OutOfMemory));
        };
        self.frames.copy_frame(old, new);

        if let Err(e) = space.install(self.frames, page, new, flags) {
            self.frames.free(new);
            return Err(fatal(FatalReason::AddressSpace(e)));
        }
        space.flush_page(page);
        self.frames.free(old);

        self.counters.copied();
        log::trace!("process {}: {page} copied {old} -> {new}", process.pid());
        Ok(FaultOutcome::Copied { from: old, to: new })
    }
}
