//! # User Memory Access
//!
//! Reads and writes of user memory that behave like the MMU: reads of
//! present pages never fault, a write to a COW page raises a write fault
//! and is retried once the fault is resolved.

use crate::coordinator::CowCoordinator;
use crate::error::{Fatal, FatalReason};
use crate::process::Process;
use kernel_memory_addresses::{PAGE_SIZE, VirtualAddress};
use kernel_vmem::{AddressSpace, PhysMapper};

/// Bytes from `address` to the end of its page, capped at `remaining`.
#[allow(clippy::cast_possible_truncation)]
fn chunk_len(address: VirtualAddress, remaining: usize) -> usize {
    // At most one page, which fits in a `usize`.
    let to_page_end = (PAGE_SIZE - address.page_offset()) as usize;
    remaining.min(to_page_end)
}

#[allow(clippy::cast_possible_truncation)]
const fn offset_in_page(address: VirtualAddress) -> usize {
    address.page_offset() as usize
}

impl<M: PhysMapper> CowCoordinator<'_, M> {
    /// Copies `buf.len()` bytes of `process` memory at `address` into `buf`.
    ///
    /// # Errors
    /// A [`Fatal`] if any byte lies on an unmapped page.
    pub fn read_user<A: AddressSpace>(
        &self,
        process: &Process<A>,
        address: VirtualAddress,
        buf: &mut [u8],
    ) -> Result<(), Fatal> {
        let space = process.lock_space();
        let mut done = 0;
        while done < buf.len() {
            let at = address + done as u64;
            let len = chunk_len(at, buf.len() - done);
            let Some(entry) = space.lookup(at.page()) else {
                return Err(Fatal {
                    pid: process.pid(),
                    address: at,
                    reason: FatalReason::NotMapped,
                });
            };
            self.frames
                .read_bytes(entry.frame(), offset_in_page(at), &mut buf[done..done + len]);
            done += len;
        }
        Ok(())
    }

    /// Copies `data` into `process` memory at `address`.
    ///
    /// Pages that are shared copy-on-write are resolved on the way, each
    /// through one write fault.
    ///
    /// # Errors
    /// A [`Fatal`] if a page is unmapped or read-only for real, or a fault
    /// cannot be resolved. Bytes before the failing page have been written.
    pub fn write_user<A: AddressSpace>(
        &self,
        process: &Process<A>,
        address: VirtualAddress,
        data: &[u8],
    ) -> Result<(), Fatal> {
        let mut done = 0;
        while done < data.len() {
            let at = address + done as u64;
            let len = chunk_len(at, data.len() - done);

            let written = {
                let space = process.lock_space();
                match space.lookup(at.page()) {
                    None => {
                        return Err(Fatal {
                            pid: process.pid(),
                            address: at,
                            reason: FatalReason::NotMapped,
                        });
                    }
                    Some(entry) if entry.writable() => {
                        self.frames.write_bytes(
                            entry.frame(),
                            offset_in_page(at),
                            &data[done..done + len],
                        );
                        true
                    }
                    Some(_) => false,
                }
            };

            if written {
                done += len;
            } else {
                // Trap: the lock is released, the fault path takes it again.
                self.resolve_write_fault(process, at)?;
            }
        }
        Ok(())
    }
}
