use bitfield_struct::bitfield;
use kernel_memory_addresses::PhysicalPage;

/// A single 64-bit page-table entry in its raw bitfield form.
///
/// The layout follows the x86-64 PTE so that the same bits mean the same
/// thing at every level. One of the OS-available bits is claimed as the
/// software **copy-on-write** marker.
///
/// ### Bit layout
///
/// | Bits      | Name / Mnemonic   | Meaning |
/// |-----------|-------------------|----------|
/// | 0         | `P` (present)     | Valid entry if set |
/// | 1         | `RW`              | Writable if set |
/// | 2         | `US`              | User-mode accessible if set |
/// | 3         | `PWT`             | Write-through caching |
/// | 4         | `PCD`             | Disable caching |
/// | 5         | `A`               | Accessed |
/// | 6         | `D`               | Dirty (leaf only) |
/// | 7         | `PS`              | Large page flag (always clear here) |
/// | 8         | `G`               | Global (leaf only) |
/// | 9         | `COW`             | Software: read-only because shared by fork |
/// | 10–11     | OS avail low      | Reserved for OS use |
/// | 12–51     | `addr`            | Physical frame bits [51:12] |
/// | 52–58     | OS avail high     | Reserved for OS use |
/// | 59–62     | `PKU` / OS use    | Protection key or OS use |
/// | 63        | `NX`              | Execute disable |
///
/// ### Copy-on-write
///
/// A leaf that is present, not writable and has `cow` set is
/// [COW-eligible](Self::is_cow_eligible): a write fault on it is resolved by
/// sharing or copying the frame. A read-only leaf *without* `cow` is
/// genuinely read-only (e.g. text) and a write to it is a protection
/// violation.
///
/// ### Example
/// ```rust
/// # use kernel_memory_addresses::{PhysicalAddress, PhysicalPage};
/// # use kernel_vmem::PageEntryBits;
/// let frame = PhysicalAddress::new(0x8001_2000).page();
/// let e = PageEntryBits::user_rw().with_frame(frame);
/// assert!(e.present());
/// assert_eq!(e.frame(), frame);
/// assert!(!e.is_cow_eligible());
/// ```
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct PageEntryBits {
    /// Present (P, bit 0).
    pub present: bool,

    /// Writable (RW, bit 1).
    ///
    /// Clear for read-only; writes then trap into the page-fault path.
    pub writable: bool,

    /// User/Supervisor (US, bit 2).
    pub user_access: bool,

    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,

    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,

    /// Accessed (A, bit 5).
    pub accessed: bool,

    /// Dirty (D, bit 6), **leaf only**.
    pub dirty: bool,

    /// Large Page / Page Size (PS, bit 7).
    ///
    /// Only 4 KiB pages exist, so this stays clear.
    pub large_page: bool,

    /// Global (G, bit 8), **leaf only**.
    pub global_translation: bool,

    /// Copy-on-write marker (bit 9, OS-available).
    ///
    /// Set on both sides of a fork for every mapping that was writable (or
    /// already COW) in the parent. Hardware ignores it.
    pub cow: bool,

    /// OS-available (bits 10..=11).
    #[bits(2)]
    pub os_available_low: u8,

    /// Physical address bits [51:12] (bits 12..=51).
    #[bits(40)]
    phys_addr_bits_51_12: u64,

    /// OS-available (bits 52..=58).
    #[bits(7)]
    pub os_available_high: u8,

    /// Protection Key (PKU, bits 59..=62) if supported; otherwise OS use.
    #[bits(4)]
    pub protection_key: u8,

    /// No-Execute (NX, bit 63).
    pub no_execute: bool,
}

impl PageEntryBits {
    /// The frame this entry points at.
    #[inline]
    #[must_use]
    pub const fn frame(&self) -> PhysicalPage {
        PhysicalPage::from_number(self.phys_addr_bits_51_12())
    }

    #[inline]
    #[must_use]
    pub const fn with_frame(self, frame: PhysicalPage) -> Self {
        self.with_phys_addr_bits_51_12(frame.number())
    }

    /// The permission and status bits of this entry, with the frame cleared.
    #[inline]
    #[must_use]
    pub const fn permissions(self) -> Self {
        self.with_phys_addr_bits_51_12(0)
    }

    /// Present, read-only and marked copy-on-write.
    #[inline]
    #[must_use]
    pub const fn is_cow_eligible(&self) -> bool {
        self.present() && !self.writable() && self.cow()
    }

    /// The permissions a forked mapping ends up with on both sides.
    ///
    /// Writable and already-COW mappings become read-only COW mappings.
    /// Genuinely read-only mappings stay as they are.
    #[inline]
    #[must_use]
    pub const fn shared_for_fork(self) -> Self {
        if self.writable() || self.cow() {
            self.with_writable(false).with_cow(true)
        } else {
            self
        }
    }

    /// A resolved COW mapping: writable again, no longer marked.
    #[inline]
    #[must_use]
    pub const fn resolved_cow(self) -> Self {
        self.with_writable(true).with_cow(false)
    }

    /// Link to a next-level table.
    #[inline]
    #[must_use]
    pub const fn table_link(table: PhysicalPage) -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_user_access(true)
            .with_frame(table)
    }

    /// Present, writable, user-accessible, non-executable data page.
    #[inline]
    #[must_use]
    pub const fn user_rw() -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_user_access(true)
            .with_no_execute(true)
    }

    /// Present, read-only, user-accessible, executable text page.
    #[inline]
    #[must_use]
    pub const fn user_rx() -> Self {
        Self::new()
            .with_present(true)
            .with_writable(false)
            .with_user_access(true)
            .with_no_execute(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_memory_addresses::PhysicalAddress;

    #[test]
    fn cow_bit_is_bit_nine() {
        let e = PageEntryBits::new().with_cow(true);
        assert_eq!(e.into_bits(), 1 << 9);
    }

    #[test]
    fn frame_round_trips_without_touching_flags() {
        let frame = PhysicalAddress::new(0x8765_4000).page();
        let e = PageEntryBits::user_rw().with_frame(frame);
        assert_eq!(e.frame(), frame);
        assert_eq!(e.into_bits() & 0xFFF, PageEntryBits::user_rw().into_bits() & 0xFFF);
        assert_eq!(e.permissions(), PageEntryBits::user_rw());
    }

    #[test]
    fn fork_sharing_downgrades_writable_only() {
        let rw = PageEntryBits::user_rw().shared_for_fork();
        assert!(rw.is_cow_eligible());
        assert!(!rw.writable());

        let text = PageEntryBits::user_rx().shared_for_fork();
        assert_eq!(text, PageEntryBits::user_rx());
        assert!(!text.is_cow_eligible());

        // Forking a COW page again keeps it COW.
        assert_eq!(rw.shared_for_fork(), rw);
    }

    #[test]
    fn resolving_restores_write_access() {
        let e = PageEntryBits::user_rw().shared_for_fork().resolved_cow();
        assert!(e.writable());
        assert!(!e.cow());
        assert_eq!(e, PageEntryBits::user_rw());
    }
}
