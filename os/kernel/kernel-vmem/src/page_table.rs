//! # Page Table Page

use crate::PageEntryBits;
use kernel_memory_addresses::ENTRIES_PER_TABLE;

/// One page-table page: 512 entries, exactly one 4 KiB frame.
///
/// The same layout serves all three levels; whether an entry links to a
/// lower table or maps a page depends only on the level it is found at.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageEntryBits; ENTRIES_PER_TABLE],
}

const _: () = {
    assert!(size_of::<PageEntryBits>() == 8);
    assert!(size_of::<PageTable>() as u64 == kernel_info::memory::PAGE_SIZE);
};

impl PageTable {
    /// Clears every entry.
    #[inline]
    pub fn zero(&mut self) {
        self.entries.fill(PageEntryBits::new());
    }

    /// # Panics
    /// Panics if `index >= 512`.
    #[inline]
    #[must_use]
    pub const fn entry(&self, index: usize) -> PageEntryBits {
        self.entries[index]
    }

    /// # Panics
    /// Panics if `index >= 512`.
    #[inline]
    pub const fn set_entry(&mut self, index: usize, entry: PageEntryBits) {
        self.entries[index] = entry;
    }

    /// Indices and values of all present entries, in index order.
    pub fn present_entries(&self) -> impl Iterator<Item = (usize, PageEntryBits)> + '_ {
        self.entries
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, e)| e.present())
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|e| !e.present())
    }
}
