//! # Three-Level Page Map
//!
//! A radix page table rooted at one 4 KiB frame. Every table page lives in a
//! physical frame drawn from a [`FrameAlloc`] and is reached through a
//! [`PhysMapper`].
//!
//! ## Design
//!
//! - Intermediate entries are created present, writable and user-accessible.
//!   Permissions are decided by the leaf alone.
//! - Intermediate tables are never reclaimed while the map is alive; an
//!   emptied table stays linked until [`destroy`](AddressSpace::destroy).
//! - Keeps `unsafe` confined to mapping a physical frame to a typed table
//!   through the `PhysMapper`.

use crate::info::USER_VA_END;
use crate::{AddressSpace, FrameAlloc, MapError, PageEntryBits, PageTable, PhysMapper};
use alloc::vec::Vec;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, VirtualAddress, VirtualPage};

/// Handle to a single, concrete page map.
pub struct PageMap<'m, M: PhysMapper> {
    root: PhysicalPage,
    mapper: &'m M,
}

impl<'m, M: PhysMapper> PageMap<'m, M> {
    /// Allocates and clears a root table.
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`] if `tables` has no frame left.
    pub fn new<A: FrameAlloc + ?Sized>(mapper: &'m M, tables: &A) -> Result<Self, MapError> {
        let root = alloc_table(mapper, tables)?;
        Ok(Self { root, mapper })
    }

    #[inline]
    #[must_use]
    pub const fn mapper(&self) -> &'m M {
        self.mapper
    }

    /// Translate a `VirtualAddress` to `PhysicalAddress` if mapped.
    #[must_use]
    pub fn query(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.lookup(va.page())
            .map(|e| e.frame().join(va.page_offset()))
    }

    /// Every frame holding one of this map's tables, root first.
    #[must_use]
    pub fn table_pages(&self) -> Vec<PhysicalPage> {
        let mut frames = alloc::vec![self.root];
        for (_, e2) in self.table(self.root).present_entries() {
            frames.push(e2.frame());
            frames.extend(self.table(e2.frame()).present_entries().map(|(_, e1)| e1.frame()));
        }
        frames
    }

    #[inline]
    fn table(&self, frame: PhysicalPage) -> &PageTable {
        // SAFETY: table frames are owned by this map and hold a `PageTable`.
        unsafe { self.mapper.phys_to_mut::<PageTable>(frame.base()) }
    }

    #[inline]
    fn table_mut(&mut self, frame: PhysicalPage) -> &mut PageTable {
        // SAFETY: as above; `&mut self` makes the access exclusive.
        unsafe { self.mapper.phys_to_mut::<PageTable>(frame.base()) }
    }

    /// The L0 table covering `page`, if the walk reaches one.
    fn leaf_table(&self, page: VirtualPage) -> Option<PhysicalPage> {
        if !is_user_page(page) {
            return None;
        }

        let [i2, i1, _] = page.table_indices();
        let e2 = self.table(self.root).entry(i2);
        if !e2.present() {
            return None;
        }
        let e1 = self.table(e2.frame()).entry(i1);
        e1.present().then_some(e1.frame())
    }

    fn leaf_table_or_create<A: FrameAlloc + ?Sized>(
        &mut self,
        tables: &A,
        page: VirtualPage,
    ) -> Result<PhysicalPage, MapError> {
        let [i2, i1, _] = page.table_indices();
        let l1 = self.next_table_or_create(tables, self.root, i2)?;
        self.next_table_or_create(tables, l1, i1)
    }

    fn next_table_or_create<A: FrameAlloc + ?Sized>(
        &mut self,
        tables: &A,
        parent: PhysicalPage,
        index: usize,
    ) -> Result<PhysicalPage, MapError> {
        let e = self.table(parent).entry(index);
        if e.present() {
            return Ok(e.frame());
        }

        let next = alloc_table(self.mapper, tables)?;
        self.table_mut(parent)
            .set_entry(index, PageEntryBits::table_link(next));
        Ok(next)
    }
}

impl<M: PhysMapper> AddressSpace for PageMap<'_, M> {
    fn lookup(&self, page: VirtualPage) -> Option<PageEntryBits> {
        let leaf = self.leaf_table(page)?;
        let e = self.table(leaf).entry(page.table_index(0));
        e.present().then_some(e)
    }

    fn set_permissions(&mut self, page: VirtualPage, flags: PageEntryBits) -> Result<(), MapError> {
        let leaf = self.leaf_table(page).ok_or(MapError::NotMapped(page))?;
        let i0 = page.table_index(0);
        let old = self.table(leaf).entry(i0);
        if !old.present() {
            return Err(MapError::NotMapped(page));
        }

        let new = flags.with_present(true).with_frame(old.frame());
        self.table_mut(leaf).set_entry(i0, new);
        Ok(())
    }

    fn install<A: FrameAlloc + ?Sized>(
        &mut self,
        tables: &A,
        page: VirtualPage,
        frame: PhysicalPage,
        flags: PageEntryBits,
    ) -> Result<Option<PhysicalPage>, MapError> {
        if !is_user_page(page) {
            return Err(MapError::OutOfRange(page.base()));
        }

        let leaf = self.leaf_table_or_create(tables, page)?;
        let i0 = page.table_index(0);
        let old = self.table(leaf).entry(i0);
        self.table_mut(leaf)
            .set_entry(i0, flags.with_present(true).with_frame(frame));
        Ok(old.present().then_some(old.frame()))
    }

    fn remove(&mut self, page: VirtualPage) -> Option<PhysicalPage> {
        let leaf = self.leaf_table(page)?;
        let i0 = page.table_index(0);
        let old = self.table(leaf).entry(i0);
        if !old.present() {
            return None;
        }

        self.table_mut(leaf).set_entry(i0, PageEntryBits::new());
        Some(old.frame())
    }

    fn mapped_pages(&self) -> Vec<VirtualPage> {
        let mut pages = Vec::new();
        for (i2, e2) in self.table(self.root).present_entries() {
            for (i1, e1) in self.table(e2.frame()).present_entries() {
                for (i0, _) in self.table(e1.frame()).present_entries() {
                    pages.push(VirtualPage::from_table_indices([i2, i1, i0]));
                }
            }
        }
        pages
    }

    fn new_sibling<A: FrameAlloc + ?Sized>(&self, tables: &A) -> Result<Self, MapError> {
        Self::new(self.mapper, tables)
    }

    /// # Panics
    /// Panics if a leaf mapping is still present.
    fn destroy<A: FrameAlloc + ?Sized>(self, tables: &A) {
        let mut frames = Vec::new();
        for (i2, e2) in self.table(self.root).present_entries() {
            for (i1, e1) in self.table(e2.frame()).present_entries() {
                if let Some((i0, _)) = self.table(e1.frame()).present_entries().next() {
                    let page = VirtualPage::from_table_indices([i2, i1, i0]);
                    panic!("destroy: page {page} is still mapped");
                }
                frames.push(e1.frame());
            }
            frames.push(e2.frame());
        }
        frames.push(self.root);

        log::trace!("page map {} destroyed, {} table pages", self.root, frames.len());
        for frame in frames {
            tables.free_4k(frame);
        }
    }
}

#[inline]
const fn is_user_page(page: VirtualPage) -> bool {
    page.base().as_u64() < USER_VA_END
}

fn alloc_table<M: PhysMapper, A: FrameAlloc + ?Sized>(
    mapper: &M,
    tables: &A,
) -> Result<PhysicalPage, MapError> {
    let frame = tables.alloc_4k().ok_or(MapError::OutOfMemory)?;
    // SAFETY: the frame was just allocated and nothing else refers to it.
    unsafe { mapper.phys_to_mut::<PageTable>(frame.base()) }.zero();
    Ok(frame)
}
