#![allow(dead_code)]

use kernel_alloc::phys_mapper::PhysArena;
use kernel_alloc::{AllocatorConfig, FrameAllocator};
use kernel_cow::{CowCoordinator, UserProcess};
use kernel_info::memory::PAGE_SIZE;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, VirtualAddress, VirtualPage};
use kernel_vmem::{AddressSpace, PageEntryBits};
use std::collections::{BTreeMap, BTreeSet};

pub const RAM_BASE: u64 = 0x8000_0000;

#[allow(clippy::cast_possible_truncation)]
pub const PAGE_BYTES: usize = PAGE_SIZE as usize;

/// First user data page used by the tests.
pub const DATA_BASE: u64 = 0x0010_0000;

pub fn boot(frames: usize) -> FrameAllocator<PhysArena> {
    let base = PhysicalAddress::new(RAM_BASE);
    let ram = PhysArena::new(base, frames);
    let end = ram.end();
    FrameAllocator::boot(ram, base, end, AllocatorConfig::new().with_junk_fill(true))
}

pub fn page(i: u64) -> VirtualPage {
    VirtualAddress::new(DATA_BASE + i * PAGE_SIZE).page()
}

pub fn addr(i: u64, offset: u64) -> VirtualAddress {
    page(i).join(offset)
}

/// A process with `pages` writable pages at [`DATA_BASE`], page `i` filled
/// with byte `fill + i`.
#[allow(clippy::cast_possible_truncation)]
pub fn spawn_with_pages<'f>(
    cow: &CowCoordinator<'f, PhysArena>,
    pages: u64,
    fill: u8,
) -> UserProcess<'f, PhysArena> {
    let p = cow.spawn().expect("root table");
    cow.map_anonymous(&p, page(0), pages as usize, PageEntryBits::user_rw())
        .expect("anonymous pages");
    for i in 0..pages {
        let byte = fill.wrapping_add(i as u8);
        cow.write_user(&p, page(i).base(), &[byte; PAGE_BYTES])
            .expect("initial fill");
    }
    p
}

pub fn frame_of(p: &UserProcess<'_, PhysArena>, i: u64) -> PhysicalPage {
    p.lookup(page(i)).expect("mapped").frame()
}

pub fn read_byte(
    cow: &CowCoordinator<'_, PhysArena>,
    p: &UserProcess<'_, PhysArena>,
    at: VirtualAddress,
) -> u8 {
    let mut b = [0u8; 1];
    cow.read_user(p, at, &mut b).expect("readable");
    b[0]
}

pub fn read_page(
    cow: &CowCoordinator<'_, PhysArena>,
    p: &UserProcess<'_, PhysArena>,
    i: u64,
) -> Vec<u8> {
    let mut buf = vec![0u8; PAGE_BYTES];
    cow.read_user(p, page(i).base(), &mut buf).expect("readable");
    buf
}

/// Checks the allocator against the live processes:
///
/// - every data frame's refcount equals the number of mappings of it,
/// - every page-table frame has refcount 1 and is not mapped as data,
/// - every other frame is free.
pub fn assert_refcount_invariant(
    frames: &FrameAllocator<PhysArena>,
    processes: &[&UserProcess<'_, PhysArena>],
) {
    let mut mappings: BTreeMap<PhysicalPage, u32> = BTreeMap::new();
    let mut tables: BTreeSet<PhysicalPage> = BTreeSet::new();

    for p in processes {
        p.with_space(|space| {
            for page in space.mapped_pages() {
                let frame = space.lookup(page).expect("listed page is mapped").frame();
                *mappings.entry(frame).or_default() += 1;
            }
            for t in space.table_pages() {
                assert!(tables.insert(t), "table frame {t} shared");
            }
        });
    }

    for (frame, count) in &mappings {
        assert!(!tables.contains(frame), "frame {frame} is both table and data");
        assert_eq!(
            frames.refcount(*frame),
            *count,
            "refcount of {frame} differs from its mapping count"
        );
    }
    for t in &tables {
        assert_eq!(frames.refcount(*t), 1, "table frame {t}");
    }

    let stats = frames.stats();
    assert_eq!(stats.used_frames, mappings.len() + tables.len());
    assert_eq!(stats.free_frames, stats.total_frames - stats.used_frames);
}
