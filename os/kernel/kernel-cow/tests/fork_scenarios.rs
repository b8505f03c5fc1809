mod common;

use common::*;
use kernel_cow::{CowCoordinator, CowStats, ForkError};
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::PageEntryBits;

#[test]
fn fork_shares_every_frame_copy_on_write() {
    let frames = boot(32);
    let cow = CowCoordinator::new(&frames);
    let parent = spawn_with_pages(&cow, 4, 0x10);
    let before: Vec<_> = (0..4).map(|i| frame_of(&parent, i)).collect();
    let used_before = frames.stats().used_frames;

    let child = cow.fork_address_space(&parent).expect("fork");

    assert_eq!(child.parent(), Some(parent.pid()));
    assert_eq!(child.page_fault_count(), 0);
    // Only the child's three tables are new.
    assert_eq!(frames.stats().used_frames, used_before + 3);
    for (i, &frame) in before.iter().enumerate() {
        let i = i as u64;
        assert_eq!(frames.refcount(frame), 2);
        for p in [&parent, &child] {
            let e = p.lookup(page(i)).expect("mapped");
            assert_eq!(e.frame(), frame);
            assert!(!e.writable());
            assert!(e.cow());
            assert!(e.user_access());
        }
    }
    assert_refcount_invariant(&frames, &[&parent, &child]);

    cow.exit(child);
    assert!(before.iter().all(|&f| frames.refcount(f) == 1));
    cow.exit(parent);
    assert_eq!(frames.stats().used_frames, 0);
}

#[test]
fn child_copies_lazily_one_fault_per_page() {
    let frames = boot(64);
    let cow = CowCoordinator::new(&frames);
    let parent = spawn_with_pages(&cow, 8, 0x40);
    let originals: Vec<_> = (0..8).map(|i| frame_of(&parent, i)).collect();
    let child = cow.fork_address_space(&parent).expect("fork");

    for i in 0..8u8 {
        assert_eq!(read_page(&cow, &child, u64::from(i)), vec![0x40 + i; PAGE_BYTES]);
    }
    assert_eq!(child.page_fault_count(), 0, "reads never fault");

    for i in 0..8 {
        cow.write_user(&child, addr(i, 0), &[0xEE]).expect("write");
        assert_eq!(child.page_fault_count(), i + 1);
    }

    for i in 0..8u8 {
        let n = u64::from(i);
        let ours = frame_of(&child, n);
        assert_ne!(ours, originals[usize::from(i)]);
        assert!(child.lookup(page(n)).expect("mapped").writable());
        assert_eq!(frames.refcount(originals[usize::from(i)]), 1);

        let mut expected = vec![0x40 + i; PAGE_BYTES];
        expected[0] = 0xEE;
        assert_eq!(read_page(&cow, &child, n), expected);
        assert_eq!(read_page(&cow, &parent, n), vec![0x40 + i; PAGE_BYTES]);
    }
    assert_eq!(cow.stats().pages_copied, 8);
    assert_refcount_invariant(&frames, &[&parent, &child]);

    // The parent is now the only owner: its fault restores write access
    // without a copy.
    cow.write_user(&parent, addr(0, 7), &[0x99]).expect("write");
    assert_eq!(parent.page_fault_count(), 1);
    assert_eq!(frame_of(&parent, 0), originals[0]);
    let e = parent.lookup(page(0)).expect("mapped");
    assert!(e.writable());
    assert!(!e.cow());
    assert_eq!(cow.stats().promoted_in_place, 1);
    assert_eq!(read_byte(&cow, &child, addr(0, 7)), 0x40);

    cow.exit(parent);
    cow.exit(child);
    assert_eq!(frames.stats().used_frames, 0);
}

#[test]
fn three_children_write_disjoint_pages() {
    let frames = boot(64);
    let cow = CowCoordinator::new(&frames);
    let parent = spawn_with_pages(&cow, 8, 0);
    let originals: Vec<_> = (0..8).map(|i| frame_of(&parent, i)).collect();
    let children: Vec<_> = (0..3)
        .map(|_| cow.fork_address_space(&parent).expect("fork"))
        .collect();
    assert!(originals.iter().all(|&f| frames.refcount(f) == 4));

    for (c, child) in children.iter().enumerate() {
        for i in (c..8).step_by(3) {
            cow.write_user(child, addr(i as u64, 100), &[0xC0 + c as u8])
                .expect("write");
        }
    }

    // Each page was written by exactly one child.
    assert!(originals.iter().all(|&f| frames.refcount(f) == 3));
    {
        let all: Vec<_> = core::iter::once(&parent).chain(children.iter()).collect();
        assert_refcount_invariant(&frames, &all);
    }

    for (c, child) in children.iter().enumerate() {
        for i in 0..8 {
            let expected = if i % 3 == c { 0xC0 + c as u8 } else { i as u8 };
            assert_eq!(read_byte(&cow, child, addr(i as u64, 100)), expected);
        }
    }
    for i in 0..8u64 {
        assert_eq!(read_byte(&cow, &parent, addr(i, 100)), i as u8);
    }

    let faults: u64 = children.iter().map(|c| c.page_fault_count()).sum();
    assert_eq!(faults, 8);

    for child in children {
        cow.exit(child);
    }
    assert!(originals.iter().all(|&f| frames.refcount(f) == 1));
    assert_refcount_invariant(&frames, &[&parent]);
    assert_eq!(parent.page_fault_count(), 0);

    cow.exit(parent);
    assert_eq!(frames.stats().used_frames, 0);
}

#[test]
fn last_owner_of_each_page_keeps_the_frame() {
    const CHILDREN: usize = 4;
    const PAGES: u64 = 8;

    let frames = boot(64);
    let cow = CowCoordinator::new(&frames);
    let parent = spawn_with_pages(&cow, PAGES, 0);
    let originals: Vec<_> = (0..PAGES).map(|i| frame_of(&parent, i)).collect();
    let children: Vec<_> = (0..CHILDREN)
        .map(|_| cow.fork_address_space(&parent).expect("fork"))
        .collect();

    for child in &children {
        for i in 0..PAGES {
            cow.write_user(child, addr(i, 0), &[0xCC]).expect("child write");
        }
    }
    for i in 0..PAGES {
        cow.write_user(&parent, addr(i, 0), &[0x7F]).expect("parent write");
    }

    // Writers resolve one after another: every child copies, and the
    // parent is left as the sole owner of each original frame.
    let stats = cow.stats();
    assert_eq!(stats.pages_copied, PAGES * CHILDREN as u64);
    assert_eq!(stats.promoted_in_place, PAGES);
    for (i, &frame) in originals.iter().enumerate() {
        assert_eq!(frame_of(&parent, i as u64), frame);
        assert_eq!(frames.refcount(frame), 1);
    }
    {
        let all: Vec<_> = core::iter::once(&parent).chain(children.iter()).collect();
        assert_refcount_invariant(&frames, &all);
    }

    for child in children {
        cow.exit(child);
    }
    cow.exit(parent);
    assert_eq!(frames.stats().used_frames, 0);
}

#[test]
fn fork_unwinds_when_child_runs_out_of_tables() {
    // Two pages in different 2 MiB regions need four tables: root, one
    // middle table and two leaf tables.
    let frames = boot(9);
    let cow = CowCoordinator::new(&frames);
    let parent = cow.spawn().expect("root");
    let low = VirtualAddress::new(0x1000);
    let high = VirtualAddress::new(0x20_1000);
    for va in [low, high] {
        cow.map_anonymous(&parent, va.page(), 1, PageEntryBits::user_rw())
            .expect("page");
        cow.write_user(&parent, va, b"keep").expect("fill");
    }
    assert_eq!(frames.stats().free_frames, 3);
    let entries = [
        parent.lookup(low.page()).expect("mapped"),
        parent.lookup(high.page()).expect("mapped"),
    ];

    // The child's root, middle and first leaf table use the last three
    // frames, so the second page cannot be mapped.
    let err = cow.fork_address_space(&parent).unwrap_err();
    assert_eq!(err, ForkError::AddressSpaceExhausted(high));

    assert_eq!(frames.stats().free_frames, 3);
    assert_eq!(parent.lookup(low.page()), Some(entries[0]));
    assert_eq!(parent.lookup(high.page()), Some(entries[1]));
    for e in entries {
        assert!(e.writable());
        assert!(!e.cow());
        assert_eq!(frames.refcount(e.frame()), 1);
    }
    assert_refcount_invariant(&frames, &[&parent]);
    assert_eq!(
        cow.stats(),
        CowStats {
            fork_unwinds: 1,
            ..CowStats::default()
        }
    );

    // Still writable without faults.
    cow.write_user(&parent, low, b"more").expect("write");
    assert_eq!(parent.page_fault_count(), 0);

    cow.exit(parent);
    assert_eq!(frames.stats().used_frames, 0);
}

#[test]
fn fork_without_a_root_table_fails_cleanly() {
    // Three tables and one data frame: nothing left for the child.
    let frames = boot(4);
    let cow = CowCoordinator::new(&frames);
    let parent = spawn_with_pages(&cow, 1, 0x33);
    let entry = parent.lookup(page(0)).expect("mapped");

    assert_eq!(
        cow.fork_address_space(&parent).unwrap_err(),
        ForkError::OutOfMemory
    );
    assert_eq!(parent.lookup(page(0)), Some(entry));
    assert_eq!(frames.refcount(entry.frame()), 1);
    assert_eq!(cow.stats().forks, 0);

    cow.exit(parent);
    assert_eq!(frames.stats().free_frames, 4);
}

#[test]
fn grandchild_shares_with_both_ancestors() {
    let frames = boot(32);
    let cow = CowCoordinator::new(&frames);
    let parent = spawn_with_pages(&cow, 2, 0x70);
    let child = cow.fork_address_space(&parent).expect("fork");
    let grandchild = cow.fork_address_space(&child).expect("fork");
    assert_eq!(grandchild.parent(), Some(child.pid()));

    let shared = frame_of(&parent, 0);
    assert_eq!(frames.refcount(shared), 3);
    for p in [&parent, &child, &grandchild] {
        let e = p.lookup(page(0)).expect("mapped");
        assert!(e.cow());
        assert!(!e.writable());
    }

    cow.write_user(&grandchild, addr(0, 0), b"g").expect("write");
    assert_ne!(frame_of(&grandchild, 0), shared);
    assert_eq!(frames.refcount(shared), 2);
    assert_eq!(read_byte(&cow, &child, addr(0, 0)), 0x70);
    assert_refcount_invariant(&frames, &[&parent, &child, &grandchild]);
    assert_eq!(cow.stats().forks, 2);

    cow.exit(child);
    cow.exit(parent);
    cow.exit(grandchild);
    assert_eq!(frames.stats().used_frames, 0);
}

#[test]
fn parent_copies_first_then_child_promotes() {
    let frames = boot(16);
    let cow = CowCoordinator::new(&frames);
    let parent = spawn_with_pages(&cow, 1, 0x01);
    let original = frame_of(&parent, 0);
    let child = cow.fork_address_space(&parent).expect("fork");

    cow.write_user(&parent, addr(0, 0), b"P").expect("write");
    assert_ne!(frame_of(&parent, 0), original);
    assert_eq!(frames.refcount(original), 1);

    cow.write_user(&child, addr(0, 0), b"C").expect("write");
    assert_eq!(frame_of(&child, 0), original);

    assert_eq!(parent.page_fault_count(), 1);
    assert_eq!(child.page_fault_count(), 1);
    let stats = cow.stats();
    assert_eq!((stats.pages_copied, stats.promoted_in_place), (1, 1));
    assert_eq!(read_byte(&cow, &parent, addr(0, 0)), b'P');
    assert_eq!(read_byte(&cow, &child, addr(0, 0)), b'C');
    assert_refcount_invariant(&frames, &[&parent, &child]);

    cow.exit(parent);
    cow.exit(child);
    assert_eq!(frames.stats().used_frames, 0);
}

#[test]
fn writes_spanning_pages_fault_once_per_page() {
    let frames = boot(32);
    let cow = CowCoordinator::new(&frames);
    let parent = spawn_with_pages(&cow, 2, 0x20);
    let child = cow.fork_address_space(&parent).expect("fork");

    cow.write_user(&child, addr(0, 4090), &[0xAB; 12]).expect("write");
    assert_eq!(child.page_fault_count(), 2);

    let mut buf = [0u8; 14];
    cow.read_user(&child, addr(0, 4089), &mut buf).expect("read");
    assert_eq!(buf[0], 0x20);
    assert!(buf[1..13].iter().all(|&b| b == 0xAB));
    assert_eq!(buf[13], 0x21);

    cow.read_user(&parent, addr(0, 4089), &mut buf).expect("read");
    assert!(buf[..7].iter().all(|&b| b == 0x20));
    assert!(buf[7..].iter().all(|&b| b == 0x21));

    cow.exit(child);
    cow.exit(parent);
}
