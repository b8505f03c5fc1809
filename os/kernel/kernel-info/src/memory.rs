//! # Memory Layout

/// Size of one physical frame and of one virtual page, in bytes.
pub const PAGE_SIZE: u64 = 4096;

/// `log2(PAGE_SIZE)`.
pub const PAGE_SHIFT: u32 = 12;

/// Physical address at which RAM (and the kernel image) begins.
pub const KERNEL_BASE: u64 = 0x8000_0000;

/// Amount of RAM the kernel expects to manage.
pub const PHYS_MEMORY_BYTES: u64 = 128 * 1024 * 1024;

/// First physical address past the end of managed RAM.
pub const PHYS_TOP: u64 = KERNEL_BASE + PHYS_MEMORY_BYTES;

/// Bits of virtual address translated by the three-level page table.
pub const VA_BITS: u32 = 39;

/// One past the highest user virtual address.
///
/// One bit less than the full translation width so that user addresses never
/// need sign extension.
pub const USER_VA_END: u64 = 1 << (VA_BITS - 1);

/// Byte written over a frame when it is handed out by the allocator.
pub const ALLOC_JUNK: u8 = 0x05;

/// Byte written over a frame when its last reference is dropped.
pub const FREE_JUNK: u8 = 0x01;

const _: () = {
    assert!(PAGE_SIZE == 1 << PAGE_SHIFT);
    assert!(KERNEL_BASE.is_multiple_of(PAGE_SIZE));
    assert!(PHYS_TOP.is_multiple_of(PAGE_SIZE));
    assert!(PHYS_TOP > KERNEL_BASE);
    assert!(USER_VA_END.is_multiple_of(PAGE_SIZE));
    assert!(ALLOC_JUNK != FREE_JUNK);
    assert!(ALLOC_JUNK != 0 && FREE_JUNK != 0);
};
