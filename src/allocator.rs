//! Kernel heap
//!
//! A fixed arena in `.bss` handed to `linked_list_allocator`. It backs the
//! topology records and the per-core AP stacks.

use core::ptr::addr_of_mut;

use linked_list_allocator::LockedHeap;

use crate::config::KERNEL_HEAP_SIZE;

#[repr(align(4096))]
struct HeapArena([u8; KERNEL_HEAP_SIZE]);

static mut HEAP_ARENA: HeapArena = HeapArena([0; KERNEL_HEAP_SIZE]);

#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

pub fn init() {
    unsafe {
        let start = addr_of_mut!(HEAP_ARENA).cast::<u8>();
        ALLOCATOR.lock().init(start, KERNEL_HEAP_SIZE);
    }
    crate::kinfo!("Heap: {} KiB arena ready", KERNEL_HEAP_SIZE / 1024);
}

pub fn free_bytes() -> usize {
    ALLOCATOR.lock().free()
}
