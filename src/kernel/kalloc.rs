//! Kernel heap. Everything after the kernel image up to PHYSTOP is
//! handed to a linked-list allocator, which then backs the `alloc`
//! crate: process kernel stacks, page-table pages and user memory all
//! come from here as 4096-byte aligned allocations, everything else
//! (names, boxes) as ordinary ones.

use crate::memlayout::PHYSTOP;
use linked_list_allocator::LockedHeap;

#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

extern "C" {
    // kernel.ld sets this to the end of the kernel image.
    fn end();
}

pub fn init() {
    let heap_start = end as usize;
    unsafe {
        ALLOCATOR.lock().init(heap_start, PHYSTOP - heap_start);
    }
}
