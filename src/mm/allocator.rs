//! Kernel heap.
//!
//! A fixed-size region of kernel virtual memory handed to
//! `linked_list_allocator`. Everything `alloc` produces (Arc'd descriptors,
//! mapping lists, socket buffers) lives here.

use linked_list_allocator::LockedHeap;

use super::kvspace;

const HEAP_SIZE: usize = 8 * 1024 * 1024;

// The hosted test build uses the host allocator.
#[cfg(not(test))]
#[global_allocator]
static HEAP: LockedHeap = LockedHeap::empty();

#[cfg(test)]
static HEAP: LockedHeap = LockedHeap::empty();

pub fn init_heap() {
    let blk = kvspace::kmap(HEAP_SIZE).expect("failed to map the kernel heap");
    unsafe {
        HEAP.lock().init(blk.as_mut_ptr(), HEAP_SIZE);
    }
    crate::kinfo!(
        "[heap] {} KiB kernel heap at {:#x}",
        HEAP_SIZE / 1024,
        blk.virt
    );
}

pub fn heap_free() -> usize {
    HEAP.lock().free()
}
