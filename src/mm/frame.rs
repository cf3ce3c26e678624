//! Physical page-frame allocator.
//!
//! Free physical memory is kept as a list of ranges ordered by ascending
//! address, bootstrapped from the multiboot memory map with everything below
//! the end of the kernel image and the boot modules skipped. Single-frame
//! allocation pops from the lowest range; contiguous allocation scans for the
//! first range large enough and never partially allocates. Deallocation
//! re-inserts in address order and merges with adjacent ranges.
//!
//! The range nodes live in a fixed pool so the allocator works before (and
//! independently of) the kernel heap.

use multiboot2::{BootInformation, MemoryAreaType};
use spin::Mutex;

use super::PAGE_SIZE;
use crate::abi::Errno;

const MAX_RANGES: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhysRange {
    pub start: u64,
    pub pages: u64,
}

#[derive(Clone, Copy)]
struct RangeNode {
    range: PhysRange,
    next: Option<usize>,
}

struct FrameAllocator {
    pool: [Option<RangeNode>; MAX_RANGES],
    head: Option<usize>,
    free_frames: u64,
}

impl FrameAllocator {
    const fn new() -> Self {
        Self {
            pool: [None; MAX_RANGES],
            head: None,
            free_frames: 0,
        }
    }

    fn alloc_node(&mut self, node: RangeNode) -> Option<usize> {
        for (i, slot) in self.pool.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(node);
                return Some(i);
            }
        }
        None
    }

    /// Insert a range keeping the list sorted by start address, merging with
    /// neighbours where the ranges touch.
    fn insert(&mut self, range: PhysRange) {
        assert_eq!(range.start % PAGE_SIZE as u64, 0, "unaligned frame range");
        self.free_frames += range.pages;

        let mut prev: Option<usize> = None;
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            let node = self.pool[idx].unwrap();
            if node.range.start > range.start {
                break;
            }
            prev = Some(idx);
            cursor = node.next;
        }

        // Try to merge into the predecessor.
        if let Some(pidx) = prev {
            let mut pnode = self.pool[pidx].unwrap();
            let pend = pnode.range.start + pnode.range.pages * PAGE_SIZE as u64;
            assert!(pend <= range.start, "double free of physical frames");
            if pend == range.start {
                pnode.range.pages += range.pages;
                // Possibly the successor now touches too.
                if let Some(nidx) = pnode.next {
                    let nnode = self.pool[nidx].unwrap();
                    let new_end = pnode.range.start + pnode.range.pages * PAGE_SIZE as u64;
                    if nnode.range.start == new_end {
                        pnode.range.pages += nnode.range.pages;
                        pnode.next = nnode.next;
                        self.pool[nidx] = None;
                    }
                }
                self.pool[pidx] = Some(pnode);
                return;
            }
        }

        // Try to merge into the successor.
        if let Some(nidx) = cursor {
            let mut nnode = self.pool[nidx].unwrap();
            let end = range.start + range.pages * PAGE_SIZE as u64;
            assert!(end <= nnode.range.start, "double free of physical frames");
            if end == nnode.range.start {
                nnode.range.start = range.start;
                nnode.range.pages += range.pages;
                self.pool[nidx] = Some(nnode);
                return;
            }
        }

        let idx = self
            .alloc_node(RangeNode {
                range,
                next: cursor,
            })
            .expect("physical range pool exhausted");
        match prev {
            Some(pidx) => {
                let mut pnode = self.pool[pidx].unwrap();
                pnode.next = Some(idx);
                self.pool[pidx] = Some(pnode);
            }
            None => self.head = Some(idx),
        }
    }

    fn allocate_contiguous(&mut self, pages: u64) -> Result<u64, Errno> {
        let mut prev: Option<usize> = None;
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            let mut node = self.pool[idx].unwrap();
            if node.range.pages >= pages {
                let start = node.range.start;
                node.range.start += pages * PAGE_SIZE as u64;
                node.range.pages -= pages;
                if node.range.pages == 0 {
                    match prev {
                        Some(pidx) => {
                            let mut pnode = self.pool[pidx].unwrap();
                            pnode.next = node.next;
                            self.pool[pidx] = Some(pnode);
                        }
                        None => self.head = node.next,
                    }
                    self.pool[idx] = None;
                } else {
                    self.pool[idx] = Some(node);
                }
                self.free_frames -= pages;
                return Ok(start);
            }
            prev = Some(idx);
            cursor = node.next;
        }
        Err(Errno::NoMem)
    }
}

static ALLOCATOR: Mutex<FrameAllocator> = Mutex::new(FrameAllocator::new());

pub fn init(boot_info: &BootInformation<'_>) {
    let memmap = boot_info
        .memory_map_tag()
        .expect("bootloader provided no memory map");

    // Nothing below the kernel image or the boot modules may be handed out.
    let mut reserved_end = unsafe { kernel_image_end_phys() };
    for module in boot_info.module_tags() {
        let end = module.end_address() as u64;
        if end > reserved_end {
            reserved_end = end;
        }
    }
    reserved_end = align_up(reserved_end, PAGE_SIZE as u64);

    let mut total_pages = 0u64;
    for area in memmap.memory_areas() {
        if MemoryAreaType::from(area.typ()) != MemoryAreaType::Available {
            continue;
        }
        let mut start = align_up(area.start_address(), PAGE_SIZE as u64);
        let end = area.end_address() & !(PAGE_SIZE as u64 - 1);
        if start < reserved_end {
            start = reserved_end;
        }
        if start >= end {
            continue;
        }
        let pages = (end - start) / PAGE_SIZE as u64;
        ALLOCATOR.lock().insert(PhysRange { start, pages });
        total_pages += pages;
    }

    crate::kinfo!(
        "[frame] {} MiB usable physical memory ({} frames, reserved below {:#x})",
        total_pages * PAGE_SIZE as u64 / (1024 * 1024),
        total_pages,
        reserved_end
    );
}

/// Allocate one 4 KiB frame.
pub fn allocate() -> Result<u64, Errno> {
    ALLOCATOR.lock().allocate_contiguous(1)
}

/// Allocate `pages` physically contiguous frames; on failure nothing is
/// allocated.
pub fn allocate_contiguous(pages: usize) -> Result<u64, Errno> {
    ALLOCATOR.lock().allocate_contiguous(pages as u64)
}

pub fn deallocate(start: u64, pages: usize) {
    assert_eq!(start % PAGE_SIZE as u64, 0, "deallocating unaligned frame");
    ALLOCATOR.lock().insert(PhysRange {
        start,
        pages: pages as u64,
    });
}

pub fn free_frames() -> u64 {
    ALLOCATOR.lock().free_frames
}

fn align_up(value: u64, alignment: u64) -> u64 {
    let misalignment = value % alignment;
    if misalignment != 0 {
        value + alignment - misalignment
    } else {
        value
    }
}

#[cfg(target_arch = "x86")]
unsafe fn kernel_image_end_phys() -> u64 {
    extern "C" {
        static _kernel_end: u8;
    }
    (&_kernel_end as *const u8 as u64) - super::KERNEL_VIRTUAL_BASE as u64
}

#[cfg(not(target_arch = "x86"))]
unsafe fn kernel_image_end_phys() -> u64 {
    0x40_0000
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> FrameAllocator {
        let mut a = FrameAllocator::new();
        a.insert(PhysRange {
            start: 0x100_000,
            pages: 16,
        });
        a.insert(PhysRange {
            start: 0x200_000,
            pages: 4,
        });
        a
    }

    #[test]
    fn single_allocations_come_from_lowest_range() {
        let mut a = fresh();
        assert_eq!(a.allocate_contiguous(1).unwrap(), 0x100_000);
        assert_eq!(a.allocate_contiguous(1).unwrap(), 0x101_000);
    }

    #[test]
    fn contiguous_scan_skips_small_ranges() {
        let mut a = FrameAllocator::new();
        a.insert(PhysRange {
            start: 0x100_000,
            pages: 2,
        });
        a.insert(PhysRange {
            start: 0x200_000,
            pages: 8,
        });
        assert_eq!(a.allocate_contiguous(4).unwrap(), 0x200_000);
        // The small range is untouched.
        assert_eq!(a.allocate_contiguous(2).unwrap(), 0x100_000);
    }

    #[test]
    fn oom_leaves_state_unchanged() {
        let mut a = fresh();
        let before = a.free_frames;
        assert_eq!(a.allocate_contiguous(1000), Err(Errno::NoMem));
        assert_eq!(a.free_frames, before);
        assert_eq!(a.allocate_contiguous(16).unwrap(), 0x100_000);
    }

    #[test]
    fn deallocate_merges_adjacent_ranges() {
        let mut a = FrameAllocator::new();
        a.insert(PhysRange {
            start: 0x100_000,
            pages: 1,
        });
        a.insert(PhysRange {
            start: 0x102_000,
            pages: 1,
        });
        // Fill the hole; the three ranges must coalesce.
        a.insert(PhysRange {
            start: 0x101_000,
            pages: 1,
        });
        assert_eq!(a.allocate_contiguous(3).unwrap(), 0x100_000);
    }

    #[test]
    #[should_panic]
    fn double_free_is_detected() {
        let mut a = fresh();
        a.insert(PhysRange {
            start: 0x100_000,
            pages: 1,
        });
    }
}
