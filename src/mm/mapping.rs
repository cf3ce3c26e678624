//! Process address spaces and memory mappings.
//!
//! An `AddressSpace` owns a page directory and the lower (user-half) page
//! tables; the kernel half is filled from the shared kernel tables. A
//! `MemMapping` is a page-aligned run of user virtual memory with protection
//! bits and an optional backing descriptor. Mappings own no physical memory
//! up front: frames are allocated on the first fault (or an explicit
//! `ensure_backed`) and filled from the backing descriptor or with zeroes.

use alloc::sync::Arc;

use super::{frame, kvspace, KERNEL_VIRTUAL_BASE, PAGE_SIZE};
use crate::abi::types::{self, Advice, Filesize, MProt, MsFlags};
use crate::abi::Errno;
use crate::arch;
use crate::fd::FdHandle;

const PTE_PRESENT: u32 = 0x1;
const PTE_WRITABLE: u32 = 0x2;
const PTE_USER: u32 = 0x4;
const PTE_DIRTY: u32 = 0x40;

const NUM_USER_TABLES: usize = 0x300;

fn prot_to_bits(prot: MProt) -> u32 {
    // No NX bit without PAE; PROT_EXEC is tracked in the mapping only.
    let mut bits = if prot == 0 { 0 } else { PTE_USER };
    if prot & types::PROT_WRITE != 0 {
        bits |= PTE_WRITABLE;
    }
    bits
}

/// A process's page directory plus its user-half page tables.
pub struct AddressSpace {
    directory: kvspace::KBlk,
    directory_phys: u32,
    tables: [Option<kvspace::KBlk>; NUM_USER_TABLES],
}

impl AddressSpace {
    pub fn new() -> Result<AddressSpace, Errno> {
        let directory = kvspace::kmap(PAGE_SIZE)?;
        let dir = unsafe { &mut *(directory.virt as *mut [u32; 1024]) };
        dir.fill(0);
        kvspace::fill_kernel_pages(dir);
        let directory_phys =
            kvspace::virt_to_phys(directory.virt).expect("directory not mapped");
        Ok(AddressSpace {
            directory,
            directory_phys,
            tables: [None; NUM_USER_TABLES],
        })
    }

    fn directory_mut(&mut self) -> &mut [u32; 1024] {
        unsafe { &mut *(self.directory.virt as *mut [u32; 1024]) }
    }

    fn table(&self, i: usize) -> Option<&'static mut [u32; 1024]> {
        assert!(i < NUM_USER_TABLES, "user page table index in kernel half");
        self.tables[i].map(|blk| unsafe { &mut *(blk.virt as *mut [u32; 1024]) })
    }

    fn ensure_table(&mut self, i: usize) -> Result<&'static mut [u32; 1024], Errno> {
        assert!(i < NUM_USER_TABLES, "user page table index in kernel half");
        if self.tables[i].is_none() {
            let blk = kvspace::kmap(PAGE_SIZE)?;
            let table = unsafe { &mut *(blk.virt as *mut [u32; 1024]) };
            table.fill(0);
            let phys = kvspace::virt_to_phys(blk.virt).expect("page table not mapped");
            self.directory_mut()[i] = phys | PTE_PRESENT | PTE_WRITABLE | PTE_USER;
            self.tables[i] = Some(blk);
        }
        Ok(self.table(i).unwrap())
    }

    fn entry(&self, virt: u32) -> Option<&'static mut u32> {
        let table = self.table((virt >> 22) as usize)?;
        Some(&mut table[(virt >> 12 & 0x3ff) as usize])
    }

    fn ensure_entry(&mut self, virt: u32) -> Result<&'static mut u32, Errno> {
        let table = self.ensure_table((virt >> 22) as usize)?;
        Ok(&mut table[(virt >> 12 & 0x3ff) as usize])
    }

    /// Load this address space into CR3. Two sentinel translations are
    /// asserted first; a directory that cannot see the VGA buffer or the
    /// kernel image would take the machine down in a far less debuggable way.
    pub fn install(&self) {
        assert_eq!(kvspace::virt_to_phys(0xc00b_8000), Some(0xb_8000));
        assert_eq!(
            kvspace::virt_to_phys(KERNEL_VIRTUAL_BASE + 0x10_0000),
            Some(0x10_0000)
        );
        unsafe {
            arch::write_cr3(self.directory_phys);
        }
    }

    /// Walk the tables for a user virtual address. Kernel-half addresses go
    /// through the shared kernel tables.
    pub fn translate(&self, virt: u32) -> Option<u32> {
        if virt >= KERNEL_VIRTUAL_BASE {
            return kvspace::virt_to_phys(virt);
        }
        let entry = *self.entry(virt)?;
        if entry & PTE_PRESENT == 0 {
            None
        } else {
            Some((entry & !0xfff) | (virt & 0xfff))
        }
    }
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        for table in self.tables.iter().flatten() {
            kvspace::kunmap(*table);
        }
        kvspace::kunmap(self.directory);
    }
}

/// Backing store of a file-backed mapping: the descriptor and the rights the
/// mapping process held on it at mmap time.
#[derive(Clone)]
pub struct MappingBacking {
    pub fd: FdHandle,
    pub offset: Filesize,
}

pub struct MemMapping {
    pub virtual_address: u32,
    pub number_of_pages: usize,
    pub protection: MProt,
    pub backing: Option<MappingBacking>,
    pub shared: bool,
    pub advice: Advice,
}

impl MemMapping {
    pub fn new(
        virtual_address: u32,
        number_of_pages: usize,
        backing: Option<MappingBacking>,
        protection: MProt,
        shared: bool,
    ) -> MemMapping {
        assert_eq!(virtual_address as usize % PAGE_SIZE, 0);
        assert!(number_of_pages > 0);
        let end = virtual_address as u64 + (number_of_pages * PAGE_SIZE) as u64;
        assert!(end <= KERNEL_VIRTUAL_BASE as u64);
        // A shared anonymous mapping makes no sense.
        assert!(!shared || backing.is_some());
        MemMapping {
            virtual_address,
            number_of_pages,
            protection,
            backing,
            shared,
            advice: types::ADVICE_NORMAL,
        }
    }

    pub fn page_address(&self, page: usize) -> u32 {
        self.virtual_address + (page * PAGE_SIZE) as u32
    }

    fn fd_offset(&self, page: usize) -> Filesize {
        self.backing.as_ref().map_or(0, |b| b.offset) + (page * PAGE_SIZE) as Filesize
    }

    pub fn covers(&self, addr: u32, len: usize) -> bool {
        let start = self.virtual_address as u64;
        let end = start + (self.number_of_pages * PAGE_SIZE) as u64;
        let his_start = addr as u64;
        let his_end = his_start + len as u64;
        his_start >= start && his_start < end && his_end <= end
    }

    /// The page index covering `addr`, if any.
    pub fn page_num(&self, addr: u32) -> Option<usize> {
        if addr < self.virtual_address {
            return None;
        }
        let page = (addr - self.virtual_address) as usize / PAGE_SIZE;
        (page < self.number_of_pages).then_some(page)
    }

    pub fn is_backed(&self, space: &AddressSpace, page: usize) -> bool {
        assert!(page < self.number_of_pages);
        match space.entry(self.page_address(page)) {
            Some(entry) => *entry & PTE_PRESENT != 0,
            None => false,
        }
    }

    /// Change the protection bits, both in the mapping and in any present
    /// page table entries.
    pub fn set_protection(&mut self, space: &AddressSpace, prot: MProt) {
        self.protection = prot;
        let bits = prot_to_bits(prot);
        for page in 0..self.number_of_pages {
            if let Some(entry) = space.entry(self.page_address(page)) {
                if *entry & PTE_PRESENT != 0 {
                    *entry = (*entry & !(PTE_WRITABLE | PTE_USER)) | bits;
                    unsafe {
                        arch::invlpg(self.page_address(page));
                    }
                }
            }
        }
    }

    /// Allocate and fill the physical frame behind `page` if it has none yet.
    /// File-backed pages are read from the descriptor; short reads and
    /// anonymous pages are zero-filled.
    pub fn ensure_backed(&self, space: &mut AddressSpace, page: usize) -> Result<(), Errno> {
        let entry = space.ensure_entry(self.page_address(page))?;
        if *entry & PTE_PRESENT != 0 {
            return Ok(());
        }

        let phys = frame::allocate()?;
        let alias = match kvspace::map_phys(phys, PAGE_SIZE) {
            Ok(a) => a,
            Err(e) => {
                frame::deallocate(phys, 1);
                return Err(e);
            }
        };

        let buf = alias.as_mut_slice();
        let mut bytes_read = 0;
        if let Some(backing) = &self.backing {
            match backing.fd.pread(buf, self.fd_offset(page)) {
                Ok(n) => bytes_read = n,
                Err(e) => {
                    crate::kwarn!(
                        "[mapping] backing descriptor pread failed while backing a page: {:?}",
                        e
                    );
                }
            }
        }
        buf[bytes_read..].fill(0);

        *entry = phys as u32 | prot_to_bits(self.protection) | PTE_PRESENT;
        unsafe {
            arch::invlpg(self.page_address(page));
        }
        kvspace::unmap_alias(alias);
        Ok(())
    }

    pub fn ensure_completely_backed(&self, space: &mut AddressSpace) -> Result<(), Errno> {
        for page in 0..self.number_of_pages {
            self.ensure_backed(space, page)?;
        }
        Ok(())
    }

    /// Split at `page`. With `return_left` the returned mapping covers pages
    /// `0..page` and `self` keeps the rest; otherwise the other way around.
    /// Present page table entries move implicitly since they are indexed by
    /// address.
    pub fn split_at(&mut self, page: usize, return_left: bool) -> MemMapping {
        assert!(page > 0 && page < self.number_of_pages);

        let (their_addr, their_pages, their_offset) = if return_left {
            (self.virtual_address, page, self.backing.as_ref().map_or(0, |b| b.offset))
        } else {
            (self.page_address(page), self.number_of_pages - page, self.fd_offset(page))
        };

        if return_left {
            self.virtual_address = self.page_address(page);
            self.backing = self.backing.take().map(|mut b| {
                b.offset += (page * PAGE_SIZE) as Filesize;
                b
            });
            self.number_of_pages -= page;
        } else {
            self.number_of_pages = page;
        }

        MemMapping {
            virtual_address: their_addr,
            number_of_pages: their_pages,
            protection: self.protection,
            backing: self.backing.as_ref().map(|b| MappingBacking {
                fd: Arc::clone(&b.fd),
                offset: their_offset,
            }),
            shared: self.shared,
            advice: self.advice,
        }
    }

    /// Write back and/or drop one page. `MS_ASYNC` is reinterpreted as
    /// `MS_SYNC`; `MS_INVALIDATE` additionally unmaps the page and frees the
    /// frame.
    pub fn sync(&self, space: &AddressSpace, page: usize, mut flags: MsFlags) -> Result<(), Errno> {
        assert!(page < self.number_of_pages);
        let entry = match space.entry(self.page_address(page)) {
            Some(e) if *e & PTE_PRESENT != 0 => e,
            _ => return Ok(()),
        };

        if flags & types::MS_ASYNC != 0 {
            crate::kwarn!("[mapping] MS_ASYNC unsupported, reinterpreted as MS_SYNC");
            flags = (flags & !types::MS_ASYNC) | types::MS_SYNC;
        }

        if flags & types::MS_SYNC != 0 && self.shared && *entry & PTE_DIRTY != 0 {
            if let Some(backing) = &self.backing {
                *entry &= !PTE_DIRTY;
                let phys = (*entry & !0xfff) as u64;
                let alias = kvspace::map_phys(phys, PAGE_SIZE)?;
                let res = backing.fd.pwrite(alias.as_slice(), self.fd_offset(page));
                kvspace::unmap_alias(alias);
                res?;
            }
        }

        if flags & types::MS_INVALIDATE != 0 {
            let phys = (*entry & !0xfff) as u64;
            *entry = 0;
            unsafe {
                arch::invlpg(self.page_address(page));
            }
            frame::deallocate(phys, 1);
        }

        Ok(())
    }

    pub fn sync_completely(&self, space: &AddressSpace, flags: MsFlags) -> Result<(), Errno> {
        for page in 0..self.number_of_pages {
            self.sync(space, page, flags)?;
        }
        Ok(())
    }

    /// Drop every backed page without writing anything back; used on unmap
    /// and process teardown.
    pub fn unmap_completely(&self, space: &AddressSpace) {
        for page in 0..self.number_of_pages {
            if let Some(entry) = space.entry(self.page_address(page)) {
                if *entry & PTE_PRESENT != 0 {
                    let phys = (*entry & !0xfff) as u64;
                    *entry = 0;
                    unsafe {
                        arch::invlpg(self.page_address(page));
                    }
                    frame::deallocate(phys, 1);
                }
            }
        }
    }

    /// Duplicate another process's mapping contents into this one (fork).
    /// The source is synced first; every backed source page is copied through
    /// kernel aliases of the two frames. An eager copy, standing in for
    /// copy-on-write.
    pub fn copy_from(
        &self,
        space: &mut AddressSpace,
        other: &MemMapping,
        other_space: &AddressSpace,
    ) -> Result<(), Errno> {
        assert_eq!(self.number_of_pages, other.number_of_pages);
        other.sync_completely(other_space, types::MS_SYNC)?;

        for page in 0..other.number_of_pages {
            if !other.is_backed(other_space, page) {
                continue;
            }
            self.ensure_backed(space, page)?;

            let src_phys = other_space
                .translate(other.page_address(page))
                .expect("source page vanished during fork copy") as u64;
            let dst_phys = space
                .translate(self.page_address(page))
                .expect("destination page not backed after ensure_backed")
                as u64;

            let src = kvspace::map_phys(src_phys & !0xfff, PAGE_SIZE)?;
            let dst = match kvspace::map_phys(dst_phys & !0xfff, PAGE_SIZE) {
                Ok(d) => d,
                Err(e) => {
                    kvspace::unmap_alias(src);
                    return Err(e);
                }
            };
            dst.as_mut_slice().copy_from_slice(src.as_slice());
            kvspace::unmap_alias(dst);
            kvspace::unmap_alias(src);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anon(addr: u32, pages: usize) -> MemMapping {
        MemMapping::new(addr, pages, None, types::PROT_READ | types::PROT_WRITE, false)
    }

    #[test]
    fn covers_and_page_num() {
        let m = anon(0x9000_0000, 4);
        assert!(m.covers(0x9000_0000, PAGE_SIZE));
        assert!(m.covers(0x9000_3fff, 1));
        assert!(!m.covers(0x9000_4000, 1));
        assert!(!m.covers(0x8fff_f000, PAGE_SIZE));
        assert_eq!(m.page_num(0x9000_2000), Some(2));
        assert_eq!(m.page_num(0x9000_4000), None);
    }

    #[test]
    fn split_right_keeps_low_pages() {
        let mut m = anon(0x9000_0000, 4);
        let right = m.split_at(1, false);
        assert_eq!(m.virtual_address, 0x9000_0000);
        assert_eq!(m.number_of_pages, 1);
        assert_eq!(right.virtual_address, 0x9000_1000);
        assert_eq!(right.number_of_pages, 3);
    }

    #[test]
    fn split_left_keeps_high_pages() {
        let mut m = anon(0x9000_0000, 4);
        let left = m.split_at(3, true);
        assert_eq!(left.virtual_address, 0x9000_0000);
        assert_eq!(left.number_of_pages, 3);
        assert_eq!(m.virtual_address, 0x9000_3000);
        assert_eq!(m.number_of_pages, 1);
    }

    #[test]
    #[should_panic]
    fn mappings_may_not_reach_the_kernel_half() {
        anon(0xbfff_f000, 2);
    }
}
