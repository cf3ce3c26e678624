//! ELF loading and exec.
//!
//! `exec` replaces a process's address space with the contents of a CloudABI
//! i386 ELF image read from a descriptor. The old page directory, page
//! tables and mappings are kept aside until the new image is fully accepted,
//! so a rejected binary leaves the process exactly as it was.

use alloc::sync::Arc;
use alloc::vec::Vec;

use super::process::Process;
use crate::abi::types::{self, Auxv};
use crate::abi::Errno;
use crate::fd::{FdHandle, FdSlot};
use crate::mm::mapping::{AddressSpace, MemMapping};
use crate::mm::{pages_for, PAGE_SIZE};

pub const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
pub const ELFCLASS32: u8 = 1;
pub const ELFDATA2LSB: u8 = 1;
pub const ELFOSABI_CLOUDABI: u8 = 17;
pub const ET_EXEC: u16 = 2;
pub const ET_DYN: u16 = 3;
pub const EM_386: u16 = 3;
pub const PT_LOAD: u32 = 1;

// Fixed addresses of the process bootstrap data, below the initial stack.
const STACK_TOP: u32 = 0x8000_0000;
const STACK_SIZE: u32 = 0x10000;
const AUXV_ADDRESS: u32 = 0x8001_0000;
const VDSO_ADDRESS: u32 = 0x8004_0000;
const PHDR_ADDRESS: u32 = 0x8006_0000;
const ARGDATA_ADDRESS: u32 = 0x8010_0000;

/// The embedded vDSO: a minimal 32-bit ELF whose only code is the syscall
/// trampoline (`int 0x80; ret`). Userspace finds it through
/// `AT_SYSINFO_EHDR`.
#[rustfmt::skip]
pub static VDSO_BLOB: [u8; 96] = [
    // e_ident: magic, 32-bit, little-endian, version 1, CloudABI v0
    0x7f, b'E', b'L', b'F', 1, 1, 1, ELFOSABI_CLOUDABI, 0, 0, 0, 0, 0, 0, 0, 0,
    3, 0,                   // e_type = ET_DYN
    3, 0,                   // e_machine = EM_386
    1, 0, 0, 0,             // e_version
    0x5c, 0x00, 0x00, 0x00, // e_entry: offset of the trampoline
    0x34, 0x00, 0x00, 0x00, // e_phoff
    0, 0, 0, 0,             // e_shoff
    0, 0, 0, 0,             // e_flags
    0x34, 0x00,             // e_ehsize
    0x20, 0x00,             // e_phentsize
    0x01, 0x00,             // e_phnum
    0x00, 0x00,             // e_shentsize
    0x00, 0x00,             // e_shnum
    0x00, 0x00,             // e_shstrndx
    // program header: one PT_LOAD covering the whole blob, r-x
    0x01, 0x00, 0x00, 0x00, // p_type = PT_LOAD
    0x00, 0x00, 0x00, 0x00, // p_offset
    0x00, 0x00, 0x00, 0x00, // p_vaddr
    0x00, 0x00, 0x00, 0x00, // p_paddr
    0x60, 0x00, 0x00, 0x00, // p_filesz
    0x60, 0x00, 0x00, 0x00, // p_memsz
    0x05, 0x00, 0x00, 0x00, // p_flags = R | X
    0x00, 0x10, 0x00, 0x00, // p_align
    // 0x54: padding up to the entry point
    0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90,
    // 0x5c: int 0x80; ret
    0xcd, 0x80, 0xc3, 0x90,
];

#[derive(Clone, Copy)]
#[repr(C)]
struct Elf32Header {
    e_ident: [u8; 16],
    e_type: u16,
    e_machine: u16,
    e_version: u32,
    e_entry: u32,
    e_phoff: u32,
    e_shoff: u32,
    e_flags: u32,
    e_ehsize: u16,
    e_phentsize: u16,
    e_phnum: u16,
    e_shentsize: u16,
    e_shnum: u16,
    e_shstrndx: u16,
}

#[derive(Clone, Copy)]
#[repr(C)]
struct Elf32ProgramHeader {
    p_type: u32,
    p_offset: u32,
    p_vaddr: u32,
    p_paddr: u32,
    p_filesz: u32,
    p_memsz: u32,
    p_flags: u32,
    p_align: u32,
}

/// Validate the identification of a CloudABI i386 executable. Everything a
/// loader must reject is rejected with `NoExec`.
fn check_header(buffer: &[u8]) -> Result<Elf32Header, Errno> {
    if buffer.len() < core::mem::size_of::<Elf32Header>() {
        return Err(Errno::NoExec);
    }
    let header = unsafe { core::ptr::read_unaligned(buffer.as_ptr() as *const Elf32Header) };

    if header.e_ident[0..4] != ELF_MAGIC {
        return Err(Errno::NoExec);
    }
    if header.e_ident[4] != ELFCLASS32 {
        return Err(Errno::NoExec);
    }
    if header.e_ident[5] != ELFDATA2LSB {
        return Err(Errno::NoExec);
    }
    if header.e_ident[6] != 1 {
        return Err(Errno::NoExec);
    }
    if header.e_ident[7] != ELFOSABI_CLOUDABI || header.e_ident[8] != 0 {
        return Err(Errno::NoExec);
    }
    if header.e_type != ET_EXEC && header.e_type != ET_DYN {
        // CloudABI binaries may ship as shared objects so the kernel knows
        // they can be mapped anywhere for ASLR.
        return Err(Errno::NoExec);
    }
    if header.e_machine != EM_386 {
        return Err(Errno::NoExec);
    }
    if header.e_version != 1 {
        return Err(Errno::NoExec);
    }
    Ok(header)
}

impl Process {
    /// Exec for the syscall path: descriptors not named in `new_fds` are
    /// closed, the named ones become the child's table starting at 0.
    pub fn exec(
        self: &Arc<Process>,
        elf_fd: FdHandle,
        new_fds: Vec<FdSlot>,
        argdata: &[u8],
    ) -> Result<(), Errno> {
        self.exec_common(elf_fd, Some(new_fds), argdata)
    }

    /// Exec keeping the current descriptor table (the init bring-up path).
    pub fn exec_keeping_fds(self: &Arc<Process>, elf_fd: FdHandle, argdata: &[u8]) -> Result<(), Errno> {
        self.exec_common(elf_fd, None, argdata)
    }

    fn exec_common(
        self: &Arc<Process>,
        elf_fd: FdHandle,
        new_fds: Option<Vec<FdSlot>>,
        argdata: &[u8],
    ) -> Result<(), Errno> {
        // Read the whole image through pread until EOF.
        // TODO: map the descriptor instead of copying it.
        let mut elf_buffer: Vec<u8> = Vec::new();
        loop {
            let mut chunk = [0u8; 4096];
            let read = elf_fd.pread(&mut chunk, elf_buffer.len() as u64)?;
            if read == 0 {
                break;
            }
            elf_buffer.extend_from_slice(&chunk[..read]);
            if read < chunk.len() {
                break;
            }
        }
        let header = check_header(&elf_buffer)?;

        let old_name = self.name();
        self.set_name(&(alloc::format!("exec<-{}", elf_fd.name())));

        // From here on the process owns two address spaces; the old one is
        // restored wholesale if anything fails.
        let fresh_space = AddressSpace::new()?;
        let old_space = core::mem::replace(&mut *self.space.lock(), fresh_space);
        let old_mappings = core::mem::take(&mut *self.mappings.lock());
        self.install_address_space();

        match self.load_image(&elf_buffer, &header, argdata) {
            Ok(()) => {}
            Err(e) => {
                // Revert: drop whatever the loader managed to map, put the
                // old space back, reinstall it.
                let failed_space = core::mem::replace(&mut *self.space.lock(), old_space);
                let failed_mappings = core::mem::take(&mut *self.mappings.lock());
                for m in failed_mappings {
                    m.unmap_completely(&failed_space);
                }
                *self.mappings.lock() = old_mappings;
                self.set_name(&old_name);
                self.install_address_space();
                return Err(e);
            }
        }

        // The image is in. Rearrange the descriptor table if requested.
        if let Some(new_fds) = new_fds {
            self.exec_replace_fd_table(new_fds);
        }

        // Tear down the old image. The old threads are detached; the
        // scheduler reclaims them once they are off the CPU.
        self.exit_all_threads();
        for m in old_mappings {
            m.unmap_completely(&old_space);
        }
        drop(old_space);

        self.set_running(true);
        self.create_initial_thread(header.e_entry)?;
        Ok(())
    }

    /// Map one PT_LOAD segment and copy its file contents in.
    fn load_segment(&self, buffer: &[u8], phdr: &Elf32ProgramHeader) -> Result<(), Errno> {
        let offset = phdr.p_offset as usize;
        let filesz = phdr.p_filesz as usize;
        if offset >= buffer.len() || offset + filesz > buffer.len() {
            return Err(Errno::NoExec);
        }
        if phdr.p_vaddr as usize % PAGE_SIZE != 0 {
            return Err(Errno::NoExec);
        }

        let mut protection = 0;
        if phdr.p_flags & 0x1 != 0 {
            protection |= types::PROT_EXEC;
        }
        if phdr.p_flags & 0x2 != 0 {
            protection |= types::PROT_WRITE;
        }
        if phdr.p_flags & 0x4 != 0 {
            protection |= types::PROT_READ;
        }

        let pages = pages_for(phdr.p_memsz as usize).max(1);
        let mapping = MemMapping::new(phdr.p_vaddr, pages, None, protection, false);
        mapping.ensure_completely_backed(&mut self.space.lock())?;
        unsafe {
            core::ptr::copy_nonoverlapping(
                buffer.as_ptr().add(offset),
                phdr.p_vaddr as *mut u8,
                filesz,
            );
            core::ptr::write_bytes(
                (phdr.p_vaddr as *mut u8).add(filesz),
                0,
                phdr.p_memsz as usize - filesz,
            );
        }
        self.add_mem_mapping(mapping, false);
        Ok(())
    }

    /// Create an anonymous read-write mapping, back it completely, and fill
    /// it with `contents`.
    fn map_bootstrap_blob(&self, address: u32, len: usize, contents: &[u8]) -> Result<(), Errno> {
        assert!(contents.len() <= len);
        let mapping = MemMapping::new(
            address,
            pages_for(len.max(1)),
            None,
            types::PROT_READ | types::PROT_WRITE,
            false,
        );
        mapping.ensure_completely_backed(&mut self.space.lock())?;
        unsafe {
            core::ptr::copy_nonoverlapping(contents.as_ptr(), address as *mut u8, contents.len());
        }
        self.add_mem_mapping(mapping, false);
        Ok(())
    }

    fn load_image(
        self: &Arc<Process>,
        buffer: &[u8],
        header: &Elf32Header,
        argdata: &[u8],
    ) -> Result<(), Errno> {
        // Keep the phdr table: userspace walks it through AT_PHDR.
        let phdr_size = header.e_phentsize as usize * header.e_phnum as usize;
        let phoff = header.e_phoff as usize;
        if phoff >= buffer.len() || phoff + phdr_size > buffer.len() {
            return Err(Errno::NoExec);
        }
        if header.e_phentsize as usize != core::mem::size_of::<Elf32ProgramHeader>() {
            return Err(Errno::NoExec);
        }
        self.map_bootstrap_blob(PHDR_ADDRESS, phdr_size, &buffer[phoff..phoff + phdr_size])?;

        for i in 0..header.e_phnum as usize {
            let offset = phoff + i * header.e_phentsize as usize;
            let phdr = unsafe {
                core::ptr::read_unaligned(buffer.as_ptr().add(offset) as *const Elf32ProgramHeader)
            };
            if phdr.p_type == PT_LOAD {
                self.load_segment(buffer, &phdr)?;
            }
        }

        self.map_bootstrap_blob(VDSO_ADDRESS, VDSO_BLOB.len(), &VDSO_BLOB)?;

        self.choose_pid();

        // The auxv, with the pid bytes appended right behind it.
        let mut auxv: Vec<Auxv> = Vec::new();
        let auxv_entries = 9;
        let pid_address = AUXV_ADDRESS + (auxv_entries * core::mem::size_of::<Auxv>()) as u32;
        auxv.push(Auxv { a_type: types::AT_ARGDATA, a_val: ARGDATA_ADDRESS });
        auxv.push(Auxv { a_type: types::AT_ARGDATALEN, a_val: argdata.len() as u32 });
        auxv.push(Auxv { a_type: types::AT_BASE, a_val: 0 }); // no address randomization
        auxv.push(Auxv { a_type: types::AT_PAGESZ, a_val: PAGE_SIZE as u32 });
        auxv.push(Auxv { a_type: types::AT_SYSINFO_EHDR, a_val: VDSO_ADDRESS });
        auxv.push(Auxv { a_type: types::AT_PHDR, a_val: PHDR_ADDRESS });
        auxv.push(Auxv { a_type: types::AT_PHNUM, a_val: header.e_phnum as u32 });
        auxv.push(Auxv { a_type: types::AT_PID, a_val: pid_address });
        auxv.push(Auxv { a_type: types::AT_NULL, a_val: 0 });
        assert_eq!(auxv.len(), auxv_entries);

        let mut auxv_blob: Vec<u8> = Vec::new();
        for entry in &auxv {
            auxv_blob.extend_from_slice(&entry.a_type.to_le_bytes());
            auxv_blob.extend_from_slice(&entry.a_val.to_le_bytes());
        }
        auxv_blob.extend_from_slice(&self.pid_bytes());
        self.map_bootstrap_blob(AUXV_ADDRESS, auxv_blob.len(), &auxv_blob)?;

        self.map_bootstrap_blob(ARGDATA_ADDRESS, argdata.len().max(1), argdata)?;

        Ok(())
    }

    fn create_initial_thread(self: &Arc<Process>, entry: u32) -> Result<(), Errno> {
        // 64 KiB stack ending at the fixed top; only the topmost page is
        // backed eagerly, the rest faults in.
        let stack_bottom = STACK_TOP - STACK_SIZE;
        let stack_pages = (STACK_SIZE as usize) / PAGE_SIZE;
        let mapping = MemMapping::new(
            stack_bottom,
            stack_pages,
            None,
            types::PROT_READ | types::PROT_WRITE,
            false,
        );
        mapping.ensure_backed(&mut self.space.lock(), stack_pages - 1)?;
        self.add_mem_mapping(mapping, false);

        self.spawn_thread(stack_bottom, STACK_SIZE, AUXV_ADDRESS, entry)?;
        Ok(())
    }

    fn exec_replace_fd_table(&self, new_fds: Vec<FdSlot>) {
        let mut table: Vec<Option<FdSlot>> = Vec::with_capacity(new_fds.len());
        for slot in new_fds {
            table.push(Some(slot));
        }
        *self.fds.lock() = table;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vdso_blob_is_a_cloudabi_elf() {
        let header = check_header(&VDSO_BLOB).expect("vdso must validate");
        assert_eq!(header.e_type, ET_DYN);
        assert_eq!(header.e_machine, EM_386);
        assert_eq!(header.e_phnum, 1);
        // The entry point must hold the syscall trampoline.
        let entry = header.e_entry as usize;
        assert_eq!(&VDSO_BLOB[entry..entry + 3], &[0xcd, 0x80, 0xc3]);
    }

    #[test]
    fn truncated_images_are_rejected() {
        assert!(check_header(&[]).is_err());
        assert!(check_header(&VDSO_BLOB[..20]).is_err());
    }

    #[test]
    fn non_cloudabi_osabi_is_rejected() {
        let mut blob = VDSO_BLOB;
        blob[7] = 0; // ELFOSABI_SYSV
        assert!(check_header(&blob).is_err());
    }

    #[test]
    fn wrong_machine_is_rejected() {
        let mut blob = VDSO_BLOB;
        blob[18] = 0x3e; // EM_X86_64
        assert!(check_header(&blob).is_err());
    }
}
