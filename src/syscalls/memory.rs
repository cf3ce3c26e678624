//! Memory-mapping syscalls.

use alloc::sync::Arc;

use super::types::SyscallContext;
use crate::abi::errno::Result;
use crate::abi::types::{self, MProt};
use crate::abi::{Errno, Rights};
use crate::mm::mapping::{MappingBacking, MemMapping};
use crate::mm::{pages_for, PAGE_SIZE};

fn check_prot(prot: u32) -> Result<MProt> {
    let prot = prot as MProt;
    if prot & !(types::PROT_READ | types::PROT_WRITE | types::PROT_EXEC) != 0 {
        return Err(Errno::NotSup);
    }
    Ok(prot)
}

pub fn mem_map(c: &mut SyscallContext) -> Result<()> {
    let addr = c.arg(0);
    let len = c.arg(1) as usize;
    let prot = check_prot(c.arg(2))?;
    let flags = c.arg(3) as u8;
    let fdnum = c.arg(4);
    let offset = c.arg64(5);

    if len == 0 {
        return Err(Errno::Inval);
    }
    let shared = flags & types::MAP_SHARED != 0;
    let private = flags & types::MAP_PRIVATE != 0;
    if shared == private {
        return Err(Errno::Inval);
    }
    let anon = flags & types::MAP_ANON != 0;
    if anon && fdnum != types::MAP_ANON_FD {
        return Err(Errno::Inval);
    }
    if shared && anon {
        return Err(Errno::Inval);
    }

    let backing = if anon {
        None
    } else {
        let mut needed = Rights::MEM_MAP;
        if prot & types::PROT_EXEC != 0 {
            needed = needed | Rights::MEM_MAP_EXEC;
        }
        let slot = c.process().get_fd(fdnum, needed)?;
        Some(MappingBacking {
            fd: slot.fd,
            offset,
        })
    };

    let pages = pages_for(len);
    let process = Arc::clone(c.process());
    let (address, overwrite) = if flags & types::MAP_FIXED != 0 {
        if addr as usize % PAGE_SIZE != 0 {
            return Err(Errno::Inval);
        }
        (addr, true)
    } else {
        (
            process.find_free_virtual_range(pages).ok_or(Errno::NoMem)?,
            false,
        )
    };

    let mapping = MemMapping::new(address, pages, backing, prot, shared);
    process.add_mem_mapping(mapping, overwrite);
    c.result = address as u64;
    Ok(())
}

pub fn mem_unmap(c: &mut SyscallContext) -> Result<()> {
    let addr = c.arg(0);
    let len = c.arg(1) as usize;
    if addr as usize % PAGE_SIZE != 0 {
        return Err(Errno::Inval);
    }
    c.process().mem_unmap(addr, pages_for(len));
    Ok(())
}

pub fn mem_protect(c: &mut SyscallContext) -> Result<()> {
    let addr = c.arg(0);
    let len = c.arg(1) as usize;
    let prot = check_prot(c.arg(2))?;
    if addr as usize % PAGE_SIZE != 0 {
        return Err(Errno::Inval);
    }
    c.process().mem_protect(addr, pages_for(len), prot);
    Ok(())
}

pub fn mem_sync(c: &mut SyscallContext) -> Result<()> {
    let addr = c.arg(0);
    let len = c.arg(1) as usize;
    let flags = c.arg(2) as u8;
    if addr as usize % PAGE_SIZE != 0 {
        return Err(Errno::Inval);
    }
    c.process().mem_sync(addr, pages_for(len), flags)
}

pub fn mem_advise(c: &mut SyscallContext) -> Result<()> {
    let addr = c.arg(0);
    let len = c.arg(1) as usize;
    let advice = c.arg(2) as u8;
    if !(types::ADVICE_DONTNEED..=types::ADVICE_WILLNEED).contains(&advice) {
        return Err(Errno::Inval);
    }
    c.process().mem_advise(addr, pages_for(len), advice);
    Ok(())
}
