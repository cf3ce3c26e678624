//! Descriptor-level syscalls: lifetime, plain and positioned I/O, seeking,
//! stat and sync.

use alloc::sync::Arc;

use super::types::{user_iovecs, user_iovecs_mut, user_ref_mut, SyscallContext};
use crate::abi::errno::Result;
use crate::abi::types::{self, FdStat, FileType};
use crate::abi::{Errno, Rights};
use crate::fd::pipe_fd::PipeFd;
use crate::fd::shm_fd::ShmFd;
use crate::fd::unixsock::UnixSock;

// fd_stat_put flag values.
const FDSTAT_FLAGS: u16 = 0x1;
const FDSTAT_RIGHTS: u16 = 0x2;

static SHM_INODE: core::sync::atomic::AtomicU64 = core::sync::atomic::AtomicU64::new(1);

pub fn fd_close(c: &mut SyscallContext) -> Result<()> {
    c.process().close_fd(c.arg(0))
}

/// Create a single new descriptor; only shared memory supports this.
pub fn fd_create1(c: &mut SyscallContext) -> Result<()> {
    match FileType::from_raw(c.arg(0) as u8) {
        FileType::SharedMemory => {
            let inode = SHM_INODE.fetch_add(1, core::sync::atomic::Ordering::Relaxed);
            let fd = ShmFd::new(crate::fs::SHMFS_DEVICE, inode);
            c.result = c.process().add_fd(fd, Rights::ALL, Rights::NONE) as u64;
            Ok(())
        }
        _ => Err(Errno::Inval),
    }
}

/// Create a connected pair: a pipe installed twice, or a socketpair.
pub fn fd_create2(c: &mut SyscallContext) -> Result<()> {
    let process = Arc::clone(c.process());
    let (fd1, fd2) = match FileType::from_raw(c.arg(0) as u8) {
        FileType::Fifo => PipeFd::pair(),
        ft @ (FileType::SocketStream | FileType::SocketDgram) => {
            let (a, b) = UnixSock::pair(ft);
            (a as crate::fd::FdHandle, b as crate::fd::FdHandle)
        }
        _ => return Err(Errno::Inval),
    };
    let num1 = process.add_fd(fd1, Rights::ALL, Rights::ALL);
    let num2 = process.add_fd(fd2, Rights::ALL, Rights::ALL);
    c.result = num1 as u64 | ((num2 as u64) << 32);
    Ok(())
}

pub fn fd_datasync(c: &mut SyscallContext) -> Result<()> {
    let slot = c.process().get_fd(c.arg(0), Rights::FD_DATASYNC)?;
    slot.fd.datasync()
}

pub fn fd_dup(c: &mut SyscallContext) -> Result<()> {
    let slot = c.process().get_fd(c.arg(0), Rights::NONE)?;
    c.result = c
        .process()
        .add_fd(slot.fd, slot.rights_base, slot.rights_inheriting) as u64;
    Ok(())
}

pub fn fd_read(c: &mut SyscallContext) -> Result<()> {
    let slot = c.process().get_fd(c.arg(0), Rights::FD_READ)?;
    let mut iovecs = user_iovecs_mut(c.arg(1), c.arg(2) as usize)?;
    // Descriptors stream into one buffer at a time; short reads end the
    // call.
    let mut total = 0u64;
    for iovec in iovecs.iter_mut() {
        if iovec.is_empty() {
            continue;
        }
        let got = slot.fd.read(iovec)?;
        total += got as u64;
        if got < iovec.len() {
            break;
        }
    }
    c.result = total;
    Ok(())
}

pub fn fd_write(c: &mut SyscallContext) -> Result<()> {
    let slot = c.process().get_fd(c.arg(0), Rights::FD_WRITE)?;
    let iovecs = user_iovecs(c.arg(1), c.arg(2) as usize)?;
    let mut total = 0u64;
    for iovec in iovecs {
        if iovec.is_empty() {
            continue;
        }
        let written = slot.fd.write(iovec)?;
        total += written as u64;
        if written < iovec.len() {
            break;
        }
    }
    c.result = total;
    Ok(())
}

pub fn fd_pread(c: &mut SyscallContext) -> Result<()> {
    let slot = c
        .process()
        .get_fd(c.arg(0), Rights::FD_READ | Rights::FD_SEEK)?;
    let mut iovecs = user_iovecs_mut(c.arg(1), c.arg(2) as usize)?;
    let mut offset = c.arg64(3);
    let mut total = 0u64;
    for iovec in iovecs.iter_mut() {
        if iovec.is_empty() {
            continue;
        }
        let got = slot.fd.pread(iovec, offset)?;
        total += got as u64;
        offset += got as u64;
        if got < iovec.len() {
            break;
        }
    }
    c.result = total;
    Ok(())
}

pub fn fd_pwrite(c: &mut SyscallContext) -> Result<()> {
    let slot = c
        .process()
        .get_fd(c.arg(0), Rights::FD_WRITE | Rights::FD_SEEK)?;
    let iovecs = user_iovecs(c.arg(1), c.arg(2) as usize)?;
    let mut offset = c.arg64(3);
    let mut total = 0u64;
    for iovec in iovecs {
        if iovec.is_empty() {
            continue;
        }
        let written = slot.fd.pwrite(iovec, offset)?;
        total += written as u64;
        offset += written as u64;
        if written < iovec.len() {
            break;
        }
    }
    c.result = total;
    Ok(())
}

pub fn fd_replace(c: &mut SyscallContext) -> Result<()> {
    let from = c.process().get_fd(c.arg(0), Rights::NONE)?;
    c.process()
        .replace_fd(c.arg(1), from.fd, from.rights_base, from.rights_inheriting)
}

pub fn fd_seek(c: &mut SyscallContext) -> Result<()> {
    let offset = c.arg64(1) as i64;
    let whence = c.arg(3) as u8;
    // tell() is seek(0, CUR) and only needs FD_TELL.
    let needed = if offset == 0 && whence == types::WHENCE_CUR {
        Rights::FD_TELL
    } else {
        Rights::FD_SEEK
    };
    let slot = c.process().get_fd(c.arg(0), needed)?;
    c.result = slot.fd.seek(offset, whence)?;
    Ok(())
}

pub fn fd_stat_get(c: &mut SyscallContext) -> Result<()> {
    let slot = c.process().get_fd(c.arg(0), Rights::NONE)?;
    let out: &mut FdStat = user_ref_mut(c.arg(1))?;
    *out = FdStat {
        fs_filetype: slot.fd.filetype() as u8,
        fs_flags: slot.fd.fdstat_flags(),
        fs_rights_base: slot.rights_base.0,
        fs_rights_inheriting: slot.rights_inheriting.0,
    };
    Ok(())
}

/// Rights may only ever shrink; descriptor flags are fixed at open time.
pub fn fd_stat_put(c: &mut SyscallContext) -> Result<()> {
    let num = c.arg(0);
    let stat: &FdStat = super::types::user_ref(c.arg(1))?;
    let flags = c.arg(2) as u16;
    let slot = c.process().get_fd(num, Rights::NONE)?;

    if flags & FDSTAT_RIGHTS != 0 {
        let new_base = Rights(stat.fs_rights_base);
        let new_inheriting = Rights(stat.fs_rights_inheriting);
        if !new_base.is_subset_of(slot.rights_base)
            || !new_inheriting.is_subset_of(slot.rights_inheriting)
        {
            return Err(Errno::NotCapable);
        }
        c.process()
            .replace_fd(num, slot.fd.clone(), new_base, new_inheriting)?;
    }
    if flags & FDSTAT_FLAGS != 0 && stat.fs_flags != slot.fd.fdstat_flags() {
        return Err(Errno::NotSup);
    }
    Ok(())
}

pub fn fd_sync(c: &mut SyscallContext) -> Result<()> {
    let slot = c.process().get_fd(c.arg(0), Rights::FD_SYNC)?;
    slot.fd.sync()
}
