//! Path-based file syscalls, all funneled through the VFS traversal.

use super::types::{user_ref, user_ref_mut, user_slice, user_slice_mut, SyscallContext};
use crate::abi::errno::Result;
use crate::abi::types::{self, FdStat, FileStat, FileType};
use crate::abi::{Errno, Rights};
use crate::vfs;

pub fn file_advise(c: &mut SyscallContext) -> Result<()> {
    let slot = c.process().get_fd(c.arg(0), Rights::FILE_ADVISE)?;
    let advice = c.arg(5) as u8;
    if !(types::ADVICE_DONTNEED..=types::ADVICE_WILLNEED).contains(&advice) {
        return Err(Errno::Inval);
    }
    // Advice is accepted and ignored; nothing in the kernel caches file
    // contents.
    let _ = slot;
    Ok(())
}

pub fn file_allocate(c: &mut SyscallContext) -> Result<()> {
    let slot = c.process().get_fd(c.arg(0), Rights::FILE_ALLOCATE)?;
    slot.fd.file_allocate(c.arg64(1), c.arg64(3))
}

pub fn file_create(c: &mut SyscallContext) -> Result<()> {
    let filetype = FileType::from_raw(c.arg(3) as u8);
    let needed = match filetype {
        FileType::Directory => Rights::FILE_CREATE_DIRECTORY,
        FileType::RegularFile => Rights::FILE_CREATE_FILE,
        _ => return Err(Errno::Inval),
    };
    let slot = c.process().get_fd(c.arg(0), needed)?;
    let path = user_slice(c.arg(1), c.arg(2) as usize)?;
    vfs::file_create(&slot.fd, path, filetype)?;
    Ok(())
}

pub fn file_link(c: &mut SyscallContext) -> Result<()> {
    let lookupflags = c.arg(1);
    let fd1 = c.process().get_fd(c.arg(0), Rights::FILE_LINK_SOURCE)?;
    let path1 = user_slice(c.arg(2), c.arg(3) as usize)?;
    let fd2 = c.process().get_fd(c.arg(4), Rights::FILE_LINK_TARGET)?;
    let path2 = user_slice(c.arg(5), c.arg(6) as usize)?;
    vfs::file_link(&fd1.fd, path1, lookupflags, &fd2.fd, path2)
}

pub fn file_open(c: &mut SyscallContext) -> Result<()> {
    let dirfd = c.arg(0);
    let lookupflags = c.arg(1);
    let path = user_slice(c.arg(2), c.arg(3) as usize)?;
    let oflags = c.arg(4) as types::OFlags;
    let fdstat_in: &FdStat = user_ref(c.arg(5))?;

    let slot = c.process().get_fd(dirfd, Rights::FILE_OPEN)?;

    // The requested rights must stay inside what this directory may confer.
    let requested_base = Rights(fdstat_in.fs_rights_base);
    let requested_inheriting = Rights(fdstat_in.fs_rights_inheriting);
    if !requested_base.is_subset_of(slot.rights_inheriting)
        || !requested_inheriting.is_subset_of(slot.rights_inheriting)
    {
        return Err(Errno::NotCapable);
    }

    let mut fdstat = *fdstat_in;
    let new_fd = vfs::openat(&slot.fd, path, lookupflags, oflags, &mut fdstat)?;
    c.result = c.process().add_fd(
        new_fd,
        Rights(fdstat.fs_rights_base),
        Rights(fdstat.fs_rights_inheriting),
    ) as u64;
    Ok(())
}

pub fn file_readdir(c: &mut SyscallContext) -> Result<()> {
    let slot = c.process().get_fd(c.arg(0), Rights::FILE_READDIR)?;
    let buf = user_slice_mut(c.arg(1), c.arg(2) as usize)?;
    let cookie = c.arg64(3);
    c.result = slot.fd.readdir(buf, cookie)? as u64;
    Ok(())
}

pub fn file_readlink(c: &mut SyscallContext) -> Result<()> {
    let slot = c.process().get_fd(c.arg(0), Rights::FILE_READLINK)?;
    let path = user_slice(c.arg(1), c.arg(2) as usize)?;
    let buf = user_slice_mut(c.arg(3), c.arg(4) as usize)?;
    c.result = vfs::file_readlink(&slot.fd, path, buf)? as u64;
    Ok(())
}

pub fn file_rename(c: &mut SyscallContext) -> Result<()> {
    let fd1 = c.process().get_fd(c.arg(0), Rights::FILE_RENAME_SOURCE)?;
    let path1 = user_slice(c.arg(1), c.arg(2) as usize)?;
    let fd2 = c.process().get_fd(c.arg(3), Rights::FILE_RENAME_TARGET)?;
    let path2 = user_slice(c.arg(4), c.arg(5) as usize)?;
    vfs::file_rename(&fd1.fd, path1, &fd2.fd, path2)
}

pub fn file_stat_fget(c: &mut SyscallContext) -> Result<()> {
    let slot = c.process().get_fd(c.arg(0), Rights::FILE_STAT_FGET)?;
    let out: &mut FileStat = user_ref_mut(c.arg(1))?;
    *out = slot.fd.file_stat_fget()?;
    Ok(())
}

pub fn file_stat_fput(c: &mut SyscallContext) -> Result<()> {
    let stat: &FileStat = user_ref(c.arg(1))?;
    let fsflags = c.arg(2) as u16;
    let needed = if fsflags & types::FILESTAT_SIZE != 0 {
        Rights::FILE_STAT_FPUT_SIZE
    } else {
        Rights::FILE_STAT_FPUT_TIMES
    };
    let slot = c.process().get_fd(c.arg(0), needed)?;
    slot.fd.file_stat_fput(stat, fsflags)
}

pub fn file_stat_get(c: &mut SyscallContext) -> Result<()> {
    let slot = c.process().get_fd(c.arg(0), Rights::FILE_STAT_GET)?;
    let lookupflags = c.arg(1);
    let path = user_slice(c.arg(2), c.arg(3) as usize)?;
    let out: &mut FileStat = user_ref_mut(c.arg(4))?;
    *out = vfs::file_stat_get(&slot.fd, path, lookupflags)?;
    Ok(())
}

pub fn file_stat_put(c: &mut SyscallContext) -> Result<()> {
    let slot = c.process().get_fd(c.arg(0), Rights::FILE_STAT_PUT_TIMES)?;
    let lookupflags = c.arg(1);
    let path = user_slice(c.arg(2), c.arg(3) as usize)?;
    let stat: &FileStat = user_ref(c.arg(4))?;
    let fsflags = c.arg(5) as u16;
    if fsflags & types::FILESTAT_SIZE != 0 {
        // Size changes go through the descriptor, not through a path.
        return Err(Errno::Inval);
    }
    vfs::file_stat_put(&slot.fd, path, lookupflags, stat, fsflags)
}

pub fn file_symlink(c: &mut SyscallContext) -> Result<()> {
    let target = user_slice(c.arg(0), c.arg(1) as usize)?;
    let slot = c.process().get_fd(c.arg(2), Rights::FILE_SYMLINK)?;
    let path = user_slice(c.arg(3), c.arg(4) as usize)?;
    vfs::file_symlink(&slot.fd, target, path)
}

pub fn file_unlink(c: &mut SyscallContext) -> Result<()> {
    let slot = c.process().get_fd(c.arg(0), Rights::FILE_UNLINK)?;
    let path = user_slice(c.arg(1), c.arg(2) as usize)?;
    let flags = c.arg(3) as u8;
    vfs::file_unlink(&slot.fd, path, flags)
}
