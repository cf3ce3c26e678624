//! Path resolution over directory descriptors.
//!
//! Paths are resolved relative to a descriptor the caller already holds;
//! there is no global namespace. Absolute paths and any `..` that would pop
//! out of the starting directory fail `ENOTCAPABLE`. Symlinks are followed
//! by splicing the link target into the remaining path, at most 30 times.

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::abi::errno::Result;
use crate::abi::types::{
    self, FdStat, FileStat, FileType, Inode, LookupFlags, OFlags, UlFlags, NAME_MAX,
};
use crate::abi::{Errno, Rights};
use crate::fd::FdHandle;

const MAX_SYMLINKS_FOLLOWED: u32 = 30;

/// Outcome of walking a path down to its final component.
pub struct TraverseResult {
    /// The innermost directory, holder of the final component.
    pub directory: FdHandle,
    pub filename: Vec<u8>,
    /// The final lookup's result; `Err` is meaningful (e.g. `NoEnt` before a
    /// create).
    pub entry: Result<FileStat>,
}

pub fn traverse(
    rootdir: &FdHandle,
    path: &[u8],
    lookupflags: LookupFlags,
    oflags: OFlags,
    fdstat: &FdStat,
) -> Result<TraverseResult> {
    if oflags & !(types::O_CREAT | types::O_DIRECTORY | types::O_EXCL | types::O_TRUNC) != 0 {
        return Err(Errno::Inval);
    }
    if oflags & (types::O_CREAT | types::O_DIRECTORY) == (types::O_CREAT | types::O_DIRECTORY) {
        // Directories are created with file_create, not with open.
        return Err(Errno::Inval);
    }

    let mut path: Vec<u8> = path.to_vec();
    let mut entered: Vec<FdHandle> = alloc::vec![Arc::clone(rootdir)];
    let mut symlinks_followed = 0u32;

    loop {
        let this_directory = Arc::clone(entered.last().unwrap());
        if this_directory.filetype() != FileType::Directory {
            return Err(Errno::NotDir);
        }
        if path.is_empty() {
            return Err(Errno::NoEnt);
        }
        if path[0] == b'/' {
            // No ambient authority: absolute paths have nothing to resolve
            // against.
            return Err(Errno::NotCapable);
        }

        let splitter = path.iter().position(|&b| b == b'/').unwrap_or(path.len());
        let component: Vec<u8> = path[..splitter].to_vec();
        if component.len() > NAME_MAX {
            return Err(Errno::NameTooLong);
        }

        // "foo///bar" still has the component "foo".
        let mut rest_start = splitter;
        while rest_start < path.len() && path[rest_start] == b'/' {
            rest_start += 1;
        }
        let trailing_slash = splitter < path.len();
        let is_final = rest_start == path.len();

        if is_final {
            if component == b".." && entered.len() == 1 {
                // "foo/.." is fine, "foo/../.." is not.
                return Err(Errno::NotCapable);
            }

            match this_directory.lookup(&component, oflags) {
                Ok(entry) => {
                    let filetype = FileType::from_raw(entry.st_filetype);
                    if filetype == FileType::SymbolicLink
                        && lookupflags & types::LOOKUP_SYMLINK_FOLLOW != 0
                    {
                        let size = entry.st_size as usize;
                        symlinks_followed += 1;
                        if size == 0 || symlinks_followed >= MAX_SYMLINKS_FOLLOWED {
                            return Err(Errno::Loop);
                        }
                        if size > NAME_MAX {
                            return Err(Errno::NameTooLong);
                        }
                        let mut target = alloc::vec![0u8; size];
                        let got = this_directory.file_readlink(&component, &mut target)?;
                        target.truncate(got);
                        path = target;
                        continue;
                    }
                    if trailing_slash && filetype != FileType::Directory {
                        // "foo/" requires an (eventual) directory.
                        return Err(Errno::NotDir);
                    }
                    return Ok(TraverseResult {
                        directory: this_directory,
                        filename: component,
                        entry: Ok(entry),
                    });
                }
                Err(e) => {
                    return Ok(TraverseResult {
                        directory: this_directory,
                        filename: component,
                        entry: Err(e),
                    });
                }
            }
        }

        // Intermediate component.
        if component.is_empty() || component == b"." {
            path.drain(..rest_start);
            continue;
        }
        if component == b".." {
            if entered.len() == 1 {
                return Err(Errno::NotCapable);
            }
            entered.pop();
            path.drain(..rest_start);
            continue;
        }

        let entry = this_directory.lookup(&component, 0)?;
        let filetype = FileType::from_raw(entry.st_filetype);
        if filetype == FileType::SymbolicLink {
            let size = entry.st_size as usize;
            symlinks_followed += 1;
            if size == 0 || symlinks_followed >= MAX_SYMLINKS_FOLLOWED {
                return Err(Errno::Loop);
            }
            if size > NAME_MAX {
                return Err(Errno::NameTooLong);
            }
            let mut target = alloc::vec![0u8; size];
            let got = this_directory.file_readlink(&component, &mut target)?;
            target.truncate(got);
            // New path: link target plus the unread tail (with its slash).
            target.extend_from_slice(&path[splitter..]);
            path = target;
            continue;
        }
        if filetype != FileType::Directory {
            return Err(Errno::NotDir);
        }
        let new_directory = this_directory.inode_open(entry.st_dev, entry.st_ino, fdstat)?;
        entered.push(new_directory);
        path.drain(..rest_start);
    }
}

/// `file_open`: resolve, open the inode, apply open flags and attenuate the
/// requested rights to what makes sense for the resulting filetype.
pub fn openat(
    rootdir: &FdHandle,
    path: &[u8],
    lookupflags: LookupFlags,
    oflags: OFlags,
    fdstat: &mut FdStat,
) -> Result<FdHandle> {
    let travres = traverse(rootdir, path, lookupflags, oflags, fdstat)?;
    let mut entry = travres.entry?;

    if oflags & types::O_DIRECTORY != 0 && entry.st_filetype != FileType::Directory as u8 {
        return Err(Errno::NotDir);
    }

    let new_fd = travres
        .directory
        .inode_open(entry.st_dev, entry.st_ino, fdstat)?;

    // A directory may not be opened read-write.
    if new_fd.filetype() == FileType::Directory
        && Rights(fdstat.fs_rights_base).contains(Rights::FD_WRITE)
    {
        return Err(Errno::IsDir);
    }

    if oflags & types::O_TRUNC != 0 {
        if !Rights(fdstat.fs_rights_base).contains(Rights::FD_WRITE) {
            return Err(Errno::Inval);
        }
        entry.st_size = 0;
        new_fd.file_stat_fput(&entry, types::FILESTAT_SIZE)?;
    }

    // Drop rights that mean nothing on this filetype.
    let mut base = Rights(fdstat.fs_rights_base);
    let mut inheriting = Rights(fdstat.fs_rights_inheriting);
    if new_fd.filetype() != FileType::Directory {
        inheriting = Rights::NONE;
        base = base.difference(Rights::DIRECTORY_ONLY);
    } else {
        base = base.difference(Rights::NON_DIRECTORY);
    }
    if new_fd.filetype() != FileType::RegularFile {
        base = base.difference(Rights::PROC_EXEC);
    }
    fdstat.fs_rights_base = base.0;
    fdstat.fs_rights_inheriting = inheriting.0;

    Ok(new_fd)
}

fn default_fdstat() -> FdStat {
    FdStat {
        fs_filetype: 0,
        fs_flags: 0,
        fs_rights_base: Rights::ALL.0,
        fs_rights_inheriting: Rights::ALL.0,
    }
}

pub fn file_create(directory: &FdHandle, path: &[u8], filetype: FileType) -> Result<Inode> {
    let travres = traverse(directory, path, 0, 0, &default_fdstat())?;
    match travres.entry {
        Ok(_) => Err(Errno::Exist),
        Err(Errno::NoEnt) => travres.directory.file_create(&travres.filename, filetype),
        Err(e) => Err(e),
    }
}

pub fn file_unlink(directory: &FdHandle, path: &[u8], flags: UlFlags) -> Result<()> {
    let travres = traverse(directory, path, 0, 0, &default_fdstat())?;
    travres.directory.file_unlink(&travres.filename, flags)
}

pub fn file_stat_get(
    directory: &FdHandle,
    path: &[u8],
    lookupflags: LookupFlags,
) -> Result<FileStat> {
    let travres = traverse(directory, path, lookupflags, 0, &default_fdstat())?;
    travres.entry
}

pub fn file_stat_put(
    directory: &FdHandle,
    path: &[u8],
    lookupflags: LookupFlags,
    stat: &FileStat,
    fsflags: u16,
) -> Result<()> {
    let travres = traverse(directory, path, lookupflags, 0, &default_fdstat())?;
    travres.entry?;
    travres
        .directory
        .file_stat_put(&travres.filename, stat, fsflags)
}

pub fn file_readlink(directory: &FdHandle, path: &[u8], buf: &mut [u8]) -> Result<usize> {
    let travres = traverse(directory, path, 0, 0, &default_fdstat())?;
    let entry = travres.entry?;
    if entry.st_filetype != FileType::SymbolicLink as u8 {
        return Err(Errno::Inval);
    }
    travres.directory.file_readlink(&travres.filename, buf)
}

pub fn file_symlink(directory: &FdHandle, target: &[u8], path: &[u8]) -> Result<()> {
    let travres = traverse(directory, path, 0, 0, &default_fdstat())?;
    match travres.entry {
        Ok(_) => Err(Errno::Exist),
        Err(Errno::NoEnt) => travres.directory.file_symlink(target, &travres.filename),
        Err(e) => Err(e),
    }
}

pub fn file_link(
    sourcedir: &FdHandle,
    sourcepath: &[u8],
    lookupflags: LookupFlags,
    destdir: &FdHandle,
    destpath: &[u8],
) -> Result<()> {
    let source = traverse(sourcedir, sourcepath, lookupflags, 0, &default_fdstat())?;
    let entry = source.entry?;
    if entry.st_filetype == FileType::Directory as u8 {
        return Err(Errno::Perm);
    }

    let dest = traverse(destdir, destpath, 0, 0, &default_fdstat())?;
    match dest.entry {
        Ok(_) => return Err(Errno::Exist),
        Err(Errno::NoEnt) => {}
        Err(e) => return Err(e),
    }

    source
        .directory
        .file_link(&source.filename, &dest.directory, &dest.filename)
}

pub fn file_rename(
    sourcedir: &FdHandle,
    sourcepath: &[u8],
    destdir: &FdHandle,
    destpath: &[u8],
) -> Result<()> {
    let source = traverse(sourcedir, sourcepath, 0, 0, &default_fdstat())?;
    source.entry?;

    let dest = traverse(destdir, destpath, 0, 0, &default_fdstat())?;
    match dest.entry {
        // An existing destination is overwritten by the filesystem.
        Ok(_) | Err(Errno::NoEnt) => {}
        Err(e) => return Err(e),
    }

    source
        .directory
        .file_rename(&source.filename, &dest.directory, &dest.filename)
}
