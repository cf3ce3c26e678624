//! bootfs: the flat, read-only directory of binaries shipped alongside the
//! kernel as multiboot modules. `file_open` with `PROC_EXEC` rights on an
//! entry is how init (and everything init spawns from here) starts.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use super::BOOTFS_DEVICE;
use crate::abi::errno::Result;
use crate::abi::types::{Device, DirCookie, FdStat, FileStat, FileType, Inode, OFlags};
use crate::abi::Errno;
use crate::fd::memory_fd::MemoryFd;
use crate::fd::{Fd, FdHandle};

struct Entry {
    name: String,
    data: &'static [u8],
}

static ENTRIES: Mutex<Vec<Entry>> = Mutex::new(Vec::new());

pub fn register(name: &str, data: &'static [u8]) {
    ENTRIES.lock().push(Entry {
        name: String::from(name),
        data,
    });
}

pub fn count() -> usize {
    ENTRIES.lock().len()
}

/// Direct kernel-side open, used to start init before any process exists.
pub fn open_binary(name: &[u8]) -> Option<FdHandle> {
    let entries = ENTRIES.lock();
    entries.iter().enumerate().find_map(|(i, e)| {
        (e.name.as_bytes() == name).then(|| {
            MemoryFd::with_static(e.data, "bootfs_file", BOOTFS_DEVICE, i as Inode + 1)
        })
    })
}

pub fn root_fd() -> FdHandle {
    Arc::new(BootfsDir)
}

struct BootfsDir;

fn entry_stat(index: usize, entry: &Entry) -> FileStat {
    FileStat {
        st_dev: BOOTFS_DEVICE,
        st_ino: index as Inode + 1,
        st_filetype: FileType::RegularFile as u8,
        st_nlink: 1,
        st_size: entry.data.len() as u64,
        st_atim: 0,
        st_mtim: 0,
        st_ctim: 0,
    }
}

impl Fd for BootfsDir {
    fn filetype(&self) -> FileType {
        FileType::Directory
    }

    fn name(&self) -> &'static str {
        "bootfs_root"
    }

    fn device(&self) -> Device {
        BOOTFS_DEVICE
    }

    fn lookup(&self, file: &[u8], _oflags: OFlags) -> Result<FileStat> {
        let entries = ENTRIES.lock();
        entries
            .iter()
            .enumerate()
            .find(|(_, e)| e.name.as_bytes() == file)
            .map(|(i, e)| entry_stat(i, e))
            .ok_or(Errno::NoEnt)
    }

    fn inode_open(&self, dev: Device, inode: Inode, _fdstat: &FdStat) -> Result<FdHandle> {
        if dev != BOOTFS_DEVICE || inode == 0 {
            return Err(Errno::NoEnt);
        }
        let entries = ENTRIES.lock();
        let entry = entries.get(inode as usize - 1).ok_or(Errno::NoEnt)?;
        Ok(MemoryFd::with_static(
            entry.data,
            "bootfs_file",
            BOOTFS_DEVICE,
            inode,
        ))
    }

    fn readdir(&self, buf: &mut [u8], cookie: DirCookie) -> Result<usize> {
        let entries = ENTRIES.lock();
        let mut written = 0;
        for (i, entry) in entries.iter().enumerate().skip(cookie as usize) {
            let stat = entry_stat(i, entry);
            let next = crate::fs::procfs::write_dirent(
                &mut buf[written..],
                i as DirCookie + 1,
                &stat,
                entry.name.as_bytes(),
            );
            match next {
                Some(n) => written += n,
                None => break,
            }
        }
        Ok(written)
    }

    fn file_stat_fget(&self) -> Result<FileStat> {
        Ok(FileStat {
            st_dev: BOOTFS_DEVICE,
            st_ino: 0,
            st_filetype: FileType::Directory as u8,
            st_nlink: 1,
            st_size: 0,
            st_atim: 0,
            st_mtim: 0,
            st_ctim: 0,
        })
    }
}
