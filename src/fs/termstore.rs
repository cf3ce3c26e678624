//! Terminal store: a directory of terminals. With only the VGA text sink in
//! the kernel there is exactly one entry, `console`.

use alloc::sync::Arc;

use super::TERMSTORE_DEVICE;
use crate::abi::errno::Result;
use crate::abi::types::{Device, DirCookie, FdStat, FileStat, FileType, Inode, OFlags};
use crate::abi::Errno;
use crate::fd::vga_fd::VgaFd;
use crate::fd::{Fd, FdHandle};

const INO_CONSOLE: Inode = 1;

pub fn root_fd() -> FdHandle {
    Arc::new(TermstoreDir)
}

struct TermstoreDir;

fn console_stat() -> FileStat {
    FileStat {
        st_dev: TERMSTORE_DEVICE,
        st_ino: INO_CONSOLE,
        st_filetype: FileType::CharacterDevice as u8,
        st_nlink: 1,
        st_size: 0,
        st_atim: 0,
        st_mtim: 0,
        st_ctim: 0,
    }
}

impl Fd for TermstoreDir {
    fn filetype(&self) -> FileType {
        FileType::Directory
    }

    fn name(&self) -> &'static str {
        "termstore"
    }

    fn device(&self) -> Device {
        TERMSTORE_DEVICE
    }

    fn lookup(&self, file: &[u8], _oflags: OFlags) -> Result<FileStat> {
        if file == b"console" {
            Ok(console_stat())
        } else {
            Err(Errno::NoEnt)
        }
    }

    fn inode_open(&self, dev: Device, inode: Inode, _fdstat: &FdStat) -> Result<FdHandle> {
        if dev == TERMSTORE_DEVICE && inode == INO_CONSOLE {
            Ok(VgaFd::new())
        } else {
            Err(Errno::NoEnt)
        }
    }

    fn readdir(&self, buf: &mut [u8], cookie: DirCookie) -> Result<usize> {
        if cookie != 0 {
            return Ok(0);
        }
        Ok(super::procfs::write_dirent(buf, 1, &console_stat(), b"console").unwrap_or(0))
    }

    fn file_stat_fget(&self) -> Result<FileStat> {
        Ok(FileStat {
            st_dev: TERMSTORE_DEVICE,
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
