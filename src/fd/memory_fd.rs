//! Read-only in-memory regular file.
//!
//! Backs bootfs/initrdfs file opens and the demo buffer every process gets.
//! Reads come from a fixed byte blob; writes are not supported.

use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use super::{Fd, FdHandle};
use crate::abi::errno::Result;
use crate::abi::types::{self, Device, FileStat, FileType, Filesize, Inode};
use crate::abi::Errno;

pub struct MemoryFd {
    name: &'static str,
    contents: Contents,
    device: Device,
    inode: Inode,
    pos: Mutex<Filesize>,
}

enum Contents {
    Static(&'static [u8]),
    Owned(Vec<u8>),
}

impl Contents {
    fn bytes(&self) -> &[u8] {
        match self {
            Contents::Static(b) => b,
            Contents::Owned(v) => v,
        }
    }
}

impl MemoryFd {
    pub fn with_bytes(contents: &'static [u8], name: &'static str) -> FdHandle {
        Arc::new(MemoryFd {
            name,
            contents: Contents::Static(contents),
            device: 0,
            inode: 0,
            pos: Mutex::new(0),
        })
    }

    pub fn with_vec(contents: Vec<u8>, name: &'static str, device: Device, inode: Inode) -> FdHandle {
        Arc::new(MemoryFd {
            name,
            contents: Contents::Owned(contents),
            device,
            inode,
            pos: Mutex::new(0),
        })
    }

    pub fn with_static(
        contents: &'static [u8],
        name: &'static str,
        device: Device,
        inode: Inode,
    ) -> FdHandle {
        Arc::new(MemoryFd {
            name,
            contents: Contents::Static(contents),
            device,
            inode,
            pos: Mutex::new(0),
        })
    }

    fn read_at(&self, dest: &mut [u8], offset: Filesize) -> usize {
        let bytes = self.contents.bytes();
        if offset >= bytes.len() as Filesize {
            return 0;
        }
        let available = bytes.len() - offset as usize;
        let count = dest.len().min(available);
        dest[..count].copy_from_slice(&bytes[offset as usize..offset as usize + count]);
        count
    }
}

impl Fd for MemoryFd {
    fn filetype(&self) -> FileType {
        FileType::RegularFile
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn device(&self) -> Device {
        self.device
    }

    fn read(&self, dest: &mut [u8]) -> Result<usize> {
        let mut pos = self.pos.lock();
        let count = self.read_at(dest, *pos);
        *pos += count as Filesize;
        Ok(count)
    }

    fn pread(&self, dest: &mut [u8], offset: Filesize) -> Result<usize> {
        Ok(self.read_at(dest, offset))
    }

    fn seek(&self, offset: i64, whence: u8) -> Result<Filesize> {
        let len = self.contents.bytes().len() as i64;
        let mut pos = self.pos.lock();
        let base = match whence {
            types::WHENCE_SET => 0,
            types::WHENCE_CUR => *pos as i64,
            types::WHENCE_END => len,
            _ => return Err(Errno::Inval),
        };
        let target = base.checked_add(offset).ok_or(Errno::Inval)?;
        if target < 0 {
            return Err(Errno::Inval);
        }
        *pos = target as Filesize;
        Ok(*pos)
    }

    fn file_stat_fget(&self) -> Result<FileStat> {
        Ok(FileStat {
            st_dev: self.device,
            st_ino: self.inode,
            st_filetype: FileType::RegularFile as u8,
            st_nlink: 1,
            st_size: self.contents.bytes().len() as Filesize,
            st_atim: 0,
            st_mtim: 0,
            st_ctim: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_reads_advance_position() {
        let fd = MemoryFd::with_bytes(b"abcdef", "test");
        let mut buf = [0u8; 4];
        assert_eq!(fd.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(fd.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
        assert_eq!(fd.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn pread_does_not_move_position() {
        let fd = MemoryFd::with_bytes(b"abcdef", "test");
        let mut buf = [0u8; 2];
        assert_eq!(fd.pread(&mut buf, 4).unwrap(), 2);
        assert_eq!(&buf, b"ef");
        let mut head = [0u8; 3];
        assert_eq!(fd.read(&mut head).unwrap(), 3);
        assert_eq!(&head, b"abc");
    }

    #[test]
    fn seek_whence_variants() {
        let fd = MemoryFd::with_bytes(b"abcdef", "test");
        assert_eq!(fd.seek(2, types::WHENCE_SET).unwrap(), 2);
        assert_eq!(fd.seek(2, types::WHENCE_CUR).unwrap(), 4);
        assert_eq!(fd.seek(-1, types::WHENCE_END).unwrap(), 5);
        assert!(fd.seek(-10, types::WHENCE_SET).is_err());
        assert!(fd.seek(0, 99).is_err());
    }
}
