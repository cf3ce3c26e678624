//! Growable shared-memory descriptor (`fd_create1(SHARED_MEMORY)`).
//!
//! A byte buffer that grows on writes and size puts; reads past the end see
//! zeroes, so a sparse consumer never notices the actual allocation size.

use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use super::{Fd, FdHandle};
use crate::abi::errno::Result;
use crate::abi::types::{self, Device, FileStat, FileType, Filesize, Inode};

pub struct ShmFd {
    device: Device,
    inode: Inode,
    buffer: Mutex<Vec<u8>>,
}

impl ShmFd {
    pub fn new(device: Device, inode: Inode) -> FdHandle {
        Arc::new(ShmFd {
            device,
            inode,
            buffer: Mutex::new(Vec::new()),
        })
    }

    fn resize(buffer: &mut Vec<u8>, size: usize) {
        buffer.resize(size, 0);
    }
}

impl Fd for ShmFd {
    fn filetype(&self) -> FileType {
        FileType::SharedMemory
    }

    fn name(&self) -> &'static str {
        "shmfd"
    }

    fn device(&self) -> Device {
        self.device
    }

    fn pread(&self, dest: &mut [u8], offset: Filesize) -> Result<usize> {
        let buffer = self.buffer.lock();
        let offset = offset as usize;
        if buffer.len() <= offset {
            dest.fill(0);
        } else if buffer.len() < offset + dest.len() {
            let have = buffer.len() - offset;
            dest[..have].copy_from_slice(&buffer[offset..]);
            dest[have..].fill(0);
        } else {
            dest.copy_from_slice(&buffer[offset..offset + dest.len()]);
        }
        Ok(dest.len())
    }

    fn pwrite(&self, src: &[u8], offset: Filesize) -> Result<usize> {
        let mut buffer = self.buffer.lock();
        let end = offset as usize + src.len();
        if buffer.len() < end {
            Self::resize(&mut buffer, end);
        }
        buffer[offset as usize..end].copy_from_slice(src);
        Ok(src.len())
    }

    fn file_stat_fget(&self) -> Result<FileStat> {
        Ok(FileStat {
            st_dev: self.device,
            st_ino: self.inode,
            st_filetype: FileType::SharedMemory as u8,
            st_nlink: 1,
            st_size: self.buffer.lock().len() as Filesize,
            st_atim: 0,
            st_mtim: 0,
            st_ctim: 0,
        })
    }

    fn file_stat_fput(&self, stat: &FileStat, fsflags: u16) -> Result<()> {
        if fsflags & types::FILESTAT_SIZE != 0 {
            Self::resize(&mut self.buffer.lock(), stat.st_size as usize);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_beyond_the_end_are_zero_filled() {
        let fd = ShmFd::new(1, 1);
        fd.pwrite(b"abc", 0).unwrap();
        let mut buf = [0xffu8; 6];
        assert_eq!(fd.pread(&mut buf, 0).unwrap(), 6);
        assert_eq!(&buf, b"abc\0\0\0");
    }

    #[test]
    fn sparse_write_grows_the_buffer() {
        let fd = ShmFd::new(1, 1);
        fd.pwrite(b"x", 100).unwrap();
        assert_eq!(fd.file_stat_fget().unwrap().st_size, 101);
        let mut buf = [0xffu8; 2];
        fd.pread(&mut buf, 99).unwrap();
        assert_eq!(&buf, b"\0x");
    }

    #[test]
    fn stat_put_truncates() {
        let fd = ShmFd::new(1, 1);
        fd.pwrite(b"abcdef", 0).unwrap();
        let stat = FileStat {
            st_size: 2,
            ..FileStat::default()
        };
        fd.file_stat_fput(&stat, types::FILESTAT_SIZE).unwrap();
        assert_eq!(fd.file_stat_fget().unwrap().st_size, 2);
    }
}
