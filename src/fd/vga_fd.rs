//! Write-only descriptor for the VGA text console.

use alloc::sync::Arc;

use super::{Fd, FdHandle};
use crate::abi::errno::Result;
use crate::abi::types::{FileStat, FileType};

pub struct VgaFd;

impl VgaFd {
    pub fn new() -> FdHandle {
        Arc::new(VgaFd)
    }
}

impl Fd for VgaFd {
    fn filetype(&self) -> FileType {
        FileType::CharacterDevice
    }

    fn name(&self) -> &'static str {
        "vga_fd"
    }

    fn write(&self, src: &[u8]) -> Result<usize> {
        crate::vga_buffer::write_bytes(src);
        Ok(src.len())
    }

    fn file_stat_fget(&self) -> Result<FileStat> {
        Ok(FileStat {
            st_filetype: FileType::CharacterDevice as u8,
            st_nlink: 1,
            ..FileStat::default()
        })
    }
}
