//! procfs: a small read-only tree over kernel state.
//!
//! ```text
//! /            uptime, processes/
//! /processes   one directory per live process, named by pid
//! /.../name    the process name
//! ```
//!
//! Files are materialized at open time into memory descriptors; nothing here
//! stays coherent with later kernel state, exactly like reading procfs
//! twice gives two snapshots.

use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use super::PROCFS_DEVICE;
use crate::abi::errno::Result;
use crate::abi::types::{Device, DirCookie, FdStat, FileStat, FileType, Inode, OFlags};
use crate::abi::Errno;
use crate::fd::memory_fd::MemoryFd;
use crate::fd::{Fd, FdHandle};

// Inode layout: low bits select the kind, the rest indexes the process list.
const INO_ROOT: Inode = 1;
const INO_UPTIME: Inode = 2;
const INO_PROCESSES: Inode = 3;
const INO_PROC_BASE: Inode = 16;
const PROC_KIND_DIR: Inode = 0;
const PROC_KIND_NAME: Inode = 1;

fn proc_ino(index: usize, kind: Inode) -> Inode {
    INO_PROC_BASE + (index as Inode) * 2 + kind
}

/// Append one directory entry record (header plus name) to `buf`. Returns
/// the bytes written, or None if the entry does not fit.
pub fn write_dirent(buf: &mut [u8], next: DirCookie, stat: &FileStat, name: &[u8]) -> Option<usize> {
    let header_len = core::mem::size_of::<crate::abi::types::DirEnt>();
    let total = header_len + name.len();
    if buf.len() < total {
        return None;
    }
    let dirent = crate::abi::types::DirEnt {
        d_next: next,
        d_ino: stat.st_ino,
        d_namlen: name.len() as u32,
        d_type: stat.st_filetype,
    };
    unsafe {
        core::ptr::copy_nonoverlapping(
            &dirent as *const _ as *const u8,
            buf.as_mut_ptr(),
            header_len,
        );
    }
    buf[header_len..total].copy_from_slice(name);
    Some(total)
}

fn dir_stat(ino: Inode) -> FileStat {
    FileStat {
        st_dev: PROCFS_DEVICE,
        st_ino: ino,
        st_filetype: FileType::Directory as u8,
        st_nlink: 1,
        st_size: 0,
        st_atim: 0,
        st_mtim: 0,
        st_ctim: 0,
    }
}

fn file_stat(ino: Inode, size: u64) -> FileStat {
    FileStat {
        st_dev: PROCFS_DEVICE,
        st_ino: ino,
        st_filetype: FileType::RegularFile as u8,
        st_nlink: 1,
        st_size: size,
        st_atim: 0,
        st_mtim: 0,
        st_ctim: 0,
    }
}

fn uptime_text() -> Vec<u8> {
    let us = crate::time::uptime_us();
    format!("{}.{:06}\n", us / 1_000_000, us % 1_000_000).into_bytes()
}

pub fn root_fd() -> FdHandle {
    Arc::new(ProcfsDir { ino: INO_ROOT })
}

struct ProcfsDir {
    ino: Inode,
}

impl ProcfsDir {
    fn lookup_in_root(&self, file: &[u8]) -> Result<FileStat> {
        match file {
            b"uptime" => Ok(file_stat(INO_UPTIME, uptime_text().len() as u64)),
            b"processes" => Ok(dir_stat(INO_PROCESSES)),
            _ => Err(Errno::NoEnt),
        }
    }

    fn lookup_in_processes(&self, file: &[u8]) -> Result<FileStat> {
        let processes = crate::task::processes();
        for (i, process) in processes.iter().enumerate() {
            if process.pid_hex().as_bytes() == file {
                return Ok(dir_stat(proc_ino(i, PROC_KIND_DIR)));
            }
        }
        Err(Errno::NoEnt)
    }

    fn lookup_in_process(&self, index: usize, file: &[u8]) -> Result<FileStat> {
        let processes = crate::task::processes();
        let process = processes.get(index).ok_or(Errno::NoEnt)?;
        match file {
            b"name" => Ok(file_stat(
                proc_ino(index, PROC_KIND_NAME),
                process.name().len() as u64 + 1,
            )),
            _ => Err(Errno::NoEnt),
        }
    }
}

impl Fd for ProcfsDir {
    fn filetype(&self) -> FileType {
        FileType::Directory
    }

    fn name(&self) -> &'static str {
        "procfs"
    }

    fn device(&self) -> Device {
        PROCFS_DEVICE
    }

    fn lookup(&self, file: &[u8], _oflags: OFlags) -> Result<FileStat> {
        match self.ino {
            INO_ROOT => self.lookup_in_root(file),
            INO_PROCESSES => self.lookup_in_processes(file),
            ino if ino >= INO_PROC_BASE => {
                self.lookup_in_process(((ino - INO_PROC_BASE) / 2) as usize, file)
            }
            _ => Err(Errno::NoEnt),
        }
    }

    fn inode_open(&self, dev: Device, inode: Inode, _fdstat: &FdStat) -> Result<FdHandle> {
        if dev != PROCFS_DEVICE {
            return Err(Errno::NoEnt);
        }
        match inode {
            INO_ROOT | INO_PROCESSES => Ok(Arc::new(ProcfsDir { ino: inode })),
            INO_UPTIME => Ok(MemoryFd::with_vec(
                uptime_text(),
                "procfs/uptime",
                PROCFS_DEVICE,
                INO_UPTIME,
            )),
            ino if ino >= INO_PROC_BASE => {
                let index = ((ino - INO_PROC_BASE) / 2) as usize;
                let kind = (ino - INO_PROC_BASE) % 2;
                let processes = crate::task::processes();
                let process = processes.get(index).ok_or(Errno::NoEnt)?;
                if kind == PROC_KIND_DIR {
                    Ok(Arc::new(ProcfsDir { ino }))
                } else {
                    let mut name: String = process.name();
                    name.push('\n');
                    Ok(MemoryFd::with_vec(
                        name.into_bytes(),
                        "procfs/name",
                        PROCFS_DEVICE,
                        ino,
                    ))
                }
            }
            _ => Err(Errno::NoEnt),
        }
    }

    fn readdir(&self, buf: &mut [u8], cookie: DirCookie) -> Result<usize> {
        let mut entries: Vec<(FileStat, Vec<u8>)> = Vec::new();
        match self.ino {
            INO_ROOT => {
                entries.push((
                    file_stat(INO_UPTIME, uptime_text().len() as u64),
                    b"uptime".to_vec(),
                ));
                entries.push((dir_stat(INO_PROCESSES), b"processes".to_vec()));
            }
            INO_PROCESSES => {
                for (i, process) in crate::task::processes().iter().enumerate() {
                    entries.push((
                        dir_stat(proc_ino(i, PROC_KIND_DIR)),
                        process.pid_hex().into_bytes(),
                    ));
                }
            }
            ino if ino >= INO_PROC_BASE => {
                let index = ((ino - INO_PROC_BASE) / 2) as usize;
                entries.push((
                    file_stat(proc_ino(index, PROC_KIND_NAME), 0),
                    b"name".to_vec(),
                ));
            }
            _ => {}
        }

        let mut written = 0;
        for (i, (stat, name)) in entries.iter().enumerate().skip(cookie as usize) {
            match write_dirent(&mut buf[written..], i as DirCookie + 1, stat, name) {
                Some(n) => written += n,
                None => break,
            }
        }
        Ok(written)
    }

    fn file_stat_fget(&self) -> Result<FileStat> {
        Ok(dir_stat(self.ino))
    }
}
