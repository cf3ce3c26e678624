//! initrdfs: read-only filesystem over a cpio "newc" archive loaded as the
//! `initrd` boot module.
//!
//! Only the flat namespace is kept; directories inside the archive become
//! path prefixes of the stored names.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use super::INITRDFS_DEVICE;
use crate::abi::errno::Result;
use crate::abi::types::{Device, DirCookie, FdStat, FileStat, FileType, Inode, OFlags};
use crate::abi::Errno;
use crate::fd::memory_fd::MemoryFd;
use crate::fd::{Fd, FdHandle};

const NEWC_MAGIC: &[u8; 6] = b"070701";
const NEWC_HEADER_LEN: usize = 110;
const TRAILER_NAME: &str = "TRAILER!!!";

pub struct CpioEntry<'a> {
    pub name: &'a str,
    pub mode: u32,
    pub data: &'a [u8],
}

fn hex_field(bytes: &[u8]) -> Option<u32> {
    let s = core::str::from_utf8(bytes).ok()?;
    u32::from_str_radix(s, 16).ok()
}

fn align4(n: usize) -> usize {
    (n + 3) & !3
}

/// Iterate the members of a cpio newc archive. Malformed archives stop the
/// parse; whatever was valid up to that point is returned.
pub fn parse_newc(archive: &[u8]) -> Vec<CpioEntry<'_>> {
    let mut entries = Vec::new();
    let mut offset = 0;

    while offset + NEWC_HEADER_LEN <= archive.len() {
        let header = &archive[offset..offset + NEWC_HEADER_LEN];
        if &header[0..6] != NEWC_MAGIC {
            break;
        }
        let Some(mode) = hex_field(&header[14..22]) else {
            break;
        };
        let Some(filesize) = hex_field(&header[54..62]) else {
            break;
        };
        let Some(namesize) = hex_field(&header[94..102]) else {
            break;
        };

        let name_start = offset + NEWC_HEADER_LEN;
        let name_end = name_start + namesize as usize;
        if name_end > archive.len() || namesize == 0 {
            break;
        }
        // Name includes a trailing NUL.
        let Ok(name) = core::str::from_utf8(&archive[name_start..name_end - 1]) else {
            break;
        };
        if name == TRAILER_NAME {
            break;
        }

        let data_start = align4(name_end);
        let data_end = data_start + filesize as usize;
        if data_end > archive.len() {
            break;
        }

        entries.push(CpioEntry {
            name,
            mode,
            data: &archive[data_start..data_end],
        });
        offset = align4(data_end);
    }

    entries
}

struct StoredEntry {
    name: String,
    is_dir: bool,
    data: &'static [u8],
}

static ENTRIES: Mutex<Vec<StoredEntry>> = Mutex::new(Vec::new());

pub fn load(archive: &'static [u8]) {
    let mut entries = ENTRIES.lock();
    for entry in parse_newc(archive) {
        let is_dir = entry.mode & 0o170000 == 0o040000;
        entries.push(StoredEntry {
            name: String::from(entry.name),
            is_dir,
            data: entry.data,
        });
    }
}

pub fn count() -> usize {
    ENTRIES.lock().len()
}

pub fn root_fd() -> FdHandle {
    Arc::new(InitrdDir { prefix: String::new() })
}

/// A directory inside the archive, identified by its name prefix.
struct InitrdDir {
    prefix: String,
}

fn entry_stat(index: usize, entry: &StoredEntry) -> FileStat {
    FileStat {
        st_dev: INITRDFS_DEVICE,
        st_ino: index as Inode + 1,
        st_filetype: if entry.is_dir {
            FileType::Directory as u8
        } else {
            FileType::RegularFile as u8
        },
        st_nlink: 1,
        st_size: entry.data.len() as u64,
        st_atim: 0,
        st_mtim: 0,
        st_ctim: 0,
    }
}

impl Fd for InitrdDir {
    fn filetype(&self) -> FileType {
        FileType::Directory
    }

    fn name(&self) -> &'static str {
        "initrdfs"
    }

    fn device(&self) -> Device {
        INITRDFS_DEVICE
    }

    fn lookup(&self, file: &[u8], _oflags: OFlags) -> Result<FileStat> {
        let Ok(file) = core::str::from_utf8(file) else {
            return Err(Errno::NoEnt);
        };
        let full = if self.prefix.is_empty() {
            String::from(file)
        } else {
            alloc::format!("{}/{}", self.prefix, file)
        };
        let entries = ENTRIES.lock();
        entries
            .iter()
            .enumerate()
            .find(|(_, e)| e.name == full)
            .map(|(i, e)| entry_stat(i, e))
            .ok_or(Errno::NoEnt)
    }

    fn inode_open(&self, dev: Device, inode: Inode, _fdstat: &FdStat) -> Result<FdHandle> {
        if dev != INITRDFS_DEVICE || inode == 0 {
            return Err(Errno::NoEnt);
        }
        let entries = ENTRIES.lock();
        let entry = entries.get(inode as usize - 1).ok_or(Errno::NoEnt)?;
        if entry.is_dir {
            Ok(Arc::new(InitrdDir {
                prefix: entry.name.clone(),
            }))
        } else {
            Ok(MemoryFd::with_static(
                entry.data,
                "initrdfs_file",
                INITRDFS_DEVICE,
                inode,
            ))
        }
    }

    fn readdir(&self, buf: &mut [u8], cookie: DirCookie) -> Result<usize> {
        let entries = ENTRIES.lock();
        let mut written = 0;
        let mut emitted = 0;
        for (i, entry) in entries.iter().enumerate() {
            // Direct children of this prefix only.
            let child = match entry.name.strip_prefix(self.prefix.as_str()) {
                Some(rest) => {
                    let rest = rest.strip_prefix('/').unwrap_or(rest);
                    if rest.is_empty() || rest.contains('/') {
                        continue;
                    }
                    rest
                }
                None => continue,
            };
            emitted += 1;
            if (emitted as DirCookie) <= cookie {
                continue;
            }
            let stat = entry_stat(i, entry);
            match super::procfs::write_dirent(
                &mut buf[written..],
                emitted as DirCookie,
                &stat,
                child.as_bytes(),
            ) {
                Some(n) => written += n,
                None => break,
            }
        }
        Ok(written)
    }

    fn file_stat_fget(&self) -> Result<FileStat> {
        Ok(FileStat {
            st_dev: INITRDFS_DEVICE,
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

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    fn newc_member(name: &str, mode: u32, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(NEWC_MAGIC);
        let fields = [
            1u32,              // ino
            mode,              // mode
            0,                 // uid
            0,                 // gid
            1,                 // nlink
            0,                 // mtime
            data.len() as u32, // filesize
            0,                 // devmajor
            0,                 // devminor
            0,                 // rdevmajor
            0,                 // rdevminor
            name.len() as u32 + 1,
            0, // check
        ];
        for field in fields {
            out.extend_from_slice(alloc::format!("{:08X}", field).as_bytes());
        }
        out.extend_from_slice(name.as_bytes());
        out.push(0);
        while out.len() % 4 != 0 {
            out.push(0);
        }
        out.extend_from_slice(data);
        while out.len() % 4 != 0 {
            out.push(0);
        }
        out
    }

    fn archive(members: &[(&str, u32, &[u8])]) -> Vec<u8> {
        let mut out = Vec::new();
        for (name, mode, data) in members {
            out.extend_from_slice(&newc_member(name, *mode, data));
        }
        out.extend_from_slice(&newc_member(TRAILER_NAME, 0, &[]));
        out
    }

    #[test]
    fn parses_files_and_modes() {
        let archive = archive(&[
            ("etc", 0o040755, b""),
            ("etc/motd", 0o100644, b"hello\n"),
        ]);
        let entries = parse_newc(&archive);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "etc");
        assert_eq!(entries[1].name, "etc/motd");
        assert_eq!(entries[1].data, b"hello\n");
        assert_eq!(entries[0].mode & 0o170000, 0o040000);
    }

    #[test]
    fn stops_at_the_trailer() {
        let mut bytes = archive(&[("a", 0o100644, b"x")]);
        // Garbage after the trailer must not be parsed.
        bytes.extend_from_slice(b"garbage");
        assert_eq!(parse_newc(&bytes).len(), 1);
    }

    #[test]
    fn truncated_member_is_dropped() {
        let mut bytes = archive(&[("a", 0o100644, b"xyz")]);
        bytes.truncate(bytes.len() / 2);
        // Either zero or one entry depending on where the cut landed, but
        // never a panic or out-of-range slice.
        let _ = parse_newc(&bytes);
    }

    #[test]
    fn bad_magic_parses_nothing() {
        assert!(parse_newc(b"070702AAAAAAAA").is_empty());
    }
}
