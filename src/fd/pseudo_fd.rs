//! Pseudo descriptors: the kernel side of a userspace-implemented file,
//! directory or socket.
//!
//! Every operation turns into one RPC on the owning reverse channel. The
//! server names objects by pseudofd id and inode; it allocates new pseudofd
//! ids in its open responses.

use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use spin::Mutex;

use super::reverse_fd::ReverseFd;
use super::reverse_proto::{Op, PseudoFdId, Request, Response, MAX_INLINE_PAYLOAD};
use super::{Fd, FdHandle, FdSlot, RecvResult};
use crate::abi::errno::Result;
use crate::abi::types::{
    self, Device, DirCookie, FdFlags, FdStat, FileStat, FileType, Filesize, Inode, OFlags,
    SdFlags, UlFlags,
};
use crate::abi::Errno;
use crate::sync::{ConditionData, ReadyResult, Signaler};

pub struct PseudoFd {
    pseudo_id: PseudoFdId,
    reverse: Arc<ReverseFd>,
    filetype: FileType,
    flags: FdFlags,
    name: &'static str,
    self_weak: Weak<PseudoFd>,
    device: Mutex<Option<Device>>,
    pos: Mutex<Filesize>,
    recv_signaler: Arc<Signaler>,
}

/// Serialize a `FileStat` for the wire (the reverse protocol is 64-bit even
/// though the kernel ABI is 32-bit).
fn encode_filestat(stat: &FileStat) -> [u8; 56] {
    let mut buf = [0u8; 56];
    buf[0..8].copy_from_slice(&stat.st_dev.to_le_bytes());
    buf[8..16].copy_from_slice(&stat.st_ino.to_le_bytes());
    buf[16] = stat.st_filetype;
    buf[20..24].copy_from_slice(&stat.st_nlink.to_le_bytes());
    buf[24..32].copy_from_slice(&stat.st_size.to_le_bytes());
    buf[32..40].copy_from_slice(&stat.st_atim.to_le_bytes());
    buf[40..48].copy_from_slice(&stat.st_mtim.to_le_bytes());
    buf[48..56].copy_from_slice(&stat.st_ctim.to_le_bytes());
    buf
}

fn decode_filestat(buf: &[u8]) -> Result<FileStat> {
    if buf.len() < 56 {
        return Err(Errno::Io);
    }
    Ok(FileStat {
        st_dev: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
        st_ino: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
        st_filetype: buf[16],
        st_nlink: u32::from_le_bytes(buf[20..24].try_into().unwrap()),
        st_size: u64::from_le_bytes(buf[24..32].try_into().unwrap()),
        st_atim: u64::from_le_bytes(buf[32..40].try_into().unwrap()),
        st_mtim: u64::from_le_bytes(buf[40..48].try_into().unwrap()),
        st_ctim: u64::from_le_bytes(buf[48..56].try_into().unwrap()),
    })
}

fn is_valid_path(path: &[u8]) -> bool {
    !path.iter().any(|&b| b < 0x20 || b == 0x7f)
}

impl PseudoFd {
    pub fn new(
        pseudo_id: PseudoFdId,
        reverse: Arc<ReverseFd>,
        filetype: FileType,
        flags: FdFlags,
        name: &'static str,
    ) -> Arc<PseudoFd> {
        let fd = Arc::new_cyclic(|weak| PseudoFd {
            pseudo_id,
            reverse,
            filetype,
            flags,
            name,
            self_weak: weak.clone(),
            device: Mutex::new(None),
            pos: Mutex::new(0),
            recv_signaler: Signaler::new(),
        });

        // Poll asks the server whether the descriptor is readable right now.
        let weak = Arc::downgrade(&fd);
        fd.recv_signaler.set_ready_check(Arc::new(move || {
            let Some(fd) = weak.upgrade() else {
                return ReadyResult::Ready(None);
            };
            match fd.query_readable() {
                Ok((true, nbytes, hangup)) => ReadyResult::Ready(Some(ConditionData::FdReadWrite {
                    nbytes,
                    flags: if hangup {
                        types::EVENT_FD_READWRITE_HANGUP
                    } else {
                        0
                    },
                })),
                Ok((false, _, _)) => ReadyResult::Pending,
                Err(_) => ReadyResult::Ready(None),
            }
        }));
        fd
    }

    pub fn pseudo_id(&self) -> PseudoFdId {
        self.pseudo_id
    }

    pub fn became_readable(&self) {
        self.recv_signaler.broadcast();
    }

    fn send_request(&self, request: &Request, payload: &[u8]) -> Result<(Response, Vec<u8>)> {
        let (response, body) = self.reverse.send_request(request, payload)?;
        if response.result < 0 {
            return Err(Errno::from_code((-response.result) as u16));
        }
        Ok((response, body))
    }

    /// The device id is learned lazily with an fstat; the server is
    /// responsible for keeping device ids unique.
    fn device_id(&self) -> Result<Device> {
        if let Some(dev) = *self.device.lock() {
            return Ok(dev);
        }
        let stat = self.file_stat_fget()?;
        Ok(stat.st_dev)
    }

    fn query_readable(&self) -> Result<(bool, u64, bool)> {
        let mut request = Request::new(self.pseudo_id, Op::IsReadable);
        request.offset = *self.pos.lock();
        let (response, _) = self.send_request(&request, &[])?;
        Ok((
            response.result == 1,
            response.recv_length as u64,
            (response.flags & types::EVENT_FD_READWRITE_HANGUP as u64) != 0,
        ))
    }

    fn pread_at(&self, dest: &mut [u8], offset: Filesize) -> Result<usize> {
        let count = dest.len().min(MAX_INLINE_PAYLOAD);
        let mut request = Request::new(self.pseudo_id, Op::Pread);
        request.offset = offset;
        request.recv_length = count as u8;
        let (response, body) = self.send_request(&request, &[])?;
        let mut got = response.send_length as usize;
        if got > count || got > body.len() {
            crate::kwarn!("[pseudo] server returned more data than requested, dropping");
            got = count.min(body.len());
        }
        dest[..got].copy_from_slice(&body[..got]);
        Ok(got)
    }

    fn pwrite_at(&self, src: &[u8], offset: Filesize, append: bool) -> Result<(usize, Filesize)> {
        let count = src.len().min(MAX_INLINE_PAYLOAD);
        let mut request = Request::new(self.pseudo_id, Op::Pwrite);
        request.offset = offset;
        request.flags = if append { types::FDFLAG_APPEND as u64 } else { 0 };
        request.send_length = count as u8;
        let (response, _) = self.send_request(&request, &src[..count])?;
        Ok((count, response.result as Filesize))
    }

    /// Two nul-separated paths in one payload, for rename/link/symlink.
    fn joined_paths(path1: &[u8], path2: &[u8]) -> Result<Vec<u8>> {
        if path1.contains(&0) {
            return Err(Errno::Inval);
        }
        if path1.len() + path2.len() + 1 > MAX_INLINE_PAYLOAD {
            return Err(Errno::NameTooLong);
        }
        let mut joined = Vec::with_capacity(path1.len() + path2.len() + 1);
        joined.extend_from_slice(path1);
        joined.push(0);
        joined.extend_from_slice(path2);
        Ok(joined)
    }

    /// The peer must live on the same reverse channel for cross-directory
    /// operations; anything else is a different "device".
    fn same_channel(&self, fd2: &FdHandle) -> Result<PseudoFdId> {
        match fd2.pseudo_channel() {
            Some((id, reverse)) if Arc::ptr_eq(&reverse, &self.reverse) => Ok(id),
            _ => Err(Errno::XDev),
        }
    }
}

impl Drop for PseudoFd {
    fn drop(&mut self) {
        let request = Request::new(self.pseudo_id, Op::Close);
        let _ = self.reverse.send_request(&request, &[]);
    }
}

impl Fd for PseudoFd {
    fn filetype(&self) -> FileType {
        self.filetype
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn device(&self) -> Device {
        self.device_id().unwrap_or(0)
    }

    fn fdstat_flags(&self) -> FdFlags {
        self.flags
    }

    fn read(&self, dest: &mut [u8]) -> Result<usize> {
        let offset = *self.pos.lock();
        let got = self.pread_at(dest, offset)?;
        *self.pos.lock() += got as Filesize;
        Ok(got)
    }

    fn write(&self, src: &[u8]) -> Result<usize> {
        let append = self.flags & types::FDFLAG_APPEND != 0;
        let offset = *self.pos.lock();
        let (written, result_pos) = self.pwrite_at(src, offset, append)?;
        let mut pos = self.pos.lock();
        if append {
            *pos = result_pos;
        } else {
            *pos += written as Filesize;
        }
        Ok(written)
    }

    fn pread(&self, dest: &mut [u8], offset: Filesize) -> Result<usize> {
        self.pread_at(dest, offset)
    }

    fn pwrite(&self, src: &[u8], offset: Filesize) -> Result<usize> {
        let (written, _) = self.pwrite_at(src, offset, false)?;
        Ok(written)
    }

    fn seek(&self, offset: i64, whence: u8) -> Result<Filesize> {
        let mut pos = self.pos.lock();
        let base = match whence {
            types::WHENCE_SET => 0,
            types::WHENCE_CUR => *pos as i64,
            types::WHENCE_END => self.file_stat_fget()?.st_size as i64,
            _ => return Err(Errno::Inval),
        };
        let target = base.checked_add(offset).ok_or(Errno::Inval)?;
        if target < 0 {
            return Err(Errno::Inval);
        }
        *pos = target as Filesize;
        Ok(*pos)
    }

    fn datasync(&self) -> Result<()> {
        let request = Request::new(self.pseudo_id, Op::Datasync);
        self.send_request(&request, &[]).map(|_| ())
    }

    fn sync(&self) -> Result<()> {
        let request = Request::new(self.pseudo_id, Op::Sync);
        self.send_request(&request, &[]).map(|_| ())
    }

    fn read_signaler(&self) -> Result<Arc<Signaler>> {
        let this = self.self_weak.upgrade().expect("pseudo fd without an Arc");
        self.reverse.subscribe_fd_read_events(&this);
        Ok(Arc::clone(&self.recv_signaler))
    }

    fn lookup(&self, file: &[u8], oflags: OFlags) -> Result<FileStat> {
        let device = self.device_id()?;
        if !is_valid_path(file) {
            return Err(Errno::Inval);
        }
        if file.len() > MAX_INLINE_PAYLOAD {
            return Err(Errno::NameTooLong);
        }
        let mut request = Request::new(self.pseudo_id, Op::Lookup);
        request.flags = oflags as u64;
        request.send_length = file.len() as u8;
        let (response, body) = self.send_request(&request, file)?;
        let stat = decode_filestat(&body)?;
        if stat.st_dev != device {
            crate::kwarn!("[pseudo] server changed device ids");
            return Err(Errno::Io);
        }
        if stat.st_ino != response.result as u64 {
            crate::kwarn!("[pseudo] server inconsistent about inodes");
            return Err(Errno::Io);
        }
        Ok(stat)
    }

    fn inode_open(&self, dev: Device, inode: Inode, fdstat: &FdStat) -> Result<FdHandle> {
        if dev != self.device_id()? {
            return Err(Errno::Inval);
        }
        let mut request = Request::new(self.pseudo_id, Op::Open);
        request.inode = inode;
        let (response, _) = self.send_request(&request, &[])?;
        let new_id = response.result as PseudoFdId;
        let filetype = FileType::from_raw(response.flags as u8);
        Ok(PseudoFd::new(
            new_id,
            Arc::clone(&self.reverse),
            filetype,
            fdstat.fs_flags,
            "pseudo_fd",
        ))
    }

    fn file_create(&self, file: &[u8], filetype: FileType) -> Result<Inode> {
        self.device_id()?;
        if file.len() > MAX_INLINE_PAYLOAD {
            return Err(Errno::NameTooLong);
        }
        let mut request = Request::new(self.pseudo_id, Op::Create);
        request.flags = filetype as u8 as u64;
        request.send_length = file.len() as u8;
        let (response, _) = self.send_request(&request, file)?;
        Ok(response.result as Inode)
    }

    fn file_readlink(&self, file: &[u8], buf: &mut [u8]) -> Result<usize> {
        if file.len() > MAX_INLINE_PAYLOAD {
            return Err(Errno::NameTooLong);
        }
        let mut request = Request::new(self.pseudo_id, Op::Readlink);
        request.send_length = file.len() as u8;
        request.recv_length = buf.len().min(MAX_INLINE_PAYLOAD) as u8;
        let (response, body) = self.send_request(&request, file)?;
        let mut got = response.send_length as usize;
        if got > buf.len() || got > body.len() {
            crate::kwarn!("[pseudo] server returned more data than requested, dropping");
            got = buf.len().min(body.len());
        }
        buf[..got].copy_from_slice(&body[..got]);
        Ok(got)
    }

    fn file_rename(&self, path1: &[u8], fd2: &FdHandle, path2: &[u8]) -> Result<()> {
        let peer_id = self.same_channel(fd2)?;
        let joined = Self::joined_paths(path1, path2)?;
        let mut request = Request::new(self.pseudo_id, Op::Rename);
        request.flags = peer_id;
        request.send_length = joined.len() as u8;
        self.send_request(&request, &joined).map(|_| ())
    }

    fn file_link(&self, path1: &[u8], fd2: &FdHandle, path2: &[u8]) -> Result<()> {
        let peer_id = self.same_channel(fd2)?;
        let joined = Self::joined_paths(path1, path2)?;
        let mut request = Request::new(self.pseudo_id, Op::Link);
        request.flags = peer_id;
        request.send_length = joined.len() as u8;
        self.send_request(&request, &joined).map(|_| ())
    }

    fn file_symlink(&self, target: &[u8], path: &[u8]) -> Result<()> {
        let joined = Self::joined_paths(target, path)?;
        let mut request = Request::new(self.pseudo_id, Op::Symlink);
        request.send_length = joined.len() as u8;
        self.send_request(&request, &joined).map(|_| ())
    }

    fn file_unlink(&self, path: &[u8], flags: UlFlags) -> Result<()> {
        if path.len() > MAX_INLINE_PAYLOAD {
            return Err(Errno::NameTooLong);
        }
        let mut request = Request::new(self.pseudo_id, Op::Unlink);
        request.flags = flags as u64;
        request.send_length = path.len() as u8;
        self.send_request(&request, path).map(|_| ())
    }

    fn file_allocate(&self, offset: Filesize, len: Filesize) -> Result<()> {
        let mut request = Request::new(self.pseudo_id, Op::Allocate);
        request.offset = offset;
        request.flags = len;
        self.send_request(&request, &[]).map(|_| ())
    }

    /// Re-requests entries until the caller's buffer is full or the server
    /// reports the end of the directory (cookie 0).
    fn readdir(&self, buf: &mut [u8], cookie: DirCookie) -> Result<usize> {
        let mut cookie = cookie;
        let mut written = 0;
        while written < buf.len() {
            let mut request = Request::new(self.pseudo_id, Op::Readdir);
            request.flags = cookie;
            request.recv_length = (buf.len() - written).min(MAX_INLINE_PAYLOAD) as u8;
            let (response, body) = self.send_request(&request, &[])?;
            if body.len() > request.recv_length as usize {
                return Err(Errno::Io);
            }
            cookie = response.result as DirCookie;
            buf[written..written + body.len()].copy_from_slice(&body);
            written += body.len();
            if cookie == 0 || body.is_empty() {
                break;
            }
        }
        Ok(written)
    }

    fn file_stat_fget(&self) -> Result<FileStat> {
        let request = Request::new(self.pseudo_id, Op::StatFget);
        let (_, body) = self.send_request(&request, &[])?;
        let stat = decode_filestat(&body)?;
        let mut device = self.device.lock();
        match *device {
            None => *device = Some(stat.st_dev),
            Some(dev) if dev != stat.st_dev => {
                crate::kwarn!("[pseudo] server changed device ids");
                return Err(Errno::Io);
            }
            Some(_) => {}
        }
        Ok(stat)
    }

    fn file_stat_fput(&self, stat: &FileStat, fsflags: u16) -> Result<()> {
        let encoded = encode_filestat(stat);
        let mut request = Request::new(self.pseudo_id, Op::StatFput);
        request.inode = fsflags as u64;
        request.send_length = encoded.len() as u8;
        self.send_request(&request, &encoded).map(|_| ())
    }

    fn file_stat_put(&self, path: &[u8], stat: &FileStat, fsflags: u16) -> Result<()> {
        let encoded = encode_filestat(stat);
        if encoded.len() + path.len() > MAX_INLINE_PAYLOAD {
            return Err(Errno::NameTooLong);
        }
        let mut payload = Vec::with_capacity(encoded.len() + path.len());
        payload.extend_from_slice(&encoded);
        payload.extend_from_slice(path);
        let mut request = Request::new(self.pseudo_id, Op::StatPut);
        request.inode = fsflags as u64;
        request.send_length = payload.len() as u8;
        self.send_request(&request, &payload).map(|_| ())
    }

    fn sock_shutdown(&self, how: SdFlags) -> Result<()> {
        let mut request = Request::new(self.pseudo_id, Op::SockShutdown);
        request.flags = how as u64;
        self.send_request(&request, &[]).map(|_| ())
    }

    fn sock_recv(&self, data: &mut [&mut [u8]], _max_fds: usize) -> Result<RecvResult> {
        let wanted: usize = data.iter().map(|d| d.len()).sum();
        let mut request = Request::new(self.pseudo_id, Op::SockRecv);
        request.recv_length = wanted.min(MAX_INLINE_PAYLOAD) as u8;
        let (_, body) = self.send_request(&request, &[])?;
        if body.len() > request.recv_length as usize {
            return Err(Errno::Io);
        }
        let mut off = 0;
        for iovec in data.iter_mut() {
            if off == body.len() {
                break;
            }
            let copy = iovec.len().min(body.len() - off);
            iovec[..copy].copy_from_slice(&body[off..off + copy]);
            off += copy;
        }
        Ok(RecvResult {
            datalen: body.len(),
            fds: Vec::new(),
        })
    }

    fn sock_send(&self, data: &[&[u8]], _fds: Vec<FdSlot>) -> Result<usize> {
        let mut payload: Vec<u8> = Vec::new();
        for d in data {
            payload.extend_from_slice(d);
        }
        if payload.len() > MAX_INLINE_PAYLOAD {
            payload.truncate(MAX_INLINE_PAYLOAD);
        }
        let mut request = Request::new(self.pseudo_id, Op::SockSend);
        request.send_length = payload.len() as u8;
        let (response, _) = self.send_request(&request, &payload)?;
        Ok(response.recv_length as usize)
    }

    fn pseudo_channel(&self) -> Option<(PseudoFdId, Arc<ReverseFd>)> {
        Some((self.pseudo_id, Arc::clone(&self.reverse)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filestat_wire_round_trip() {
        let stat = FileStat {
            st_dev: 3,
            st_ino: 99,
            st_filetype: FileType::RegularFile as u8,
            st_nlink: 2,
            st_size: 12345,
            st_atim: 1,
            st_mtim: 2,
            st_ctim: 3,
        };
        let decoded = decode_filestat(&encode_filestat(&stat)).unwrap();
        assert_eq!(decoded.st_dev, 3);
        assert_eq!(decoded.st_ino, 99);
        assert_eq!(decoded.st_size, 12345);
        assert_eq!(decoded.st_filetype, FileType::RegularFile as u8);
    }

    #[test]
    fn short_filestat_is_an_io_error() {
        assert!(decode_filestat(&[0; 10]).is_err());
    }

    #[test]
    fn control_characters_are_invalid_in_paths() {
        assert!(is_valid_path(b"usr/lib"));
        assert!(!is_valid_path(b"usr\nlib"));
        assert!(!is_valid_path(b"usr\x7f"));
    }

    #[test]
    fn joined_paths_are_nul_separated() {
        let joined = PseudoFd::joined_paths(b"a", b"bc").unwrap();
        assert_eq!(joined, b"a\0bc");
        assert!(PseudoFd::joined_paths(b"a\0b", b"c").is_err());
    }
}
