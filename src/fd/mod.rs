//! The polymorphic file descriptor.
//!
//! Descriptors are shared, reference-counted objects behind the `Fd` trait;
//! a process's descriptor table holds `FdSlot`s pairing a handle with its
//! rights masks. Operations a variant does not support fall through to the
//! defaults here, which return the conventional errno.

pub mod memory_fd;
pub mod pipe_fd;
pub mod process_fd;
pub mod pseudo_fd;
pub mod rawsock;
pub mod reverse_fd;
pub mod reverse_proto;
pub mod shm_fd;
pub mod unixsock;
pub mod vga_fd;

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::abi::errno::Result;
use crate::abi::types::{
    Device, DirCookie, FdFlags, FdStat, FileStat, FileType, Filesize, Inode, OFlags, SdFlags,
    SockStat, UlFlags,
};
use crate::abi::{Errno, Rights};
use crate::sync::Signaler;

pub type FdHandle = Arc<dyn Fd>;

/// One entry of a process descriptor table: handle plus rights.
#[derive(Clone)]
pub struct FdSlot {
    pub fd: FdHandle,
    pub rights_base: Rights,
    pub rights_inheriting: Rights,
}

/// What `sock_recv` hands back: payload length actually written and the
/// descriptors that were passed along.
pub struct RecvResult {
    pub datalen: usize,
    pub fds: Vec<FdSlot>,
}

pub trait Fd: Send + Sync {
    fn filetype(&self) -> FileType;

    /// Debug name, shown in logs and procfs.
    fn name(&self) -> &'static str;

    /// Device id of the backing filesystem, 0 when meaningless.
    fn device(&self) -> Device {
        0
    }

    fn fdstat_flags(&self) -> FdFlags {
        0
    }

    // --- byte streams -----------------------------------------------------

    fn read(&self, _dest: &mut [u8]) -> Result<usize> {
        Err(Errno::Inval)
    }

    fn write(&self, _src: &[u8]) -> Result<usize> {
        Err(Errno::Inval)
    }

    fn pread(&self, _dest: &mut [u8], _offset: Filesize) -> Result<usize> {
        Err(Errno::Inval)
    }

    fn pwrite(&self, _src: &[u8], _offset: Filesize) -> Result<usize> {
        Err(Errno::Inval)
    }

    fn seek(&self, _offset: i64, _whence: u8) -> Result<Filesize> {
        Err(Errno::SPipe)
    }

    fn datasync(&self) -> Result<()> {
        Err(Errno::Inval)
    }

    fn sync(&self) -> Result<()> {
        Err(Errno::Inval)
    }

    // --- poll support -----------------------------------------------------

    fn read_signaler(&self) -> Result<Arc<Signaler>> {
        Err(Errno::Inval)
    }

    fn write_signaler(&self) -> Result<Arc<Signaler>> {
        Err(Errno::Inval)
    }

    // --- directories ------------------------------------------------------

    /// Resolve one name in this directory to its stat entry.
    fn lookup(&self, _file: &[u8], _oflags: OFlags) -> Result<FileStat> {
        Err(Errno::Inval)
    }

    /// Open the object behind a `(dev, inode)` pair this directory resolved.
    fn inode_open(&self, _dev: Device, _inode: Inode, _fdstat: &FdStat) -> Result<FdHandle> {
        Err(Errno::Inval)
    }

    fn file_create(&self, _file: &[u8], _filetype: FileType) -> Result<Inode> {
        Err(Errno::Inval)
    }

    fn file_readlink(&self, _file: &[u8], _buf: &mut [u8]) -> Result<usize> {
        Err(Errno::Inval)
    }

    fn file_rename(&self, _path1: &[u8], _fd2: &FdHandle, _path2: &[u8]) -> Result<()> {
        Err(Errno::Inval)
    }

    fn file_link(&self, _path1: &[u8], _fd2: &FdHandle, _path2: &[u8]) -> Result<()> {
        Err(Errno::Inval)
    }

    fn file_symlink(&self, _target: &[u8], _path: &[u8]) -> Result<()> {
        Err(Errno::Inval)
    }

    fn file_unlink(&self, _path: &[u8], _flags: UlFlags) -> Result<()> {
        Err(Errno::Inval)
    }

    fn file_allocate(&self, _offset: Filesize, _len: Filesize) -> Result<()> {
        Err(Errno::Inval)
    }

    fn readdir(&self, _buf: &mut [u8], _cookie: DirCookie) -> Result<usize> {
        Err(Errno::Inval)
    }

    fn file_stat_fget(&self) -> Result<FileStat> {
        Err(Errno::Inval)
    }

    fn file_stat_fput(&self, _stat: &FileStat, _fsflags: u16) -> Result<()> {
        Err(Errno::Inval)
    }

    fn file_stat_put(&self, _path: &[u8], _stat: &FileStat, _fsflags: u16) -> Result<()> {
        Err(Errno::Inval)
    }

    // --- sockets ----------------------------------------------------------

    /// Bind to a name created in the resolved directory.
    fn sock_bind(&self, _dir: &FdHandle, _path: &[u8]) -> Result<()> {
        Err(Errno::NotSock)
    }

    /// Connect to the socket listening on the resolved name.
    fn sock_connect(&self, _dir: &FdHandle, _path: &[u8]) -> Result<()> {
        Err(Errno::NotSock)
    }

    fn sock_listen(&self, _backlog: u32) -> Result<()> {
        Err(Errno::NotSock)
    }

    fn sock_accept(&self) -> Result<FdHandle> {
        Err(Errno::NotSock)
    }

    fn sock_shutdown(&self, _how: SdFlags) -> Result<()> {
        Err(Errno::NotSock)
    }

    fn sock_recv(&self, _data: &mut [&mut [u8]], _max_fds: usize) -> Result<RecvResult> {
        Err(Errno::NotSock)
    }

    fn sock_send(&self, _data: &[&[u8]], _fds: Vec<FdSlot>) -> Result<usize> {
        Err(Errno::NotSock)
    }

    fn sock_stat_get(&self, _flags: u8) -> Result<SockStat> {
        Err(Errno::NotSock)
    }

    // --- variant hooks ----------------------------------------------------

    /// The process behind a process descriptor.
    fn as_process(&self) -> Option<Arc<crate::task::process::Process>> {
        None
    }

    /// For pseudo descriptors: the pseudofd id and its reverse channel, used
    /// to check that rename/link stay on one server.
    fn pseudo_channel(&self) -> Option<(u64, Arc<reverse_fd::ReverseFd>)> {
        None
    }
}
