//! UNIX-domain sockets (stream and datagram).
//!
//! Sockets bind to a `(device, inode)` in a process-global listen store,
//! connect by looking the peer up there, and exchange messages that carry
//! bytes plus optionally passed descriptors. Stream receives drain across
//! message boundaries; datagram receives consume one message at a time.

use alloc::collections::VecDeque;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use spin::Mutex;

use super::{Fd, FdHandle, FdSlot, RecvResult};
use crate::abi::errno::Result;
use crate::abi::types::{
    self, Device, FileStat, FileType, Inode, SdFlags, SockAddr, SockStat,
};
use crate::abi::Errno;
use crate::sync::{ConditionData, Cv, ReadyResult, Signaler};

/// Ceiling on the bytes queued towards one socket. Sends beyond it fail with
/// `ENOBUFS` instead of blocking.
pub const MAX_SIZE_BUFFERS: usize = 256 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SockStatus {
    Idle,
    Bound,
    Listening,
    Connecting,
    Connected,
    Shutdown,
}

struct Message {
    buf: Vec<u8>,
    /// Bytes of `buf` already consumed by stream receives.
    consumed: usize,
    fds: VecDeque<FdSlot>,
}

struct Inner {
    status: SockStatus,
    error: u16,
    listen_device: Device,
    listen_inode: Inode,
    backlog: usize,
    listenqueue: VecDeque<Arc<UnixSock>>,
    recv_messages: VecDeque<Message>,
    num_recv_bytes: usize,
    othersock: Weak<UnixSock>,
    /// Reverse-FD multiplexer to poke when bytes arrive on this socket.
    incoming_hook: Option<Weak<super::reverse_fd::ReverseFd>>,
}

pub struct UnixSock {
    sockettype: FileType,
    name: &'static str,
    self_weak: Weak<UnixSock>,
    inner: Mutex<Inner>,
    recv_cv: Cv,
    listen_cv: Cv,
}

// --- the process-global listen store ------------------------------------

static LISTEN_STORE: Mutex<Vec<(Device, Inode, Weak<UnixSock>)>> = Mutex::new(Vec::new());

fn store_register(dev: Device, inode: Inode, sock: &Arc<UnixSock>) {
    LISTEN_STORE.lock().push((dev, inode, Arc::downgrade(sock)));
}

fn store_unregister(dev: Device, inode: Inode) {
    LISTEN_STORE
        .lock()
        .retain(|(d, i, _)| !(*d == dev && *i == inode));
}

fn store_get(dev: Device, inode: Inode) -> Option<Arc<UnixSock>> {
    let mut store = LISTEN_STORE.lock();
    store.retain(|(_, _, w)| w.strong_count() > 0);
    store
        .iter()
        .find(|(d, i, _)| *d == dev && *i == inode)
        .and_then(|(_, _, w)| w.upgrade())
}

impl UnixSock {
    pub fn new(sockettype: FileType, name: &'static str) -> Arc<UnixSock> {
        assert!(sockettype.is_socket());
        let sock = Arc::new_cyclic(|weak| UnixSock {
            sockettype,
            name,
            self_weak: weak.clone(),
            inner: Mutex::new(Inner {
                status: SockStatus::Idle,
                error: 0,
                listen_device: 0,
                listen_inode: 0,
                backlog: 0,
                listenqueue: VecDeque::new(),
                recv_messages: VecDeque::new(),
                num_recv_bytes: 0,
                othersock: Weak::new(),
                incoming_hook: None,
            }),
            recv_cv: Cv::new(),
            listen_cv: Cv::new(),
        });

        let weak = Arc::downgrade(&sock);
        sock.recv_cv.signaler().set_ready_check(Arc::new(move || {
            match weak.upgrade() {
                Some(sock) => {
                    let inner = sock.inner.lock();
                    let hangup = match inner.othersock.upgrade() {
                        Some(other) => other.inner.lock().status == SockStatus::Shutdown,
                        None => inner.status == SockStatus::Connected
                            || inner.status == SockStatus::Shutdown,
                    };
                    if inner.num_recv_bytes > 0 || hangup {
                        ReadyResult::Ready(Some(ConditionData::FdReadWrite {
                            nbytes: inner.num_recv_bytes as u64,
                            flags: if hangup {
                                types::EVENT_FD_READWRITE_HANGUP
                            } else {
                                0
                            },
                        }))
                    } else if !inner.listenqueue.is_empty() {
                        // A listening socket is "readable" when a connection
                        // can be accepted.
                        ReadyResult::Ready(None)
                    } else {
                        ReadyResult::Pending
                    }
                }
                None => ReadyResult::Ready(None),
            }
        }));
        sock
    }

    /// Two already-connected sockets (`fd_create2`).
    pub fn pair(sockettype: FileType) -> (Arc<UnixSock>, Arc<UnixSock>) {
        let a = UnixSock::new(sockettype, "socketpair");
        let b = UnixSock::new(sockettype, "socketpair");
        a.inner.lock().status = SockStatus::Connected;
        b.inner.lock().status = SockStatus::Connected;
        a.inner.lock().othersock = Arc::downgrade(&b);
        b.inner.lock().othersock = Arc::downgrade(&a);
        (a, b)
    }

    pub fn set_incoming_hook(&self, hook: Weak<super::reverse_fd::ReverseFd>) {
        self.inner.lock().incoming_hook = Some(hook);
    }

    pub fn status(&self) -> SockStatus {
        self.inner.lock().status
    }

    pub fn peer(&self) -> Option<Arc<UnixSock>> {
        self.inner.lock().othersock.upgrade()
    }

    /// Total unconsumed payload bytes queued on this socket.
    pub fn bytes_readable(&self) -> usize {
        self.inner.lock().num_recv_bytes
    }

    /// Non-blocking read of already-queued stream bytes; used by the
    /// reverse-FD parser, which never reads more than `bytes_readable()`.
    pub fn read_queued(&self, dest: &mut [u8]) -> usize {
        let mut inner = self.inner.lock();
        let mut written = 0;
        while written < dest.len() {
            let Some(message) = inner.recv_messages.front_mut() else {
                break;
            };
            let available = message.buf.len() - message.consumed;
            let copy = available.min(dest.len() - written);
            dest[written..written + copy]
                .copy_from_slice(&message.buf[message.consumed..message.consumed + copy]);
            message.consumed += copy;
            written += copy;
            if message.consumed == message.buf.len() {
                // Descriptors are never passed over a reverse channel; any
                // that do arrive are dropped with their message.
                inner.recv_messages.pop_front();
            }
        }
        inner.num_recv_bytes -= written;
        written
    }

    pub fn queue_connect(self: &Arc<Self>, connecting: &Arc<UnixSock>) -> Result<()> {
        assert_eq!(self.sockettype, connecting.sockettype);
        let mut inner = self.inner.lock();
        if inner.status != SockStatus::Listening || inner.listenqueue.len() >= inner.backlog {
            return Err(Errno::ConnRefused);
        }

        // connect() completes immediately: an accepting sibling is created
        // now and handed out by a later accept().
        let accepting = UnixSock::new(self.sockettype, "accepted unixsock");
        accepting.inner.lock().status = SockStatus::Connected;
        accepting.inner.lock().othersock = Arc::downgrade(connecting);
        {
            let mut conn = connecting.inner.lock();
            conn.status = SockStatus::Connected;
            conn.othersock = Arc::downgrade(&accepting);
        }
        inner.listenqueue.push_back(accepting);
        drop(inner);
        self.listen_cv.notify();
        // An accept may be polling for readability.
        self.recv_cv.notify();
        Ok(())
    }

    fn notify_bytes_received(self: &Arc<Self>) {
        self.recv_cv.broadcast();
        let hook = self.inner.lock().incoming_hook.clone();
        if let Some(hook) = hook.and_then(|h| h.upgrade()) {
            hook.have_bytes_received();
        }
    }

    fn shutdown_internal(&self, how: SdFlags) -> Result<()> {
        let other = {
            let mut inner = self.inner.lock();
            if inner.status != SockStatus::Connected {
                return Err(Errno::NotConn);
            }
            if how & types::SHUT_WR != 0 {
                inner.status = SockStatus::Shutdown;
            }
            inner.othersock.upgrade()
        };
        if let Some(other) = other {
            if how & types::SHUT_RD != 0 {
                let _ = other.shutdown_internal(types::SHUT_WR);
            }
            // The peer observes EOF; wake its readers.
            other.recv_cv.broadcast();
        }
        Ok(())
    }
}

impl Drop for UnixSock {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if inner.status == SockStatus::Listening {
            store_unregister(inner.listen_device, inner.listen_inode);
        }
        if inner.status == SockStatus::Connected || inner.status == SockStatus::Shutdown {
            if let Some(other) = inner.othersock.upgrade() {
                let mut o = other.inner.lock();
                o.error = Errno::ConnReset.code();
                o.status = SockStatus::Shutdown;
                drop(o);
                other.notify_bytes_received();
            }
        }
    }
}

impl Fd for UnixSock {
    fn filetype(&self) -> FileType {
        self.sockettype
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn read(&self, dest: &mut [u8]) -> Result<usize> {
        let mut iov = [dest];
        let res = self.sock_recv(&mut iov, 0)?;
        Ok(res.datalen)
    }

    fn write(&self, src: &[u8]) -> Result<usize> {
        self.sock_send(&[src], Vec::new())
    }

    fn read_signaler(&self) -> Result<Arc<Signaler>> {
        Ok(self.recv_cv.signaler())
    }

    fn sock_bind(&self, dir: &FdHandle, path: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.status != SockStatus::Idle {
            return Err(Errno::Inval);
        }
        let inode = match crate::vfs::file_create(dir, path, self.sockettype) {
            Ok(inode) => inode,
            Err(Errno::Exist) => return Err(Errno::AddrInUse),
            Err(e) => return Err(e),
        };
        if dir.device() == 0 {
            return Err(Errno::AddrNotAvail);
        }
        inner.listen_device = dir.device();
        inner.listen_inode = inode;
        inner.status = SockStatus::Bound;
        Ok(())
    }

    fn sock_connect(&self, dir: &FdHandle, path: &[u8]) -> Result<()> {
        {
            let inner = self.inner.lock();
            match inner.status {
                SockStatus::Connecting | SockStatus::Connected | SockStatus::Shutdown => {
                    return Err(Errno::IsConn)
                }
                SockStatus::Bound | SockStatus::Listening => return Err(Errno::Inval),
                SockStatus::Idle => {}
            }
        }

        let stat = crate::vfs::file_stat_get(dir, path, types::LOOKUP_SYMLINK_FOLLOW)?;
        if FileType::from_raw(stat.st_filetype) != self.sockettype {
            return Err(Errno::Prototype);
        }

        let this = self.self_weak.upgrade().expect("socket without an Arc");
        let listensock = store_get(stat.st_dev, stat.st_ino).ok_or(Errno::ConnRefused)?;
        self.inner.lock().status = SockStatus::Connecting;
        let res = listensock.queue_connect(&this);
        if res.is_err() {
            self.inner.lock().status = SockStatus::Idle;
        }
        res
    }

    fn sock_listen(&self, backlog: u32) -> Result<()> {
        {
            let inner = self.inner.lock();
            match inner.status {
                SockStatus::Idle => return Err(Errno::DestAddrReq),
                SockStatus::Connecting | SockStatus::Connected | SockStatus::Shutdown => {
                    return Err(Errno::Inval)
                }
                SockStatus::Bound | SockStatus::Listening => {}
            }
        }
        let this = self.self_weak.upgrade();

        let mut inner = self.inner.lock();
        let backlog = if backlog == 0 {
            usize::MAX
        } else {
            backlog as usize
        };
        if inner.status == SockStatus::Bound {
            if let Some(this) = this {
                store_register(inner.listen_device, inner.listen_inode, &this);
            }
            inner.status = SockStatus::Listening;
            inner.backlog = backlog;
        } else {
            inner.backlog = backlog;
            while inner.listenqueue.len() > backlog {
                inner.listenqueue.pop_back();
            }
        }
        Ok(())
    }

    fn sock_accept(&self) -> Result<FdHandle> {
        if self.inner.lock().status != SockStatus::Listening {
            return Err(Errno::Inval);
        }
        loop {
            {
                let mut inner = self.inner.lock();
                if let Some(accepting) = inner.listenqueue.pop_front() {
                    assert_eq!(accepting.sockettype, self.sockettype);
                    return Ok(accepting);
                }
            }
            self.listen_cv.wait();
        }
    }

    fn sock_shutdown(&self, how: SdFlags) -> Result<()> {
        self.shutdown_internal(how)
    }

    fn sock_recv(&self, data: &mut [&mut [u8]], max_fds: usize) -> Result<RecvResult> {
        {
            let inner = self.inner.lock();
            if inner.status != SockStatus::Connected && inner.status != SockStatus::Shutdown {
                return Err(Errno::NotConn);
            }
        }

        // Wait for a message, EOF, or peer disappearance.
        loop {
            let inner = self.inner.lock();
            if !inner.recv_messages.is_empty() {
                break;
            }
            let other = inner.othersock.upgrade();
            match other {
                None => {
                    return Ok(RecvResult {
                        datalen: 0,
                        fds: Vec::new(),
                    })
                }
                Some(other) => {
                    if other.inner.lock().status != SockStatus::Connected {
                        // Peer shut down and there is nothing queued: EOF.
                        return Ok(RecvResult {
                            datalen: 0,
                            fds: Vec::new(),
                        });
                    }
                }
            }
            drop(inner);
            self.recv_cv.wait();
        }

        let mut inner = self.inner.lock();
        let mut fds: Vec<FdSlot> = Vec::new();

        if self.sockettype == FileType::SocketDgram {
            // One whole message; excess payload is dropped.
            let mut message = inner.recv_messages.pop_front().unwrap();
            let mut datalen = 0;
            for iovec in data.iter_mut() {
                let remaining = message.buf.len() - datalen;
                if remaining == 0 {
                    break;
                }
                let copy = iovec.len().min(remaining);
                iovec[..copy].copy_from_slice(&message.buf[datalen..datalen + copy]);
                datalen += copy;
            }
            while fds.len() < max_fds {
                match message.fds.pop_front() {
                    Some(slot) => fds.push(slot),
                    None => break,
                }
            }
            inner.num_recv_bytes -= message.buf.len();
            Ok(RecvResult { datalen, fds })
        } else {
            // Stream: drain across messages until the buffers are full.
            let mut total = 0;
            for iovec in data.iter_mut() {
                let mut written = 0;
                while written < iovec.len() {
                    let Some(message) = inner.recv_messages.front_mut() else {
                        break;
                    };
                    let available = message.buf.len() - message.consumed;
                    if available > 0 {
                        let copy = available.min(iovec.len() - written);
                        iovec[written..written + copy].copy_from_slice(
                            &message.buf[message.consumed..message.consumed + copy],
                        );
                        message.consumed += copy;
                        written += copy;
                    }
                    if message.buf.len() == message.consumed {
                        // Collect the message's descriptors before moving on.
                        let done_fds: VecDeque<FdSlot> = core::mem::take(&mut message.fds);
                        for slot in done_fds {
                            if fds.len() < max_fds {
                                fds.push(slot);
                            }
                        }
                        inner.recv_messages.pop_front();
                    } else if available == 0 {
                        break;
                    }
                }
                total += written;
            }
            // Descriptors of partly-read head messages are deliverable too.
            if let Some(message) = inner.recv_messages.front_mut() {
                while fds.len() < max_fds {
                    match message.fds.pop_front() {
                        Some(slot) => fds.push(slot),
                        None => break,
                    }
                }
            }
            inner.num_recv_bytes -= total;
            Ok(RecvResult {
                datalen: total,
                fds,
            })
        }
    }

    fn sock_send(&self, data: &[&[u8]], fds: Vec<FdSlot>) -> Result<usize> {
        let other = {
            let inner = self.inner.lock();
            match inner.status {
                SockStatus::Shutdown => return Err(Errno::Pipe),
                SockStatus::Connected => {}
                _ => return Err(Errno::NotConn),
            }
            inner.othersock.upgrade().ok_or(Errno::ConnReset)?
        };

        let total: usize = data.iter().map(|d| d.len()).sum();
        {
            let mut other_inner = other.inner.lock();
            if total + other_inner.num_recv_bytes > MAX_SIZE_BUFFERS {
                return Err(Errno::NoBufs);
            }
            let mut buf = Vec::with_capacity(total);
            for d in data {
                buf.extend_from_slice(d);
            }
            other_inner.recv_messages.push_back(Message {
                buf,
                consumed: 0,
                fds: fds.into(),
            });
            other_inner.num_recv_bytes += total;
        }
        other.notify_bytes_received();
        Ok(total)
    }

    fn sock_stat_get(&self, flags: u8) -> Result<SockStat> {
        let mut inner = self.inner.lock();
        let mut stat = SockStat {
            ss_sockname: SockAddr::unix(),
            ..SockStat::default()
        };
        if inner.status == SockStatus::Connecting || inner.status == SockStatus::Connected {
            stat.ss_peername = SockAddr::unix();
        }
        stat.ss_error = inner.error;
        stat.ss_state = if inner.status == SockStatus::Listening {
            types::SOCKSTATE_ACCEPTCONN
        } else {
            0
        };
        if flags & types::SOCKSTAT_CLEAR_ERROR != 0 {
            inner.error = 0;
        }
        Ok(stat)
    }

    fn file_stat_fget(&self) -> Result<FileStat> {
        Ok(FileStat {
            st_filetype: self.sockettype as u8,
            st_nlink: 1,
            ..FileStat::default()
        })
    }
}

