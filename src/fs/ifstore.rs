//! Interface store service socket.
//!
//! A kernel-served datagram socket speaking a tiny text protocol:
//!
//! * `PSEUDOPAIR <TYPE>` builds a reverse channel and replies `OK` with two
//!   descriptors attached: the server end of the channel and the pseudo root
//!   served over it. This is how userspace filesystem and protocol daemons
//!   bootstrap.
//! * `RAWSOCK lo` replies `OK` with a link-layer frame socket on the
//!   loopback interface.
//!
//! Interface enumeration for real NICs lives with the network stack, outside
//! the core; unknown commands get `ERROR`.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use crate::abi::errno::Result;
use crate::abi::types::{FileStat, FileType};
use crate::abi::{Errno, Rights};
use crate::fd::reverse_fd::ReverseFd;
use crate::fd::{Fd, FdHandle, FdSlot, RecvResult};
use crate::sync::{Cv, ReadyResult, Signaler};

struct Reply {
    payload: Vec<u8>,
    fds: Vec<FdSlot>,
}

pub struct IfstoreSock {
    replies: Mutex<VecDeque<Reply>>,
    readable: Cv,
}

pub fn socket_fd() -> Result<FdHandle> {
    let sock = Arc::new(IfstoreSock {
        replies: Mutex::new(VecDeque::new()),
        readable: Cv::new(),
    });
    let weak = Arc::downgrade(&sock);
    sock.readable.signaler().set_ready_check(Arc::new(move || {
        match weak.upgrade() {
            Some(sock) => {
                if sock.replies.lock().is_empty() {
                    ReadyResult::Pending
                } else {
                    ReadyResult::Ready(None)
                }
            }
            None => ReadyResult::Ready(None),
        }
    }));
    Ok(sock)
}

fn pseudopair(kind: &[u8]) -> Result<Reply> {
    let filetype = match kind {
        b"FILE" => FileType::RegularFile,
        b"DIR" => FileType::Directory,
        b"STREAM" => FileType::SocketStream,
        b"DGRAM" => FileType::SocketDgram,
        _ => return Err(Errno::Inval),
    };
    let (server, root) = ReverseFd::create_channel(filetype);
    Ok(Reply {
        payload: b"OK".to_vec(),
        fds: alloc::vec![
            FdSlot {
                fd: server,
                rights_base: Rights::ALL,
                rights_inheriting: Rights::ALL,
            },
            FdSlot {
                fd: root,
                rights_base: Rights::ALL,
                rights_inheriting: Rights::ALL,
            },
        ],
    })
}

fn rawsock(interface: &[u8]) -> Result<Reply> {
    if interface != b"lo" {
        // Only the loopback interface exists without drivers.
        return Err(Errno::NoDev);
    }
    let sock = crate::fd::rawsock::RawSock::loopback();
    Ok(Reply {
        payload: b"OK".to_vec(),
        fds: alloc::vec![FdSlot {
            fd: sock.handle(),
            rights_base: Rights::FD_READ | Rights::FD_WRITE | Rights::POLL_FD_READWRITE,
            rights_inheriting: Rights::NONE,
        }],
    })
}

impl IfstoreSock {
    fn handle_command(&self, command: &[u8]) -> Reply {
        let mut parts = command.splitn(2, |&b| b == b' ');
        let verb = parts.next().unwrap_or(b"");
        let argument = parts.next().unwrap_or(b"");

        let result = match verb {
            b"PSEUDOPAIR" => pseudopair(argument),
            b"RAWSOCK" => rawsock(argument),
            _ => Err(Errno::Inval),
        };
        match result {
            Ok(reply) => reply,
            Err(_) => Reply {
                payload: b"ERROR".to_vec(),
                fds: Vec::new(),
            },
        }
    }
}

impl Fd for IfstoreSock {
    fn filetype(&self) -> FileType {
        FileType::SocketDgram
    }

    fn name(&self) -> &'static str {
        "ifstoresock"
    }

    fn read_signaler(&self) -> Result<Arc<Signaler>> {
        Ok(self.readable.signaler())
    }

    fn sock_send(&self, data: &[&[u8]], _fds: Vec<FdSlot>) -> Result<usize> {
        let mut command: Vec<u8> = Vec::new();
        for d in data {
            command.extend_from_slice(d);
        }
        let reply = self.handle_command(&command);
        self.replies.lock().push_back(reply);
        self.readable.broadcast();
        Ok(command.len())
    }

    fn sock_recv(&self, data: &mut [&mut [u8]], max_fds: usize) -> Result<RecvResult> {
        loop {
            {
                let mut replies = self.replies.lock();
                if let Some(mut reply) = replies.pop_front() {
                    let mut off = 0;
                    for iovec in data.iter_mut() {
                        if off == reply.payload.len() {
                            break;
                        }
                        let copy = iovec.len().min(reply.payload.len() - off);
                        iovec[..copy].copy_from_slice(&reply.payload[off..off + copy]);
                        off += copy;
                    }
                    reply.fds.truncate(max_fds);
                    return Ok(RecvResult {
                        datalen: off,
                        fds: reply.fds,
                    });
                }
            }
            self.readable.wait();
        }
    }

    fn file_stat_fget(&self) -> Result<FileStat> {
        Ok(FileStat {
            st_filetype: FileType::SocketDgram as u8,
            st_nlink: 1,
            ..FileStat::default()
        })
    }
}
