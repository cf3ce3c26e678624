//! Link-layer frame socket.
//!
//! A queue of raw ethernet frames for one network interface. The interface
//! side (out of scope here) holds a weak reference and feeds received frames
//! in; userspace network daemons read whole frames and write frames out
//! through the interface's transmit hook.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use super::{Fd, FdHandle};
use crate::abi::errno::Result;
use crate::abi::types::{FileStat, FileType};
use crate::abi::Errno;
use crate::sync::{ConditionData, Cv, ReadyResult, Signaler};

/// Frames queued beyond this are dropped, oldest first.
const MAX_QUEUED_FRAMES: usize = 64;

pub type TransmitHook = Arc<dyn Fn(&[u8]) -> Result<()> + Send + Sync>;

pub struct RawSock {
    frames: Mutex<VecDeque<Vec<u8>>>,
    readable: Cv,
    transmit: Mutex<TransmitHook>,
}

impl RawSock {
    pub fn new(transmit: TransmitHook) -> Arc<RawSock> {
        let sock = Arc::new(RawSock {
            frames: Mutex::new(VecDeque::new()),
            readable: Cv::new(),
            transmit: Mutex::new(transmit),
        });
        let weak = Arc::downgrade(&sock);
        sock.readable.signaler().set_ready_check(Arc::new(move || {
            match weak.upgrade() {
                Some(sock) => match sock.frames.lock().front() {
                    Some(frame) => ReadyResult::Ready(Some(ConditionData::FdReadWrite {
                        nbytes: frame.len() as u64,
                        flags: 0,
                    })),
                    None => ReadyResult::Pending,
                },
                None => ReadyResult::Ready(None),
            }
        }));
        sock
    }

    /// A rawsock whose transmit side feeds straight back into its own
    /// receive queue: the loopback interface.
    pub fn loopback() -> Arc<RawSock> {
        let sock = RawSock::new(Arc::new(|_frame: &[u8]| Ok(())));
        let weak = Arc::downgrade(&sock);
        *sock.transmit.lock() = Arc::new(move |frame: &[u8]| {
            if let Some(sock) = weak.upgrade() {
                sock.frame_received(frame);
            }
            Ok(())
        });
        sock
    }

    pub fn handle(self: &Arc<Self>) -> FdHandle {
        Arc::clone(self) as FdHandle
    }

    /// Called by the owning interface when a frame arrives.
    pub fn frame_received(&self, frame: &[u8]) {
        let mut frames = self.frames.lock();
        while frames.len() >= MAX_QUEUED_FRAMES {
            frames.pop_front();
        }
        frames.push_back(frame.to_vec());
        drop(frames);
        self.readable.broadcast();
    }
}

impl Fd for RawSock {
    fn filetype(&self) -> FileType {
        FileType::SocketDgram
    }

    fn name(&self) -> &'static str {
        "rawsock"
    }

    /// Blocks for the next frame; a frame longer than `dest` is truncated.
    fn read(&self, dest: &mut [u8]) -> Result<usize> {
        loop {
            {
                let mut frames = self.frames.lock();
                if let Some(frame) = frames.pop_front() {
                    let count = dest.len().min(frame.len());
                    dest[..count].copy_from_slice(&frame[..count]);
                    return Ok(count);
                }
            }
            self.readable.wait();
        }
    }

    fn write(&self, src: &[u8]) -> Result<usize> {
        if src.is_empty() {
            return Err(Errno::Inval);
        }
        let transmit = self.transmit.lock().clone();
        transmit(src)?;
        Ok(src.len())
    }

    fn read_signaler(&self) -> Result<Arc<Signaler>> {
        Ok(self.readable.signaler())
    }

    fn file_stat_fget(&self) -> Result<FileStat> {
        Ok(FileStat {
            st_filetype: FileType::SocketDgram as u8,
            st_nlink: 1,
            ..FileStat::default()
        })
    }
}
