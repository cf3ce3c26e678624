//! FIFO pipe descriptor.
//!
//! A bounded byte buffer with a readable and a writable signaler. The same
//! descriptor is normally installed twice, once per direction; nothing here
//! enforces that split. Writes larger than the whole capacity fail with
//! `EINVAL` rather than being split into partial writes.

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use spin::Mutex;

use super::{Fd, FdHandle};
use crate::abi::errno::Result;
use crate::abi::types::{FileStat, FileType};
use crate::abi::Errno;
use crate::sync::{ConditionData, Cv, ReadyResult, Signaler};

pub const PIPE_CAPACITY: usize = 4096;

struct PipeBuffer {
    data: Vec<u8>,
    used: usize,
}

pub struct PipeFd {
    buffer: Mutex<PipeBuffer>,
    readable: Cv,
    writable: Cv,
}

impl PipeFd {
    pub fn new() -> Arc<PipeFd> {
        let pipe = Arc::new(PipeFd {
            buffer: Mutex::new(PipeBuffer {
                data: vec![0; PIPE_CAPACITY],
                used: 0,
            }),
            readable: Cv::new(),
            writable: Cv::new(),
        });

        // Poll must not block when data (or space) is already there.
        let weak = Arc::downgrade(&pipe);
        pipe.readable.signaler().set_ready_check(Arc::new(move || {
            match weak.upgrade() {
                Some(pipe) => {
                    let used = pipe.buffer.lock().used;
                    if used > 0 {
                        ReadyResult::Ready(Some(ConditionData::FdReadWrite {
                            nbytes: used as u64,
                            flags: 0,
                        }))
                    } else {
                        ReadyResult::Pending
                    }
                }
                None => ReadyResult::Ready(None),
            }
        }));
        let weak = Arc::downgrade(&pipe);
        pipe.writable.signaler().set_ready_check(Arc::new(move || {
            match weak.upgrade() {
                Some(pipe) => {
                    let used = pipe.buffer.lock().used;
                    if used < PIPE_CAPACITY {
                        ReadyResult::Ready(Some(ConditionData::FdReadWrite {
                            nbytes: (PIPE_CAPACITY - used) as u64,
                            flags: 0,
                        }))
                    } else {
                        ReadyResult::Pending
                    }
                }
                None => ReadyResult::Ready(None),
            }
        }));
        pipe
    }

    pub fn pair() -> (FdHandle, FdHandle) {
        let pipe = PipeFd::new();
        (Arc::clone(&pipe) as FdHandle, pipe as FdHandle)
    }
}

impl Fd for PipeFd {
    fn filetype(&self) -> FileType {
        FileType::Fifo
    }

    fn name(&self) -> &'static str {
        "pipe_fd"
    }

    /// Blocks until at least one byte is available, then returns up to
    /// `dest.len()` bytes from the head of the buffer.
    fn read(&self, dest: &mut [u8]) -> Result<usize> {
        loop {
            {
                let mut buffer = self.buffer.lock();
                if buffer.used > 0 {
                    let count = dest.len().min(buffer.used);
                    dest[..count].copy_from_slice(&buffer.data[..count]);
                    let remaining = buffer.used - count;
                    buffer.data.copy_within(count..count + remaining, 0);
                    buffer.used = remaining;
                    drop(buffer);
                    self.writable.broadcast();
                    return Ok(count);
                }
            }
            self.readable.wait();
        }
    }

    /// Blocks until the whole write fits, then appends it.
    fn write(&self, src: &[u8]) -> Result<usize> {
        if src.len() > PIPE_CAPACITY {
            // TODO: split oversized writes instead of rejecting them.
            return Err(Errno::Inval);
        }
        loop {
            {
                let mut buffer = self.buffer.lock();
                if buffer.used + src.len() <= PIPE_CAPACITY {
                    let used = buffer.used;
                    buffer.data[used..used + src.len()].copy_from_slice(src);
                    buffer.used += src.len();
                    drop(buffer);
                    self.readable.broadcast();
                    return Ok(src.len());
                }
            }
            self.writable.wait();
        }
    }

    fn read_signaler(&self) -> Result<Arc<Signaler>> {
        Ok(self.readable.signaler())
    }

    fn write_signaler(&self) -> Result<Arc<Signaler>> {
        Ok(self.writable.signaler())
    }

    fn file_stat_fget(&self) -> Result<FileStat> {
        Ok(FileStat {
            st_filetype: FileType::Fifo as u8,
            st_nlink: 1,
            st_size: self.buffer.lock().used as u64,
            ..FileStat::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn oversized_writes_are_rejected() {
        let pipe = PipeFd::new();
        let big = vec![0u8; PIPE_CAPACITY + 1];
        assert_eq!(pipe.write(&big), Err(Errno::Inval));
    }

    #[test]
    fn read_returns_what_is_buffered() {
        let pipe = PipeFd::new();
        assert_eq!(pipe.write(b"abcde").unwrap(), 5);
        let mut buf = [0u8; 3];
        assert_eq!(pipe.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"abc");
        assert_eq!(pipe.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"de");
    }

    #[test]
    fn interleaved_writes_queue_up() {
        let pipe = PipeFd::new();
        pipe.write(b"ab").unwrap();
        pipe.write(b"cd").unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(pipe.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"abcd");
    }
}
