//! Process descriptor: the handle `proc_fork` returns, pollable for
//! termination.

use alloc::sync::Arc;

use super::{Fd, FdHandle};
use crate::abi::errno::Result;
use crate::abi::types::{FileStat, FileType};
use crate::task::process::Process;

pub struct ProcessFd {
    process: Arc<Process>,
}

impl ProcessFd {
    pub fn new(process: Arc<Process>) -> FdHandle {
        Arc::new(ProcessFd { process })
    }
}

impl Fd for ProcessFd {
    fn filetype(&self) -> FileType {
        FileType::Process
    }

    fn name(&self) -> &'static str {
        "process_fd"
    }

    fn file_stat_fget(&self) -> Result<FileStat> {
        Ok(FileStat {
            st_filetype: FileType::Process as u8,
            st_nlink: 1,
            ..FileStat::default()
        })
    }

    fn as_process(&self) -> Option<Arc<Process>> {
        Some(Arc::clone(&self.process))
    }
}
