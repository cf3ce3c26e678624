//! Process lifecycle syscalls.

use alloc::sync::Arc;
use alloc::vec::Vec;

use super::types::{user_slice, user_slice_mut, SyscallContext};
use crate::abi::errno::Result;
use crate::abi::types::{self, MAIN_THREAD};
use crate::abi::{Errno, Rights};
use crate::fd::process_fd::ProcessFd;
use crate::fd::FdSlot;

pub fn proc_exec(c: &mut SyscallContext) -> Result<()> {
    let process = Arc::clone(c.process());
    let exec_slot = process.get_fd(c.arg(0), Rights::PROC_EXEC)?;
    let argdata = user_slice(c.arg(1), c.arg(2) as usize)?;
    let fds_ptr = c.arg(3);
    let fdslen = c.arg(4) as usize;

    // The descriptor numbers that survive the exec, becoming fds 0..n in
    // order. A descriptor may not be mapped twice.
    let fd_numbers = user_slice(fds_ptr, fdslen.saturating_mul(4))?;
    let mut new_fds: Vec<FdSlot> = Vec::with_capacity(fdslen);
    for i in 0..fdslen {
        let num = u32::from_le_bytes(fd_numbers[i * 4..i * 4 + 4].try_into().unwrap());
        let slot = process.get_fd(num, Rights::NONE)?;
        if new_fds.iter().any(|s| Arc::ptr_eq(&s.fd, &slot.fd)) {
            return Err(Errno::BadF);
        }
        new_fds.push(slot);
    }

    // On success the calling thread is gone; the syscall return path only
    // runs again for a failed exec.
    process.exec(exec_slot.fd, new_fds, argdata)
}

pub fn proc_exit(c: &mut SyscallContext) -> Result<()> {
    let exitcode = c.arg(0);
    c.process().exit(exitcode, 0);
    // The process is dead; the dispatcher sees an unrunnable thread and
    // never returns to userspace.
    Ok(())
}

pub fn proc_fork(c: &mut SyscallContext) -> Result<()> {
    let process = Arc::clone(c.process());
    let child = process.fork(&c.thread)?;
    let child_fd = process.add_fd(
        ProcessFd::new(child),
        Rights::POLL_PROC_TERMINATE,
        Rights::NONE,
    );
    // Parent: child's descriptor plus the child's main thread id. The child
    // itself returns PROCESS_CHILD from its patched saved state.
    c.result = child_fd as u64 | ((MAIN_THREAD as u64) << 32);
    Ok(())
}

pub fn proc_raise(c: &mut SyscallContext) -> Result<()> {
    let sig = c.arg(0) as types::Signal;
    if sig == 0 || sig > types::SIGXFSZ {
        return Err(Errno::Inval);
    }
    c.process().deliver_signal(sig);
    Ok(())
}

pub fn random_get(c: &mut SyscallContext) -> Result<()> {
    let buf = user_slice_mut(c.arg(0), c.arg(1) as usize)?;
    crate::random::fill(buf);
    Ok(())
}
