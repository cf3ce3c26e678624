//! The syscall surface.
//!
//! One software-interrupt entry, ~55 numbered calls. Every call resolves its
//! descriptors through the per-process table with an explicit rights check,
//! then invokes the descriptor's operation. Errors travel as `Errno`; the
//! dispatcher encodes them into the carry-flag convention (carry set, errno
//! in eax) and successes into eax:edx.

mod clock;
mod fd;
mod file;
mod memory;
pub mod numbers;
mod poll;
mod process;
mod sock;
mod thread;
mod types;

use alloc::sync::Arc;

use crate::abi::errno::Result;
use crate::abi::types::SIGSYS;
use crate::arch::EFLAGS_CARRY;
use crate::task::thread::Thread;

pub use types::SyscallContext;

use numbers::*;

pub fn handle_syscall(thread: &Arc<Thread>) {
    let (nr, useresp) = thread.with_state(|st| (st.eax, st.useresp));
    let mut ctx = SyscallContext::new(Arc::clone(thread), useresp);

    let outcome = dispatch(nr, &mut ctx);

    thread.with_state(|st| match outcome {
        Ok(()) => {
            st.eflags &= !EFLAGS_CARRY;
            st.eax = (ctx.result & 0xffff_ffff) as u32;
            st.edx = (ctx.result >> 32) as u32;
        }
        Err(errno) => {
            st.eflags |= EFLAGS_CARRY;
            st.eax = errno.code() as u32;
            st.edx = 0;
        }
    });
}

fn dispatch(nr: u32, c: &mut SyscallContext) -> Result<()> {
    match nr {
        SYS_CLOCK_RES_GET => clock::clock_res_get(c),
        SYS_CLOCK_TIME_GET => clock::clock_time_get(c),
        SYS_CONDVAR_SIGNAL => thread::condvar_signal(c),
        SYS_FD_CLOSE => fd::fd_close(c),
        SYS_FD_CREATE1 => fd::fd_create1(c),
        SYS_FD_CREATE2 => fd::fd_create2(c),
        SYS_FD_DATASYNC => fd::fd_datasync(c),
        SYS_FD_DUP => fd::fd_dup(c),
        SYS_FD_PREAD => fd::fd_pread(c),
        SYS_FD_PWRITE => fd::fd_pwrite(c),
        SYS_FD_READ => fd::fd_read(c),
        SYS_FD_REPLACE => fd::fd_replace(c),
        SYS_FD_SEEK => fd::fd_seek(c),
        SYS_FD_STAT_GET => fd::fd_stat_get(c),
        SYS_FD_STAT_PUT => fd::fd_stat_put(c),
        SYS_FD_SYNC => fd::fd_sync(c),
        SYS_FD_WRITE => fd::fd_write(c),
        SYS_FILE_ADVISE => file::file_advise(c),
        SYS_FILE_ALLOCATE => file::file_allocate(c),
        SYS_FILE_CREATE => file::file_create(c),
        SYS_FILE_LINK => file::file_link(c),
        SYS_FILE_OPEN => file::file_open(c),
        SYS_FILE_READDIR => file::file_readdir(c),
        SYS_FILE_READLINK => file::file_readlink(c),
        SYS_FILE_RENAME => file::file_rename(c),
        SYS_FILE_STAT_FGET => file::file_stat_fget(c),
        SYS_FILE_STAT_FPUT => file::file_stat_fput(c),
        SYS_FILE_STAT_GET => file::file_stat_get(c),
        SYS_FILE_STAT_PUT => file::file_stat_put(c),
        SYS_FILE_SYMLINK => file::file_symlink(c),
        SYS_FILE_UNLINK => file::file_unlink(c),
        SYS_LOCK_UNLOCK => thread::lock_unlock(c),
        SYS_MEM_ADVISE => memory::mem_advise(c),
        SYS_MEM_MAP => memory::mem_map(c),
        SYS_MEM_PROTECT => memory::mem_protect(c),
        SYS_MEM_SYNC => memory::mem_sync(c),
        SYS_MEM_UNMAP => memory::mem_unmap(c),
        SYS_POLL => poll::poll(c),
        SYS_POLL_FD => Err(crate::abi::Errno::NoSys),
        SYS_PROC_EXEC => process::proc_exec(c),
        SYS_PROC_EXIT => process::proc_exit(c),
        SYS_PROC_FORK => process::proc_fork(c),
        SYS_PROC_RAISE => process::proc_raise(c),
        SYS_RANDOM_GET => process::random_get(c),
        SYS_SOCK_ACCEPT => sock::sock_accept(c),
        SYS_SOCK_BIND => sock::sock_bind(c),
        SYS_SOCK_CONNECT => sock::sock_connect(c),
        SYS_SOCK_LISTEN => sock::sock_listen(c),
        SYS_SOCK_RECV => sock::sock_recv(c),
        SYS_SOCK_SEND => sock::sock_send(c),
        SYS_SOCK_SHUTDOWN => sock::sock_shutdown(c),
        SYS_SOCK_STAT_GET => sock::sock_stat_get(c),
        SYS_THREAD_CREATE => thread::thread_create(c),
        SYS_THREAD_EXIT => thread::thread_exit(c),
        SYS_THREAD_YIELD => thread::thread_yield(c),
        _ => {
            crate::kwarn!("unknown syscall {}, signalling process", nr);
            c.process().deliver_signal(SIGSYS);
            Err(crate::abi::Errno::NoSys)
        }
    }
}
