//! Thread and userspace-synchronization syscalls.

use super::types::SyscallContext;
use crate::abi::errno::Result;
use crate::abi::types::{self};
use crate::abi::Errno;

/// Attributes for thread_create, as userspace lays them out.
#[derive(Clone, Copy)]
#[repr(C)]
struct ThreadAttr {
    entry_point: u32,
    stack: u32,
    stack_size: u32,
    argument: u32,
}

pub fn thread_create(c: &mut SyscallContext) -> Result<()> {
    let attr: &ThreadAttr = super::types::user_ref(c.arg(0))?;
    super::types::check_user_range(attr.stack, attr.stack_size as usize)?;
    let thread = c.process().spawn_thread(
        attr.stack,
        attr.stack_size,
        attr.argument,
        attr.entry_point,
    )?;
    c.result = thread.thread_id() as u64;
    Ok(())
}

pub fn thread_exit(c: &mut SyscallContext) -> Result<()> {
    let lock_addr = c.arg(0);
    let scope = c.arg(1) as u8;
    // The thread drops the lock guarding its joiner before going away.
    if lock_addr != 0 && scope == types::SCOPE_PRIVATE {
        c.thread.drop_userspace_lock(lock_addr);
    }
    c.thread.exit();
    // Unrunnable now; the dispatcher hands the CPU away.
    Ok(())
}

pub fn thread_yield(c: &mut SyscallContext) -> Result<()> {
    let _ = c;
    crate::sched::yield_now();
    Ok(())
}

pub fn lock_unlock(c: &mut SyscallContext) -> Result<()> {
    let lock_addr = c.arg(0);
    let scope = c.arg(1) as u8;
    if scope != types::SCOPE_PRIVATE {
        return Err(Errno::NoSys);
    }
    super::types::check_user_range(lock_addr, 4)?;
    c.thread.drop_userspace_lock(lock_addr);
    Ok(())
}

pub fn condvar_signal(c: &mut SyscallContext) -> Result<()> {
    let cv_addr = c.arg(0);
    let scope = c.arg(1) as u8;
    let nwaiters = c.arg(2);
    if scope != types::SCOPE_PRIVATE {
        return Err(Errno::NoSys);
    }
    super::types::check_user_range(cv_addr, 4)?;
    c.thread.signal_userspace_cv(cv_addr, nwaiters);
    Ok(())
}
