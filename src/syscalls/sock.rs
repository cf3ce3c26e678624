//! Socket syscalls.
//!
//! The recv/send argument blocks mirror the 32-bit userspace layout: an
//! iovec array, a descriptor array and flags in, counts out.

use alloc::sync::Arc;
use alloc::vec::Vec;

use super::types::{
    check_user_range, user_iovecs, user_iovecs_mut, user_ref, user_ref_mut, user_slice,
    SyscallContext,
};
use crate::abi::errno::Result;
use crate::abi::types::{self, SockStat};
use crate::abi::{Errno, Rights};
use crate::fd::FdSlot;

/// `sock_recv` input block as userspace lays it out.
#[derive(Clone, Copy)]
#[repr(C)]
struct RecvIn {
    ri_data: u32,
    ri_data_len: u32,
    ri_fds: u32,
    ri_fds_len: u32,
    ri_flags: u16,
}

#[derive(Clone, Copy, Default)]
#[repr(C)]
struct RecvOut {
    ro_datalen: u32,
    ro_fdslen: u32,
    ro_flags: u16,
}

#[derive(Clone, Copy)]
#[repr(C)]
struct SendIn {
    si_data: u32,
    si_data_len: u32,
    si_fds: u32,
    si_fds_len: u32,
    si_flags: u16,
}

#[derive(Clone, Copy, Default)]
#[repr(C)]
struct SendOut {
    so_datalen: u32,
}

pub fn sock_accept(c: &mut SyscallContext) -> Result<()> {
    let slot = c.process().get_fd(c.arg(0), Rights::NONE)?;
    let accepted = slot.fd.sock_accept()?;
    // The accepted connection inherits through the listening descriptor.
    c.result = c
        .process()
        .add_fd(accepted, slot.rights_inheriting, slot.rights_inheriting) as u64;
    Ok(())
}

pub fn sock_bind(c: &mut SyscallContext) -> Result<()> {
    let sock = c.process().get_fd(c.arg(0), Rights::NONE)?;
    let dir = c.process().get_fd(c.arg(1), Rights::FILE_CREATE_FILE)?;
    let path = user_slice(c.arg(2), c.arg(3) as usize)?;
    sock.fd.sock_bind(&dir.fd, path)
}

pub fn sock_connect(c: &mut SyscallContext) -> Result<()> {
    let sock = c.process().get_fd(c.arg(0), Rights::NONE)?;
    let dir = c.process().get_fd(c.arg(1), Rights::FILE_STAT_GET)?;
    let path = user_slice(c.arg(2), c.arg(3) as usize)?;
    sock.fd.sock_connect(&dir.fd, path)
}

pub fn sock_listen(c: &mut SyscallContext) -> Result<()> {
    let sock = c.process().get_fd(c.arg(0), Rights::NONE)?;
    sock.fd.sock_listen(c.arg(1))
}

pub fn sock_recv(c: &mut SyscallContext) -> Result<()> {
    let sock = c.process().get_fd(c.arg(0), Rights::FD_READ)?;
    let input: &RecvIn = user_ref(c.arg(1))?;
    let output: &mut RecvOut = user_ref_mut(c.arg(2))?;

    let mut iovecs = user_iovecs_mut(input.ri_data, input.ri_data_len as usize)?;
    check_user_range(input.ri_fds, (input.ri_fds_len as usize).saturating_mul(4))?;

    let result = sock.fd.sock_recv(&mut iovecs, input.ri_fds_len as usize)?;

    // Install the passed descriptors with the rights they traveled with.
    let process = Arc::clone(c.process());
    for (i, passed) in result.fds.iter().enumerate() {
        let num = process.add_fd(
            Arc::clone(&passed.fd),
            passed.rights_base,
            passed.rights_inheriting,
        );
        unsafe {
            core::ptr::write((input.ri_fds + (i * 4) as u32) as *mut u32, num);
        }
    }

    *output = RecvOut {
        ro_datalen: result.datalen as u32,
        ro_fdslen: result.fds.len() as u32,
        ro_flags: 0,
    };
    Ok(())
}

pub fn sock_send(c: &mut SyscallContext) -> Result<()> {
    let sock = c.process().get_fd(c.arg(0), Rights::FD_WRITE)?;
    let input: &SendIn = user_ref(c.arg(1))?;
    let output: &mut SendOut = user_ref_mut(c.arg(2))?;

    let iovecs = user_iovecs(input.si_data, input.si_data_len as usize)?;

    let fd_numbers = user_slice(input.si_fds, (input.si_fds_len as usize).saturating_mul(4))?;
    let mut fds: Vec<FdSlot> = Vec::with_capacity(input.si_fds_len as usize);
    for i in 0..input.si_fds_len as usize {
        let num = u32::from_le_bytes(fd_numbers[i * 4..i * 4 + 4].try_into().unwrap());
        fds.push(c.process().get_fd(num, Rights::NONE)?);
    }

    let sent = sock.fd.sock_send(&iovecs, fds)?;
    *output = SendOut {
        so_datalen: sent as u32,
    };
    Ok(())
}

pub fn sock_shutdown(c: &mut SyscallContext) -> Result<()> {
    let sock = c.process().get_fd(c.arg(0), Rights::SOCK_SHUTDOWN)?;
    let how = c.arg(1) as u8;
    if how & !(types::SHUT_RD | types::SHUT_WR) != 0 {
        return Err(Errno::Inval);
    }
    sock.fd.sock_shutdown(how)
}

pub fn sock_stat_get(c: &mut SyscallContext) -> Result<()> {
    let sock = c.process().get_fd(c.arg(0), Rights::NONE)?;
    let out: &mut SockStat = user_ref_mut(c.arg(1))?;
    let flags = c.arg(2) as u8;
    *out = sock.fd.sock_stat_get(flags)?;
    Ok(())
}
