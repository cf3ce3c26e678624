//! Processes and threads.

pub mod exec;
pub mod process;
pub mod thread;
pub mod userlock;

use alloc::sync::Arc;

use crate::abi::types;
use crate::arch::InterruptFrame;
use crate::{arch, sched};

/// Common entry for every interrupt vector, called from the assembly stub
/// with the frame it pushed on the current kernel stack.
#[no_mangle]
pub extern "C" fn isr_dispatch(frame: *mut InterruptFrame) {
    let frame = unsafe { &mut *frame };

    // Hardware interrupts first: in kernel mode they only feed the clock.
    if (32..48).contains(&frame.int_no) {
        let irq = (frame.int_no - 32) as u8;
        if irq == 0 {
            crate::time::record_tick();
        }
        arch::x86::end_of_interrupt(irq);

        if frame.cs == arch::USER_CODE_SELECTOR {
            // Userspace preemption: fire due clocks, then round-robin.
            crate::time::process_pending_ticks();
            sched::yield_now();
        }
        return;
    }

    // A trap from kernel mode is a kernel bug, not a process error.
    if frame.int_no != 0x80 && frame.cs == arch::KERNEL_CODE_SELECTOR {
        panic!(
            "kernel-mode {} at eip={:#x} (cr2={:#x})",
            arch::exception_name(frame.int_no),
            frame.eip,
            arch::read_cr2()
        );
    }

    let thread = sched::current_thread();
    thread.set_return_state(frame);
    thread.interrupt(frame.int_no, frame.err_code);

    // The syscall (or fault fix-up) may have left the thread dead or
    // blocked; in that case hand the CPU away. Execution resumes here when
    // (and if) the thread is scheduled again.
    if !thread.is_runnable() {
        sched::yield_now();
    }
    thread.get_return_state(frame);
}

/// Called by the thread entry trampoline, on the fresh thread's kernel
/// stack, right before the first drop to userspace.
#[no_mangle]
pub extern "C" fn thread_first_entry() {
    sched::current_thread().restore_sse();
}

/// Create the init process and queue its main thread.
pub fn spawn_init() {
    let init = process::Process::new("init").expect("failed to create init process");
    process::set_init(&init);
    init.add_initial_fds().expect("failed to build init descriptor table");

    let binary = crate::fs::bootfs::open_binary(b"init")
        .expect("no init binary in bootfs");
    init.exec_keeping_fds(binary, &[])
        .expect("failed to exec init");

    // The process page directory was installed during exec; the bootstrap
    // context keeps running on it until the first yield, which is fine: the
    // kernel half is identical everywhere.
    crate::kinfo!("init process created, pid {}", init.pid_hex());
}

/// Fatal-signal mapping for CPU exceptions.
pub fn exception_signal(int_no: u32) -> types::Signal {
    match int_no {
        0 | 4 | 16 | 19 => types::SIGFPE,
        6 => types::SIGILL,
        11 | 12 | 13 | 14 => types::SIGSEGV,
        _ => types::SIGKILL,
    }
}

pub fn processes() -> alloc::vec::Vec<Arc<process::Process>> {
    process::all_processes()
}
