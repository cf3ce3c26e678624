//! Cooperative kernel scheduler.
//!
//! One running thread, one FIFO ready queue. Kernel code runs to completion
//! or to an explicit block; userspace is preempted by the timer interrupt.
//! A thread taken off the CPU while blocked is marked `unscheduled` and
//! re-queued by `unblock`. Exited threads cannot be freed while the CPU is
//! still on their kernel stack, so they park in a graveyard that is reaped on
//! a later yield from a different stack.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use crate::arch;
use crate::task::thread::Thread;

struct Scheduler {
    running: Option<Arc<Thread>>,
    ready: VecDeque<Arc<Thread>>,
    graveyard: Vec<Arc<Thread>>,
}

static SCHEDULER: Mutex<Scheduler> = Mutex::new(Scheduler {
    running: None,
    ready: VecDeque::new(),
    graveyard: Vec::new(),
});

pub fn init() {
    crate::kdebug!("[sched] scheduler ready");
}

/// The thread currently on the CPU. Panics outside thread context.
pub fn current_thread() -> Arc<Thread> {
    try_current_thread().expect("no running thread")
}

pub fn try_current_thread() -> Option<Arc<Thread>> {
    SCHEDULER.lock().running.clone()
}

/// Append to the ready queue.
pub fn thread_ready(thread: Arc<Thread>) {
    SCHEDULER.lock().ready.push_back(thread);
}

fn reap_graveyard() {
    // Runs on some live thread's stack; everything in the graveyard is a
    // different, exited thread, so dropping is safe now.
    let dead: Vec<Arc<Thread>> = {
        let mut sched = SCHEDULER.lock();
        core::mem::take(&mut sched.graveyard)
    };
    drop(dead);
}

/// Give up the CPU. Returns when this thread is scheduled again. If nothing
/// else is ready and the current thread is blocked, idles with interrupts
/// enabled until a timer tick (or other interrupt) readies someone.
pub fn yield_now() {
    reap_graveyard();
    loop {
        let mut sched = SCHEDULER.lock();

        let next = loop {
            match sched.ready.pop_front() {
                None => break None,
                Some(t) if t.is_runnable() => break Some(t),
                Some(t) if t.is_exited() => {
                    // Not the current thread (that one is in `running`), so
                    // it can be dropped on the spot.
                    drop(t);
                }
                Some(t) => {
                    // Blocked while queued: it re-enters the queue via
                    // unblock().
                    t.set_unscheduled(true);
                }
            }
        };

        let current = sched.running.clone();
        match next {
            None => {
                let cur = current.expect("ready queue empty and no running thread");
                if cur.is_runnable() {
                    return;
                }
                drop(sched);
                // Nothing to run. Let the timer tick in; it may satisfy a
                // clock condition and unblock someone (possibly us).
                arch::x86::wait_for_interrupt();
                crate::time::process_pending_ticks();
            }
            Some(next) => {
                match current {
                    Some(cur) => {
                        if Arc::ptr_eq(&cur, &next) {
                            sched.running = Some(next);
                            return;
                        }
                        let cur_esp = cur.esp_slot();
                        cur.save_sse();
                        if cur.is_exited() {
                            sched.graveyard.push(cur);
                        } else if cur.is_blocked() {
                            cur.set_unscheduled(true);
                            drop(cur);
                        } else {
                            sched.ready.push_back(cur);
                        }
                        sched.running = Some(Arc::clone(&next));
                        drop(sched);

                        next.activate();
                        unsafe {
                            arch::switch_stacks(cur_esp, next.esp());
                        }
                        // Back on this thread's stack, scheduled by someone
                        // else who set `running` to us.
                        current_thread().restore_sse();
                        return;
                    }
                    None => {
                        // Very first schedule, coming from the bootstrap
                        // stack; there is no previous thread to save into.
                        sched.running = Some(Arc::clone(&next));
                        drop(sched);
                        next.activate();
                        let mut bootstrap_esp: u32 = 0;
                        unsafe {
                            arch::switch_stacks(&mut bootstrap_esp, next.esp());
                        }
                        unreachable!("bootstrap stack rescheduled");
                    }
                }
            }
        }
    }
}

/// Start scheduling; never returns.
pub fn initial_yield() -> ! {
    yield_now();
    unreachable!("initial yield returned");
}
