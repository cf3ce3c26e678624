//! The poll engine: one entry point multiplexing heterogeneous events
//! through thread-condition signalers.
//!
//! Valid subscription sets are: nothing; a single lock or condvar
//! subscription optionally followed by one clock (the timeout); or any mix
//! of clock/fd/process subscriptions. Invalid or already-satisfied
//! subscriptions attach to an always-ready signaler, which inhibits
//! blocking, so one pass through `Waiter::wait` handles every case.

use alloc::sync::Arc;
use alloc::vec::Vec;

use super::types::{check_user_range, user_ref, SyscallContext};
use crate::abi::errno::Result;
use crate::abi::types::{
    self, Event, EventFdReadwrite, EventProcTerminate, EventUnion, Subscription,
};
use crate::abi::{Errno, Rights};
use crate::sync::lockword;
use crate::sync::{Condition, ConditionData, ReadyResult, Signaler, Waiter};

struct PendingLock {
    lock: u32,
    locktype: u8,
}

struct PendingCondvar {
    lock: u32,
    condvar: u32,
}

pub fn poll(c: &mut SyscallContext) -> Result<()> {
    let in_ptr = c.arg(0);
    let out_ptr = c.arg(1);
    let nsubscriptions = c.arg(2) as usize;

    if nsubscriptions == 0 {
        c.result = 0;
        return Ok(());
    }

    let sub_size = core::mem::size_of::<Subscription>();
    check_user_range(in_ptr, nsubscriptions.saturating_mul(sub_size))?;
    check_user_range(
        out_ptr,
        nsubscriptions.saturating_mul(core::mem::size_of::<Event>()),
    )?;

    let mut subscriptions: Vec<Subscription> = Vec::with_capacity(nsubscriptions);
    for i in 0..nsubscriptions {
        let sub: &Subscription = user_ref(in_ptr + (i * sub_size) as u32)?;
        subscriptions.push(*sub);
    }

    // Composition rules: a lock or condvar leads, with at most a clock as
    // its companion; otherwise no lock or condvar at all.
    let is_sync_type = |t: u8| {
        t == types::EVENTTYPE_LOCK_RDLOCK
            || t == types::EVENTTYPE_LOCK_WRLOCK
            || t == types::EVENTTYPE_CONDVAR
    };
    if is_sync_type(subscriptions[0].type_) {
        if nsubscriptions == 2 {
            if subscriptions[1].type_ != types::EVENTTYPE_CLOCK {
                return Err(Errno::Inval);
            }
        } else if nsubscriptions > 2 {
            return Err(Errno::Inval);
        }
    } else if subscriptions.iter().any(|s| is_sync_type(s.type_)) {
        return Err(Errno::Inval);
    }

    // Subscriptions that must not block attach here.
    let null_signaler = Signaler::new();
    null_signaler.set_ready_check(Arc::new(|| ReadyResult::Ready(None)));

    let mut errors: Vec<u16> = alloc::vec![0; nsubscriptions];
    let mut pending_locks: Vec<PendingLock> = Vec::new();
    let mut pending_condvars: Vec<PendingCondvar> = Vec::new();
    let mut waiter = Waiter::new();
    let mut conditions: Vec<Arc<Condition>> = Vec::with_capacity(nsubscriptions);

    for (i, sub) in subscriptions.iter().enumerate() {
        let signaler: Arc<Signaler> = match sub.type_ {
            types::EVENTTYPE_CONDVAR => {
                let condvar = unsafe { sub.union.condvar };
                if condvar.condvar_scope != types::SCOPE_PRIVATE
                    || condvar.lock_scope != types::SCOPE_PRIVATE
                {
                    crate::kwarn!("poll(): shared locks and condvars are not supported yet");
                    errors[i] = Errno::NoSys.code();
                    Arc::clone(&null_signaler)
                } else {
                    match c
                        .thread
                        .wait_userspace_cv_signaler(condvar.lock, condvar.condvar)
                    {
                        Some(signaler) => {
                            pending_condvars.push(PendingCondvar {
                                lock: condvar.lock,
                                condvar: condvar.condvar,
                            });
                            signaler
                        }
                        None => {
                            errors[i] = Errno::Inval.code();
                            Arc::clone(&null_signaler)
                        }
                    }
                }
            }
            types::EVENTTYPE_LOCK_RDLOCK | types::EVENTTYPE_LOCK_WRLOCK => {
                let lock = unsafe { sub.union.lock };
                if lock.lock_scope != types::SCOPE_PRIVATE {
                    crate::kwarn!("poll(): shared locks are not supported yet");
                    errors[i] = Errno::NoSys.code();
                    Arc::clone(&null_signaler)
                } else {
                    match c.thread.acquire_lock_signaler(lock.lock, sub.type_) {
                        // Acquired on the spot.
                        None => Arc::clone(&null_signaler),
                        Some(signaler) => {
                            pending_locks.push(PendingLock {
                                lock: lock.lock,
                                locktype: sub.type_,
                            });
                            signaler
                        }
                    }
                }
            }
            types::EVENTTYPE_CLOCK => {
                let clock = unsafe { sub.union.clock };
                match crate::time::clock_time(clock.clock_id, clock.precision) {
                    Err(e) => {
                        errors[i] = e.code();
                        Arc::clone(&null_signaler)
                    }
                    Ok(now) => {
                        let deadline = if clock.flags & types::SUBSCRIPTION_CLOCK_ABSTIME != 0 {
                            clock.timeout
                        } else {
                            now.saturating_add(clock.timeout)
                        };
                        if deadline <= now {
                            Arc::clone(&null_signaler)
                        } else {
                            match crate::time::deadline_signaler(clock.clock_id, deadline) {
                                Ok(signaler) => signaler,
                                Err(e) => {
                                    errors[i] = e.code();
                                    Arc::clone(&null_signaler)
                                }
                            }
                        }
                    }
                }
            }
            types::EVENTTYPE_FD_READ => {
                let fdnum = unsafe { sub.union.fd_readwrite.fd };
                match c
                    .process()
                    .get_fd(fdnum, Rights::POLL_FD_READWRITE | Rights::FD_READ)
                    .and_then(|slot| slot.fd.read_signaler())
                {
                    Ok(signaler) => signaler,
                    Err(e) => {
                        errors[i] = e.code();
                        Arc::clone(&null_signaler)
                    }
                }
            }
            types::EVENTTYPE_FD_WRITE => {
                let fdnum = unsafe { sub.union.fd_readwrite.fd };
                match c
                    .process()
                    .get_fd(fdnum, Rights::POLL_FD_READWRITE | Rights::FD_WRITE)
                {
                    Err(e) => {
                        errors[i] = e.code();
                        Arc::clone(&null_signaler)
                    }
                    Ok(slot) => match slot.fd.write_signaler() {
                        Ok(signaler) => signaler,
                        // Writability polling is unimplemented for this
                        // descriptor kind; report it writable.
                        Err(Errno::Inval) => Arc::clone(&null_signaler),
                        Err(e) => {
                            errors[i] = e.code();
                            Arc::clone(&null_signaler)
                        }
                    },
                }
            }
            types::EVENTTYPE_PROC_TERMINATE => {
                let fdnum = unsafe { sub.union.proc_terminate.fd };
                match c.process().get_fd(fdnum, Rights::POLL_PROC_TERMINATE) {
                    Err(e) => {
                        errors[i] = e.code();
                        Arc::clone(&null_signaler)
                    }
                    Ok(slot) => match slot.fd.as_process() {
                        Some(process) => process.termination_signaler(),
                        None => {
                            errors[i] = Errno::BadF.code();
                            Arc::clone(&null_signaler)
                        }
                    },
                }
            }
            _ => {
                errors[i] = Errno::Inval.code();
                Arc::clone(&null_signaler)
            }
        };

        let condition = Condition::new(signaler, i);
        waiter.add_condition(Arc::clone(&condition));
        conditions.push(condition);
    }

    waiter.wait();
    let satisfied = waiter.finish();

    let mut nevents = 0usize;
    for condition in satisfied {
        let i = condition.tag;
        let sub = &subscriptions[i];
        let data = condition.take_data();

        let mut event = Event {
            userdata: sub.userdata,
            error: errors[i],
            type_: sub.type_,
            union: EventUnion { zero: [0; 16] },
        };

        match sub.type_ {
            types::EVENTTYPE_PROC_TERMINATE if event.error == 0 => {
                match data {
                    Some(ConditionData::ProcTerminate { exitcode, signal }) => {
                        event.union.proc_terminate = EventProcTerminate { signal, exitcode };
                    }
                    _ => {
                        // The signaler carried no exit data; consult the
                        // descriptor again.
                        let fdnum = unsafe { sub.union.proc_terminate.fd };
                        match c
                            .process()
                            .get_fd(fdnum, Rights::NONE)
                            .ok()
                            .and_then(|slot| slot.fd.as_process())
                            .and_then(|p| p.terminated())
                        {
                            Some((exitcode, signal)) => {
                                event.union.proc_terminate =
                                    EventProcTerminate { signal, exitcode };
                            }
                            None => event.error = Errno::Inval.code(),
                        }
                    }
                }
            }
            types::EVENTTYPE_FD_READ | types::EVENTTYPE_FD_WRITE => {
                event.union.fd_readwrite = match data {
                    Some(ConditionData::FdReadWrite { nbytes, flags }) => {
                        EventFdReadwrite { nbytes, flags }
                    }
                    _ => EventFdReadwrite {
                        nbytes: if event.error == 0 { 0xffff } else { 0 },
                        flags: 0,
                    },
                };
            }
            types::EVENTTYPE_LOCK_RDLOCK
            | types::EVENTTYPE_LOCK_WRLOCK
            | types::EVENTTYPE_CONDVAR => {
                let lock_addr = if sub.type_ == types::EVENTTYPE_CONDVAR {
                    let condvar = unsafe { sub.union.condvar };
                    pending_condvars.retain(|p| p.condvar != condvar.condvar);
                    condvar.lock
                } else {
                    let lock = unsafe { sub.union.lock };
                    pending_locks.retain(|p| p.lock != lock.lock);
                    lock.lock
                };

                // Another thread may have advanced the lock word before we
                // got scheduled; warn, don't panic.
                if event.error == 0 {
                    let word =
                        unsafe { core::ptr::read_volatile(lock_addr as *const u32) };
                    if sub.type_ == types::EVENTTYPE_LOCK_RDLOCK {
                        if lockword::is_write_locked(word) {
                            crate::kwarn!("thought I had a readlock, but the word is writelocked");
                        } else if lockword::owner_field(word) == 0 {
                            crate::kwarn!("thought I had a readlock, but the readcount is 0");
                        }
                    } else if !lockword::write_locked_owner_is(word, c.thread.thread_id()) {
                        crate::kwarn!(
                            "thought I had a writelock, but the word disagrees"
                        );
                    }
                }
            }
            _ => {}
        }

        unsafe {
            core::ptr::write(
                (out_ptr + (nevents * core::mem::size_of::<Event>()) as u32) as *mut Event,
                event,
            );
        }
        nevents += 1;
    }

    // Deterministic cancellation of everything that did not fire.
    for pending in pending_locks {
        c.thread.cancel_userspace_lock(pending.lock, pending.locktype);
    }
    for pending in pending_condvars {
        c.thread.cancel_userspace_cv(pending.lock, pending.condvar);
    }

    c.result = nevents as u64;
    Ok(())
}
