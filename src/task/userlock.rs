//! Kernel side of userspace locks and condition variables.
//!
//! Userspace performs uncontended lock transitions on an atomic 32-bit word
//! without entering the kernel. Once contention is detected the word gets
//! the kernel-managed bit and the kernel tracks waiters here, keyed by the
//! word's user virtual address. The kernel-managed bit is one-way: only the
//! last release clears it.
//!
//! Lock acquisition through `poll` hands out a signaler that fires once this
//! thread owns the lock; a condvar subscription's signaler fires once the
//! condvar was signaled *and* the lock was re-acquired.

use alloc::collections::VecDeque;
use alloc::sync::{Arc, Weak};
use core::sync::atomic::{AtomicU32, Ordering};

use super::thread::Thread;
use crate::abi::types::{self, Tid};
use crate::sync::lockword;
use crate::sync::{Cv, Signaler};

/// How a waiting writer is woken when the lock is handed to it.
pub enum WriterWake {
    /// A thread blocked in the kernel; unblock it.
    Thread(Weak<Thread>),
    /// A poll subscription; notify its signaler.
    Signaler(Arc<Signaler>),
}

pub struct WriterWaiter {
    pub tid: Tid,
    pub wake: WriterWake,
}

/// Contended-lock state. Readers share one condition variable; writers queue
/// individually so the lock can be handed over FIFO.
pub struct LockWaiters {
    pub readers_cv: Cv,
    pub number_of_readers: usize,
    pub waiting_writers: VecDeque<WriterWaiter>,
}

impl LockWaiters {
    fn new() -> LockWaiters {
        LockWaiters {
            readers_cv: Cv::new(),
            number_of_readers: 0,
            waiting_writers: VecDeque::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.number_of_readers == 0 && self.waiting_writers.is_empty()
    }
}

pub struct CvWaiter {
    pub tid: Tid,
    pub signaler: Arc<Signaler>,
}

/// Waiters of one userspace condvar and the lock it protects.
pub struct CondvarWaiters {
    pub lock_addr: u32,
    pub waiters: VecDeque<CvWaiter>,
}

/// The userspace word itself. Only valid while the owning process's page
/// directory is installed, which holds for every path in here (they all run
/// on a thread of that process).
fn user_word(addr: u32) -> &'static AtomicU32 {
    unsafe { &*(addr as *const AtomicU32) }
}

impl Thread {
    /// Try to take the lock without waiting; on contention, enqueue and
    /// return the signaler that fires once the lock is ours.
    pub fn acquire_lock_signaler(
        self: &Arc<Self>,
        lock_addr: u32,
        locktype: u8,
    ) -> Option<Arc<Signaler>> {
        let word = user_word(lock_addr);
        let value = word.load(Ordering::Relaxed);
        let want_write = locktype == types::EVENTTYPE_LOCK_WRLOCK;

        if lockword::owner_field(value) == 0 {
            // Unlocked; no contention possible on this uniprocessor.
            let new = if want_write {
                lockword::write_locked_by(self.thread_id(), false)
            } else {
                1
            };
            word.store(new, Ordering::Relaxed);
            return None;
        }

        let process = Arc::clone(self.process());
        let mut locks = process.userland_locks.lock();

        let no_waiting_writers = locks
            .get(&lock_addr)
            .map_or(true, |info| info.waiting_writers.is_empty());
        if !lockword::is_write_locked(value) && !want_write && no_waiting_writers {
            // Read-locked, we want a read lock, nobody wants to write:
            // userspace could have done this itself.
            word.store(value + 1, Ordering::Relaxed);
            return None;
        }

        // Every other case waits its turn; the word becomes kernel-managed
        // so the kernel sees the releases.
        word.store(value | types::LOCK_KERNEL_MANAGED, Ordering::Relaxed);
        let info = locks.entry(lock_addr).or_insert_with(LockWaiters::new);

        if want_write {
            let signaler = Signaler::new();
            info.waiting_writers.push_back(WriterWaiter {
                tid: self.thread_id(),
                wake: WriterWake::Signaler(Arc::clone(&signaler)),
            });
            Some(signaler)
        } else {
            info.number_of_readers += 1;
            Some(info.readers_cv.signaler())
        }
    }

    /// Blocking acquire, used when a timed-out condvar wait still has to get
    /// the lock back before poll may return.
    pub fn acquire_userspace_lock_blocking(self: &Arc<Self>, lock_addr: u32) {
        let word = user_word(lock_addr);
        let value = word.load(Ordering::Relaxed);
        if lockword::owner_field(value) == 0 {
            word.store(
                lockword::write_locked_by(self.thread_id(), false),
                Ordering::Relaxed,
            );
            return;
        }

        word.store(value | types::LOCK_KERNEL_MANAGED, Ordering::Relaxed);
        {
            let process = Arc::clone(self.process());
            let mut locks = process.userland_locks.lock();
            let info = locks.entry(lock_addr).or_insert_with(LockWaiters::new);
            info.waiting_writers.push_back(WriterWaiter {
                tid: self.thread_id(),
                wake: WriterWake::Thread(Arc::downgrade(self)),
            });
        }
        self.block();

        let value = word.load(Ordering::Relaxed);
        if !lockword::write_locked_owner_is(value, self.thread_id()) {
            // Another thread may have made progress on the word before we
            // were scheduled again; informational, not fatal.
            crate::kwarn!("thought I acquired a writelock, but the word disagrees");
        }
    }

    /// Writer unlock. Hands the lock to the next waiting writer, else
    /// releases it to the waiting readers, else clears it entirely.
    pub fn drop_userspace_lock(self: &Arc<Self>, lock_addr: u32) {
        let word = user_word(lock_addr);
        let value = word.load(Ordering::Relaxed);

        // cloudlibc only ever asks the kernel to drop write locks: the last
        // reader converts its lock into a write lock before unlocking.
        if !lockword::is_write_locked(value) {
            crate::kwarn!("lock_unlock: lock not acquired for writing");
            return;
        }
        if lockword::owner_field(value) != (self.thread_id() & types::LOCK_OWNER_MASK) {
            crate::kwarn!("lock_unlock: lock not acquired by this thread");
            return;
        }

        let process = Arc::clone(self.process());
        let mut locks = process.userland_locks.lock();

        if let Some(info) = locks.get_mut(&lock_addr) {
            if let Some(next) = info.waiting_writers.pop_front() {
                let keep_managed = !info.waiting_writers.is_empty() || info.number_of_readers > 0;
                word.store(
                    lockword::write_locked_by(next.tid, keep_managed),
                    Ordering::Relaxed,
                );
                if !keep_managed {
                    locks.remove(&lock_addr);
                }
                drop(locks);
                match next.wake {
                    WriterWake::Thread(weak) => {
                        let thread = weak.upgrade().expect("lock handed to a dead thread");
                        thread.unblock();
                    }
                    WriterWake::Signaler(signaler) => signaler.notify(None),
                }
                return;
            }

            // No writers: everything waiting is a reader. The lock becomes
            // contention-free.
            let readers = info.number_of_readers;
            word.store(readers as u32, Ordering::Relaxed);
            let info = locks.remove(&lock_addr).unwrap();
            drop(locks);
            info.readers_cv.broadcast();
        } else {
            word.store(0, Ordering::Relaxed);
        }
    }

    /// Undo a poll lock subscription that was not satisfied.
    pub fn cancel_userspace_lock(self: &Arc<Self>, lock_addr: u32, locktype: u8) {
        let process = Arc::clone(self.process());
        let mut locks = process.userland_locks.lock();
        let Some(info) = locks.get_mut(&lock_addr) else {
            return;
        };
        if locktype == types::EVENTTYPE_LOCK_WRLOCK {
            info.waiting_writers.retain(|w| w.tid != self.thread_id());
        } else if info.number_of_readers > 0 {
            info.number_of_readers -= 1;
        }
        if info.is_empty() {
            locks.remove(&lock_addr);
            let word = user_word(lock_addr);
            let value = word.load(Ordering::Relaxed);
            word.store(value & !types::LOCK_KERNEL_MANAGED, Ordering::Relaxed);
        }
    }

    /// Begin a condvar wait: register, mark the condvar word, drop the lock.
    /// Returns the signaler that fires once signaled and re-locked, or None
    /// if the caller does not hold the lock for writing.
    pub fn wait_userspace_cv_signaler(
        self: &Arc<Self>,
        lock_addr: u32,
        cv_addr: u32,
    ) -> Option<Arc<Signaler>> {
        let word = user_word(lock_addr);
        if !lockword::write_locked_owner_is(word.load(Ordering::Relaxed), self.thread_id()) {
            return None;
        }

        let signaler = Signaler::new();
        {
            let process = Arc::clone(self.process());
            let mut condvars = process.userland_condvars.lock();
            let entry = condvars.entry(cv_addr).or_insert_with(|| CondvarWaiters {
                lock_addr,
                waiters: VecDeque::new(),
            });
            entry.waiters.push_back(CvWaiter {
                tid: self.thread_id(),
                signaler: Arc::clone(&signaler),
            });
        }
        user_word(cv_addr).store(types::CONDVAR_HAS_WAITERS, Ordering::Relaxed);
        self.drop_userspace_lock(lock_addr);
        Some(signaler)
    }

    /// Wake up to `nwaiters` condvar waiters. Each woken waiter immediately
    /// re-acquires the associated lock: if the lock is free it is granted on
    /// the spot, otherwise the waiter moves to the lock's writer queue and
    /// its poll completes when the lock is handed over.
    pub fn signal_userspace_cv(self: &Arc<Self>, cv_addr: u32, nwaiters: u32) {
        let process = Arc::clone(self.process());
        let mut condvars = process.userland_condvars.lock();
        let Some(entry) = condvars.get_mut(&cv_addr) else {
            return; // no waiters
        };
        let lock_addr = entry.lock_addr;

        let wake_all = nwaiters as usize >= entry.waiters.len();
        let count = if wake_all {
            entry.waiters.len()
        } else {
            nwaiters as usize
        };
        let mut woken: VecDeque<CvWaiter> = VecDeque::new();
        for _ in 0..count {
            woken.push_back(entry.waiters.pop_front().unwrap());
        }
        if entry.waiters.is_empty() {
            condvars.remove(&cv_addr);
            user_word(cv_addr).store(0, Ordering::Relaxed);
        }
        drop(condvars);

        let word = user_word(lock_addr);
        for waiter in woken {
            let value = word.load(Ordering::Relaxed);
            if lockword::owner_field(value) == 0 && !lockword::is_write_locked(value) {
                word.store(lockword::write_locked_by(waiter.tid, false), Ordering::Relaxed);
                waiter.signaler.notify(None);
            } else {
                word.store(value | types::LOCK_KERNEL_MANAGED, Ordering::Relaxed);
                let mut locks = process.userland_locks.lock();
                let info = locks.entry(lock_addr).or_insert_with(LockWaiters::new);
                info.waiting_writers.push_back(WriterWaiter {
                    tid: waiter.tid,
                    wake: WriterWake::Signaler(waiter.signaler),
                });
            }
        }
    }

    /// Undo a poll condvar subscription that was not satisfied. If the
    /// condvar fired but the lock handover is still pending, the lock must
    /// be re-acquired before poll can return.
    pub fn cancel_userspace_cv(self: &Arc<Self>, lock_addr: u32, cv_addr: u32) {
        let process = Arc::clone(self.process());

        let was_waiting = {
            let mut condvars = process.userland_condvars.lock();
            match condvars.get_mut(&cv_addr) {
                Some(entry) => {
                    let before = entry.waiters.len();
                    entry.waiters.retain(|w| w.tid != self.thread_id());
                    let removed = before != entry.waiters.len();
                    if entry.waiters.is_empty() {
                        condvars.remove(&cv_addr);
                        user_word(cv_addr).store(0, Ordering::Relaxed);
                    }
                    removed
                }
                None => false,
            }
        };
        if was_waiting {
            // Never signaled: the wait is simply forgotten, but the caller
            // still expects to hold the lock when poll returns.
            self.acquire_userspace_lock_blocking(lock_addr);
            return;
        }

        // Signaled, so we are queued on the lock now. Trade the poll wakeup
        // for a blocking one and wait for the handover.
        let queued = {
            let mut locks = process.userland_locks.lock();
            match locks.get_mut(&lock_addr) {
                Some(info) => {
                    let mut found = false;
                    for w in info.waiting_writers.iter_mut() {
                        if w.tid == self.thread_id() {
                            w.wake = WriterWake::Thread(Arc::downgrade(self));
                            found = true;
                            break;
                        }
                    }
                    found
                }
                None => false,
            }
        };
        if queued {
            self.block();
        }
    }
}
