use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};
use spin::Mutex;

use crate::task::thread::Thread;

/// Extra information attached to a satisfied condition.
#[derive(Clone, Copy, Debug)]
pub enum ConditionData {
    ProcTerminate { exitcode: u32, signal: u8 },
    FdReadWrite { nbytes: u64, flags: u16 },
}

/// Result of a signaler's already-satisfied hook.
pub enum ReadyResult {
    Pending,
    Ready(Option<ConditionData>),
}

type ReadyCheck = Arc<dyn Fn() -> ReadyResult + Send + Sync>;

/// One element of a wait set. Attached to exactly one signaler; points at the
/// waiting thread once the wait starts.
pub struct Condition {
    signaler: Arc<Signaler>,
    /// Caller-chosen tag, used by poll to map conditions back to
    /// subscriptions.
    pub tag: usize,
    thread: Mutex<Option<Arc<Thread>>>,
    satisfied: AtomicBool,
    data: Mutex<Option<ConditionData>>,
}

impl Condition {
    pub fn new(signaler: Arc<Signaler>, tag: usize) -> Arc<Condition> {
        Arc::new(Condition {
            signaler,
            tag,
            thread: Mutex::new(None),
            satisfied: AtomicBool::new(false),
            data: Mutex::new(None),
        })
    }

    pub fn is_satisfied(&self) -> bool {
        self.satisfied.load(Ordering::Relaxed)
    }

    pub fn take_data(&self) -> Option<ConditionData> {
        self.data.lock().take()
    }

    /// Satisfy from a signaler: record the data and wake the waiting thread.
    /// A sibling condition of the same waiter may already have woken it, in
    /// which case there is nothing left to do.
    fn satisfy(&self, data: Option<ConditionData>) {
        *self.data.lock() = data;
        self.satisfied.store(true, Ordering::Relaxed);
        let thread = self.thread.lock().clone();
        match thread {
            Some(t) => {
                if t.is_blocked() {
                    t.unblock();
                }
            }
            None => panic!("condition satisfied but has no thread"),
        }
    }

    /// Satisfy before the wait has started (already-satisfied hook fired);
    /// nothing to wake.
    fn satisfy_early(&self, data: Option<ConditionData>) {
        *self.data.lock() = data;
        self.satisfied.store(true, Ordering::Relaxed);
    }
}

/// The notification end. Owned by whatever can satisfy conditions: a
/// descriptor's readable side, a clock deadline, a process's termination
/// state. Notification order is FIFO to prevent starvation.
pub struct Signaler {
    conditions: Mutex<VecDeque<Arc<Condition>>>,
    ready_check: Mutex<Option<ReadyCheck>>,
}

impl Signaler {
    pub fn new() -> Arc<Signaler> {
        Arc::new(Signaler {
            conditions: Mutex::new(VecDeque::new()),
            ready_check: Mutex::new(None),
        })
    }

    /// Install the hook that reports whether a fresh condition would already
    /// be satisfied. Checked by `Waiter::wait` before blocking.
    pub fn set_ready_check(&self, check: ReadyCheck) {
        *self.ready_check.lock() = Some(check);
    }

    pub fn check_ready(&self) -> ReadyResult {
        // The hook may itself block (a pseudo-FD asks its server), so it
        // runs outside our locks.
        let check = self.ready_check.lock().clone();
        match check {
            Some(check) => check(),
            None => ReadyResult::Pending,
        }
    }

    fn subscribe(&self, condition: Arc<Condition>) {
        // Append, don't prepend: FIFO wakeups.
        self.conditions.lock().push_back(condition);
    }

    fn cancel(&self, condition: &Arc<Condition>) {
        assert!(
            !condition.is_satisfied(),
            "condition cancelled but already satisfied"
        );
        let mut conditions = self.conditions.lock();
        if let Some(pos) = conditions
            .iter()
            .position(|c| Arc::ptr_eq(c, condition))
        {
            conditions.remove(pos);
        }
    }

    /// Satisfy the head condition, if any.
    pub fn notify(&self, data: Option<ConditionData>) {
        let condition = self.conditions.lock().pop_front();
        if let Some(condition) = condition {
            condition.satisfy(data);
        }
    }

    /// Satisfy all conditions in enqueue order, building fresh data for each.
    pub fn broadcast_with<F: FnMut() -> Option<ConditionData>>(&self, mut builder: F) {
        loop {
            let condition = self.conditions.lock().pop_front();
            match condition {
                Some(c) => c.satisfy(builder()),
                None => break,
            }
        }
    }

    pub fn broadcast(&self) {
        self.broadcast_with(|| None);
    }

    pub fn has_conditions(&self) -> bool {
        !self.conditions.lock().is_empty()
    }
}

/// Aggregates conditions for one blocking wait. Created on the waiting
/// thread's kernel stack, in local scope.
pub struct Waiter {
    conditions: Vec<Arc<Condition>>,
}

impl Waiter {
    pub fn new() -> Waiter {
        Waiter {
            conditions: Vec::new(),
        }
    }

    pub fn add_condition(&mut self, condition: Arc<Condition>) {
        self.conditions.push(condition);
    }

    /// Returns when at least one condition is satisfied. Already-satisfied
    /// hooks are consulted first; if any fires, the wait does not block at
    /// all.
    pub fn wait(&mut self) {
        let mut any_ready = false;
        for condition in &self.conditions {
            if let ReadyResult::Ready(data) = condition.signaler.check_ready() {
                condition.satisfy_early(data);
                any_ready = true;
            }
        }
        if any_ready {
            return;
        }

        let thread = crate::sched::current_thread();
        for condition in &self.conditions {
            *condition.thread.lock() = Some(Arc::clone(&thread));
            condition.satisfied.store(false, Ordering::Relaxed);
            condition.signaler.subscribe(Arc::clone(condition));
        }

        thread.block();

        // Whatever didn't get satisfied is taken off its signaler again;
        // deterministic cancellation, no dangling waiters.
        for condition in &self.conditions {
            if !condition.is_satisfied() {
                condition.signaler.cancel(condition);
            }
        }
    }

    /// The satisfied conditions, in registration order.
    pub fn finish(self) -> Vec<Arc<Condition>> {
        let satisfied: Vec<Arc<Condition>> = self
            .conditions
            .into_iter()
            .filter(|c| c.is_satisfied())
            .collect();
        assert!(
            !satisfied.is_empty(),
            "waiter finishing without a satisfied condition"
        );
        satisfied
    }
}
