//! Kernel condition variable.
//!
//! Unlike a hosted condvar there is no associated mutex: the kernel is
//! uniprocessor and never preempted in kernel mode, so "condition becomes
//! true between the check and the block" cannot happen. A `Cv` is a thin
//! veneer over a `Signaler` so the same wait state can also feed `poll`.

use alloc::sync::Arc;

use super::condition::{Condition, Signaler, Waiter};

pub struct Cv {
    signaler: Arc<Signaler>,
}

impl Cv {
    pub fn new() -> Cv {
        Cv {
            signaler: Signaler::new(),
        }
    }

    pub fn signaler(&self) -> Arc<Signaler> {
        Arc::clone(&self.signaler)
    }

    /// Block until notified.
    pub fn wait(&self) {
        let mut waiter = Waiter::new();
        waiter.add_condition(Condition::new(Arc::clone(&self.signaler), 0));
        waiter.wait();
    }

    /// Wake the longest-waiting thread, if any.
    pub fn notify(&self) {
        self.signaler.notify(None);
    }

    /// Wake all waiting threads in enqueue order.
    pub fn broadcast(&self) {
        self.signaler.broadcast();
    }
}

impl Default for Cv {
    fn default() -> Self {
        Cv::new()
    }
}
