//! Clocks and timer signalers.
//!
//! The PIT tick is the only time source. The interrupt handler merely
//! counts ticks (`record_tick`); due clock signalers are fired from thread
//! or idle context (`process_pending_ticks`) so that wait-queue state is
//! never touched from interrupt context.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;

use crate::abi::types::{ClockId, Timestamp, CLOCK_MONOTONIC, CLOCK_REALTIME};
use crate::abi::Errno;
use crate::sync::Signaler;

/// Nanoseconds per PIT tick (100 Hz).
const NS_PER_TICK: u64 = 10_000_000;

static TICKS: AtomicU64 = AtomicU64::new(0);
static PROCESSED_TICKS: AtomicU64 = AtomicU64::new(0);

/// Pending clock subscriptions: absolute monotonic deadline plus the
/// signaler to fire.
static DEADLINES: Mutex<Vec<(Timestamp, Arc<Signaler>)>> = Mutex::new(Vec::new());

pub fn init() {
    crate::kdebug!("[time] monotonic clock at {} Hz", 1_000_000_000 / NS_PER_TICK);
}

/// Called from the timer interrupt; must not take any locks.
pub fn record_tick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
}

/// Fire every signaler whose deadline has passed. Runs in thread or idle
/// context.
pub fn process_pending_ticks() {
    let ticks = TICKS.load(Ordering::Relaxed);
    if PROCESSED_TICKS.swap(ticks, Ordering::Relaxed) == ticks {
        return;
    }
    let now = ticks * NS_PER_TICK;
    let due: Vec<(Timestamp, Arc<Signaler>)> = {
        let mut deadlines = DEADLINES.lock();
        let mut due = Vec::new();
        deadlines.retain(|(deadline, signaler)| {
            if *deadline <= now {
                due.push((*deadline, Arc::clone(signaler)));
                false
            } else {
                true
            }
        });
        due
    };
    for (_, signaler) in due {
        signaler.broadcast();
    }
}

/// Monotonic time since boot, nanoseconds.
pub fn monotonic_ns() -> Timestamp {
    TICKS.load(Ordering::Relaxed) * NS_PER_TICK
}

pub fn uptime_us() -> u64 {
    monotonic_ns() / 1_000
}

pub fn clock_time(clock_id: ClockId, _precision: Timestamp) -> Result<Timestamp, Errno> {
    match clock_id {
        CLOCK_MONOTONIC => Ok(monotonic_ns()),
        // No RTC driver; realtime runs from boot like the monotonic clock.
        CLOCK_REALTIME => Ok(monotonic_ns()),
        _ => Err(Errno::NoSys),
    }
}

pub fn clock_res(clock_id: ClockId) -> Result<Timestamp, Errno> {
    match clock_id {
        CLOCK_MONOTONIC | CLOCK_REALTIME => Ok(NS_PER_TICK),
        _ => Err(Errno::NoSys),
    }
}

/// A signaler that fires once the clock reaches `deadline` (absolute, in the
/// clock's timebase). The caller has already verified the deadline lies in
/// the future.
pub fn deadline_signaler(clock_id: ClockId, deadline: Timestamp) -> Result<Arc<Signaler>, Errno> {
    match clock_id {
        CLOCK_MONOTONIC | CLOCK_REALTIME => {
            let signaler = Signaler::new();
            DEADLINES.lock().push((deadline, Arc::clone(&signaler)));
            Ok(signaler)
        }
        _ => Err(Errno::NoSys),
    }
}
