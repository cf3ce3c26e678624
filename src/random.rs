//! Kernel random numbers: process ids and the `random_get` syscall.
//!
//! xorshift128+ seeded from the TSC at boot. Not cryptographically strong;
//! good enough for ids and userspace seeding on hardware without RDRAND.

use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;

static STATE: Mutex<(u64, u64)> = Mutex::new((0x853c_49e6_748f_ea9b, 0xda3e_39cb_94b9_5bdb));
static SEEDED: AtomicU64 = AtomicU64::new(0);

pub fn init() {
    let tsc = crate::arch::x86::read_tsc();
    let mut state = STATE.lock();
    state.0 ^= tsc;
    state.1 ^= tsc.rotate_left(31) | 1;
    SEEDED.store(1, Ordering::Relaxed);
    crate::kdebug!("[random] seeded from TSC");
}

fn next_u64() -> u64 {
    let mut state = STATE.lock();
    let (mut s1, s0) = (state.0, state.1);
    state.0 = s0;
    s1 ^= s1 << 23;
    state.1 = s1 ^ s0 ^ (s1 >> 17) ^ (s0 >> 26);
    state.1.wrapping_add(s0)
}

pub fn fill(buf: &mut [u8]) {
    for chunk in buf.chunks_mut(8) {
        let value = next_u64().to_le_bytes();
        chunk.copy_from_slice(&value[..chunk.len()]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_covers_odd_lengths() {
        let mut buf = [0u8; 13];
        fill(&mut buf);
        // Statistically certain to be nonzero somewhere.
        assert!(buf.iter().any(|&b| b != 0));
    }

    #[test]
    fn consecutive_values_differ() {
        assert_ne!(next_u64(), next_u64());
    }
}
