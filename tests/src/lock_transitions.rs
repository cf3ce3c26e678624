//! Userspace lock word transitions.
//!
//! The word's layout is ABI: top bit write-locked, next bit kernel-managed,
//! low 30 bits owner tid or reader count. These tests model the transitions
//! the kernel performs on contended paths.

#[cfg(test)]
mod tests {
    const WRLOCKED: u32 = 0x8000_0000;
    const KERNEL_MANAGED: u32 = 0x4000_0000;
    const OWNER_MASK: u32 = 0x3fff_ffff;

    /// Writer unlock with a writer queued: ownership transfers atomically.
    fn handover(word: u32, next_tid: u32, more_waiters: bool) -> u32 {
        assert!(word & WRLOCKED != 0);
        let mut new = WRLOCKED | (next_tid & OWNER_MASK);
        if more_waiters {
            new |= KERNEL_MANAGED;
        }
        new
    }

    /// Writer unlock with only readers queued: the word becomes a plain
    /// reader count and stops being kernel-managed.
    fn release_to_readers(readers: u32) -> u32 {
        readers & OWNER_MASK
    }

    #[test]
    fn uncontended_write_acquire() {
        let tid = 1; // MAIN_THREAD: nonzero so held locks never read as free
        let word = WRLOCKED | tid;
        assert_eq!(word & OWNER_MASK, tid);
        assert!(word & KERNEL_MANAGED == 0);
    }

    #[test]
    fn handover_keeps_managed_bit_while_waiters_remain() {
        let word = WRLOCKED | KERNEL_MANAGED | 1;
        let after = handover(word, 2, true);
        assert_eq!(after & OWNER_MASK, 2);
        assert!(after & KERNEL_MANAGED != 0);
        assert!(after & WRLOCKED != 0);
    }

    #[test]
    fn handover_to_last_waiter_clears_managed_bit() {
        let word = WRLOCKED | KERNEL_MANAGED | 1;
        let after = handover(word, 2, false);
        assert_eq!(after, WRLOCKED | 2);
    }

    #[test]
    fn release_to_readers_drops_all_flags() {
        let after = release_to_readers(3);
        assert_eq!(after, 3);
        assert!(after & WRLOCKED == 0);
        assert!(after & KERNEL_MANAGED == 0);
    }

    #[test]
    fn release_with_no_waiters_zeroes_the_word() {
        assert_eq!(release_to_readers(0), 0);
    }

    #[test]
    fn reader_fast_path_only_without_waiting_writers() {
        // Read-locked word, no writers interested: userspace may increment.
        let word: u32 = 2;
        let has_waiting_writers = false;
        let can_fast_path = word & WRLOCKED == 0 && !has_waiting_writers;
        assert!(can_fast_path);
        assert_eq!(word + 1, 3);

        // One waiting writer forces the kernel path so the writer is not
        // starved.
        let has_waiting_writers = true;
        assert!(!(word & WRLOCKED == 0 && !has_waiting_writers));
    }
}
