//! Poll subscription composition rules.
//!
//! A lock or condvar subscription may only lead a set of at most two, with a
//! clock as the optional second entry; everything else may mix freely.

#[cfg(test)]
mod tests {
    const CLOCK: u8 = 1;
    const CONDVAR: u8 = 2;
    const FD_READ: u8 = 3;
    const FD_WRITE: u8 = 4;
    const LOCK_RDLOCK: u8 = 5;
    const LOCK_WRLOCK: u8 = 6;
    const PROC_TERMINATE: u8 = 7;

    fn is_sync(t: u8) -> bool {
        t == LOCK_RDLOCK || t == LOCK_WRLOCK || t == CONDVAR
    }

    fn composition_valid(types: &[u8]) -> bool {
        match types.first() {
            None => true,
            Some(&first) if is_sync(first) => match types.len() {
                1 => true,
                2 => types[1] == CLOCK,
                _ => false,
            },
            Some(_) => !types.iter().any(|&t| is_sync(t)),
        }
    }

    #[test]
    fn empty_set_is_valid_and_immediate() {
        assert!(composition_valid(&[]));
    }

    #[test]
    fn lock_with_clock_timeout() {
        assert!(composition_valid(&[LOCK_WRLOCK]));
        assert!(composition_valid(&[LOCK_WRLOCK, CLOCK]));
        assert!(composition_valid(&[LOCK_RDLOCK, CLOCK]));
        assert!(composition_valid(&[CONDVAR, CLOCK]));
    }

    #[test]
    fn lock_with_anything_else_is_invalid() {
        assert!(!composition_valid(&[LOCK_WRLOCK, FD_READ]));
        assert!(!composition_valid(&[LOCK_WRLOCK, CLOCK, CLOCK]));
        assert!(!composition_valid(&[CONDVAR, PROC_TERMINATE]));
    }

    #[test]
    fn sync_type_may_not_follow_others() {
        assert!(!composition_valid(&[CLOCK, LOCK_WRLOCK]));
        assert!(!composition_valid(&[FD_READ, CONDVAR]));
    }

    #[test]
    fn io_mixes_freely() {
        assert!(composition_valid(&[
            CLOCK,
            FD_READ,
            FD_WRITE,
            PROC_TERMINATE,
            CLOCK,
        ]));
    }
}
