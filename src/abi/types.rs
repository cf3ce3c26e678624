//! CloudABI wire types and flag sets.
//!
//! Everything here is `#[repr(C)]` or a plain integer constant because these
//! layouts are shared with 32-bit userspace: subscription and event records
//! are read from and written to user memory verbatim.

pub type Fd = u32;
pub type Filesize = u64;
pub type Timestamp = u64;
pub type Device = u64;
pub type Inode = u64;
pub type Tid = u32;
pub type ExitCode = u32;
pub type UserData = u64;
pub type DirCookie = u64;
pub type LookupFlags = u32;
pub type OFlags = u16;
pub type FdFlags = u16;
pub type FsFlags = u16;
pub type UlFlags = u8;
pub type SdFlags = u8;
pub type RiFlags = u16;
pub type SiFlags = u16;
pub type MsFlags = u8;
pub type MProt = u8;
pub type MFlags = u8;
pub type Advice = u8;
pub type Backlog = u32;
pub type NThreads = u32;
pub type Scope = u8;
pub type Signal = u8;
pub type ClockId = u32;
pub type LockWord = u32;
pub type CondvarWord = u32;

pub const NAME_MAX: usize = 255;

// File types
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum FileType {
    Unknown = 0x00,
    BlockDevice = 0x10,
    CharacterDevice = 0x11,
    Directory = 0x20,
    Fifo = 0x30,
    Poll = 0x40,
    Process = 0x50,
    RegularFile = 0x60,
    SharedMemory = 0x70,
    SocketDgram = 0x80,
    SocketStream = 0x82,
    SymbolicLink = 0x90,
}

impl FileType {
    pub fn from_raw(raw: u8) -> FileType {
        match raw {
            0x10 => FileType::BlockDevice,
            0x11 => FileType::CharacterDevice,
            0x20 => FileType::Directory,
            0x30 => FileType::Fifo,
            0x40 => FileType::Poll,
            0x50 => FileType::Process,
            0x60 => FileType::RegularFile,
            0x70 => FileType::SharedMemory,
            0x80 => FileType::SocketDgram,
            0x82 => FileType::SocketStream,
            0x90 => FileType::SymbolicLink,
            _ => FileType::Unknown,
        }
    }

    pub fn is_socket(self) -> bool {
        matches!(self, FileType::SocketDgram | FileType::SocketStream)
    }
}

// Open flags
pub const O_CREAT: OFlags = 0x1;
pub const O_DIRECTORY: OFlags = 0x2;
pub const O_EXCL: OFlags = 0x4;
pub const O_TRUNC: OFlags = 0x8;

// Lookup flags
pub const LOOKUP_SYMLINK_FOLLOW: LookupFlags = 0x1;

// Fd flags
pub const FDFLAG_APPEND: FdFlags = 0x1;
pub const FDFLAG_DSYNC: FdFlags = 0x2;
pub const FDFLAG_NONBLOCK: FdFlags = 0x4;
pub const FDFLAG_RSYNC: FdFlags = 0x8;
pub const FDFLAG_SYNC: FdFlags = 0x10;

// filestat_put flags
pub const FILESTAT_ATIM: FsFlags = 0x1;
pub const FILESTAT_ATIM_NOW: FsFlags = 0x2;
pub const FILESTAT_MTIM: FsFlags = 0x4;
pub const FILESTAT_MTIM_NOW: FsFlags = 0x8;
pub const FILESTAT_SIZE: FsFlags = 0x10;

// unlink flags
pub const UNLINK_REMOVEDIR: UlFlags = 0x1;

// shutdown flags
pub const SHUT_RD: SdFlags = 0x1;
pub const SHUT_WR: SdFlags = 0x2;

// seek whence
pub const WHENCE_CUR: u8 = 1;
pub const WHENCE_END: u8 = 2;
pub const WHENCE_SET: u8 = 3;

// Memory protection and mapping flags
pub const PROT_EXEC: MProt = 0x1;
pub const PROT_WRITE: MProt = 0x2;
pub const PROT_READ: MProt = 0x4;

pub const MAP_ANON: MFlags = 0x1;
pub const MAP_FIXED: MFlags = 0x2;
pub const MAP_PRIVATE: MFlags = 0x4;
pub const MAP_SHARED: MFlags = 0x8;
pub const MAP_ANON_FD: Fd = 0xffff_ffff;

pub const MS_ASYNC: MsFlags = 0x1;
pub const MS_INVALIDATE: MsFlags = 0x2;
pub const MS_SYNC: MsFlags = 0x4;

// Advice
pub const ADVICE_DONTNEED: Advice = 1;
pub const ADVICE_NOREUSE: Advice = 2;
pub const ADVICE_NORMAL: Advice = 3;
pub const ADVICE_RANDOM: Advice = 4;
pub const ADVICE_SEQUENTIAL: Advice = 5;
pub const ADVICE_WILLNEED: Advice = 6;

// Clocks
pub const CLOCK_MONOTONIC: ClockId = 1;
pub const CLOCK_PROCESS_CPUTIME_ID: ClockId = 2;
pub const CLOCK_REALTIME: ClockId = 3;
pub const CLOCK_THREAD_CPUTIME_ID: ClockId = 4;

// Signals (the CloudABI set; none of these install handlers)
pub const SIGABRT: Signal = 1;
pub const SIGALRM: Signal = 2;
pub const SIGBUS: Signal = 3;
pub const SIGCHLD: Signal = 4;
pub const SIGCONT: Signal = 5;
pub const SIGFPE: Signal = 6;
pub const SIGHUP: Signal = 7;
pub const SIGILL: Signal = 8;
pub const SIGINT: Signal = 9;
pub const SIGKILL: Signal = 10;
pub const SIGPIPE: Signal = 11;
pub const SIGQUIT: Signal = 12;
pub const SIGSEGV: Signal = 13;
pub const SIGSTOP: Signal = 14;
pub const SIGSYS: Signal = 15;
pub const SIGTERM: Signal = 16;
pub const SIGTRAP: Signal = 17;
pub const SIGTSTP: Signal = 18;
pub const SIGTTIN: Signal = 19;
pub const SIGTTOU: Signal = 20;
pub const SIGURG: Signal = 21;
pub const SIGUSR1: Signal = 22;
pub const SIGUSR2: Signal = 23;
pub const SIGVTALRM: Signal = 24;
pub const SIGXCPU: Signal = 25;
pub const SIGXFSZ: Signal = 26;

/// True if delivery of the signal terminates the process; the rest of the set
/// is ignored (CloudABI processes cannot install handlers).
pub fn signal_terminates(sig: Signal) -> bool {
    matches!(
        sig,
        SIGABRT
            | SIGALRM
            | SIGBUS
            | SIGFPE
            | SIGHUP
            | SIGILL
            | SIGINT
            | SIGKILL
            | SIGQUIT
            | SIGSEGV
            | SIGSYS
            | SIGTERM
            | SIGTRAP
            | SIGUSR1
            | SIGUSR2
            | SIGVTALRM
            | SIGXCPU
            | SIGXFSZ
    )
}

// Userspace lock and condvar words
pub const LOCK_WRLOCKED: LockWord = 0x8000_0000;
pub const LOCK_KERNEL_MANAGED: LockWord = 0x4000_0000;
pub const LOCK_OWNER_MASK: LockWord = 0x3fff_ffff;
pub const CONDVAR_HAS_WAITERS: CondvarWord = 1;

// Scopes
pub const SCOPE_PRIVATE: Scope = 4;
pub const SCOPE_SHARED: Scope = 8;

// The value fork() returns in the child, in place of a descriptor number.
pub const PROCESS_CHILD: Fd = 0x8000_0000;
/// Thread id of the first thread of a process. Nonzero so that a held lock
/// always carries a nonzero owner field.
pub const MAIN_THREAD: Tid = 1;

// Event types
pub const EVENTTYPE_CLOCK: u8 = 1;
pub const EVENTTYPE_CONDVAR: u8 = 2;
pub const EVENTTYPE_FD_READ: u8 = 3;
pub const EVENTTYPE_FD_WRITE: u8 = 4;
pub const EVENTTYPE_LOCK_RDLOCK: u8 = 5;
pub const EVENTTYPE_LOCK_WRLOCK: u8 = 6;
pub const EVENTTYPE_PROC_TERMINATE: u8 = 7;

pub const SUBSCRIPTION_CLOCK_ABSTIME: u16 = 0x1;
pub const EVENT_FD_READWRITE_HANGUP: u16 = 0x1;

// Socket addresses (CloudABI keeps these minimal)
pub const AF_UNSPEC: u8 = 0;
pub const AF_INET: u8 = 1;
pub const AF_INET6: u8 = 2;
pub const AF_UNIX: u8 = 3;

pub const SOCKSTATE_ACCEPTCONN: u16 = 0x1;
pub const SOCKSTAT_CLEAR_ERROR: u8 = 0x1;

// Auxiliary vector entry types
pub const AT_NULL: u32 = 0;
pub const AT_PHDR: u32 = 3;
pub const AT_PHNUM: u32 = 4;
pub const AT_PAGESZ: u32 = 6;
pub const AT_BASE: u32 = 7;
pub const AT_ARGDATA: u32 = 256;
pub const AT_ARGDATALEN: u32 = 257;
pub const AT_SYSINFO_EHDR: u32 = 262;
pub const AT_PID: u32 = 263;

#[derive(Clone, Copy)]
#[repr(C)]
pub struct Auxv {
    pub a_type: u32,
    /// Value or pointer, depending on `a_type`.
    pub a_val: u32,
}

#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct FileStat {
    pub st_dev: Device,
    pub st_ino: Inode,
    pub st_filetype: u8,
    pub st_nlink: u32,
    pub st_size: Filesize,
    pub st_atim: Timestamp,
    pub st_mtim: Timestamp,
    pub st_ctim: Timestamp,
}

#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct FdStat {
    pub fs_filetype: u8,
    pub fs_flags: FdFlags,
    pub fs_rights_base: u64,
    pub fs_rights_inheriting: u64,
}

#[derive(Clone, Copy)]
#[repr(C)]
pub struct IoVec {
    pub buf: u32,
    pub buf_len: u32,
}

#[derive(Clone, Copy)]
#[repr(C)]
pub struct DirEnt {
    pub d_next: DirCookie,
    pub d_ino: Inode,
    pub d_namlen: u32,
    pub d_type: u8,
}

#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct SockAddr {
    pub sa_family: u8,
    // Unix sockets carry no path in CloudABI sockaddrs; the pad keeps the
    // struct layout identical for all families.
    pub sa_pad: [u8; 19],
}

impl SockAddr {
    pub fn unix() -> SockAddr {
        SockAddr {
            sa_family: AF_UNIX,
            ..SockAddr::default()
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct SockStat {
    pub ss_sockname: SockAddr,
    pub ss_peername: SockAddr,
    pub ss_error: u16,
    pub ss_state: u16,
}

/// One `poll` subscription, as read from user memory.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct Subscription {
    pub userdata: UserData,
    pub flags: u16,
    pub type_: u8,
    pub union: SubscriptionUnion,
}

#[derive(Clone, Copy)]
#[repr(C)]
pub union SubscriptionUnion {
    pub clock: SubscriptionClock,
    pub condvar: SubscriptionCondvar,
    pub fd_readwrite: SubscriptionFdReadwrite,
    pub lock: SubscriptionLock,
    pub proc_terminate: SubscriptionProcTerminate,
}

#[derive(Clone, Copy)]
#[repr(C)]
pub struct SubscriptionClock {
    pub identifier: UserData,
    pub clock_id: ClockId,
    pub timeout: Timestamp,
    pub precision: Timestamp,
    pub flags: u16,
}

#[derive(Clone, Copy)]
#[repr(C)]
pub struct SubscriptionCondvar {
    /// User virtual address of the condvar word.
    pub condvar: u32,
    /// User virtual address of the associated lock word.
    pub lock: u32,
    pub condvar_scope: Scope,
    pub lock_scope: Scope,
}

#[derive(Clone, Copy)]
#[repr(C)]
pub struct SubscriptionFdReadwrite {
    pub fd: Fd,
    pub flags: u16,
}

#[derive(Clone, Copy)]
#[repr(C)]
pub struct SubscriptionLock {
    /// User virtual address of the lock word.
    pub lock: u32,
    pub lock_scope: Scope,
}

#[derive(Clone, Copy)]
#[repr(C)]
pub struct SubscriptionProcTerminate {
    pub fd: Fd,
}

/// One `poll` event, as written to user memory.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct Event {
    pub userdata: UserData,
    pub error: u16,
    pub type_: u8,
    pub union: EventUnion,
}

#[derive(Clone, Copy)]
#[repr(C)]
pub union EventUnion {
    pub fd_readwrite: EventFdReadwrite,
    pub proc_terminate: EventProcTerminate,
    pub zero: [u8; 16],
}

#[derive(Clone, Copy)]
#[repr(C)]
pub struct EventFdReadwrite {
    pub nbytes: Filesize,
    pub flags: u16,
}

#[derive(Clone, Copy)]
#[repr(C)]
pub struct EventProcTerminate {
    pub signal: Signal,
    pub exitcode: ExitCode,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filetype_round_trip() {
        for ft in [
            FileType::Directory,
            FileType::RegularFile,
            FileType::Fifo,
            FileType::SocketStream,
            FileType::SocketDgram,
            FileType::Process,
            FileType::SharedMemory,
            FileType::SymbolicLink,
        ] {
            assert_eq!(FileType::from_raw(ft as u8), ft);
        }
        assert_eq!(FileType::from_raw(0x77), FileType::Unknown);
    }

    #[test]
    fn terminating_signals() {
        assert!(signal_terminates(SIGKILL));
        assert!(signal_terminates(SIGSEGV));
        assert!(!signal_terminates(SIGCHLD));
        assert!(!signal_terminates(SIGCONT));
        assert!(!signal_terminates(SIGSTOP));
    }

    #[test]
    fn lock_word_fields_do_not_overlap() {
        assert_eq!(LOCK_WRLOCKED & LOCK_OWNER_MASK, 0);
        assert_eq!(LOCK_KERNEL_MANAGED & LOCK_OWNER_MASK, 0);
        assert_eq!(LOCK_WRLOCKED & LOCK_KERNEL_MANAGED, 0);
    }
}
