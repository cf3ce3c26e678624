//! Syscall numbers, dispatched from the software-interrupt handler.

pub const SYS_CLOCK_RES_GET: u32 = 0;
pub const SYS_CLOCK_TIME_GET: u32 = 1;
pub const SYS_CONDVAR_SIGNAL: u32 = 2;
pub const SYS_FD_CLOSE: u32 = 3;
pub const SYS_FD_CREATE1: u32 = 4;
pub const SYS_FD_CREATE2: u32 = 5;
pub const SYS_FD_DATASYNC: u32 = 6;
pub const SYS_FD_DUP: u32 = 7;
pub const SYS_FD_PREAD: u32 = 8;
pub const SYS_FD_PWRITE: u32 = 9;
pub const SYS_FD_READ: u32 = 10;
pub const SYS_FD_REPLACE: u32 = 11;
pub const SYS_FD_SEEK: u32 = 12;
pub const SYS_FD_STAT_GET: u32 = 13;
pub const SYS_FD_STAT_PUT: u32 = 14;
pub const SYS_FD_SYNC: u32 = 15;
pub const SYS_FD_WRITE: u32 = 16;
pub const SYS_FILE_ADVISE: u32 = 17;
pub const SYS_FILE_ALLOCATE: u32 = 18;
pub const SYS_FILE_CREATE: u32 = 19;
pub const SYS_FILE_LINK: u32 = 20;
pub const SYS_FILE_OPEN: u32 = 21;
pub const SYS_FILE_READDIR: u32 = 22;
pub const SYS_FILE_READLINK: u32 = 23;
pub const SYS_FILE_RENAME: u32 = 24;
pub const SYS_FILE_STAT_FGET: u32 = 25;
pub const SYS_FILE_STAT_FPUT: u32 = 26;
pub const SYS_FILE_STAT_GET: u32 = 27;
pub const SYS_FILE_STAT_PUT: u32 = 28;
pub const SYS_FILE_SYMLINK: u32 = 29;
pub const SYS_FILE_UNLINK: u32 = 30;
pub const SYS_LOCK_UNLOCK: u32 = 31;
pub const SYS_MEM_ADVISE: u32 = 32;
pub const SYS_MEM_MAP: u32 = 33;
pub const SYS_MEM_PROTECT: u32 = 34;
pub const SYS_MEM_SYNC: u32 = 35;
pub const SYS_MEM_UNMAP: u32 = 36;
pub const SYS_POLL: u32 = 37;
pub const SYS_POLL_FD: u32 = 38;
pub const SYS_PROC_EXEC: u32 = 39;
pub const SYS_PROC_EXIT: u32 = 40;
pub const SYS_PROC_FORK: u32 = 41;
pub const SYS_PROC_RAISE: u32 = 42;
pub const SYS_RANDOM_GET: u32 = 43;
pub const SYS_SOCK_ACCEPT: u32 = 44;
pub const SYS_SOCK_BIND: u32 = 45;
pub const SYS_SOCK_CONNECT: u32 = 46;
pub const SYS_SOCK_LISTEN: u32 = 47;
pub const SYS_SOCK_RECV: u32 = 48;
pub const SYS_SOCK_SEND: u32 = 49;
pub const SYS_SOCK_SHUTDOWN: u32 = 50;
pub const SYS_SOCK_STAT_GET: u32 = 51;
pub const SYS_THREAD_CREATE: u32 = 52;
pub const SYS_THREAD_EXIT: u32 = 53;
pub const SYS_THREAD_YIELD: u32 = 54;
