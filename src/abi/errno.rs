//! CloudABI error numbers.
//!
//! The numbering is part of the ABI (errors are returned to userspace in
//! `eax`), so the discriminants are fixed.

/// Errors a system call can return. The set is flat; there is no nesting or
/// wrapping, mirroring POSIX errno.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum Errno {
    TooBig = 1,
    Acces = 2,
    AddrInUse = 3,
    AddrNotAvail = 4,
    AfNoSupport = 5,
    Again = 6,
    Already = 7,
    BadF = 8,
    BadMsg = 9,
    Busy = 10,
    Canceled = 11,
    Child = 12,
    ConnAborted = 13,
    ConnRefused = 14,
    ConnReset = 15,
    DeadLk = 16,
    DestAddrReq = 17,
    Dom = 18,
    DQuot = 19,
    Exist = 20,
    Fault = 21,
    FBig = 22,
    HostUnreach = 23,
    Idrm = 24,
    IlSeq = 25,
    InProgress = 26,
    Intr = 27,
    Inval = 28,
    Io = 29,
    IsConn = 30,
    IsDir = 31,
    Loop = 32,
    MFile = 33,
    MLink = 34,
    MsgSize = 35,
    Multihop = 36,
    NameTooLong = 37,
    NetDown = 38,
    NetReset = 39,
    NetUnreach = 40,
    NFile = 41,
    NoBufs = 42,
    NoDev = 43,
    NoEnt = 44,
    NoExec = 45,
    NoLck = 46,
    NoLink = 47,
    NoMem = 48,
    NoMsg = 49,
    NoProtoOpt = 50,
    NoSpc = 51,
    NoSys = 52,
    NotConn = 53,
    NotDir = 54,
    NotEmpty = 55,
    NotRecoverable = 56,
    NotSock = 57,
    NotSup = 58,
    NoTty = 59,
    NxIo = 60,
    Overflow = 61,
    OwnerDead = 62,
    Perm = 63,
    Pipe = 64,
    Proto = 65,
    ProtoNoSupport = 66,
    Prototype = 67,
    Range = 68,
    RoFs = 69,
    SPipe = 70,
    Srch = 71,
    Stale = 72,
    TimedOut = 73,
    TxtBsy = 74,
    XDev = 75,
    NotCapable = 76,
}

impl Errno {
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// Decode a wire error number (used by the reverse-FD protocol, where
    /// negative results carry `-errno`). Unknown numbers map to `Io`.
    pub fn from_code(code: u16) -> Errno {
        if code >= 1 && code <= 76 {
            // Discriminants are dense in [1, 76].
            unsafe { core::mem::transmute(code) }
        } else {
            Errno::Io
        }
    }
}

pub type Result<T> = core::result::Result<T, Errno>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(Errno::BadF.code(), 8);
        assert_eq!(Errno::Inval.code(), 28);
        assert_eq!(Errno::NoSys.code(), 52);
        assert_eq!(Errno::NotCapable.code(), 76);
    }

    #[test]
    fn round_trips_through_wire_code() {
        for code in 1..=76u16 {
            assert_eq!(Errno::from_code(code).code(), code);
        }
        assert_eq!(Errno::from_code(0), Errno::Io);
        assert_eq!(Errno::from_code(500), Errno::Io);
    }
}
