//! Wire format of the reverse-FD RPC channel.
//!
//! Fixed-size little-endian header records with a variable payload tail.
//! Inline payloads are limited to 255 bytes, which is why the length fields
//! are a single byte. A response with the gratuitous marker set is not a
//! reply but a spontaneous readiness notification from the server.

pub type PseudoFdId = u64;

pub const REQUEST_HEADER_SIZE: usize = 35;
pub const RESPONSE_HEADER_SIZE: usize = 19;
pub const MAX_INLINE_PAYLOAD: usize = 255;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Op {
    Lookup = 1,
    Open = 2,
    Create = 3,
    Readdir = 4,
    Pread = 5,
    Pwrite = 6,
    StatFget = 7,
    StatFput = 8,
    StatPut = 9,
    Rename = 10,
    Link = 11,
    Symlink = 12,
    Readlink = 13,
    Unlink = 14,
    Close = 15,
    Datasync = 16,
    Sync = 17,
    Allocate = 18,
    SockShutdown = 19,
    SockRecv = 20,
    SockSend = 21,
    IsReadable = 22,
}

impl Op {
    pub fn from_raw(raw: u8) -> Option<Op> {
        if (1..=22).contains(&raw) {
            Some(unsafe { core::mem::transmute(raw) })
        } else {
            None
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Request {
    pub pseudofd: PseudoFdId,
    pub op: Op,
    pub inode: u64,
    pub flags: u64,
    pub offset: u64,
    /// Payload bytes following this header.
    pub send_length: u8,
    /// Payload bytes the caller wants back.
    pub recv_length: u8,
}

impl Request {
    pub fn new(pseudofd: PseudoFdId, op: Op) -> Request {
        Request {
            pseudofd,
            op,
            inode: 0,
            flags: 0,
            offset: 0,
            send_length: 0,
            recv_length: 0,
        }
    }

    pub fn encode(&self) -> [u8; REQUEST_HEADER_SIZE] {
        let mut buf = [0u8; REQUEST_HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.pseudofd.to_le_bytes());
        buf[8] = self.op as u8;
        buf[9..17].copy_from_slice(&self.inode.to_le_bytes());
        buf[17..25].copy_from_slice(&self.flags.to_le_bytes());
        buf[25..33].copy_from_slice(&self.offset.to_le_bytes());
        buf[33] = self.send_length;
        buf[34] = self.recv_length;
        buf
    }

    pub fn decode(buf: &[u8; REQUEST_HEADER_SIZE]) -> Option<Request> {
        Some(Request {
            pseudofd: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            op: Op::from_raw(buf[8])?,
            inode: u64::from_le_bytes(buf[9..17].try_into().unwrap()),
            flags: u64::from_le_bytes(buf[17..25].try_into().unwrap()),
            offset: u64::from_le_bytes(buf[25..33].try_into().unwrap()),
            send_length: buf[33],
            recv_length: buf[34],
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Response {
    /// Negative values carry `-errno`; non-negative values carry the
    /// operation's natural result (inode, new pseudofd id, byte count, ...).
    pub result: i64,
    pub flags: u64,
    /// Nonzero marks an unsolicited notification rather than a reply.
    pub gratuitous: u8,
    pub send_length: u8,
    pub recv_length: u8,
}

impl Response {
    pub fn encode(&self) -> [u8; RESPONSE_HEADER_SIZE] {
        let mut buf = [0u8; RESPONSE_HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.result.to_le_bytes());
        buf[8..16].copy_from_slice(&self.flags.to_le_bytes());
        buf[16] = self.gratuitous;
        buf[17] = self.send_length;
        buf[18] = self.recv_length;
        buf
    }

    pub fn decode(buf: &[u8; RESPONSE_HEADER_SIZE]) -> Response {
        Response {
            result: i64::from_le_bytes(buf[0..8].try_into().unwrap()),
            flags: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            gratuitous: buf[16],
            send_length: buf[17],
            recv_length: buf[18],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trip() {
        let req = Request {
            pseudofd: 0x0102_0304_0506_0708,
            op: Op::Pread,
            inode: 42,
            flags: 7,
            offset: 0x1000,
            send_length: 0,
            recv_length: 255,
        };
        let decoded = Request::decode(&req.encode()).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn response_round_trip_negative_result() {
        let resp = Response {
            result: -44, // -ENOENT
            flags: 0x20,
            gratuitous: 0,
            send_length: 3,
            recv_length: 0,
        };
        assert_eq!(Response::decode(&resp.encode()), resp);
    }

    #[test]
    fn unknown_op_is_rejected() {
        let mut buf = Request::new(1, Op::Close).encode();
        buf[8] = 99;
        assert!(Request::decode(&buf).is_none());
    }

    #[test]
    fn op_tags_round_trip() {
        for raw in 1..=22u8 {
            assert_eq!(Op::from_raw(raw).unwrap() as u8, raw);
        }
        assert!(Op::from_raw(0).is_none());
        assert!(Op::from_raw(23).is_none());
    }
}
