//! Kernel-side multiplexer of a reverse channel.
//!
//! The server process holds one end of a stream socketpair; the kernel holds
//! the other end here. Requests go out serialized (at most one outstanding),
//! responses and unsolicited "gratuitous" readiness messages come back on
//! the same byte stream, parsed in two phases (fixed header, then body) and
//! tolerant of partial arrival.

use alloc::sync::{Arc, Weak};
use alloc::vec;
use alloc::vec::Vec;
use spin::Mutex;

use super::pseudo_fd::PseudoFd;
use super::reverse_proto::{
    PseudoFdId, Request, Response, MAX_INLINE_PAYLOAD, RESPONSE_HEADER_SIZE,
};
use super::unixsock::UnixSock;
use super::FdHandle;
use super::Fd;
use crate::abi::types::FileType;
use crate::abi::Errno;
use crate::sync::Cv;

struct ParseState {
    bytes_read: usize,
    header: [u8; RESPONSE_HEADER_SIZE],
    body: Vec<u8>,
}

pub struct ReverseFd {
    sock: Arc<UnixSock>,
    self_weak: Weak<ReverseFd>,
    pseudos: Mutex<Vec<Weak<PseudoFd>>>,
    parse: Mutex<ParseState>,
    /// Request gate: at most one outstanding request per channel.
    sending_request: Mutex<bool>,
    response_arrived_cv: Cv,
    request_done_cv: Cv,
    pending_response: Mutex<Option<(Response, Vec<u8>)>>,
}

impl ReverseFd {
    /// Build a fresh channel: the returned first handle is the server's
    /// descriptor, the second is the pseudo root of the given filetype
    /// served over it.
    pub fn create_channel(root_filetype: FileType) -> (FdHandle, FdHandle) {
        let (server, kernel) = UnixSock::pair(FileType::SocketStream);
        let reverse = Arc::new_cyclic(|weak| ReverseFd {
            sock: Arc::clone(&kernel),
            self_weak: weak.clone(),
            pseudos: Mutex::new(Vec::new()),
            parse: Mutex::new(ParseState {
                bytes_read: 0,
                header: [0; RESPONSE_HEADER_SIZE],
                body: Vec::new(),
            }),
            sending_request: Mutex::new(false),
            response_arrived_cv: Cv::new(),
            request_done_cv: Cv::new(),
            pending_response: Mutex::new(None),
        });
        kernel.set_incoming_hook(Arc::downgrade(&reverse));

        let root = PseudoFd::new(0, reverse, root_filetype, 0, "pseudo_root");
        (server, root)
    }

    pub fn subscribe_fd_read_events(&self, fd: &Arc<PseudoFd>) {
        let mut pseudos = self.pseudos.lock();
        pseudos.retain(|w| w.strong_count() > 0);
        pseudos.push(Arc::downgrade(fd));
    }

    fn get_pseudo(&self, pseudo_id: PseudoFdId) -> Option<Arc<PseudoFd>> {
        let mut pseudos = self.pseudos.lock();
        pseudos.retain(|w| w.strong_count() > 0);
        pseudos
            .iter()
            .filter_map(|w| w.upgrade())
            .find(|p| p.pseudo_id() == pseudo_id)
    }

    fn handle_gratuitous_message(&self, response: Response) {
        let pseudo_id = response.result as PseudoFdId;
        let Some(pseudo) = self.get_pseudo(pseudo_id) else {
            // Pseudo descriptor already closed; nothing cares.
            return;
        };
        if response.flags == 1 {
            pseudo.became_readable();
        }
    }

    /// Drain whatever bytes are queued on the socket. Called whenever the
    /// server pushes data our way; never blocks.
    pub fn have_bytes_received(&self) {
        loop {
            if self.sock.bytes_readable() == 0 {
                if self.sock.peer().is_none() {
                    // Server went away; a thread waiting for a reply must
                    // not wait forever.
                    self.response_arrived_cv.notify();
                }
                return;
            }
            let mut parse = self.parse.lock();

            if parse.bytes_read < RESPONSE_HEADER_SIZE {
                let offset = parse.bytes_read;
                let read = self.sock.read_queued(&mut parse.header[offset..]);
                parse.bytes_read += read;
                if parse.bytes_read < RESPONSE_HEADER_SIZE {
                    // Awaiting the rest of the header.
                    debug_assert_eq!(self.sock.bytes_readable(), 0);
                    return;
                }
            }

            let response = Response::decode(&parse.header);
            let body_len = response.send_length as usize;
            if parse.body.len() != body_len {
                parse.body = vec![0; body_len];
            }
            let body_read = parse.bytes_read - RESPONSE_HEADER_SIZE;
            if body_read < body_len {
                let read = self.sock.read_queued(&mut parse.body[body_read..]);
                parse.bytes_read += read;
                if parse.bytes_read < RESPONSE_HEADER_SIZE + body_len {
                    debug_assert_eq!(self.sock.bytes_readable(), 0);
                    return;
                }
            }

            // A complete message.
            let body = core::mem::take(&mut parse.body);
            parse.bytes_read = 0;
            drop(parse);

            if response.gratuitous != 0 {
                self.handle_gratuitous_message(response);
                // Continue draining: more messages may be queued behind it.
            } else {
                assert!(
                    *self.sending_request.lock(),
                    "reply arrived with no request outstanding"
                );
                *self.pending_response.lock() = Some((response, body));
                self.response_arrived_cv.notify();
                return;
            }
        }
    }

    /// Send one request and block until its reply arrives. Concurrent
    /// callers serialize on the request gate.
    pub fn send_request(
        &self,
        request: &Request,
        payload: &[u8],
    ) -> Result<(Response, Vec<u8>), Errno> {
        assert!(payload.len() <= MAX_INLINE_PAYLOAD);
        assert_eq!(payload.len(), request.send_length as usize);

        loop {
            let mut sending = self.sending_request.lock();
            if !*sending {
                *sending = true;
                break;
            }
            drop(sending);
            self.request_done_cv.wait();
        }

        let result = self.send_and_await(request, payload);

        *self.sending_request.lock() = false;
        self.request_done_cv.notify();

        // Gratuitous messages may have queued up behind the reply; drain
        // them before anyone else runs.
        self.have_bytes_received();

        result
    }

    fn send_and_await(
        &self,
        request: &Request,
        payload: &[u8],
    ) -> Result<(Response, Vec<u8>), Errno> {
        let mut wire = Vec::with_capacity(request.encode().len() + payload.len());
        wire.extend_from_slice(&request.encode());
        wire.extend_from_slice(payload);
        self.sock.write(&wire).map_err(|_| Errno::Io)?;

        loop {
            if let Some((response, body)) = self.pending_response.lock().take() {
                return Ok((response, body));
            }
            if self.sock.peer().is_none() {
                // Server vanished mid-request.
                return Err(Errno::Io);
            }
            self.response_arrived_cv.wait();
        }
    }
}
