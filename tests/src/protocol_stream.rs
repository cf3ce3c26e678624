//! Reverse-channel stream reassembly.
//!
//! The kernel parses the server's byte stream in two phases (header, then
//! body) and must tolerate messages arriving in arbitrary fragments, with
//! gratuitous notifications interleaved between replies.

#[cfg(test)]
mod tests {
    use crate::reverse_proto::{Response, RESPONSE_HEADER_SIZE};

    /// Minimal reimplementation of the two-phase parser over a byte queue.
    struct StreamParser {
        buffer: Vec<u8>,
        messages: Vec<(Response, Vec<u8>)>,
    }

    impl StreamParser {
        fn new() -> Self {
            Self {
                buffer: Vec::new(),
                messages: Vec::new(),
            }
        }

        fn push(&mut self, bytes: &[u8]) {
            self.buffer.extend_from_slice(bytes);
            loop {
                if self.buffer.len() < RESPONSE_HEADER_SIZE {
                    return;
                }
                let header: [u8; RESPONSE_HEADER_SIZE] =
                    self.buffer[..RESPONSE_HEADER_SIZE].try_into().unwrap();
                let response = Response::decode(&header);
                let total = RESPONSE_HEADER_SIZE + response.send_length as usize;
                if self.buffer.len() < total {
                    return;
                }
                let body = self.buffer[RESPONSE_HEADER_SIZE..total].to_vec();
                self.buffer.drain(..total);
                self.messages.push((response, body));
            }
        }
    }

    fn message(result: i64, gratuitous: u8, body: &[u8]) -> Vec<u8> {
        let response = Response {
            result,
            flags: 0,
            gratuitous,
            send_length: body.len() as u8,
            recv_length: 0,
        };
        let mut bytes = response.encode().to_vec();
        bytes.extend_from_slice(body);
        bytes
    }

    #[test]
    fn one_message_in_one_fragment() {
        let mut parser = StreamParser::new();
        parser.push(&message(5, 0, b"abc"));
        assert_eq!(parser.messages.len(), 1);
        assert_eq!(parser.messages[0].0.result, 5);
        assert_eq!(parser.messages[0].1, b"abc");
    }

    #[test]
    fn byte_at_a_time_arrival() {
        let mut parser = StreamParser::new();
        let wire = message(1, 0, b"payload");
        for &b in &wire {
            parser.push(&[b]);
        }
        assert_eq!(parser.messages.len(), 1);
        assert_eq!(parser.messages[0].1, b"payload");
    }

    #[test]
    fn reply_with_batched_gratuitous_messages() {
        // A reply and two gratuitous notifications can land in one batch;
        // all three must come out, in order.
        let mut parser = StreamParser::new();
        let mut wire = message(0, 0, b"reply");
        wire.extend_from_slice(&message(7, 1, b""));
        wire.extend_from_slice(&message(9, 1, b""));
        parser.push(&wire);
        assert_eq!(parser.messages.len(), 3);
        assert_eq!(parser.messages[0].0.gratuitous, 0);
        assert_eq!(parser.messages[1].0.gratuitous, 1);
        assert_eq!(parser.messages[1].0.result, 7);
        assert_eq!(parser.messages[2].0.result, 9);
    }

    #[test]
    fn split_inside_the_header() {
        let mut parser = StreamParser::new();
        let wire = message(3, 0, b"xy");
        parser.push(&wire[..RESPONSE_HEADER_SIZE / 2]);
        assert!(parser.messages.is_empty());
        parser.push(&wire[RESPONSE_HEADER_SIZE / 2..]);
        assert_eq!(parser.messages.len(), 1);
        assert_eq!(parser.messages[0].1, b"xy");
    }

    #[test]
    fn empty_body_messages_need_no_extra_bytes() {
        let mut parser = StreamParser::new();
        parser.push(&message(-8, 0, b""));
        assert_eq!(parser.messages.len(), 1);
        assert_eq!(parser.messages[0].0.result, -8);
        assert!(parser.messages[0].1.is_empty());
    }
}
