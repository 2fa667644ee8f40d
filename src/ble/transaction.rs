//! BLE transaction: one request in, one response out ([HAP] Section
//! 7.3.4, `spec.md` §4.C9).

use super::pdu::{self, Fragment, Header};
use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    WaitingForInitialWrite,
    ReadingRequest,
    HandlingRequest,
    WaitingForInitialRead,
    WritingResponse,
}

/// A request being reassembled from one or more GATT writes.
#[derive(Clone, Debug, Default)]
struct Request {
    opcode: u8,
    tid: u8,
    iid: u64,
    total_len: u16,
    body: Vec<u8>,
}

/// A response pre-serialized and handed out in chunks across one or more
/// GATT reads.
#[derive(Clone, Debug, Default)]
struct Response {
    tid: u8,
    status: u8,
    body: Vec<u8>,
    offset: usize,
    first_sent: bool,
}

#[derive(Debug)]
pub struct Transaction {
    state: State,
    request: Option<Request>,
    response: Option<Response>,
    /// `tid` of the most recently completed request, kept around only to
    /// recognize the empty-body keepalive writes controllers send between
    /// request completion and the first read ([HAP] Section 7.3.4).
    last_tid: Option<u8>,
}

impl Default for Transaction {
    fn default() -> Self {
        Self {
            state: State::WaitingForInitialWrite,
            request: None,
            response: None,
            last_tid: None,
        }
    }
}

/// The result of feeding one GATT write into the transaction.
pub enum WriteOutcome {
    /// More fragments are expected.
    Incomplete,
    /// The request is fully reassembled and ready to dispatch.
    Complete { opcode: u8, tid: u8, iid: u64, body: Vec<u8> },
}

impl Transaction {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn state(&self) -> State {
        self.state
    }

    /// Feeds one GATT write. Returns [`WriteOutcome::Complete`] once the
    /// full request body has arrived.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] if called while writing a response out, or
    /// if a continuation's `tid` does not match the request in progress;
    /// [`Error::InvalidData`] for a malformed fragment or a continuation
    /// that would overflow the declared total body length.
    pub fn handle_write(&mut self, bytes: &[u8]) -> Result<WriteOutcome> {
        if self.state == State::WritingResponse {
            return Err(Error::InvalidState);
        }
        // The continuation bit on the wire, not `self.request`, decides how
        // to parse this write: a keepalive arrives as an (empty) GATT write
        // with the fragmentation bit set even though no request is being
        // reassembled right now.
        let is_continuation_wire = bytes.first().is_some_and(|b| b & 0x80 != 0);
        if is_continuation_wire && self.request.is_none() {
            let frag = pdu::decode(bytes, false)?;
            let Header::Continuation { tid } = frag.header else {
                return Err(Error::InvalidData);
            };
            if frag.body.is_empty() && Some(tid) == self.last_tid {
                return Ok(WriteOutcome::Incomplete);
            }
            return Err(Error::InvalidState);
        }
        let is_first = self.request.is_none();
        let frag = pdu::decode(bytes, is_first)?;
        match (is_first, frag.header) {
            (true, Header::Request { opcode, tid, iid }) => {
                let total_len = frag.total_body_len.unwrap_or(0);
                if usize::from(total_len) == frag.body.len() {
                    self.state = State::HandlingRequest;
                    self.last_tid = Some(tid);
                    let body = frag.body;
                    return Ok(WriteOutcome::Complete { opcode, tid, iid, body });
                }
                self.state = State::ReadingRequest;
                self.request = Some(Request {
                    opcode,
                    tid,
                    iid,
                    total_len,
                    body: frag.body,
                });
                Ok(WriteOutcome::Incomplete)
            }
            (false, Header::Continuation { tid }) => {
                let req = self.request.as_mut().ok_or(Error::InvalidState)?;
                if tid != req.tid {
                    return Err(Error::InvalidState);
                }
                if req.body.len() + frag.body.len() > usize::from(req.total_len) {
                    return Err(Error::InvalidData);
                }
                req.body.extend_from_slice(&frag.body);
                if req.body.len() == usize::from(req.total_len) {
                    self.state = State::HandlingRequest;
                    let req = self.request.take().unwrap();
                    self.last_tid = Some(req.tid);
                    return Ok(WriteOutcome::Complete {
                        opcode: req.opcode,
                        tid: req.tid,
                        iid: req.iid,
                        body: req.body,
                    });
                }
                Ok(WriteOutcome::Incomplete)
            }
            _ => Err(Error::InvalidData),
        }
    }

    /// Installs the fully-serialized response body, transitioning to
    /// `WaitingForInitialRead`.
    pub fn set_response(&mut self, tid: u8, status: u8, body: Vec<u8>) {
        self.state = State::WaitingForInitialRead;
        self.response = Some(Response {
            tid,
            status,
            body,
            offset: 0,
            first_sent: false,
        });
    }

    /// Produces the next chunk of the response for one GATT read, no
    /// larger than `max_len` bytes.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] if no response has been set yet.
    pub fn handle_read(&mut self, max_len: usize) -> Result<Vec<u8>> {
        let resp = self.response.as_mut().ok_or(Error::InvalidState)?;
        if !resp.first_sent {
            let (bytes, consumed) = pdu::encode_response_first(resp.tid, resp.status, &resp.body, max_len);
            resp.offset = consumed;
            resp.first_sent = true;
            self.state = State::WritingResponse;
            if resp.offset == resp.body.len() {
                self.reset();
            }
            return Ok(bytes);
        }
        let (bytes, new_offset) = pdu::encode_continuation(resp.tid, &resp.body, resp.offset, max_len);
        resp.offset = new_offset;
        if resp.offset == resp.body.len() {
            self.reset();
        }
        Ok(bytes)
    }

    fn reset(&mut self) {
        self.state = State::WaitingForInitialWrite;
        self.request = None;
        self.response = None;
        self.last_tid = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_fragment_request_completes_immediately() {
        let mut t = Transaction::new();
        let buf = [0x00, 0x04, 0x01, 0x06, 0x00];
        match t.handle_write(&buf).unwrap() {
            WriteOutcome::Complete { opcode, tid, iid, body } => {
                assert_eq!((opcode, tid, iid), (0x04, 1, 6));
                assert!(body.is_empty());
            }
            WriteOutcome::Incomplete => panic!("expected complete"),
        }
    }

    #[test]
    fn multi_fragment_request_reassembles() {
        let mut t = Transaction::new();
        let body = vec![7u8; 40];
        let (first, consumed) = pdu::encode_request_first(0x03, 9, 6, &body, 20);
        assert!(matches!(t.handle_write(&first).unwrap(), WriteOutcome::Incomplete));
        let (cont, _offset) = pdu::encode_continuation(9, &body, consumed, 20);
        match t.handle_write(&cont).unwrap() {
            WriteOutcome::Complete { body: got, .. } => assert_eq!(got, body),
            WriteOutcome::Incomplete => panic!("expected complete"),
        }
    }

    #[test]
    fn write_during_writing_response_is_rejected() {
        let mut t = Transaction::new();
        t.set_response(1, 0, vec![0u8; 100]);
        let _ = t.handle_read(10).unwrap();
        assert_eq!(t.state(), State::WritingResponse);
        assert_eq!(t.handle_write(&[0x00, 0x04, 0x01, 0x06, 0x00]), Err(Error::InvalidState));
    }

    #[test]
    fn empty_body_keepalive_tolerated_before_first_read() {
        let mut t = Transaction::new();
        let buf = [0x00, 0x04, 0x09, 0x06, 0x00];
        assert!(matches!(t.handle_write(&buf).unwrap(), WriteOutcome::Complete { .. }));
        t.set_response(9, 0, vec![1, 2, 3]);
        // Controller sends an empty-body continuation sharing the request's
        // tid while waiting for the accessory to produce its response.
        let keepalive = [0x80, 0x09];
        assert!(matches!(t.handle_write(&keepalive).unwrap(), WriteOutcome::Incomplete));
    }

    #[test]
    fn keepalive_with_mismatched_tid_is_rejected() {
        let mut t = Transaction::new();
        let buf = [0x00, 0x04, 0x09, 0x06, 0x00];
        t.handle_write(&buf).unwrap();
        t.set_response(9, 0, vec![1, 2, 3]);
        let keepalive = [0x80, 0x02];
        assert_eq!(t.handle_write(&keepalive), Err(Error::InvalidState));
    }

    #[test]
    fn response_reads_split_across_multiple_calls() {
        let mut t = Transaction::new();
        let body = vec![3u8; 30];
        t.set_response(5, 0, body.clone());
        let mut collected = Vec::new();
        let first = t.handle_read(10).unwrap();
        let f = pdu::decode(&first, true).unwrap();
        collected.extend_from_slice(&f.body);
        while t.state() == State::WritingResponse {
            let chunk = t.handle_read(10).unwrap();
            let fc = pdu::decode(&chunk, false).unwrap();
            collected.extend_from_slice(&fc.body);
        }
        assert_eq!(collected, body);
    }
}
