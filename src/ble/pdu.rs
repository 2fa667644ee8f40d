//! HAP-BLE PDU codec ([HAP] Section 7.3.3, `spec.md` §3/§4.C8).
//!
//! A PDU's control field selects whether fixed params are a request
//! header, a response header, or a continuation header; this module only
//! encodes/decodes the framing, never interprets the body.

use crate::error::{Error, Result};

/// HAP-BLE opcodes ([HAP] Section 7.3.5.2, Table 7-38). `spec.md` §4.C10
/// lists the subset the procedure layer dispatches on.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum Opcode {
    ServiceSignatureRead = 0x01,
    CharacteristicSignatureRead = 0x02,
    CharacteristicWrite = 0x03,
    CharacteristicRead = 0x04,
    CharacteristicTimedWrite = 0x05,
    CharacteristicExecuteWrite = 0x06,
    ServiceSignatureRead2 = 0x07,
    CharacteristicConfiguration = 0x08,
    ProtocolConfiguration = 0x09,
    Token = 0x10,
    TokenUpdate = 0x11,
    Info = 0x12,
}

impl TryFrom<u8> for Opcode {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self> {
        Ok(match v {
            0x01 => Self::ServiceSignatureRead,
            0x02 => Self::CharacteristicSignatureRead,
            0x03 => Self::CharacteristicWrite,
            0x04 => Self::CharacteristicRead,
            0x05 => Self::CharacteristicTimedWrite,
            0x06 => Self::CharacteristicExecuteWrite,
            0x07 => Self::ServiceSignatureRead2,
            0x08 => Self::CharacteristicConfiguration,
            0x09 => Self::ProtocolConfiguration,
            0x10 => Self::Token,
            0x11 => Self::TokenUpdate,
            0x12 => Self::Info,
            _ => return Err(Error::InvalidData),
        })
    }
}

const CONTROL_FRAGMENT: u8 = 1 << 7;
const CONTROL_IID_64: u8 = 1 << 4;

/// Either a request or response first fragment, or a continuation
/// fragment, per the control field's encoding ([HAP] Section 7.3.3.2).
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Header {
    Request { opcode: u8, tid: u8, iid: u64 },
    Response { tid: u8, status: u8 },
    Continuation { tid: u8 },
}

/// One parsed PDU fragment: a header plus whatever body bytes this
/// fragment carries. `total_body_len` is only present on the first
/// fragment of a multi-fragment PDU.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Fragment {
    pub header: Header,
    pub total_body_len: Option<u16>,
    pub body: Vec<u8>,
}

/// Parses one PDU fragment from `buf`. Does not know whether this is the
/// first fragment of a transaction; that is [`crate::ble::transaction`]'s
/// job.
///
/// # Errors
///
/// [`Error::InvalidData`] if the buffer is too short for its header, or
/// a first fragment declares `total_body_len` smaller than the embedded
/// body slice.
pub fn decode(buf: &[u8], is_first: bool) -> Result<Fragment> {
    if buf.is_empty() {
        return Err(Error::InvalidData);
    }
    let control = buf[0];
    let is_continuation = control & CONTROL_FRAGMENT != 0;
    let wide_iid = control & CONTROL_IID_64 != 0;

    if is_first && !is_continuation {
        // Request: {opcode, tid, iid (2 or 8 bytes)}.
        let iid_len = if wide_iid { 8 } else { 2 };
        let min = 1 + 2 + iid_len;
        if buf.len() < min {
            return Err(Error::InvalidData);
        }
        let opcode = buf[1];
        let tid = buf[2];
        let iid = if wide_iid {
            u64::from_le_bytes(buf[3..11].try_into().unwrap())
        } else {
            u64::from(u16::from_le_bytes(buf[3..5].try_into().unwrap()))
        };
        let rest = &buf[min..];
        parse_body(rest, Header::Request { opcode, tid, iid })
    } else if is_first {
        // Response: {tid, status}.
        if buf.len() < 3 {
            return Err(Error::InvalidData);
        }
        let tid = buf[1];
        let status = buf[2];
        parse_body(&buf[3..], Header::Response { tid, status })
    } else {
        // Continuation: {tid}.
        if buf.len() < 2 {
            return Err(Error::InvalidData);
        }
        let tid = buf[1];
        Ok(Fragment {
            header: Header::Continuation { tid },
            total_body_len: None,
            body: buf[2..].to_vec(),
        })
    }
}

fn parse_body(rest: &[u8], header: Header) -> Result<Fragment> {
    if rest.is_empty() {
        return Ok(Fragment {
            header,
            total_body_len: None,
            body: Vec::new(),
        });
    }
    if rest.len() < 2 {
        return Err(Error::InvalidData);
    }
    let total_body_len = u16::from_le_bytes([rest[0], rest[1]]);
    let body = rest[2..].to_vec();
    if usize::from(total_body_len) < body.len() {
        return Err(Error::InvalidData);
    }
    Ok(Fragment {
        header,
        total_body_len: Some(total_body_len),
        body,
    })
}

/// Encodes a request first-fragment header plus as much of `body` as fits
/// in `max_len`, returning the encoded bytes and the number of body bytes
/// consumed.
#[must_use]
pub fn encode_request_first(opcode: u8, tid: u8, iid: u16, body: &[u8], max_len: usize) -> (Vec<u8>, usize) {
    let header_len = 1 + 1 + 1 + 2 + if body.is_empty() { 0 } else { 2 };
    let avail = max_len.saturating_sub(header_len);
    let take = body.len().min(avail);
    let mut out = Vec::with_capacity(header_len + take);
    out.push(0);
    out.push(opcode);
    out.push(tid);
    out.extend_from_slice(&iid.to_le_bytes());
    if !body.is_empty() {
        out.extend_from_slice(&(body.len() as u16).to_le_bytes());
        out.extend_from_slice(&body[..take]);
    }
    (out, take)
}

/// Encodes a response first-fragment header plus as much of `body` as
/// fits in `max_len`, returning the encoded bytes and the number of body
/// bytes consumed.
#[must_use]
pub fn encode_response_first(tid: u8, status: u8, body: &[u8], max_len: usize) -> (Vec<u8>, usize) {
    let header_len = 1 + 1 + 1 + if body.is_empty() { 0 } else { 2 };
    let avail = max_len.saturating_sub(header_len);
    let take = body.len().min(avail);
    let mut out = Vec::with_capacity(header_len + take);
    out.push(0);
    out.push(tid);
    out.push(status);
    if !body.is_empty() {
        out.extend_from_slice(&(body.len() as u16).to_le_bytes());
        out.extend_from_slice(&body[..take]);
    }
    (out, take)
}

/// Encodes a continuation fragment carrying up to `max_len - 2` body
/// bytes starting at `offset`, returning the encoded bytes and the new
/// offset.
#[must_use]
pub fn encode_continuation(tid: u8, body: &[u8], offset: usize, max_len: usize) -> (Vec<u8>, usize) {
    let avail = max_len.saturating_sub(2);
    let take = (body.len() - offset).min(avail);
    let mut out = Vec::with_capacity(2 + take);
    out.push(CONTROL_FRAGMENT);
    out.push(tid);
    out.extend_from_slice(&body[offset..offset + take]);
    (out, offset + take)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_a_short_request_with_no_body() {
        let buf = [0x00, 0x03, 0x07, 0x06, 0x00];
        let f = decode(&buf, true).unwrap();
        assert_eq!(
            f.header,
            Header::Request {
                opcode: 0x03,
                tid: 0x07,
                iid: 6
            }
        );
        assert!(f.body.is_empty());
    }

    #[test]
    fn rejects_total_body_len_shorter_than_embedded_body() {
        let mut buf = vec![0x00, 0x03, 0x07, 0x06, 0x00];
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&[1, 2, 3]);
        assert_eq!(decode(&buf, true).unwrap_err(), Error::InvalidData);
    }

    #[test]
    fn encode_decode_request_round_trips() {
        let body = vec![9u8; 10];
        let (bytes, consumed) = encode_request_first(0x03, 5, 42, &body, 64);
        assert_eq!(consumed, body.len());
        let f = decode(&bytes, true).unwrap();
        assert_eq!(f.body, body);
        assert_eq!(f.total_body_len, Some(10));
    }

    #[test]
    fn continuation_round_trips_and_advances_offset() {
        let body = vec![1u8; 300];
        let (first, consumed) = encode_request_first(0x03, 1, 1, &body, 20);
        assert!(consumed < body.len());
        let (cont, offset) = encode_continuation(1, &body, consumed, 20);
        let f = decode(&first, true).unwrap();
        assert_eq!(f.total_body_len, Some(body.len() as u16));
        let fc = decode(&cont, false).unwrap();
        assert_eq!(fc.header, Header::Continuation { tid: 1 });
        assert!(offset > consumed);
    }
}
