//! Item-oriented TLV8 reader/writer ([HAP] Section 12.1).
//!
//! A TLV8 stream is a sequence of `{type: u8, length: u8, value: bytes}`
//! items. A logical item whose value exceeds 255 bytes is split into
//! consecutive fragments sharing the same type, each (but the last) of
//! length exactly 255; a length of 255 therefore means "more fragments
//! follow" rather than "the value is exactly 255 bytes".
//!
//! The reader borrows the caller's buffer and never allocates except to
//! merge a value that was split across fragments (the "parse-into-scratch"
//! alternative to in-place buffer rewriting -- see the crate's design
//! notes). The writer never allocates at all: it is handed a
//! caller-provided `&mut [u8]` and fails with [`Error::OutOfResources`]
//! rather than growing it.

#![warn(missing_debug_implementations)]

use std::fmt;

use thiserror::Error;

/// TLV8 fragment length at which a continuation is required.
const MAX_FRAGMENT: usize = 255;

#[derive(Debug, Error, Eq, PartialEq)]
pub enum Error {
    #[error("TLV8 stream is truncated or malformed")]
    InvalidData,
    #[error("destination buffer does not have enough remaining capacity")]
    OutOfResources,
}

/// One raw (type, length-prefixed) fragment location within the source
/// buffer.
#[derive(Clone, Copy, Debug)]
struct Fragment {
    typ: u8,
    start: usize,
    len: u8,
}

/// A TLV8 reader over a borrowed byte slice.
///
/// Each logical item (a run of same-type fragments) is delivered at most
/// once: calling [`Reader::get`] or iterating via [`Reader::items`] marks
/// the underlying fragments consumed, so a second request for the same
/// type after an explicit `get` will not see it again, while enumeration
/// via `items` always walks the full, not-yet-consumed list in order.
pub struct Reader<'a> {
    buf: &'a [u8],
    fragments: Vec<Fragment>,
    consumed: Vec<bool>,
}

impl fmt::Debug for Reader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reader")
            .field("fragments", &self.fragments.len())
            .finish_non_exhaustive()
    }
}

impl<'a> Reader<'a> {
    /// Parses a buffer's fragment table. Does not copy any value bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidData`] if a length byte claims more bytes
    /// than remain in `buf`.
    pub fn new(buf: &'a [u8]) -> Result<Self, Error> {
        let mut fragments = Vec::new();
        let mut i = 0;
        while i < buf.len() {
            if i + 2 > buf.len() {
                return Err(Error::InvalidData);
            }
            let typ = buf[i];
            let len = buf[i + 1];
            let start = i + 2;
            let end = start + len as usize;
            if end > buf.len() {
                return Err(Error::InvalidData);
            }
            fragments.push(Fragment { typ, start, len });
            i = end;
        }
        let consumed = vec![false; fragments.len()];
        Ok(Self {
            buf,
            fragments,
            consumed,
        })
    }

    /// Returns the merged value for the first not-yet-consumed logical item
    /// of the given type, marking all of its fragments (and only those) as
    /// consumed.
    ///
    /// Merging stops at the first fragment shorter than 255 bytes, or at a
    /// fragment of a different type, whichever comes first.
    #[must_use]
    pub fn get(&mut self, typ: u8) -> Option<Vec<u8>> {
        let first = (0..self.fragments.len())
            .find(|&i| !self.consumed[i] && self.fragments[i].typ == typ)?;
        let mut out = Vec::new();
        let mut i = first;
        loop {
            let frag = self.fragments[i];
            out.extend_from_slice(&self.buf[frag.start..frag.start + frag.len as usize]);
            self.consumed[i] = true;
            if frag.len as usize != MAX_FRAGMENT {
                break;
            }
            // A fragment of exactly 255 bytes promises a continuation:
            // the very next fragment of the same type.
            let Some(next) = (i + 1..self.fragments.len()).find(|&j| self.fragments[j].typ == typ)
            else {
                break;
            };
            if next != i + 1 {
                break; // not contiguous: treat as end of this logical item
            }
            i = next;
        }
        Some(out)
    }

    /// Iterates over all not-yet-consumed logical items, in stream order,
    /// consuming each as it is yielded.
    pub fn items(&mut self) -> impl Iterator<Item = (u8, Vec<u8>)> + '_ {
        std::iter::from_fn(move || {
            let i = (0..self.fragments.len()).find(|&i| !self.consumed[i])?;
            let typ = self.fragments[i].typ;
            self.get(typ).map(|v| (typ, v))
        })
    }
}

/// A TLV8 writer over a caller-provided fixed-capacity buffer.
pub struct Writer<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl fmt::Debug for Writer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Writer")
            .field("len", &self.len)
            .field("capacity", &self.buf.len())
            .finish()
    }
}

impl<'a> Writer<'a> {
    #[must_use]
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, len: 0 }
    }

    /// Bytes written so far.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the serialized bytes written so far.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Appends one logical item, splitting it into consecutive same-type
    /// fragments of at most 255 bytes. A value whose length is an exact
    /// multiple of 255 (including zero, handled naturally by the loop
    /// below) gets a terminating zero-length fragment so the boundary is
    /// unambiguous to a reader.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfResources`] if the buffer does not have
    /// enough remaining capacity; the buffer is left unmodified past the
    /// point of the error (earlier fragments of this same call may already
    /// be written, matching the original's streaming behavior).
    pub fn append(&mut self, typ: u8, mut value: &[u8]) -> Result<(), Error> {
        loop {
            let chunk_len = value.len().min(MAX_FRAGMENT);
            self.write_fragment(typ, &value[..chunk_len])?;
            value = &value[chunk_len..];
            if chunk_len < MAX_FRAGMENT {
                break;
            }
            if value.is_empty() {
                // Exact multiple of 255: emit the terminating 0-length
                // fragment so "length 255" never goes unterminated.
                self.write_fragment(typ, &[])?;
                break;
            }
        }
        Ok(())
    }

    fn write_fragment(&mut self, typ: u8, chunk: &[u8]) -> Result<(), Error> {
        let needed = 2 + chunk.len();
        if self.len + needed > self.buf.len() {
            return Err(Error::OutOfResources);
        }
        self.buf[self.len] = typ;
        self.buf[self.len + 1] = chunk.len() as u8;
        self.buf[self.len + 2..self.len + needed].copy_from_slice(chunk);
        self.len += needed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_single_short_item() {
        let mut buf = [0u8; 16];
        let mut w = Writer::new(&mut buf);
        w.append(0x01, b"hi").unwrap();
        let mut r = Reader::new(w.as_bytes()).unwrap();
        assert_eq!(r.get(0x01).unwrap(), b"hi");
        assert!(r.get(0x01).is_none());
    }

    #[test]
    fn fragments_a_value_over_255_bytes() {
        let value: Vec<u8> = (0..300).map(|i| i as u8).collect();
        let mut buf = [0u8; 512];
        let mut w = Writer::new(&mut buf);
        w.append(0x09, &value).unwrap();
        let mut r = Reader::new(w.as_bytes()).unwrap();
        assert_eq!(r.get(0x09).unwrap(), value);
    }

    #[test]
    fn exact_multiple_of_255_gets_terminator() {
        let value = vec![7u8; 510];
        let mut buf = [0u8; 1024];
        let mut w = Writer::new(&mut buf);
        w.append(0x03, &value).unwrap();
        // Two full 255-byte fragments plus a 0-length terminator.
        assert_eq!(w.len(), (2 + 255) * 2 + 2);
        let mut r = Reader::new(w.as_bytes()).unwrap();
        assert_eq!(r.get(0x03).unwrap(), value);
    }

    #[test]
    fn out_of_resources_when_buffer_is_too_small() {
        let mut buf = [0u8; 3];
        let mut w = Writer::new(&mut buf);
        assert_eq!(w.append(0x01, b"abcd"), Err(Error::OutOfResources));
    }

    #[test]
    fn truncated_length_prefix_is_invalid() {
        assert_eq!(Reader::new(&[0x01, 0x05, 1, 2]).unwrap_err(), Error::InvalidData);
    }

    #[test]
    fn items_iterates_each_logical_item_once_in_order() {
        let mut buf = [0u8; 64];
        let mut w = Writer::new(&mut buf);
        w.append(0x01, b"a").unwrap();
        w.append(0x02, b"bb").unwrap();
        let mut r = Reader::new(w.as_bytes()).unwrap();
        let items: Vec<_> = r.items().collect();
        assert_eq!(items, vec![(0x01, b"a".to_vec()), (0x02, b"bb".to_vec())]);
    }

    proptest::proptest! {
        #[test]
        fn round_trip_arbitrary_items(items in proptest::collection::vec((proptest::num::u8::ANY, proptest::collection::vec(proptest::num::u8::ANY, 0..254)), 0..8)) {
            let mut cap = 0usize;
            for (_, v) in &items {
                let frags = (v.len() / 255) + 1;
                cap += frags * 2 + v.len();
            }
            let mut buf = vec![0u8; cap];
            let mut w = Writer::new(&mut buf);
            for (t, v) in &items {
                w.append(*t, v).unwrap();
            }
            let bytes = w.as_bytes().to_vec();
            let mut r = Reader::new(&bytes).unwrap();
            for (t, v) in &items {
                proptest::prop_assert_eq!(r.get(*t).as_deref(), Some(v.as_slice()));
            }
        }
    }
}
