//! Big-endian byte primitives shared by the order codec and the lobby
//! datagram layer.
//!
//! All multi-byte integers on the wire are big-endian. Strings are
//! nul-terminated byte blobs bounded by a per-field maximum; a string that
//! fills its whole window without a terminator is truncated and a terminator
//! is forced, matching the behavior of the historical clients.

use std::fmt;

/// Errors produced by checked wire reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    /// The buffer ended before the requested value could be read.
    UnexpectedEnd {
        /// How many bytes the read needed.
        needed: usize,
        /// How many bytes were actually left.
        remaining: usize,
    },
    /// A bounded string had no nul terminator within the remaining buffer.
    UnterminatedString {
        /// The maximum window the string was allowed to occupy.
        max: usize,
    },
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEnd { needed, remaining } => {
                write!(
                    f,
                    "unexpected end of buffer: needed {needed} bytes, {remaining} remaining"
                )
            }
            Self::UnterminatedString { max } => {
                write!(f, "string not nul-terminated within {max} bytes")
            }
        }
    }
}

impl std::error::Error for WireError {}

/// A checked, forward-only cursor over a received byte buffer.
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    /// Creates a reader over the whole buffer.
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    /// True once every byte has been consumed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        let remaining = self.remaining();
        if n > remaining {
            return Err(WireError::UnexpectedEnd {
                needed: n,
                remaining,
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Reads one byte.
    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    /// Reads a big-endian `u16`.
    pub fn read_u16(&mut self) -> Result<u16, WireError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    /// Reads a big-endian `u32`.
    pub fn read_u32(&mut self) -> Result<u32, WireError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads a big-endian `i32`.
    pub fn read_i32(&mut self) -> Result<i32, WireError> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads exactly `n` raw bytes.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        self.take(n)
    }

    /// Reads a nul-terminated string occupying at most `max` bytes
    /// (terminator included).
    ///
    /// If the terminator appears within the window, the cursor advances past
    /// it. If the window is full (`max` bytes available, none of them nul),
    /// all `max` bytes are consumed and the last one is treated as a forced
    /// terminator, like the historical `strmlen(s, max)` handling. A window
    /// shorter than `max` with no terminator is an error: the sender always
    /// terminates within the bound.
    ///
    /// Invalid UTF-8 is replaced lossily; the wire format predates any
    /// encoding guarantee.
    pub fn read_bounded_string(&mut self, max: usize) -> Result<String, WireError> {
        let window = max.min(self.remaining());
        let bytes = &self.buf[self.pos..self.pos + window];
        match bytes.iter().position(|&b| b == 0) {
            Some(nul) => {
                let text = String::from_utf8_lossy(&bytes[..nul]).into_owned();
                self.pos += nul + 1;
                Ok(text)
            }
            None if window == max && max > 0 => {
                // Full window, no terminator: truncate and force one.
                let text = String::from_utf8_lossy(&bytes[..max - 1]).into_owned();
                self.pos += max;
                Ok(text)
            }
            None => Err(WireError::UnterminatedString { max }),
        }
    }
}

/// An append-only builder for outbound payloads.
#[derive(Debug, Default, Clone)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    /// Creates an empty writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a writer with room for `capacity` bytes.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Bytes written so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True if nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Appends one byte.
    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    /// Appends a big-endian `u16`.
    pub fn write_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// Appends a big-endian `u32`.
    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// Appends a big-endian `i32`.
    pub fn write_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// Appends raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Appends `text` truncated to `max - 1` bytes, always followed by a
    /// nul terminator. The symmetric read is
    /// [`WireReader::read_bounded_string`].
    pub fn write_bounded_string(&mut self, text: &str, max: usize) {
        debug_assert!(max > 0);
        let limit = max.saturating_sub(1);
        let mut bytes = text.as_bytes();
        // Never emit an interior nul; it would shift the implied length.
        if let Some(nul) = bytes.iter().position(|&b| b == 0) {
            bytes = &bytes[..nul];
        }
        let take = bytes.len().min(limit);
        self.buf.extend_from_slice(&bytes[..take]);
        self.buf.push(0);
    }

    /// Consumes the writer, yielding the built buffer.
    #[must_use]
    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }

    /// Borrows the bytes written so far.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn integer_round_trips() {
        let mut w = WireWriter::new();
        w.write_u8(0xAB);
        w.write_u16(0x1234);
        w.write_u32(0xDEAD_BEEF);
        w.write_i32(-42);
        let buf = w.into_vec();
        assert_eq!(buf.len(), 11);

        let mut r = WireReader::new(&buf);
        assert_eq!(r.read_u8().unwrap(), 0xAB);
        assert_eq!(r.read_u16().unwrap(), 0x1234);
        assert_eq!(r.read_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(r.read_i32().unwrap(), -42);
        assert!(r.is_empty());
    }

    #[test]
    fn integers_are_big_endian() {
        let mut w = WireWriter::new();
        w.write_u32(0x0102_0304);
        assert_eq!(w.as_slice(), &[1, 2, 3, 4]);
    }

    #[test]
    fn short_read_is_an_error() {
        let mut r = WireReader::new(&[0, 1]);
        assert_eq!(
            r.read_u32(),
            Err(WireError::UnexpectedEnd {
                needed: 4,
                remaining: 2
            })
        );
    }

    #[test]
    fn bounded_string_round_trip() {
        let mut w = WireWriter::new();
        w.write_bounded_string("alice", 32);
        w.write_u32(7);
        let buf = w.into_vec();
        assert_eq!(buf.len(), 5 + 1 + 4);

        let mut r = WireReader::new(&buf);
        assert_eq!(r.read_bounded_string(32).unwrap(), "alice");
        assert_eq!(r.read_u32().unwrap(), 7);
    }

    #[test]
    fn bounded_string_truncates_on_write() {
        let mut w = WireWriter::new();
        w.write_bounded_string("abcdefgh", 4);
        assert_eq!(w.as_slice(), b"abc\0");
    }

    #[test]
    fn bounded_string_drops_interior_nul() {
        let mut w = WireWriter::new();
        w.write_bounded_string("ab\0cd", 32);
        assert_eq!(w.as_slice(), b"ab\0");
    }

    #[test]
    fn full_window_without_terminator_is_truncated() {
        let mut r = WireReader::new(b"abcdwxyz");
        let text = r.read_bounded_string(4).unwrap();
        assert_eq!(text, "abc");
        // The whole window is consumed, the tail is intact.
        assert_eq!(r.read_bytes(4).unwrap(), b"wxyz");
    }

    #[test]
    fn short_window_without_terminator_is_an_error() {
        let mut r = WireReader::new(b"ab");
        assert_eq!(
            r.read_bounded_string(32),
            Err(WireError::UnterminatedString { max: 32 })
        );
    }

    #[test]
    fn empty_string_is_a_single_nul() {
        let mut w = WireWriter::new();
        w.write_bounded_string("", 32);
        assert_eq!(w.as_slice(), &[0]);
        let buf = w.into_vec();
        let mut r = WireReader::new(&buf);
        assert_eq!(r.read_bounded_string(32).unwrap(), "");
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let mut r = WireReader::new(&[0xFF, 0xFE, 0]);
        let text = r.read_bounded_string(8).unwrap();
        assert_eq!(text, "\u{FFFD}\u{FFFD}");
    }
}
