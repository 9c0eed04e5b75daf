//! Position-tracked XDR cursor over a fixed-capacity buffer.
//!
//! A `WireCursor` owns its buffer. It is either in encode mode (writing from
//! position zero up to the capacity) or in decode mode (reading from position
//! zero up to the number of bytes received). Every receive or send cycle
//! starts by resetting the cursor into the appropriate mode.

use bytes::{Buf, BufMut};

use crate::error::ProtocolError;

/// Direction of the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorMode {
    Encode,
    Decode,
}

/// A fixed-capacity buffer with an XDR read/write position.
pub struct WireCursor {
    buf: Box<[u8]>,
    pos: usize,
    limit: usize,
    mode: CursorMode,
}

impl WireCursor {
    /// Creates a cursor backed by a zeroed buffer of `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            pos: 0,
            limit: 0,
            mode: CursorMode::Decode,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn mode(&self) -> CursorMode {
        self.mode
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read (decode mode) or to write (encode mode).
    pub fn remaining(&self) -> usize {
        self.limit - self.pos
    }

    /// Switches to decode mode over the first `len` bytes of the buffer.
    pub fn start_decode(&mut self, len: usize) {
        self.mode = CursorMode::Decode;
        self.pos = 0;
        self.limit = len.min(self.buf.len());
    }

    /// Switches to encode mode, writing from the start of the buffer.
    pub fn start_encode(&mut self) {
        self.mode = CursorMode::Encode;
        self.pos = 0;
        self.limit = self.buf.len();
    }

    /// The whole backing buffer, used as the target of a socket receive.
    pub fn receive_buffer(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// The bytes encoded so far.
    pub fn encoded(&self) -> &[u8] {
        &self.buf[..self.pos]
    }

    /// The bytes received in the current decode cycle.
    pub fn received(&self) -> &[u8] {
        match self.mode {
            CursorMode::Decode => &self.buf[..self.limit],
            CursorMode::Encode => &[],
        }
    }

    /// Reads the next word without consuming it.
    pub fn peek_u32(&self) -> Option<u32> {
        if self.mode != CursorMode::Decode || self.remaining() < 4 {
            return None;
        }
        Some((&self.buf[self.pos..self.pos + 4]).get_u32())
    }

    fn ensure_mode(&self, expected: CursorMode) -> Result<(), ProtocolError> {
        if self.mode != expected {
            return Err(ProtocolError::WrongMode {
                expected,
                actual: self.mode,
            });
        }
        Ok(())
    }

    fn reserve(&self, needed: usize) -> Result<(), ProtocolError> {
        self.ensure_mode(CursorMode::Encode)?;
        if self.remaining() < needed {
            return Err(ProtocolError::BufferOverflow {
                needed,
                available: self.remaining(),
            });
        }
        Ok(())
    }

    fn require(&self, needed: usize) -> Result<(), ProtocolError> {
        self.ensure_mode(CursorMode::Decode)?;
        if self.remaining() < needed {
            return Err(ProtocolError::Truncated {
                needed,
                available: self.remaining(),
            });
        }
        Ok(())
    }

    // =========================================================================
    // Encoding
    // =========================================================================

    pub fn put_u32(&mut self, value: u32) -> Result<(), ProtocolError> {
        self.reserve(4)?;
        (&mut self.buf[self.pos..]).put_u32(value);
        self.pos += 4;
        Ok(())
    }

    pub fn put_i32(&mut self, value: i32) -> Result<(), ProtocolError> {
        self.put_u32(value as u32)
    }

    pub fn put_u64(&mut self, value: u64) -> Result<(), ProtocolError> {
        self.reserve(8)?;
        (&mut self.buf[self.pos..]).put_u64(value);
        self.pos += 8;
        Ok(())
    }

    pub fn put_bool(&mut self, value: bool) -> Result<(), ProtocolError> {
        self.put_u32(u32::from(value))
    }

    /// Writes variable-length opaque data: length word, bytes, padding.
    pub fn put_opaque(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        let len = u32::try_from(data.len()).map_err(|_| ProtocolError::OpaqueTooLong {
            len: data.len(),
            max: u32::MAX as usize,
        })?;
        self.reserve(4 + padded_len(data.len()))?;
        self.put_u32(len)?;
        self.put_fixed(data)
    }

    pub fn put_string(&mut self, value: &str) -> Result<(), ProtocolError> {
        self.put_opaque(value.as_bytes())
    }

    /// Writes fixed-length opaque data (no length word), padded to four bytes.
    pub fn put_fixed(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        let padded = padded_len(data.len());
        self.reserve(padded)?;
        let dst = &mut self.buf[self.pos..self.pos + padded];
        dst[..data.len()].copy_from_slice(data);
        dst[data.len()..].fill(0);
        self.pos += padded;
        Ok(())
    }

    // =========================================================================
    // Decoding
    // =========================================================================

    pub fn get_u32(&mut self) -> Result<u32, ProtocolError> {
        self.require(4)?;
        let value = (&self.buf[self.pos..self.limit]).get_u32();
        self.pos += 4;
        Ok(value)
    }

    pub fn get_i32(&mut self) -> Result<i32, ProtocolError> {
        Ok(self.get_u32()? as i32)
    }

    pub fn get_u64(&mut self) -> Result<u64, ProtocolError> {
        self.require(8)?;
        let value = (&self.buf[self.pos..self.limit]).get_u64();
        self.pos += 8;
        Ok(value)
    }

    pub fn get_bool(&mut self) -> Result<bool, ProtocolError> {
        match self.get_u32()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(ProtocolError::InvalidBool(other)),
        }
    }

    /// Reads variable-length opaque data of at most `max` bytes.
    pub fn get_opaque(&mut self, max: usize) -> Result<&[u8], ProtocolError> {
        let len = self.get_u32()? as usize;
        if len > max {
            return Err(ProtocolError::OpaqueTooLong { len, max });
        }
        let padded = padded_len(len);
        self.require(padded)?;
        let start = self.pos;
        self.pos += padded;
        Ok(&self.buf[start..start + len])
    }

    pub fn get_string(&mut self, max: usize) -> Result<String, ProtocolError> {
        let raw = self.get_opaque(max)?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| ProtocolError::InvalidUtf8)
    }

    /// Skips variable-length opaque data of at most `max` bytes.
    pub fn skip_opaque(&mut self, max: usize) -> Result<(), ProtocolError> {
        self.get_opaque(max).map(|_| ())
    }
}

impl std::fmt::Debug for WireCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireCursor")
            .field("capacity", &self.buf.len())
            .field("mode", &self.mode)
            .field("pos", &self.pos)
            .field("limit", &self.limit)
            .finish()
    }
}

/// Length of `len` bytes rounded up to the XDR unit of four.
pub fn padded_len(len: usize) -> usize {
    (len + 3) & !3
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn decoder_over(bytes: &[u8]) -> WireCursor {
        let mut cursor = WireCursor::with_capacity(bytes.len().max(16));
        cursor.receive_buffer()[..bytes.len()].copy_from_slice(bytes);
        cursor.start_decode(bytes.len());
        cursor
    }

    #[test]
    fn test_integers_are_big_endian() {
        let mut cursor = WireCursor::with_capacity(16);
        cursor.start_encode();
        cursor.put_u32(0x0102_0304).unwrap();
        cursor.put_i32(-1).unwrap();
        assert_eq!(cursor.encoded(), &[1, 2, 3, 4, 0xff, 0xff, 0xff, 0xff]);
        assert_eq!(cursor.position(), 8);
    }

    #[test]
    fn test_opaque_is_padded() {
        let mut cursor = WireCursor::with_capacity(16);
        cursor.start_encode();
        cursor.put_opaque(b"abcde").unwrap();
        assert_eq!(cursor.position(), 12);
        assert_eq!(&cursor.encoded()[..4], &[0, 0, 0, 5]);
        assert_eq!(&cursor.encoded()[9..], &[0, 0, 0]);

        let mut decoder = decoder_over(cursor.encoded());
        assert_eq!(decoder.get_opaque(16).unwrap(), b"abcde");
        assert_eq!(decoder.remaining(), 0);
    }

    #[test]
    fn test_encode_overflow_keeps_position() {
        let mut cursor = WireCursor::with_capacity(6);
        cursor.start_encode();
        cursor.put_u32(7).unwrap();
        let err = cursor.put_u32(8).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::BufferOverflow {
                needed: 4,
                available: 2
            }
        );
        assert_eq!(cursor.position(), 4);
    }

    #[test]
    fn test_decode_truncated() {
        let mut cursor = decoder_over(&[0, 0, 0]);
        assert!(matches!(
            cursor.get_u32(),
            Err(ProtocolError::Truncated { needed: 4, .. })
        ));
    }

    #[test]
    fn test_opaque_length_limit() {
        let mut cursor = decoder_over(&[0, 0, 1, 0]);
        assert_eq!(
            cursor.get_opaque(255).unwrap_err(),
            ProtocolError::OpaqueTooLong { len: 256, max: 255 }
        );
    }

    #[test]
    fn test_wrong_mode() {
        let mut cursor = WireCursor::with_capacity(16);
        cursor.start_decode(0);
        assert!(matches!(
            cursor.put_u32(1),
            Err(ProtocolError::WrongMode {
                expected: CursorMode::Encode,
                ..
            })
        ));

        cursor.start_encode();
        assert!(matches!(
            cursor.get_u32(),
            Err(ProtocolError::WrongMode {
                expected: CursorMode::Decode,
                ..
            })
        ));
    }

    #[test]
    fn test_peek_does_not_consume() {
        let cursor_bytes = [0, 0, 0, 42, 0, 0, 0, 1];
        let mut cursor = decoder_over(&cursor_bytes);
        assert_eq!(cursor.peek_u32(), Some(42));
        assert_eq!(cursor.get_u32().unwrap(), 42);
        assert_eq!(cursor.peek_u32(), Some(1));
    }

    #[test]
    fn test_invalid_bool() {
        let mut cursor = decoder_over(&[0, 0, 0, 2]);
        assert_eq!(cursor.get_bool(), Err(ProtocolError::InvalidBool(2)));
    }

    #[test]
    fn test_start_decode_clamps_to_capacity() {
        let mut cursor = WireCursor::with_capacity(8);
        cursor.start_decode(100);
        assert_eq!(cursor.remaining(), 8);
    }

    proptest! {
        #[test]
        fn prop_decoding_arbitrary_bytes_never_panics(
            bytes in proptest::collection::vec(any::<u8>(), 0..128)
        ) {
            let mut cursor = decoder_over(&bytes);
            loop {
                let before = cursor.position();
                let step = match before % 3 {
                    0 => cursor.get_u32().map(|_| ()),
                    1 => cursor.get_opaque(64).map(|_| ()),
                    _ => cursor.get_string(64).map(|_| ()),
                };
                if step.is_err() || cursor.position() == before {
                    break;
                }
                prop_assert!(cursor.position() <= bytes.len());
            }
        }
    }
}
