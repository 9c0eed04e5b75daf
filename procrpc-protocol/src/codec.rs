//! Payload encoding traits.
//!
//! Request parameters and reply results are written after the RPC header
//! through these traits. Implementations must leave the cursor positioned
//! after the value on success; on error the cursor position is unspecified
//! and the caller abandons the message.

use crate::cursor::WireCursor;
use crate::error::{ProtocolError, ResultCode};
use crate::MAX_BUFFER_SIZE;

/// A value that can be written to the wire.
pub trait Encode {
    fn encode(&self, cursor: &mut WireCursor) -> Result<(), ProtocolError>;
}

/// A value that can be read from the wire.
pub trait Decode: Sized {
    fn decode(cursor: &mut WireCursor) -> Result<Self, ProtocolError>;
}

impl<T: Encode + ?Sized> Encode for &T {
    fn encode(&self, cursor: &mut WireCursor) -> Result<(), ProtocolError> {
        (**self).encode(cursor)
    }
}

impl Encode for () {
    fn encode(&self, _cursor: &mut WireCursor) -> Result<(), ProtocolError> {
        Ok(())
    }
}

impl Decode for () {
    fn decode(_cursor: &mut WireCursor) -> Result<Self, ProtocolError> {
        Ok(())
    }
}

impl Encode for u32 {
    fn encode(&self, cursor: &mut WireCursor) -> Result<(), ProtocolError> {
        cursor.put_u32(*self)
    }
}

impl Decode for u32 {
    fn decode(cursor: &mut WireCursor) -> Result<Self, ProtocolError> {
        cursor.get_u32()
    }
}

impl Encode for i32 {
    fn encode(&self, cursor: &mut WireCursor) -> Result<(), ProtocolError> {
        cursor.put_i32(*self)
    }
}

impl Decode for i32 {
    fn decode(cursor: &mut WireCursor) -> Result<Self, ProtocolError> {
        cursor.get_i32()
    }
}

impl Encode for u64 {
    fn encode(&self, cursor: &mut WireCursor) -> Result<(), ProtocolError> {
        cursor.put_u64(*self)
    }
}

impl Decode for u64 {
    fn decode(cursor: &mut WireCursor) -> Result<Self, ProtocolError> {
        cursor.get_u64()
    }
}

impl Encode for bool {
    fn encode(&self, cursor: &mut WireCursor) -> Result<(), ProtocolError> {
        cursor.put_bool(*self)
    }
}

impl Decode for bool {
    fn decode(cursor: &mut WireCursor) -> Result<Self, ProtocolError> {
        cursor.get_bool()
    }
}

impl Encode for str {
    fn encode(&self, cursor: &mut WireCursor) -> Result<(), ProtocolError> {
        cursor.put_string(self)
    }
}

impl Encode for String {
    fn encode(&self, cursor: &mut WireCursor) -> Result<(), ProtocolError> {
        cursor.put_string(self)
    }
}

impl Decode for String {
    fn decode(cursor: &mut WireCursor) -> Result<Self, ProtocolError> {
        cursor.get_string(MAX_BUFFER_SIZE)
    }
}

impl Encode for Vec<u8> {
    fn encode(&self, cursor: &mut WireCursor) -> Result<(), ProtocolError> {
        cursor.put_opaque(self)
    }
}

impl Decode for Vec<u8> {
    fn decode(cursor: &mut WireCursor) -> Result<Self, ProtocolError> {
        cursor.get_opaque(MAX_BUFFER_SIZE).map(<[u8]>::to_vec)
    }
}

impl Encode for ResultCode {
    fn encode(&self, cursor: &mut WireCursor) -> Result<(), ProtocolError> {
        cursor.put_u32(self.as_u32())
    }
}

impl Decode for ResultCode {
    fn decode(cursor: &mut WireCursor) -> Result<Self, ProtocolError> {
        ResultCode::from_u32(cursor.get_u32()?)
    }
}
