//! # procrpc-protocol
//!
//! Wire protocol for procrpc, the datagram RPC transport used between
//! process-control nodes.
//!
//! This crate provides:
//! - A fixed-capacity, position-tracked XDR cursor (`WireCursor`)
//! - `Encode`/`Decode` traits for payload values
//! - The RPC call/reply header with request/reply correlation
//! - Access tickets threaded opaquely through requests and replies
//! - Result codes carried in reply payloads
//!
//! All integers travel as 32-bit big-endian words; opaque data is a length
//! word followed by the bytes, zero-padded to a multiple of four.

pub mod codec;
pub mod cursor;
pub mod error;
pub mod header;
pub mod ticket;

pub use codec::{Decode, Encode};
pub use cursor::{CursorMode, WireCursor};
pub use error::{ProtocolError, ResultCode};
pub use header::{
    AcceptStatus, HeaderFault, MessageType, RejectStatus, ReplyStatus, RpcHeader,
    CALL_HEADER_SIZE, MAX_AUTH_BYTES, RPC_VERSION,
};
pub use ticket::{decode_ticket, AuthType, NoneTicket, SimpleTicket, Ticket, MAX_TICKET_ID_LEN};

/// Smallest datagram buffer a connection may use.
pub const MIN_BUFFER_SIZE: usize = 1024;

/// Largest datagram buffer a connection may use.
pub const MAX_BUFFER_SIZE: usize = 65500;

/// Default datagram buffer size.
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Default UDP port of a procrpc server.
pub const DEFAULT_PORT: u16 = 7470;

/// Clamps a requested buffer size into `[MIN_BUFFER_SIZE, MAX_BUFFER_SIZE]`.
pub fn clamp_buffer_size(requested: usize) -> usize {
    requested.clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE)
}
