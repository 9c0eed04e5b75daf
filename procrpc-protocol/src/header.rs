//! RPC call/reply header.
//!
//! Call header (40 bytes):
//! ```text
//! +-------+----------+----------+---------+---------+-----------+
//! | xid   | msg_type | rpc_vers | program | version | procedure |
//! +-------+----------+----------+---------+---------+-----------+
//! | cred_flavor | cred_body (opaque) | verf_flavor | verf_body  |
//! +-------------+--------------------+-------------+------------+
//! ```
//!
//! Accepted reply:
//! ```text
//! xid | msg_type=1 | reply_stat=0 | verf_flavor | verf_body | accept_stat [low high]
//! ```
//!
//! Denied reply:
//! ```text
//! xid | msg_type=1 | reply_stat=1 | reject_stat (0: low high | 1: auth_stat)
//! ```

use crate::cursor::WireCursor;
use crate::error::ProtocolError;

/// RPC protocol version spoken by this implementation.
pub const RPC_VERSION: u32 = 2;

/// Encoded size of a call header with empty credentials.
pub const CALL_HEADER_SIZE: usize = 40;

/// Maximum size of a credential or verifier body.
pub const MAX_AUTH_BYTES: usize = 400;

const AUTH_NONE: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Call,
    Reply,
}

impl MessageType {
    pub fn as_u32(self) -> u32 {
        match self {
            MessageType::Call => 0,
            MessageType::Reply => 1,
        }
    }

    pub fn from_u32(value: u32) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(MessageType::Call),
            1 => Ok(MessageType::Reply),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

/// Outcome of an accepted call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptStatus {
    Success,
    ProgramUnavailable,
    ProgramMismatch { low: u32, high: u32 },
    ProcedureUnavailable,
    GarbageArgs,
    SystemError,
}

impl AcceptStatus {
    fn code(self) -> u32 {
        match self {
            AcceptStatus::Success => 0,
            AcceptStatus::ProgramUnavailable => 1,
            AcceptStatus::ProgramMismatch { .. } => 2,
            AcceptStatus::ProcedureUnavailable => 3,
            AcceptStatus::GarbageArgs => 4,
            AcceptStatus::SystemError => 5,
        }
    }

    fn encode(self, cursor: &mut WireCursor) -> Result<(), ProtocolError> {
        cursor.put_u32(self.code())?;
        if let AcceptStatus::ProgramMismatch { low, high } = self {
            cursor.put_u32(low)?;
            cursor.put_u32(high)?;
        }
        Ok(())
    }

    fn decode(cursor: &mut WireCursor) -> Result<Self, ProtocolError> {
        Ok(match cursor.get_u32()? {
            0 => AcceptStatus::Success,
            1 => AcceptStatus::ProgramUnavailable,
            2 => AcceptStatus::ProgramMismatch {
                low: cursor.get_u32()?,
                high: cursor.get_u32()?,
            },
            3 => AcceptStatus::ProcedureUnavailable,
            4 => AcceptStatus::GarbageArgs,
            5 => AcceptStatus::SystemError,
            other => return Err(ProtocolError::UnknownAcceptStatus(other)),
        })
    }
}

/// Reason a call was denied before reaching a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectStatus {
    RpcMismatch { low: u32, high: u32 },
    AuthError(u32),
}

impl RejectStatus {
    fn encode(self, cursor: &mut WireCursor) -> Result<(), ProtocolError> {
        match self {
            RejectStatus::RpcMismatch { low, high } => {
                cursor.put_u32(0)?;
                cursor.put_u32(low)?;
                cursor.put_u32(high)
            }
            RejectStatus::AuthError(stat) => {
                cursor.put_u32(1)?;
                cursor.put_u32(stat)
            }
        }
    }

    fn decode(cursor: &mut WireCursor) -> Result<Self, ProtocolError> {
        Ok(match cursor.get_u32()? {
            0 => RejectStatus::RpcMismatch {
                low: cursor.get_u32()?,
                high: cursor.get_u32()?,
            },
            1 => RejectStatus::AuthError(cursor.get_u32()?),
            other => return Err(ProtocolError::UnknownRejectStatus(other)),
        })
    }
}

/// Status carried by a reply header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    Accepted(AcceptStatus),
    Denied(RejectStatus),
}

/// Why an incoming call header could not be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderFault {
    /// The caller speaks another RPC version.
    RpcVersion(u32),
    /// Anything else: truncated, wrong message type, oversized credentials.
    Malformed,
}

/// The header of the message being decoded or encoded on a connection.
///
/// On servers it holds the most recently decoded call and the reply status
/// to answer with; on clients it holds the outgoing call whose `xid` is
/// bumped for every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcHeader {
    pub xid: u32,
    pub program: u32,
    pub version: u32,
    pub procedure: u32,
    message_type: MessageType,
    reply: ReplyStatus,
    fault: Option<HeaderFault>,
}

impl RpcHeader {
    pub fn new(xid: u32) -> Self {
        Self {
            xid,
            program: 0,
            version: 0,
            procedure: 0,
            message_type: MessageType::Call,
            reply: ReplyStatus::Accepted(AcceptStatus::Success),
            fault: None,
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn reply_status(&self) -> ReplyStatus {
        self.reply
    }

    /// Whether the reply status is `ACCEPTED/SUCCESS`.
    pub fn is_success(&self) -> bool {
        self.reply == ReplyStatus::Accepted(AcceptStatus::Success)
    }

    /// The decode fault of the last incoming call, if any.
    pub fn fault(&self) -> Option<HeaderFault> {
        self.fault
    }

    pub fn has_decode_error(&self) -> bool {
        self.fault.is_some()
    }

    /// Prepares the next outgoing call with a fresh transaction id.
    pub fn begin_call(&mut self, program: u32, version: u32, procedure: u32) {
        self.xid = self.xid.wrapping_add(1);
        self.program = program;
        self.version = version;
        self.procedure = procedure;
        self.message_type = MessageType::Call;
        self.reply = ReplyStatus::Accepted(AcceptStatus::Success);
        self.fault = None;
    }

    /// Marks the pending reply as `ACCEPTED/SUCCESS`.
    pub fn accept_call(&mut self) {
        self.reply = ReplyStatus::Accepted(AcceptStatus::Success);
    }

    /// Marks the pending reply as accepted with a non-success status.
    pub fn reject_with(&mut self, status: AcceptStatus) {
        self.reply = ReplyStatus::Accepted(status);
    }

    /// Marks the pending reply as denied.
    pub fn deny(&mut self, status: RejectStatus) {
        self.reply = ReplyStatus::Denied(status);
    }

    /// Records a decode fault and arms the matching rejection.
    pub fn set_decode_error(&mut self, fault: HeaderFault) {
        self.fault = Some(fault);
        self.reply = match fault {
            HeaderFault::RpcVersion(_) => ReplyStatus::Denied(RejectStatus::RpcMismatch {
                low: RPC_VERSION,
                high: RPC_VERSION,
            }),
            HeaderFault::Malformed => ReplyStatus::Accepted(AcceptStatus::GarbageArgs),
        };
    }

    pub fn encode_call(&self, cursor: &mut WireCursor) -> Result<(), ProtocolError> {
        cursor.put_u32(self.xid)?;
        cursor.put_u32(MessageType::Call.as_u32())?;
        cursor.put_u32(RPC_VERSION)?;
        cursor.put_u32(self.program)?;
        cursor.put_u32(self.version)?;
        cursor.put_u32(self.procedure)?;
        put_null_auth(cursor)?;
        put_null_auth(cursor)
    }

    pub fn encode_reply(&self, cursor: &mut WireCursor) -> Result<(), ProtocolError> {
        cursor.put_u32(self.xid)?;
        cursor.put_u32(MessageType::Reply.as_u32())?;
        match self.reply {
            ReplyStatus::Accepted(status) => {
                cursor.put_u32(0)?;
                put_null_auth(cursor)?;
                status.encode(cursor)
            }
            ReplyStatus::Denied(status) => {
                cursor.put_u32(1)?;
                status.encode(cursor)
            }
        }
    }

    /// Decodes an incoming call header.
    ///
    /// On failure the fault is recorded and a rejection reply is armed, so
    /// the header is always in a state that can be answered.
    pub fn decode_call(&mut self, cursor: &mut WireCursor) -> Result<(), ProtocolError> {
        self.fault = None;
        self.reply = ReplyStatus::Accepted(AcceptStatus::Success);
        self.message_type = MessageType::Call;
        let result = self.decode_call_fields(cursor);
        if let Err(err) = &result {
            let fault = match err {
                ProtocolError::UnsupportedRpcVersion(v) => HeaderFault::RpcVersion(*v),
                _ => HeaderFault::Malformed,
            };
            self.set_decode_error(fault);
        }
        result
    }

    fn decode_call_fields(&mut self, cursor: &mut WireCursor) -> Result<(), ProtocolError> {
        self.xid = cursor.get_u32()?;
        let message_type = MessageType::from_u32(cursor.get_u32()?)?;
        if message_type != MessageType::Call {
            return Err(ProtocolError::UnknownMessageType(message_type.as_u32()));
        }
        let rpc_version = cursor.get_u32()?;
        if rpc_version != RPC_VERSION {
            return Err(ProtocolError::UnsupportedRpcVersion(rpc_version));
        }
        self.program = cursor.get_u32()?;
        self.version = cursor.get_u32()?;
        self.procedure = cursor.get_u32()?;
        skip_auth(cursor)?;
        skip_auth(cursor)
    }

    /// Decodes a reply header answering the call in `self`.
    pub fn decode_reply(&mut self, cursor: &mut WireCursor) -> Result<(), ProtocolError> {
        let xid = cursor.get_u32()?;
        if xid != self.xid {
            return Err(ProtocolError::XidMismatch {
                expected: self.xid,
                actual: xid,
            });
        }
        let message_type = MessageType::from_u32(cursor.get_u32()?)?;
        if message_type != MessageType::Reply {
            return Err(ProtocolError::UnknownMessageType(message_type.as_u32()));
        }
        self.reply = match cursor.get_u32()? {
            0 => {
                skip_auth(cursor)?;
                ReplyStatus::Accepted(AcceptStatus::decode(cursor)?)
            }
            1 => ReplyStatus::Denied(RejectStatus::decode(cursor)?),
            other => return Err(ProtocolError::UnknownReplyStatus(other)),
        };
        self.message_type = MessageType::Reply;
        Ok(())
    }
}

fn put_null_auth(cursor: &mut WireCursor) -> Result<(), ProtocolError> {
    cursor.put_u32(AUTH_NONE)?;
    cursor.put_opaque(&[])
}

fn skip_auth(cursor: &mut WireCursor) -> Result<(), ProtocolError> {
    cursor.get_u32()?;
    cursor.skip_opaque(MAX_AUTH_BYTES)
}
