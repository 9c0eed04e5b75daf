//! Access tickets.
//!
//! Every request carries a ticket block right after the call header and every
//! reply echoes it back, followed by the payload and a ticket trailer. The
//! transport threads tickets through opaquely; deciding what a ticket grants
//! is left to the service.

use std::fmt;

use crate::cursor::WireCursor;
use crate::error::ProtocolError;

/// Longest identifier a simple ticket may carry.
pub const MAX_TICKET_ID_LEN: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthType {
    None,
    Simple,
}

impl AuthType {
    pub fn as_u32(self) -> u32 {
        match self {
            AuthType::None => 0,
            AuthType::Simple => 1,
        }
    }

    pub fn from_u32(value: u32) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(AuthType::None),
            1 => Ok(AuthType::Simple),
            other => Err(ProtocolError::UnknownAuthType(other)),
        }
    }
}

/// An access ticket.
pub trait Ticket: fmt::Debug + Send {
    fn auth_type(&self) -> AuthType;

    /// Writes the ticket body, not including the auth type word.
    fn encode_body(&self, cursor: &mut WireCursor) -> Result<(), ProtocolError>;

    /// Writes the ticket block: auth type word followed by the body.
    fn encode(&self, cursor: &mut WireCursor) -> Result<(), ProtocolError> {
        cursor.put_u32(self.auth_type().as_u32())?;
        self.encode_body(cursor)
    }

    /// Writes the trailer that closes a reply.
    fn encode_trailer(&self, _cursor: &mut WireCursor) -> Result<(), ProtocolError> {
        Ok(())
    }

    /// Reads the trailer that closes a reply.
    fn decode_trailer(&self, _cursor: &mut WireCursor) -> Result<(), ProtocolError> {
        Ok(())
    }
}

/// Anonymous access.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoneTicket;

impl Ticket for NoneTicket {
    fn auth_type(&self) -> AuthType {
        AuthType::None
    }

    fn encode_body(&self, _cursor: &mut WireCursor) -> Result<(), ProtocolError> {
        Ok(())
    }
}

/// A ticket identified by a plain string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleTicket {
    id: String,
}

impl SimpleTicket {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Ticket for SimpleTicket {
    fn auth_type(&self) -> AuthType {
        AuthType::Simple
    }

    fn encode_body(&self, cursor: &mut WireCursor) -> Result<(), ProtocolError> {
        if self.id.len() > MAX_TICKET_ID_LEN {
            return Err(ProtocolError::OpaqueTooLong {
                len: self.id.len(),
                max: MAX_TICKET_ID_LEN,
            });
        }
        cursor.put_string(&self.id)
    }
}

/// Reads a ticket block.
pub fn decode_ticket(cursor: &mut WireCursor) -> Result<Box<dyn Ticket>, ProtocolError> {
    match AuthType::from_u32(cursor.get_u32()?)? {
        AuthType::None => Ok(Box::new(NoneTicket)),
        AuthType::Simple => Ok(Box::new(SimpleTicket::new(
            cursor.get_string(MAX_TICKET_ID_LEN)?,
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reopen(cursor: &mut WireCursor) {
        let len = cursor.position();
        cursor.start_decode(len);
    }

    #[test]
    fn test_none_ticket_is_one_word() {
        let mut cursor = WireCursor::with_capacity(16);
        cursor.start_encode();
        NoneTicket.encode(&mut cursor).unwrap();
        NoneTicket.encode_trailer(&mut cursor).unwrap();
        assert_eq!(cursor.encoded(), &[0, 0, 0, 0]);

        reopen(&mut cursor);
        let ticket = decode_ticket(&mut cursor).unwrap();
        assert_eq!(ticket.auth_type(), AuthType::None);
    }

    #[test]
    fn test_simple_ticket() {
        let mut cursor = WireCursor::with_capacity(64);
        cursor.start_encode();
        SimpleTicket::new("operator").encode(&mut cursor).unwrap();
        reopen(&mut cursor);

        let ticket = decode_ticket(&mut cursor).unwrap();
        assert_eq!(ticket.auth_type(), AuthType::Simple);
        assert_eq!(cursor.remaining(), 0);
    }

    #[test]
    fn test_unknown_auth_type() {
        let mut cursor = WireCursor::with_capacity(16);
        cursor.start_encode();
        cursor.put_u32(9).unwrap();
        reopen(&mut cursor);
        assert_eq!(
            decode_ticket(&mut cursor).unwrap_err(),
            ProtocolError::UnknownAuthType(9)
        );
    }

    #[test]
    fn test_simple_ticket_id_too_long() {
        let mut cursor = WireCursor::with_capacity(1024);
        cursor.start_encode();
        let ticket = SimpleTicket::new("x".repeat(MAX_TICKET_ID_LEN + 1));
        assert!(matches!(
            ticket.encode(&mut cursor),
            Err(ProtocolError::OpaqueTooLong { .. })
        ));
    }
}
