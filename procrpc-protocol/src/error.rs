//! Protocol error types and result codes.

use std::fmt;
use thiserror::Error;

use crate::cursor::CursorMode;

/// Errors raised while encoding or decoding wire data.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("buffer overflow: need {needed} bytes, {available} available")]
    BufferOverflow { needed: usize, available: usize },

    #[error("truncated data: need {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("cursor is in {actual:?} mode, operation requires {expected:?}")]
    WrongMode {
        expected: CursorMode,
        actual: CursorMode,
    },

    #[error("opaque data too long: {len} bytes (max {max})")]
    OpaqueTooLong { len: usize, max: usize },

    #[error("invalid UTF-8 in string")]
    InvalidUtf8,

    #[error("invalid boolean value: {0}")]
    InvalidBool(u32),

    #[error("unknown message type: {0}")]
    UnknownMessageType(u32),

    #[error("unsupported RPC version: {0}")]
    UnsupportedRpcVersion(u32),

    #[error("unknown reply status: {0}")]
    UnknownReplyStatus(u32),

    #[error("unknown accept status: {0}")]
    UnknownAcceptStatus(u32),

    #[error("unknown reject status: {0}")]
    UnknownRejectStatus(u32),

    #[error("unknown authentication type: {0}")]
    UnknownAuthType(u32),

    #[error("unknown result code: {0}")]
    UnknownResultCode(u32),

    #[error("reply xid {actual:#x} does not match request xid {expected:#x}")]
    XidMismatch { expected: u32, actual: u32 },
}

/// Result codes carried in reply payloads.
///
/// The numeric values are part of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    Ok,
    Generic,
    BadAuth,
    UnknownAuth,
    NotImplemented,
    BadParam,
    NoAccess,
    Timeout,
}

impl ResultCode {
    /// Returns the wire value.
    pub fn as_u32(self) -> u32 {
        match self {
            ResultCode::Ok => 0,
            ResultCode::Generic => 1,
            ResultCode::BadAuth => 2,
            ResultCode::UnknownAuth => 3,
            ResultCode::NotImplemented => 4,
            ResultCode::BadParam => 5,
            ResultCode::NoAccess => 6,
            ResultCode::Timeout => 7,
        }
    }

    /// Parses a wire value.
    pub fn from_u32(value: u32) -> Result<Self, ProtocolError> {
        Ok(match value {
            0 => ResultCode::Ok,
            1 => ResultCode::Generic,
            2 => ResultCode::BadAuth,
            3 => ResultCode::UnknownAuth,
            4 => ResultCode::NotImplemented,
            5 => ResultCode::BadParam,
            6 => ResultCode::NoAccess,
            7 => ResultCode::Timeout,
            other => return Err(ProtocolError::UnknownResultCode(other)),
        })
    }

    pub fn is_ok(self) -> bool {
        self == ResultCode::Ok
    }

    /// Returns whether a caller may reasonably retry after this result.
    pub fn is_retryable(self) -> bool {
        matches!(self, ResultCode::Generic | ResultCode::Timeout)
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultCode::Ok => write!(f, "OK"),
            ResultCode::Generic => write!(f, "GENERIC"),
            ResultCode::BadAuth => write!(f, "BAD_AUTH"),
            ResultCode::UnknownAuth => write!(f, "UNKNOWN_AUTH"),
            ResultCode::NotImplemented => write!(f, "NOT_IMPLEMENTED"),
            ResultCode::BadParam => write!(f, "BAD_PARAM"),
            ResultCode::NoAccess => write!(f, "NO_ACCESS"),
            ResultCode::Timeout => write!(f, "TIMEOUT"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_code_wire_values() {
        for code in [
            ResultCode::Ok,
            ResultCode::Generic,
            ResultCode::BadAuth,
            ResultCode::UnknownAuth,
            ResultCode::NotImplemented,
            ResultCode::BadParam,
            ResultCode::NoAccess,
            ResultCode::Timeout,
        ] {
            assert_eq!(ResultCode::from_u32(code.as_u32()).unwrap(), code);
        }
        assert_eq!(
            ResultCode::from_u32(99),
            Err(ProtocolError::UnknownResultCode(99))
        );
    }

    #[test]
    fn test_result_code_retryable() {
        assert!(ResultCode::Generic.is_retryable());
        assert!(ResultCode::Timeout.is_retryable());

        assert!(!ResultCode::Ok.is_retryable());
        assert!(!ResultCode::BadParam.is_retryable());
        assert!(!ResultCode::NoAccess.is_retryable());
    }

    #[test]
    fn test_result_code_display() {
        assert_eq!(format!("{}", ResultCode::Ok), "OK");
        assert_eq!(format!("{}", ResultCode::BadParam), "BAD_PARAM");
        assert_eq!(format!("{}", ResultCode::NotImplemented), "NOT_IMPLEMENTED");
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::BufferOverflow {
            needed: 8,
            available: 3,
        };
        assert!(err.to_string().contains("overflow"));

        let err = ProtocolError::UnsupportedRpcVersion(3);
        assert!(err.to_string().contains('3'));

        let err = ProtocolError::OpaqueTooLong { len: 500, max: 400 };
        assert!(err.to_string().contains("500"));
    }
}
