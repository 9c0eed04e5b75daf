//! Client error types.

use procrpc_protocol::{ProtocolError, ReplyStatus, ResultCode};
use procrpc_transport::TransportError;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("no reply after {attempts} attempts")]
    Timeout { attempts: u32 },

    #[error("call rejected: {0:?}")]
    Rejected(ReplyStatus),

    #[error("server error: {code}")]
    Server { code: ResultCode },

    #[error("connection is dead")]
    ConnectionDead,
}

impl ClientError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Transport(TransportError::Io(_)) => true,
            ClientError::Timeout { .. } => true,
            ClientError::Server { code } => code.is_retryable(),
            _ => false,
        }
    }
}
