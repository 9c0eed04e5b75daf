//! Transport error types.
//!
//! Connections never surface errors to the manager; these are raised only by
//! construction, configuration, and the readiness wait itself.

use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] procrpc_protocol::ProtocolError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("address '{0}' did not resolve")]
    Unresolved(String),

    #[error("connection could not be set up: {0}")]
    ConnectionSetup(String),
}
