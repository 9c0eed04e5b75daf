//! The demo program served by the `procrpc` daemon.

use procrpc_protocol::{Decode, Encode, ProtocolError, WireCursor};

use crate::client::Client;
use crate::error::ClientError;

pub const DEMO_PROGRAM: u32 = 0x2000_0100;
pub const DEMO_VERSION: u32 = 1;

pub const PROC_PING: u32 = 0;
pub const PROC_ECHO: u32 = 1;
pub const PROC_INFO: u32 = 2;

const MAX_NAME_LEN: usize = 255;

/// Reply of the info procedure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub uptime_secs: u64,
}

impl Encode for ServerInfo {
    fn encode(&self, cursor: &mut WireCursor) -> Result<(), ProtocolError> {
        cursor.put_string(&self.name)?;
        cursor.put_string(&self.version)?;
        cursor.put_u64(self.uptime_secs)
    }
}

impl Decode for ServerInfo {
    fn decode(cursor: &mut WireCursor) -> Result<Self, ProtocolError> {
        Ok(Self {
            name: cursor.get_string(MAX_NAME_LEN)?,
            version: cursor.get_string(MAX_NAME_LEN)?,
            uptime_secs: cursor.get_u64()?,
        })
    }
}

impl Client {
    /// Pings the demo program.
    pub fn ping_demo(&mut self) -> Result<(), ClientError> {
        self.ping(DEMO_PROGRAM, DEMO_VERSION)
    }

    /// Asks the server to echo `text`.
    pub fn echo(&mut self, text: &str) -> Result<String, ClientError> {
        self.call(DEMO_PROGRAM, DEMO_VERSION, PROC_ECHO, text)
    }

    /// Fetches the server's name, version and uptime.
    pub fn info(&mut self) -> Result<ServerInfo, ClientError> {
        self.call(DEMO_PROGRAM, DEMO_VERSION, PROC_INFO, &())
    }
}
