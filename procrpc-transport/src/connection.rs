//! Connection contract and protocol state.
//!
//! A connection owns one socket, a fixed-capacity buffer with its wire
//! cursor, and the RPC header of the exchange in flight. Its operations
//! never block and never return errors: every outcome is folded into the
//! `IoMode` descriptor the manager schedules on.
//!
//! Server cycle: `Idle -> Ready -> Sending -> Idle`.
//! Client cycle: `Passive -> Sending -> Waiting -> Ready -> Passive`.
//! `Dead` is terminal.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::ops::{BitOr, BitOrAssign};
use std::rc::Rc;
use std::time::Duration;

use procrpc_protocol::{Encode, ResultCode, RpcHeader, Ticket, WireCursor};

/// Identifier assigned by the manager at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    Server,
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Server waiting for a request.
    Idle,
    /// Client waiting for the reply to its request.
    Waiting,
    /// Client with no request in flight.
    Passive,
    /// A complete request (server) or reply (client) is buffered.
    Ready,
    Receiving,
    Sending,
    Dead,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Waiting => "waiting",
            ConnectionState::Passive => "passive",
            ConnectionState::Ready => "ready",
            ConnectionState::Receiving => "receiving",
            ConnectionState::Sending => "sending",
            ConnectionState::Dead => "dead",
        };
        f.write_str(name)
    }
}

/// I/O-readiness descriptor.
///
/// The low bits say what the connection wants next, the high bits report
/// what happened during the operation that produced the descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct IoMode(u16);

impl IoMode {
    pub const DORMANT: IoMode = IoMode(0);
    pub const READABLE: IoMode = IoMode(0x0001);
    pub const WRITEABLE: IoMode = IoMode(0x0002);
    pub const ATTENTION: IoMode = IoMode(0x0004);
    pub const DEAD: IoMode = IoMode(0x0008);
    /// A datagram was consumed and dropped; the socket may hold more.
    pub const DISCARDED: IoMode = IoMode(0x0800);
    pub const HAD_RX_ERROR: IoMode = IoMode(0x1000);
    pub const HAD_TX_ERROR: IoMode = IoMode(0x2000);
    pub const HAD_ERROR: IoMode = IoMode(0x4000);
    pub const NEED_TIMEOUT: IoMode = IoMode(0x8000);

    const ERROR_MASK: u16 = 0x7000;

    /// Descriptor a connection in `state` reports.
    pub fn for_state(state: ConnectionState) -> IoMode {
        match state {
            ConnectionState::Dead => IoMode::DEAD,
            ConnectionState::Idle => IoMode::READABLE,
            ConnectionState::Waiting => IoMode::READABLE | IoMode::NEED_TIMEOUT,
            ConnectionState::Passive => IoMode::DORMANT,
            ConnectionState::Ready => IoMode::ATTENTION,
            ConnectionState::Sending => IoMode::WRITEABLE,
            ConnectionState::Receiving => IoMode::READABLE,
        }
    }

    pub fn bits(&self) -> u16 {
        self.0
    }

    pub fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub fn contains(&self, other: IoMode) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_dormant(&self) -> bool {
        self.without_errors().0 == 0
    }

    pub fn is_readable(&self) -> bool {
        self.contains(IoMode::READABLE)
    }

    pub fn is_writeable(&self) -> bool {
        self.contains(IoMode::WRITEABLE)
    }

    pub fn needs_attention(&self) -> bool {
        self.contains(IoMode::ATTENTION)
    }

    pub fn is_dead(&self) -> bool {
        self.contains(IoMode::DEAD)
    }

    pub fn discarded(&self) -> bool {
        self.contains(IoMode::DISCARDED)
    }

    pub fn needs_timeout(&self) -> bool {
        self.contains(IoMode::NEED_TIMEOUT)
    }

    pub fn had_error(&self) -> bool {
        self.contains(IoMode::HAD_ERROR)
    }

    pub fn had_rx_error(&self) -> bool {
        self.contains(IoMode::HAD_RX_ERROR)
    }

    pub fn had_tx_error(&self) -> bool {
        self.contains(IoMode::HAD_TX_ERROR)
    }

    /// Whether any failure bit is set.
    pub fn has_errors(&self) -> bool {
        self.0 & Self::ERROR_MASK != 0
    }

    /// The descriptor with failure bits stripped.
    pub fn without_errors(&self) -> IoMode {
        IoMode(self.0 & !Self::ERROR_MASK)
    }
}

impl BitOr for IoMode {
    type Output = IoMode;

    fn bitor(self, rhs: IoMode) -> IoMode {
        IoMode(self.0 | rhs.0)
    }
}

impl BitOrAssign for IoMode {
    fn bitor_assign(&mut self, rhs: IoMode) {
        self.0 |= rhs.0;
    }
}

/// Handle a registered connection holds back to its manager.
///
/// It lets the connection ask to be re-evaluated on the next reactor
/// iteration without an I/O event.
#[derive(Debug, Clone)]
pub struct Registration {
    id: ConnectionId,
    queue: Rc<RefCell<VecDeque<ConnectionId>>>,
}

impl Registration {
    pub(crate) fn new(id: ConnectionId, queue: Rc<RefCell<VecDeque<ConnectionId>>>) -> Self {
        Self { id, queue }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn reactivate(&self) {
        self.queue.borrow_mut().push_back(self.id);
    }
}

/// Transport-independent part of a connection.
pub trait Connection {
    fn role(&self) -> ConnectionRole;

    fn state(&self) -> ConnectionState;

    /// Descriptor for the current state.
    fn io_mode(&self) -> IoMode {
        IoMode::for_state(self.state())
    }

    /// Relative timeout armed whenever the descriptor asks for one.
    fn timeout(&self) -> Duration;

    /// Whether the manager may drop the connection once it is dead.
    fn is_auto_destroyable(&self) -> bool;

    fn local_addr(&self) -> Option<SocketAddr>;

    fn port(&self) -> Option<u16> {
        self.local_addr().map(|addr| addr.port())
    }

    fn peer_addr(&self) -> Option<SocketAddr>;

    fn set_peer_addr(&mut self, addr: SocketAddr);

    /// The socket to register with the poller, if it is still open.
    fn source(&mut self) -> Option<&mut dyn mio::event::Source>;

    /// Called by the manager when the connection is registered.
    fn attach(&mut self, registration: Registration);

    /// Called by the manager when the connection is handed back.
    fn detach(&mut self) -> Option<Registration>;

    fn receive(&mut self) -> IoMode;

    fn send(&mut self) -> IoMode;

    /// Abandons the exchange in flight and returns to the resting state.
    fn reset(&mut self, had_timeout: bool) -> IoMode;

    /// Closes the socket. The connection is dead afterwards.
    fn shutdown(&mut self);
}

/// RPC operations layered on a connection.
pub trait RpcConnection: Connection {
    fn header(&self) -> &RpcHeader;

    fn header_mut(&mut self) -> &mut RpcHeader;

    /// The wire cursor: positioned after the header once a request or reply
    /// has been received, after the call header once a request was begun.
    fn cursor(&mut self) -> &mut WireCursor;

    /// Ends decoding of request parameters.
    ///
    /// Returns `ResultCode::Ok` when `ok` is set and a request is being
    /// served, `ResultCode::BadParam` otherwise. Requests carry no ticket
    /// trailer, so nothing is read here.
    fn finish_request_decoding(&mut self, ticket: &dyn Ticket, ok: bool) -> ResultCode;

    /// Replies with the bare accepted header.
    fn send_ping_reply(&mut self) -> IoMode;

    /// Replies with the header as currently marked (see `RpcHeader::reject_with`).
    fn send_status_reply(&mut self) -> IoMode;

    /// Replies with a result code. `ResultCode::Ok` is sent as `Generic`.
    fn send_error_reply(&mut self, ticket: &dyn Ticket, code: ResultCode) -> IoMode;

    fn send_reply(&mut self, ticket: &dyn Ticket, result: &dyn Encode) -> IoMode;

    /// Drops the current request without replying.
    fn persona_non_grata(&mut self) -> IoMode;

    /// Starts a new client request: fresh xid, call header encoded.
    ///
    /// Returns false if the connection cannot issue requests.
    fn begin_request(&mut self, program: u32, version: u32, procedure: u32) -> bool;

    /// Hands the encoded request over for sending.
    fn send_request(&mut self) -> IoMode;
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [ConnectionState; 7] = [
        ConnectionState::Idle,
        ConnectionState::Waiting,
        ConnectionState::Passive,
        ConnectionState::Ready,
        ConnectionState::Receiving,
        ConnectionState::Sending,
        ConnectionState::Dead,
    ];

    #[test]
    fn test_state_mapping() {
        assert_eq!(IoMode::for_state(ConnectionState::Dead), IoMode::DEAD);
        assert_eq!(IoMode::for_state(ConnectionState::Idle), IoMode::READABLE);
        assert_eq!(
            IoMode::for_state(ConnectionState::Waiting).bits(),
            0x8001
        );
        assert!(IoMode::for_state(ConnectionState::Passive).is_dormant());
        assert_eq!(IoMode::for_state(ConnectionState::Ready), IoMode::ATTENTION);
        assert_eq!(
            IoMode::for_state(ConnectionState::Sending),
            IoMode::WRITEABLE
        );
        assert_eq!(
            IoMode::for_state(ConnectionState::Receiving),
            IoMode::READABLE
        );
    }

    #[test]
    fn test_states_never_report_errors() {
        for state in ALL_STATES {
            assert!(!IoMode::for_state(state).has_errors(), "{state}");
        }
    }

    #[test]
    fn test_error_bits() {
        let mode = IoMode::WRITEABLE | IoMode::HAD_TX_ERROR;
        assert!(mode.is_writeable());
        assert!(mode.had_tx_error());
        assert!(!mode.had_rx_error());
        assert!(mode.has_errors());
        assert_eq!(mode.without_errors(), IoMode::WRITEABLE);

        let mut mode = IoMode::READABLE;
        mode |= IoMode::HAD_ERROR;
        assert!(mode.had_error());
        assert_eq!(mode.bits(), 0x4001);
        assert_eq!(IoMode::from_bits(0x4001), mode);

        let mode = IoMode::READABLE | IoMode::DISCARDED | IoMode::HAD_RX_ERROR;
        assert!(mode.discarded());
        assert_eq!(mode.without_errors(), IoMode::READABLE | IoMode::DISCARDED);
    }

    #[test]
    fn test_registration_reactivate() {
        let queue = Rc::new(RefCell::new(VecDeque::new()));
        let registration = Registration::new(ConnectionId::new(7), queue.clone());
        registration.reactivate();
        registration.clone().reactivate();
        assert_eq!(
            queue.borrow().iter().copied().collect::<Vec<_>>(),
            vec![ConnectionId::new(7), ConnectionId::new(7)]
        );
        assert_eq!(registration.id().to_string(), "conn-7");
    }
}
