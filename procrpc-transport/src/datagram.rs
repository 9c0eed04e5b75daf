//! UDP realization of the connection contract.
//!
//! One datagram carries exactly one message. The buffer doubles as receive
//! target and encode area; the cursor is reset at the start of every receive
//! and every reply or request.

use std::io::ErrorKind;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use mio::net::UdpSocket;
use procrpc_protocol::{
    clamp_buffer_size, CursorMode, Encode, ProtocolError, ResultCode, RpcHeader, Ticket,
    WireCursor, DEFAULT_BUFFER_SIZE,
};
use tracing::{debug, trace, warn};

use crate::connection::{
    Connection, ConnectionRole, ConnectionState, IoMode, Registration, RpcConnection,
};
use crate::error::TransportError;

/// Construction parameters of a datagram connection.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub timeout: Duration,
    /// Requested buffer size; clamped to the supported range.
    pub buffer_size: usize,
    pub auto_destroy: bool,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            buffer_size: DEFAULT_BUFFER_SIZE,
            auto_destroy: false,
        }
    }
}

pub struct DatagramConnection {
    role: ConnectionRole,
    state: ConnectionState,
    socket: Option<UdpSocket>,
    cursor: WireCursor,
    header: RpcHeader,
    local_addr: Option<SocketAddr>,
    peer_addr: Option<SocketAddr>,
    timeout: Duration,
    auto_destroy: bool,
    registration: Option<Registration>,
}

impl DatagramConnection {
    /// Wraps a bound socket.
    ///
    /// If the socket cannot be switched to non-blocking mode or has no local
    /// address the connection starts out `Dead`.
    pub fn new(
        socket: std::net::UdpSocket,
        role: ConnectionRole,
        options: ConnectionOptions,
    ) -> Self {
        let xid = match role {
            ConnectionRole::Client => seed_xid(),
            ConnectionRole::Server => 0,
        };
        let mut conn = Self {
            role,
            state: resting_state(role),
            socket: None,
            cursor: WireCursor::with_capacity(clamp_buffer_size(options.buffer_size)),
            header: RpcHeader::new(xid),
            local_addr: None,
            peer_addr: None,
            timeout: options.timeout,
            auto_destroy: options.auto_destroy,
            registration: None,
        };

        match prepare_socket(socket) {
            Ok((socket, local_addr)) => {
                conn.socket = Some(socket);
                conn.local_addr = Some(local_addr);
            }
            Err(e) => {
                warn!(error = %e, role = ?role, "datagram socket unusable");
                conn.state = ConnectionState::Dead;
            }
        }
        conn
    }

    /// Binds a server connection to `addr`.
    pub fn bind_server(
        addr: SocketAddr,
        options: ConnectionOptions,
    ) -> Result<Self, TransportError> {
        let socket = std::net::UdpSocket::bind(addr)?;
        Self::new(socket, ConnectionRole::Server, options).alive()
    }

    /// Creates a client connection on an ephemeral port calling `peer`.
    pub fn connect_client(
        peer: SocketAddr,
        options: ConnectionOptions,
    ) -> Result<Self, TransportError> {
        let local: SocketAddr = match peer {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = std::net::UdpSocket::bind(local)?;
        let mut conn = Self::new(socket, ConnectionRole::Client, options).alive()?;
        conn.set_peer_addr(peer);
        Ok(conn)
    }

    fn alive(self) -> Result<Self, TransportError> {
        if self.state == ConnectionState::Dead {
            return Err(TransportError::ConnectionSetup(
                "socket could not be made non-blocking".to_string(),
            ));
        }
        Ok(self)
    }

    fn mark_dead(&mut self) -> IoMode {
        self.state = ConnectionState::Dead;
        IoMode::DEAD
    }

    fn accept_request(&mut self, from: SocketAddr) -> IoMode {
        self.peer_addr = Some(from);
        match self.header.decode_call(&mut self.cursor) {
            Ok(()) => {
                self.state = ConnectionState::Ready;
                debug!(
                    xid = self.header.xid,
                    program = self.header.program,
                    version = self.header.version,
                    procedure = self.header.procedure,
                    %from,
                    "request ready"
                );
                self.io_mode()
            }
            Err(e) => {
                debug!(xid = self.header.xid, %from, error = %e, "rejecting malformed request");
                self.cursor.start_encode();
                match self.header.encode_reply(&mut self.cursor) {
                    Ok(()) => {
                        self.state = ConnectionState::Sending;
                        self.io_mode() | IoMode::HAD_ERROR
                    }
                    Err(e) => {
                        warn!(error = %e, "rejection does not fit the buffer");
                        self.reset(false) | IoMode::HAD_ERROR
                    }
                }
            }
        }
    }

    fn accept_reply(&mut self) -> IoMode {
        match self.header.decode_reply(&mut self.cursor) {
            Ok(()) => {
                self.state = ConnectionState::Ready;
                debug!(xid = self.header.xid, "reply ready");
                self.io_mode()
            }
            Err(e) => {
                debug!(xid = self.header.xid, error = %e, "undecodable reply");
                self.io_mode() | IoMode::HAD_ERROR
            }
        }
    }

    fn start_reply(&mut self) -> bool {
        if self.role != ConnectionRole::Server || self.state == ConnectionState::Dead {
            return false;
        }
        self.cursor.start_encode();
        true
    }

    fn finish_reply(&mut self, encoded: Result<(), ProtocolError>) -> IoMode {
        match encoded {
            Ok(()) => {
                self.state = ConnectionState::Sending;
                self.io_mode()
            }
            Err(e) => {
                warn!(xid = self.header.xid, error = %e, "reply encoding failed");
                self.reset(false)
            }
        }
    }

    fn encode_result(
        &mut self,
        ticket: &dyn Ticket,
        code: ResultCode,
        result: Option<&dyn Encode>,
    ) -> Result<(), ProtocolError> {
        self.header.encode_reply(&mut self.cursor)?;
        ticket.encode(&mut self.cursor)?;
        code.encode(&mut self.cursor)?;
        if let Some(result) = result {
            result.encode(&mut self.cursor)?;
        }
        ticket.encode_trailer(&mut self.cursor)
    }
}

impl Connection for DatagramConnection {
    fn role(&self) -> ConnectionRole {
        self.role
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    /// A server reply that cannot be sent within the timeout is dropped.
    fn io_mode(&self) -> IoMode {
        let mode = IoMode::for_state(self.state);
        if self.role == ConnectionRole::Server && self.state == ConnectionState::Sending {
            mode | IoMode::NEED_TIMEOUT
        } else {
            mode
        }
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn is_auto_destroyable(&self) -> bool {
        self.auto_destroy
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    fn set_peer_addr(&mut self, addr: SocketAddr) {
        self.peer_addr = Some(addr);
    }

    fn source(&mut self) -> Option<&mut dyn mio::event::Source> {
        self.socket
            .as_mut()
            .map(|socket| socket as &mut dyn mio::event::Source)
    }

    fn attach(&mut self, registration: Registration) {
        self.registration = Some(registration);
    }

    fn detach(&mut self) -> Option<Registration> {
        self.registration.take()
    }

    fn receive(&mut self) -> IoMode {
        if !matches!(
            self.state,
            ConnectionState::Idle | ConnectionState::Waiting
        ) {
            return self.reset(false);
        }

        loop {
            let received = match &self.socket {
                Some(socket) => socket.recv_from(self.cursor.receive_buffer()),
                None => return self.mark_dead(),
            };

            match received {
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return self.io_mode(),
                Err(e) => {
                    warn!(error = %e, "datagram receive failed");
                    return self.io_mode() | IoMode::HAD_RX_ERROR;
                }
                Ok((len, from)) => {
                    self.cursor.start_decode(len);
                    if len < 4 {
                        debug!(len, %from, "runt datagram");
                        return self.io_mode() | IoMode::HAD_RX_ERROR;
                    }
                    trace!(len, %from, "datagram received");

                    match self.role {
                        ConnectionRole::Server => return self.accept_request(from),
                        ConnectionRole::Client => {
                            let xid = self.cursor.peek_u32();
                            if xid != Some(self.header.xid) {
                                debug!(
                                    expected = self.header.xid,
                                    received = ?xid,
                                    "discarding stale reply"
                                );
                                return self.io_mode() | IoMode::DISCARDED;
                            }
                            return self.accept_reply();
                        }
                    }
                }
            }
        }
    }

    fn send(&mut self) -> IoMode {
        if self.state != ConnectionState::Sending {
            return self.reset(false);
        }
        let Some(peer) = self.peer_addr else {
            warn!(xid = self.header.xid, "no peer address to send to");
            return self.reset(false) | IoMode::HAD_TX_ERROR;
        };

        loop {
            let sent = match &self.socket {
                Some(socket) => socket.send_to(self.cursor.encoded(), peer),
                None => return self.mark_dead(),
            };

            match sent {
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return self.io_mode(),
                Err(e) => {
                    warn!(%peer, error = %e, "datagram send failed");
                    return self.reset(false) | IoMode::HAD_TX_ERROR;
                }
                Ok(len) if len != self.cursor.position() => {
                    warn!(%peer, len, expected = self.cursor.position(), "short datagram send");
                    return self.reset(false) | IoMode::HAD_TX_ERROR;
                }
                Ok(len) => {
                    trace!(len, %peer, "datagram sent");
                    self.state = match self.role {
                        ConnectionRole::Server => ConnectionState::Idle,
                        ConnectionRole::Client => ConnectionState::Waiting,
                    };
                    return self.io_mode();
                }
            }
        }
    }

    fn reset(&mut self, had_timeout: bool) -> IoMode {
        if self.state == ConnectionState::Dead {
            return IoMode::DEAD;
        }
        if had_timeout {
            debug!(xid = self.header.xid, state = %self.state, "exchange timed out");
        }
        self.state = resting_state(self.role);
        self.io_mode()
    }

    fn shutdown(&mut self) {
        if self.socket.take().is_some() {
            debug!(local = ?self.local_addr, "datagram connection shut down");
        }
        self.state = ConnectionState::Dead;
    }
}

impl RpcConnection for DatagramConnection {
    fn header(&self) -> &RpcHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut RpcHeader {
        &mut self.header
    }

    fn cursor(&mut self) -> &mut WireCursor {
        &mut self.cursor
    }

    fn finish_request_decoding(&mut self, ticket: &dyn Ticket, ok: bool) -> ResultCode {
        if ok && self.role == ConnectionRole::Server && self.state == ConnectionState::Ready {
            ResultCode::Ok
        } else {
            debug!(
                xid = self.header.xid,
                auth = ?ticket.auth_type(),
                "request parameters could not be decoded"
            );
            ResultCode::BadParam
        }
    }

    fn send_ping_reply(&mut self) -> IoMode {
        if !self.start_reply() {
            return self.io_mode();
        }
        self.header.accept_call();
        let encoded = self.header.encode_reply(&mut self.cursor);
        self.finish_reply(encoded)
    }

    fn send_status_reply(&mut self) -> IoMode {
        if !self.start_reply() {
            return self.io_mode();
        }
        let encoded = self.header.encode_reply(&mut self.cursor);
        self.finish_reply(encoded)
    }

    fn send_error_reply(&mut self, ticket: &dyn Ticket, code: ResultCode) -> IoMode {
        if !self.start_reply() {
            return self.io_mode();
        }
        let code = if code.is_ok() { ResultCode::Generic } else { code };
        self.header.accept_call();
        let encoded = self.encode_result(ticket, code, None);
        self.finish_reply(encoded)
    }

    fn send_reply(&mut self, ticket: &dyn Ticket, result: &dyn Encode) -> IoMode {
        if !self.start_reply() {
            return self.io_mode();
        }
        self.header.accept_call();
        let encoded = self.encode_result(ticket, ResultCode::Ok, Some(result));
        self.finish_reply(encoded)
    }

    fn persona_non_grata(&mut self) -> IoMode {
        debug!(xid = self.header.xid, "abandoning request");
        self.reset(false)
    }

    fn begin_request(&mut self, program: u32, version: u32, procedure: u32) -> bool {
        if self.role != ConnectionRole::Client || self.state == ConnectionState::Dead {
            return false;
        }
        self.cursor.start_encode();
        self.state = ConnectionState::Passive;
        self.header.begin_call(program, version, procedure);
        match self.header.encode_call(&mut self.cursor) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "call header does not fit the buffer");
                self.reset(false);
                false
            }
        }
    }

    fn send_request(&mut self) -> IoMode {
        if self.role != ConnectionRole::Client
            || self.state != ConnectionState::Passive
            || self.cursor.mode() != CursorMode::Encode
        {
            return self.io_mode();
        }
        self.state = ConnectionState::Sending;
        if let Some(registration) = &self.registration {
            registration.reactivate();
        }
        self.io_mode()
    }
}

fn resting_state(role: ConnectionRole) -> ConnectionState {
    match role {
        ConnectionRole::Server => ConnectionState::Idle,
        ConnectionRole::Client => ConnectionState::Passive,
    }
}

fn prepare_socket(socket: std::net::UdpSocket) -> std::io::Result<(UdpSocket, SocketAddr)> {
    socket.set_nonblocking(true)?;
    let local_addr = socket.local_addr()?;
    Ok((UdpSocket::from_std(socket), local_addr))
}

/// Initial transaction id: process id mixed with the wall clock.
fn seed_xid() -> u32 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    std::process::id() ^ (now.as_secs() as u32) ^ now.subsec_micros()
}
