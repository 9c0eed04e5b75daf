//! Blocking call API.
//!
//! A `Client` owns a private connection manager with a single client
//! connection. Every attempt of a call gets a fresh transaction id and its
//! own timeout; replies to earlier attempts are discarded by the xid check
//! and never extend the wait.

use std::net::SocketAddr;
use std::time::Duration;

use procrpc_protocol::{
    decode_ticket, Decode, Encode, NoneTicket, ProtocolError, ResultCode, Ticket,
};
use procrpc_transport::{
    ClientConfig, Config, ConnectionId, ConnectionManager, ConnectionOptions, ConnectionState,
    DatagramConnection, ManagerStats, ReactorConfig, RpcConnection,
};
use tracing::{debug, warn};

use crate::error::ClientError;

/// How long to wait for a reply and how often to try.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallPolicy {
    /// Per-attempt reply timeout.
    pub timeout: Duration,
    /// Additional attempts after the first one fails.
    pub max_retries: u32,
}

impl CallPolicy {
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

impl From<&ClientConfig> for CallPolicy {
    fn from(config: &ClientConfig) -> Self {
        Self {
            timeout: config.request_timeout(),
            max_retries: config.max_retries,
        }
    }
}

enum Attempt {
    Replied,
    Failed,
}

/// Blocking procrpc client.
pub struct Client {
    manager: ConnectionManager,
    id: ConnectionId,
    policy: CallPolicy,
    ticket: Box<dyn Ticket>,
}

impl Client {
    /// Creates a client calling `server` with default reactor settings.
    pub fn new(server: SocketAddr, policy: CallPolicy) -> Result<Self, ClientError> {
        Self::with_settings(
            server,
            policy,
            &ReactorConfig::default(),
            procrpc_protocol::DEFAULT_BUFFER_SIZE,
        )
    }

    /// Creates a client calling `config.network.bind_addr`.
    pub fn from_config(config: &Config) -> Result<Self, ClientError> {
        Self::with_settings(
            config.network.bind_addr,
            CallPolicy::from(&config.client),
            &config.reactor,
            config.network.effective_buffer_size(),
        )
    }

    pub fn with_settings(
        server: SocketAddr,
        policy: CallPolicy,
        reactor: &ReactorConfig,
        buffer_size: usize,
    ) -> Result<Self, ClientError> {
        let conn = DatagramConnection::connect_client(
            server,
            ConnectionOptions {
                timeout: policy.timeout,
                buffer_size,
                auto_destroy: false,
            },
        )?;
        let mut manager = ConnectionManager::new(reactor)?;
        let id = manager.add_connection(conn);

        Ok(Self {
            manager,
            id,
            policy,
            ticket: Box::new(NoneTicket),
        })
    }

    /// Sets the ticket sent with every call.
    pub fn set_ticket(&mut self, ticket: impl Ticket + 'static) {
        self.ticket = Box::new(ticket);
    }

    pub fn policy(&self) -> &CallPolicy {
        &self.policy
    }

    pub fn server_addr(&self) -> Option<SocketAddr> {
        self.manager.connection(self.id).and_then(|c| c.peer_addr())
    }

    pub fn stats(&self) -> ManagerStats {
        self.manager.stats()
    }

    // =========================================================================
    // Calls
    // =========================================================================

    /// Sends a header-only null call to procedure 0.
    pub fn ping(&mut self, program: u32, version: u32) -> Result<(), ClientError> {
        self.exchange(program, version, 0, |_, _| Ok(()))?;
        let conn = self.conn_mut()?;
        let accepted = conn.header().is_success();
        let status = conn.header().reply_status();
        conn.reset(false);
        if accepted {
            Ok(())
        } else {
            Err(ClientError::Rejected(status))
        }
    }

    /// Calls a procedure with `params` and decodes its result.
    pub fn call<P, R>(
        &mut self,
        program: u32,
        version: u32,
        procedure: u32,
        params: &P,
    ) -> Result<R, ClientError>
    where
        P: Encode + ?Sized,
        R: Decode,
    {
        self.exchange(program, version, procedure, |conn, ticket| {
            ticket.encode(conn.cursor())?;
            params.encode(conn.cursor())
        })?;
        let conn = self.conn_mut()?;
        let result = read_reply(conn);
        conn.reset(false);
        result
    }

    fn conn_mut(&mut self) -> Result<&mut (dyn RpcConnection + 'static), ClientError> {
        self.manager
            .connection_mut(self.id)
            .ok_or(ClientError::ConnectionDead)
    }

    /// Runs attempts until one gets a reply; the reply is left buffered.
    fn exchange<F>(
        &mut self,
        program: u32,
        version: u32,
        procedure: u32,
        encode_body: F,
    ) -> Result<(), ClientError>
    where
        F: Fn(&mut dyn RpcConnection, &dyn Ticket) -> Result<(), ProtocolError>,
    {
        let attempts = self.policy.attempts();
        for attempt in 1..=attempts {
            let ticket = self.ticket.as_ref();
            let conn = self
                .manager
                .connection_mut(self.id)
                .ok_or(ClientError::ConnectionDead)?;
            if !conn.begin_request(program, version, procedure) {
                return Err(ClientError::ConnectionDead);
            }
            if let Err(e) = encode_body(conn, ticket) {
                conn.reset(false);
                return Err(e.into());
            }
            conn.send_request();
            debug!(
                xid = conn.header().xid,
                program, procedure, attempt, "request sent"
            );

            match self.await_reply()? {
                Attempt::Replied => return Ok(()),
                Attempt::Failed => {
                    debug!(attempt, attempts, "attempt failed");
                }
            }
        }
        warn!(program, procedure, attempts, "call timed out");
        Err(ClientError::Timeout { attempts })
    }

    fn await_reply(&mut self) -> Result<Attempt, ClientError> {
        let id = self.id;
        let mut ignore = |_: ConnectionId, _: &mut dyn RpcConnection| {};
        loop {
            self.manager.run_once(&mut ignore)?;
            let state = self
                .manager
                .connection(id)
                .map(|c| c.state())
                .ok_or(ClientError::ConnectionDead)?;
            match state {
                ConnectionState::Ready => return Ok(Attempt::Replied),
                ConnectionState::Passive => return Ok(Attempt::Failed),
                ConnectionState::Dead => return Err(ClientError::ConnectionDead),
                _ => {}
            }
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Some(mut conn) = self.manager.remove(self.id) {
            conn.shutdown();
        }
    }
}

fn read_reply<R: Decode>(conn: &mut dyn RpcConnection) -> Result<R, ClientError> {
    if !conn.header().is_success() {
        return Err(ClientError::Rejected(conn.header().reply_status()));
    }
    let ticket = decode_ticket(conn.cursor())?;
    let code = ResultCode::decode(conn.cursor())?;
    if !code.is_ok() {
        return Err(ClientError::Server { code });
    }
    let result = R::decode(conn.cursor())?;
    ticket.decode_trailer(conn.cursor())?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo::{ServerInfo, DEMO_PROGRAM, DEMO_VERSION, PROC_ECHO};
    use procrpc_protocol::{AcceptStatus, ReplyStatus, RpcHeader, SimpleTicket, WireCursor};
    use procrpc_transport::{Connection, ShutdownHandle};
    use std::net::UdpSocket;
    use std::sync::mpsc;
    use std::thread::{self, JoinHandle};
    use std::time::Instant;

    struct TestServer {
        addr: SocketAddr,
        handle: ShutdownHandle,
        join: Option<JoinHandle<()>>,
    }

    impl Drop for TestServer {
        fn drop(&mut self) {
            self.handle.shutdown();
            if let Some(join) = self.join.take() {
                join.join().unwrap();
            }
        }
    }

    fn spawn_server<F>(handler: F) -> TestServer
    where
        F: FnMut(&mut dyn RpcConnection) + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let join = thread::spawn(move || {
            let mut handler = handler;
            let config = ReactorConfig {
                max_poll_interval_ms: 20,
                events_capacity: 16,
            };
            let mut manager = ConnectionManager::new(&config).unwrap();
            let server = DatagramConnection::bind_server(
                "127.0.0.1:0".parse().unwrap(),
                ConnectionOptions::default(),
            )
            .unwrap();
            let addr = server.local_addr().unwrap();
            manager.add_connection(server);
            tx.send((addr, manager.shutdown_handle())).unwrap();

            let mut dispatcher = |_: ConnectionId, conn: &mut dyn RpcConnection| handler(conn);
            manager.run(&mut dispatcher).unwrap();
        });
        let (addr, handle) = rx.recv().unwrap();
        TestServer {
            addr,
            handle,
            join: Some(join),
        }
    }

    fn echo_handler(conn: &mut dyn RpcConnection) {
        if conn.header().procedure == 0 {
            conn.send_ping_reply();
            return;
        }
        let Ok(ticket) = decode_ticket(conn.cursor()) else {
            conn.persona_non_grata();
            return;
        };
        let text = String::decode(conn.cursor());
        match conn.finish_request_decoding(ticket.as_ref(), text.is_ok()) {
            ResultCode::Ok => {
                let text = text.unwrap_or_default();
                conn.send_reply(ticket.as_ref(), &text);
            }
            code => {
                conn.send_error_reply(ticket.as_ref(), code);
            }
        }
    }

    fn policy(timeout_ms: u64, max_retries: u32) -> CallPolicy {
        CallPolicy {
            timeout: Duration::from_millis(timeout_ms),
            max_retries,
        }
    }

    #[test]
    fn test_policy_from_config() {
        let policy = CallPolicy::default();
        assert_eq!(policy.timeout, Duration::from_secs(2));
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.attempts(), 4);
    }

    #[test]
    fn test_echo_call() {
        let server = spawn_server(echo_handler);
        let mut client = Client::new(server.addr, policy(2000, 0)).unwrap();
        client.set_ticket(SimpleTicket::new("operator"));

        let reply: String = client
            .call(DEMO_PROGRAM, DEMO_VERSION, PROC_ECHO, "boiler/level")
            .unwrap();
        assert_eq!(reply, "boiler/level");
        assert_eq!(client.server_addr(), Some(server.addr));

        // The connection is reusable once a call completes.
        assert_eq!(client.echo("second").unwrap(), "second");
    }

    #[test]
    fn test_ping() {
        let server = spawn_server(echo_handler);
        let mut client = Client::new(server.addr, policy(2000, 0)).unwrap();
        client.ping(DEMO_PROGRAM, DEMO_VERSION).unwrap();
        client.ping_demo().unwrap();
    }

    #[test]
    fn test_server_error_code() {
        let server = spawn_server(|conn: &mut dyn RpcConnection| {
            conn.send_error_reply(&NoneTicket, ResultCode::NoAccess);
        });
        let mut client = Client::new(server.addr, policy(2000, 0)).unwrap();
        let err = client.echo("x").unwrap_err();
        assert!(matches!(
            err,
            ClientError::Server {
                code: ResultCode::NoAccess
            }
        ));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_rejected_call() {
        let server = spawn_server(|conn: &mut dyn RpcConnection| {
            conn.header_mut()
                .reject_with(AcceptStatus::ProcedureUnavailable);
            conn.send_status_reply();
        });
        let mut client = Client::new(server.addr, policy(2000, 0)).unwrap();
        let err = client.info().unwrap_err();
        assert!(matches!(
            err,
            ClientError::Rejected(ReplyStatus::Accepted(AcceptStatus::ProcedureUnavailable))
        ));
    }

    #[test]
    fn test_wrong_result_type_is_protocol_error() {
        let server = spawn_server(echo_handler);
        let mut client = Client::new(server.addr, policy(2000, 0)).unwrap();
        let result: Result<ServerInfo, _> =
            client.call(DEMO_PROGRAM, DEMO_VERSION, PROC_ECHO, "");
        assert!(matches!(result, Err(ClientError::Protocol(_))));
    }

    #[test]
    fn test_timeout_after_retries() {
        let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
        silent
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut client = Client::new(silent.local_addr().unwrap(), policy(100, 2)).unwrap();

        let started = Instant::now();
        let err = client.echo("anyone?").unwrap_err();
        assert!(matches!(err, ClientError::Timeout { attempts: 3 }));
        assert!(err.is_retryable());
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert_eq!(client.stats().timeouts, 3);

        let mut xids = Vec::new();
        let mut buf = [0u8; 1024];
        for _ in 0..3 {
            let (len, _) = silent.recv_from(&mut buf).unwrap();
            let mut cursor = WireCursor::with_capacity(1024);
            cursor.receive_buffer()[..len].copy_from_slice(&buf[..len]);
            cursor.start_decode(len);
            let mut header = RpcHeader::new(0);
            header.decode_call(&mut cursor).unwrap();
            xids.push(header.xid);
        }
        assert_eq!(xids[1], xids[0].wrapping_add(1));
        assert_eq!(xids[2], xids[1].wrapping_add(1));
    }

    #[test]
    fn test_stale_replies_do_not_extend_wait() {
        let raw = UdpSocket::bind("127.0.0.1:0").unwrap();
        raw.set_read_timeout(Some(Duration::from_millis(50)))
            .unwrap();
        let addr = raw.local_addr().unwrap();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        // Answers every request with a reply for the previous xid, repeatedly.
        let noise = thread::spawn(move || {
            let mut buf = [0u8; 1024];
            let mut last: Option<(u32, SocketAddr)> = None;
            while stop_rx.try_recv().is_err() {
                if let Ok((len, from)) = raw.recv_from(&mut buf) {
                    let mut cursor = WireCursor::with_capacity(1024);
                    cursor.receive_buffer()[..len].copy_from_slice(&buf[..len]);
                    cursor.start_decode(len);
                    let mut header = RpcHeader::new(0);
                    if header.decode_call(&mut cursor).is_ok() {
                        last = Some((header.xid, from));
                    }
                }
                if let Some((xid, to)) = last {
                    let stale = RpcHeader::new(xid.wrapping_sub(1));
                    let mut cursor = WireCursor::with_capacity(64);
                    cursor.start_encode();
                    stale.encode_reply(&mut cursor).unwrap();
                    let _ = raw.send_to(cursor.encoded(), to);
                }
            }
        });

        let mut client = Client::new(addr, policy(150, 1)).unwrap();
        let started = Instant::now();
        let err = client.echo("x").unwrap_err();
        let elapsed = started.elapsed();
        stop_tx.send(()).unwrap();
        noise.join().unwrap();

        assert!(matches!(err, ClientError::Timeout { attempts: 2 }));
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_secs(3));
    }
}
