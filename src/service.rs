//! Built-in demo program.

use std::time::Instant;

use procrpc_client::demo::{DEMO_PROGRAM, DEMO_VERSION, PROC_ECHO, PROC_INFO, PROC_PING};
use procrpc_client::ServerInfo;
use procrpc_protocol::{decode_ticket, AcceptStatus, Decode, NoneTicket, ProtocolError, ResultCode};
use procrpc_transport::{ConnectionId, Dispatcher, RpcConnection};
use tracing::debug;

/// Serves the demo program on every connection it is dispatched.
pub struct DemoService {
    name: String,
    started: Instant,
    calls: u64,
}

impl DemoService {
    pub fn new() -> Self {
        Self {
            name: "procrpc".to_string(),
            started: Instant::now(),
            calls: 0,
        }
    }

    /// Number of requests answered with a reply.
    pub fn calls(&self) -> u64 {
        self.calls
    }

    fn info(&self) -> ServerInfo {
        ServerInfo {
            name: self.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }

    fn reject(conn: &mut dyn RpcConnection, status: AcceptStatus) {
        conn.header_mut().reject_with(status);
        conn.send_status_reply();
    }

    fn handle_call(&self, conn: &mut dyn RpcConnection, procedure: u32) {
        let ticket = match decode_ticket(conn.cursor()) {
            Ok(ticket) => ticket,
            Err(e) => {
                let code = match e {
                    ProtocolError::UnknownAuthType(_) => ResultCode::UnknownAuth,
                    _ => ResultCode::BadParam,
                };
                debug!(error = %e, "undecodable ticket");
                conn.send_error_reply(&NoneTicket, code);
                return;
            }
        };

        match procedure {
            PROC_ECHO => {
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
            PROC_INFO => match conn.finish_request_decoding(ticket.as_ref(), true) {
                ResultCode::Ok => {
                    conn.send_reply(ticket.as_ref(), &self.info());
                }
                code => {
                    conn.send_error_reply(ticket.as_ref(), code);
                }
            },
            _ => Self::reject(conn, AcceptStatus::ProcedureUnavailable),
        }
    }
}

impl Default for DemoService {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher for DemoService {
    fn dispatch(&mut self, id: ConnectionId, conn: &mut dyn RpcConnection) {
        let header = conn.header();
        let (program, version, procedure) = (header.program, header.version, header.procedure);
        debug!(conn = %id, xid = header.xid, program, version, procedure, "call");

        if program != DEMO_PROGRAM {
            Self::reject(conn, AcceptStatus::ProgramUnavailable);
            return;
        }
        if version != DEMO_VERSION {
            Self::reject(
                conn,
                AcceptStatus::ProgramMismatch {
                    low: DEMO_VERSION,
                    high: DEMO_VERSION,
                },
            );
            return;
        }

        self.calls += 1;
        if procedure == PROC_PING {
            conn.send_ping_reply();
        } else {
            self.handle_call(conn, procedure);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use procrpc_client::{CallPolicy, Client, ClientError};
    use procrpc_protocol::{AuthType, ReplyStatus, SimpleTicket, Ticket, WireCursor};
    use procrpc_transport::{
        Connection, ConnectionManager, ConnectionOptions, DatagramConnection, ReactorConfig,
        ShutdownHandle,
    };
    use std::net::SocketAddr;
    use std::sync::mpsc;
    use std::thread::{self, JoinHandle};
    use std::time::Duration;

    struct Daemon {
        addr: SocketAddr,
        handle: ShutdownHandle,
        join: Option<JoinHandle<u64>>,
    }

    impl Daemon {
        fn start() -> Self {
            let (tx, rx) = mpsc::channel();
            let join = thread::spawn(move || {
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
                tx.send((server.local_addr().unwrap(), manager.shutdown_handle()))
                    .unwrap();
                manager.add_connection(server);

                let mut service = DemoService::new();
                manager.run(&mut service).unwrap();
                service.calls()
            });
            let (addr, handle) = rx.recv().unwrap();
            Self {
                addr,
                handle,
                join: Some(join),
            }
        }

        fn client(&self) -> Client {
            let policy = CallPolicy {
                timeout: Duration::from_secs(2),
                max_retries: 0,
            };
            Client::new(self.addr, policy).unwrap()
        }

        fn stop(mut self) -> u64 {
            self.handle.shutdown();
            self.join.take().map(|j| j.join().unwrap()).unwrap_or(0)
        }
    }

    impl Drop for Daemon {
        fn drop(&mut self) {
            self.handle.shutdown();
            if let Some(join) = self.join.take() {
                let _ = join.join();
            }
        }
    }

    /// Announces an auth type the server does not know.
    #[derive(Debug)]
    struct ForeignTicket;

    impl Ticket for ForeignTicket {
        fn auth_type(&self) -> AuthType {
            AuthType::Simple
        }

        fn encode_body(&self, _cursor: &mut WireCursor) -> Result<(), ProtocolError> {
            Ok(())
        }

        fn encode(&self, cursor: &mut WireCursor) -> Result<(), ProtocolError> {
            cursor.put_u32(99)
        }
    }

    fn rejection(err: ClientError) -> AcceptStatus {
        match err {
            ClientError::Rejected(ReplyStatus::Accepted(status)) => status,
            other => panic!("expected an accepted rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_demo_procedures() {
        let daemon = Daemon::start();
        let mut client = daemon.client();

        client.ping_demo().unwrap();
        assert_eq!(client.echo("tank/7/temp").unwrap(), "tank/7/temp");

        client.set_ticket(SimpleTicket::new("operator"));
        let info = client.info().unwrap();
        assert_eq!(info.name, "procrpc");
        assert_eq!(info.version, env!("CARGO_PKG_VERSION"));
        assert!(info.uptime_secs < 60);

        drop(client);
        assert_eq!(daemon.stop(), 3);
    }

    #[test]
    fn test_unknown_program() {
        let daemon = Daemon::start();
        let mut client = daemon.client();
        let err = client
            .call::<_, String>(0x2000_0999, DEMO_VERSION, PROC_ECHO, "x")
            .unwrap_err();
        assert_eq!(rejection(err), AcceptStatus::ProgramUnavailable);
    }

    #[test]
    fn test_version_mismatch() {
        let daemon = Daemon::start();
        let mut client = daemon.client();
        let err = client.ping(DEMO_PROGRAM, 2).unwrap_err();
        assert_eq!(
            rejection(err),
            AcceptStatus::ProgramMismatch { low: 1, high: 1 }
        );
    }

    #[test]
    fn test_unknown_procedure() {
        let daemon = Daemon::start();
        let mut client = daemon.client();
        let err = client
            .call::<_, String>(DEMO_PROGRAM, DEMO_VERSION, 9, &())
            .unwrap_err();
        assert_eq!(rejection(err), AcceptStatus::ProcedureUnavailable);
    }

    #[test]
    fn test_bad_params() {
        let daemon = Daemon::start();
        let mut client = daemon.client();
        // A length word announcing 7 bytes that never arrive.
        let err = client
            .call::<_, String>(DEMO_PROGRAM, DEMO_VERSION, PROC_ECHO, &7u32)
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Server {
                code: ResultCode::BadParam
            }
        ));

        // The service keeps answering afterwards.
        assert_eq!(client.echo("still here").unwrap(), "still here");
    }

    #[test]
    fn test_unknown_auth_type() {
        let daemon = Daemon::start();
        let mut client = daemon.client();
        client.set_ticket(ForeignTicket);
        let err = client.echo("who am i").unwrap_err();
        assert!(matches!(
            err,
            ClientError::Server {
                code: ResultCode::UnknownAuth
            }
        ));
    }
}
