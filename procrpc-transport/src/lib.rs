//! # procrpc-transport
//!
//! Datagram transport and session core for procrpc.
//!
//! This crate provides:
//! - The `Connection`/`RpcConnection` contract and its UDP realization
//! - The per-connection protocol state machine and I/O-mode descriptor
//! - A cancellable, time-ordered timer queue
//! - The single-threaded connection manager (reactor) built on mio
//! - YAML + environment configuration

pub mod config;
pub mod connection;
pub mod datagram;
pub mod error;
pub mod manager;
pub mod timer;

pub use config::{ClientConfig, Config, ConfigError, NetworkConfig, ReactorConfig, ServerConfig};
pub use connection::{
    Connection, ConnectionId, ConnectionRole, ConnectionState, IoMode, Registration,
    RpcConnection,
};
pub use datagram::{ConnectionOptions, DatagramConnection};
pub use error::TransportError;
pub use manager::{ConnectionManager, Dispatcher, ManagerStats, ShutdownHandle};
pub use timer::{TimerEvent, TimerHandle, TimerQueue};
