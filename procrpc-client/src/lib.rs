//! # procrpc-client
//!
//! Client library for procrpc.
//!
//! This crate provides:
//! - A blocking call API driving its own connection manager
//! - An explicit per-attempt timeout and retry policy
//! - Typed calls for the built-in demo program

pub mod client;
pub mod demo;
pub mod error;

pub use client::{CallPolicy, Client};
pub use demo::ServerInfo;
pub use error::ClientError;
