//! # Transports
//!
//! Frame-oriented transports the connection engine runs over. A transport
//! moves whole frames (`[opcode][payload]`); it never looks inside them.
//!
//! - [`udp`]: one connected `tokio::net::UdpSocket`, one datagram per frame.
//! - [`memory`]: an in-process pair for tests and demos.

pub mod memory;
pub mod udp;

use crate::config::ServerConfig;
use crate::error::Result;
use bytes::Bytes;
use std::net::Ipv4Addr;

/// A connected, frame-oriented transport.
#[async_trait::async_trait]
pub trait Transport: Send + 'static {
    /// Send one frame.
    async fn send(&mut self, frame: Bytes) -> Result<()>;

    /// Receive the next frame.
    ///
    /// Returns `Ok(None)` once the peer has closed. Must be cancel-safe: the
    /// connection polls it inside `select!` next to its timers.
    async fn recv(&mut self) -> Result<Option<Bytes>>;

    /// Release the underlying resource. Further sends fail.
    async fn close(&mut self) -> Result<()>;

    /// IPv4 address of the server, echoed in keep-alive pings.
    fn peer_ip(&self) -> Option<Ipv4Addr> {
        None
    }
}

/// Opens a fresh transport for each `start()`.
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, server: &ServerConfig) -> Result<Box<dyn Transport>>;
}
