//! In-process transport pair.
//!
//! [`endpoint`] returns a connector for the client side and a listener that
//! yields the server half of every connection the connector opens.

use crate::config::ServerConfig;
use crate::error::{constants, ProtocolError, Result};
use crate::transport::{Connector, Transport};
use bytes::Bytes;
use std::net::Ipv4Addr;
use tokio::sync::mpsc;
use tracing::debug;

/// One half of an in-process link.
#[derive(Debug)]
pub struct MemoryTransport {
    tx: Option<mpsc::UnboundedSender<Bytes>>,
    rx: mpsc::UnboundedReceiver<Bytes>,
    peer_ip: Ipv4Addr,
}

/// Two connected halves.
pub fn pair() -> (MemoryTransport, MemoryTransport) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    (
        MemoryTransport {
            tx: Some(a_tx),
            rx: b_rx,
            peer_ip: Ipv4Addr::LOCALHOST,
        },
        MemoryTransport {
            tx: Some(b_tx),
            rx: a_rx,
            peer_ip: Ipv4Addr::LOCALHOST,
        },
    )
}

impl MemoryTransport {
    /// Whether the other half has closed or been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().map_or(true, |tx| tx.is_closed())
    }
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    async fn send(&mut self, frame: Bytes) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(ProtocolError::ConnectionClosed)?;
        tx.send(frame)
            .map_err(|_| ProtocolError::TransportError(constants::ERR_TRANSPORT_CLOSED.into()))
    }

    async fn recv(&mut self) -> Result<Option<Bytes>> {
        Ok(self.rx.recv().await)
    }

    async fn close(&mut self) -> Result<()> {
        self.tx = None;
        self.rx.close();
        Ok(())
    }

    fn peer_ip(&self) -> Option<Ipv4Addr> {
        Some(self.peer_ip)
    }
}

/// Client side of [`endpoint`].
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    accepted: mpsc::UnboundedSender<MemoryTransport>,
}

/// Server side of [`endpoint`].
#[derive(Debug)]
pub struct MemoryListener {
    incoming: mpsc::UnboundedReceiver<MemoryTransport>,
}

impl MemoryListener {
    /// Wait for the next connection; `None` once every connector is gone.
    pub async fn accept(&mut self) -> Option<MemoryTransport> {
        self.incoming.recv().await
    }
}

pub fn endpoint() -> (MemoryConnector, MemoryListener) {
    let (accepted, incoming) = mpsc::unbounded_channel();
    (MemoryConnector { accepted }, MemoryListener { incoming })
}

#[async_trait::async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, server: &ServerConfig) -> Result<Box<dyn Transport>> {
        let (client, server_half) = pair();
        self.accepted
            .send(server_half)
            .map_err(|_| ProtocolError::TransportError("Memory listener dropped".into()))?;
        debug!(address = %server.address, "Opened in-memory transport");
        Ok(Box::new(client))
    }
}
