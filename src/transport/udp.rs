//! UDP transport over a connected `tokio::net::UdpSocket`.

use crate::config::{ServerConfig, BASE_PORT};
use crate::error::{ProtocolError, Result};
use crate::transport::{Connector, Transport};
use bytes::Bytes;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::net::{lookup_host, UdpSocket};
use tracing::{debug, info, instrument};

/// Largest datagram the game sends.
const MAX_DATAGRAM: usize = 65_507;

#[derive(Debug)]
pub struct UdpTransport {
    socket: Option<UdpSocket>,
    peer: SocketAddr,
    buf: Vec<u8>,
}

impl UdpTransport {
    /// Bind an ephemeral local port and connect it to `peer`.
    #[instrument(level = "debug")]
    pub async fn connect(peer: SocketAddr) -> Result<Self> {
        let local: SocketAddr = if peer.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(peer).await?;
        debug!(local = ?socket.local_addr().ok(), %peer, "UDP socket connected");

        Ok(Self {
            socket: Some(socket),
            peer,
            buf: vec![0u8; MAX_DATAGRAM],
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    fn socket(&self) -> Result<&UdpSocket> {
        self.socket.as_ref().ok_or(ProtocolError::ConnectionClosed)
    }
}

#[async_trait::async_trait]
impl Transport for UdpTransport {
    async fn send(&mut self, frame: Bytes) -> Result<()> {
        let sent = self.socket()?.send(&frame).await?;
        if sent != frame.len() {
            return Err(ProtocolError::TransportError(format!(
                "Short datagram write: {sent} of {} bytes",
                frame.len()
            )));
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Bytes>> {
        let Some(socket) = self.socket.as_ref() else {
            return Ok(None);
        };
        let len = socket.recv(&mut self.buf).await?;
        Ok(Some(Bytes::copy_from_slice(&self.buf[..len])))
    }

    async fn close(&mut self) -> Result<()> {
        if self.socket.take().is_some() {
            debug!(peer = %self.peer, "UDP socket closed");
        }
        Ok(())
    }

    fn peer_ip(&self) -> Option<Ipv4Addr> {
        match self.peer.ip() {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(ip) => ip.to_ipv4_mapped(),
        }
    }
}

/// Resolves the configured server and opens a [`UdpTransport`].
///
/// A bare host alternates between the two game ports on successive connects.
#[derive(Debug, Default)]
pub struct UdpConnector {
    attempts: AtomicU32,
}

impl UdpConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Port for the next connect to `server`.
    pub fn next_port(&self, server: &ServerConfig) -> u16 {
        match server.explicit_port() {
            Some(port) => port,
            None => {
                let attempt = self.attempts.fetch_add(1, Ordering::Relaxed);
                BASE_PORT + (attempt % 2) as u16
            }
        }
    }
}

#[async_trait::async_trait]
impl Connector for UdpConnector {
    async fn connect(&self, server: &ServerConfig) -> Result<Box<dyn Transport>> {
        let port = self.next_port(server);
        let host = server.host();
        let peer = lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| ProtocolError::TransportError(format!("No address for '{host}'")))?;

        info!(%peer, region = %server.region, "Opening UDP transport");
        Ok(Box::new(UdpTransport::connect(peer).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_host_alternates_ports() {
        let connector = UdpConnector::new();
        let server = ServerConfig {
            address: "10.1.2.3".into(),
            ..ServerConfig::default()
        };
        assert_eq!(connector.next_port(&server), 27900);
        assert_eq!(connector.next_port(&server), 27901);
        assert_eq!(connector.next_port(&server), 27900);

        let pinned = ServerConfig {
            address: "10.1.2.3:4000".into(),
            ..ServerConfig::default()
        };
        assert_eq!(connector.next_port(&pinned), 4000);
    }

    #[tokio::test]
    async fn test_datagram_round_trip() {
        let server = UdpSocket::bind("127.0.0.1:0").await.expect("bind");
        let addr = server.local_addr().expect("addr");

        let mut client = UdpTransport::connect(addr).await.expect("connect");
        assert_eq!(client.peer_ip(), Some(Ipv4Addr::LOCALHOST));
        client
            .send(Bytes::from_static(&[3, 1, 2]))
            .await
            .expect("send");

        let mut buf = [0u8; 16];
        let (len, from) = server.recv_from(&mut buf).await.expect("recv_from");
        assert_eq!(&buf[..len], &[3, 1, 2]);

        server.send_to(&[1, 9], from).await.expect("send_to");
        let frame = client.recv().await.expect("recv").expect("frame");
        assert_eq!(&frame[..], &[1, 9]);

        client.close().await.expect("close");
        assert!(matches!(
            client.send(Bytes::from_static(&[1])).await,
            Err(ProtocolError::ConnectionClosed)
        ));
    }
}
