//! UDP transport layer for peer datagrams
//!
//! Provides a thin wrapper around tokio's UdpSocket with configurable
//! send/receive buffer sizes. One socket serves both directions: peers see
//! our listen address as the source of everything we send.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Address to bind to
    pub bind: SocketAddr,
    /// Send buffer size in bytes
    pub sndbuf: usize,
    /// Receive buffer size in bytes
    pub rcvbuf: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 0)),
            sndbuf: 1024 * 1024, // 1MB
            rcvbuf: 1024 * 1024, // 1MB
        }
    }
}

/// Cloneable handle to the node's UDP socket.
#[derive(Clone, Debug)]
pub struct TransportHandle {
    socket: Arc<UdpSocket>,
}

impl TransportHandle {
    /// Bind a socket with the configured buffer sizes.
    pub async fn new(cfg: TransportConfig) -> anyhow::Result<Self> {
        let domain = if cfg.bind.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;

        // Set buffer sizes before binding
        socket.set_send_buffer_size(cfg.sndbuf)?;
        socket.set_recv_buffer_size(cfg.rcvbuf)?;
        socket.set_reuse_address(true)?;

        socket
            .bind(&cfg.bind.into())
            .with_context(|| format!("bind UDP socket on {}", cfg.bind))?;
        socket.set_nonblocking(true)?;

        let std_socket: std::net::UdpSocket = socket.into();
        let tokio_socket = UdpSocket::from_std(std_socket)?;

        tracing::info!(
            "UDP transport bound to {} (sndbuf={}, rcvbuf={})",
            tokio_socket.local_addr()?,
            cfg.sndbuf,
            cfg.rcvbuf
        );

        Ok(Self {
            socket: Arc::new(tokio_socket),
        })
    }

    /// Send one datagram to `addr`.
    pub async fn send_to(&self, addr: SocketAddr, data: &[u8]) -> anyhow::Result<()> {
        let sent = self.socket.send_to(data, addr).await?;
        if sent != data.len() {
            anyhow::bail!("short datagram write to {addr}: {sent} of {} bytes", data.len());
        }
        Ok(())
    }

    /// Receive one datagram from any sender.
    pub async fn recv_from(&self, buf: &mut [u8]) -> anyhow::Result<(usize, SocketAddr)> {
        let (len, addr) = self.socket.recv_from(buf).await?;
        Ok((len, addr))
    }

    /// Get the local address this transport is bound to
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

/// Resolve a `host:port` string to the first matching socket address.
pub async fn resolve(addr: &str) -> anyhow::Result<SocketAddr> {
    tokio::net::lookup_host(addr)
        .await
        .with_context(|| format!("resolve {addr}"))?
        .next()
        .with_context(|| format!("no address found for {addr}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> TransportConfig {
        TransportConfig {
            bind: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_transport_creation() {
        let transport = TransportHandle::new(loopback()).await.unwrap();
        let addr = transport.local_addr().unwrap();
        assert!(addr.port() > 0);
    }

    #[tokio::test]
    async fn test_send_recv() {
        let t1 = TransportHandle::new(loopback()).await.unwrap();
        let t2 = TransportHandle::new(loopback()).await.unwrap();

        let addr2 = t2.local_addr().unwrap();
        t1.send_to(addr2, b"hello").await.unwrap();

        let mut buf = vec![0u8; 2048];
        let (len, from_addr) = t2.recv_from(&mut buf).await.unwrap();

        assert_eq!(&buf[..len], b"hello");
        assert_eq!(from_addr, t1.local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_clones_share_socket() {
        let t1 = TransportHandle::new(loopback()).await.unwrap();
        let clone = t1.clone();
        assert_eq!(t1.local_addr().unwrap(), clone.local_addr().unwrap());
    }

    #[test]
    fn test_resolve_literal_address() {
        let addr = tokio_test::block_on(resolve("127.0.0.1:4567")).unwrap();
        assert_eq!(addr, "127.0.0.1:4567".parse().unwrap());
        assert!(tokio_test::block_on(resolve("not an address")).is_err());
    }
}
