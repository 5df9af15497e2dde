//! Connectionless transport to a single RM device.
//!
//! UDP "connect" semantics only: the OS filters inbound datagrams to the
//! fixed peer, no handshake occurs, and sends are best-effort.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::UdpSocket;

use crate::error::{Result, TransportError};

/// Largest datagram an RM device sends; replies are far below this.
const MAX_DATAGRAM: usize = 2048;

/// One-peer datagram transport. Implemented by [`UdpTransport`] in
/// production and by in-memory doubles in tests.
#[async_trait]
pub trait Transport: Send + Sync {
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Best-effort send; may silently fail to reach the peer.
    async fn send(&self, data: &[u8]) -> Result<()>;

    /// Suspend until one datagram arrives from the peer.
    async fn recv_one(&self) -> Result<Vec<u8>>;
}

/// UDP socket bound to a chosen local address and connected to the device.
pub struct UdpTransport {
    socket: UdpSocket,
    remote: SocketAddr,
}

impl UdpTransport {
    /// Bind an ephemeral port on `bind_addr` and fix `remote` as the peer.
    pub async fn connect(remote: SocketAddr, bind_addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| TransportError::BindFailed {
                addr: bind_addr,
                reason: e.to_string(),
            })?;

        socket
            .connect(remote)
            .await
            .map_err(|e| TransportError::ConnectFailed {
                addr: remote,
                reason: e.to_string(),
            })?;

        Ok(Self { socket, remote })
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn local_addr(&self) -> Result<SocketAddr> {
        self.socket
            .local_addr()
            .map_err(|e| TransportError::SocketError(e.to_string()).into())
    }

    async fn send(&self, data: &[u8]) -> Result<()> {
        self.socket
            .send(data)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        Ok(())
    }

    async fn recv_one(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let len = self
            .socket
            .recv(&mut buf)
            .await
            .map_err(|e| TransportError::ReceiveFailed(e.to_string()))?;
        buf.truncate(len);
        Ok(buf)
    }
}
