//! A bound datagram endpoint. This is the only layer that touches the
//! network; everything above it deals in [`Packet`](crate::Packet)s.

use std::io;
use std::net::SocketAddr;
use tokio::net::UdpSocket;

/// The size of the receive buffer. Larger than any encodable packet so a
/// datagram is never truncated on the way in.
pub const RECV_BUFFER_SIZE: usize = 2048;

/// A bound UDP socket.
///
/// Sending and receiving take `&self`, so an `Arc<DatagramSocket>` can be
/// shared between the acceptor (the sole receiver) and the server sessions
/// that answer through it.
#[derive(Debug)]
pub struct DatagramSocket {
    socket: UdpSocket,
}

impl DatagramSocket {
    /// Creates an endpoint listening on `addr`.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self { socket })
    }

    /// Creates an endpoint on an ephemeral local port whose datagrams all go
    /// to `peer`. Datagrams from other sources are filtered by the OS.
    pub async fn bind_to_peer(peer: SocketAddr) -> io::Result<Self> {
        let local: SocketAddr = if peer.is_ipv4() {
            "0.0.0.0:0".parse().unwrap()
        } else {
            "[::]:0".parse().unwrap()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(peer).await?;
        Ok(Self { socket })
    }

    /// Restricts an already-bound endpoint to `peer`.
    pub async fn connect_peer(&self, peer: SocketAddr) -> io::Result<()> {
        self.socket.connect(peer).await
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Best-effort send to `peer`. Does not retry.
    pub async fn send_to(&self, bytes: &[u8], peer: SocketAddr) -> io::Result<()> {
        self.socket.send_to(bytes, peer).await?;
        Ok(())
    }

    /// Best-effort send to the connected peer.
    pub async fn send(&self, bytes: &[u8]) -> io::Result<()> {
        self.socket.send(bytes).await?;
        Ok(())
    }

    /// Suspends until a datagram arrives, returning its bytes and source.
    pub async fn recv_from(&self) -> io::Result<(Vec<u8>, SocketAddr)> {
        let mut buf = [0u8; RECV_BUFFER_SIZE];
        let (len, peer) = self.socket.recv_from(&mut buf).await?;
        Ok((buf[..len].to_vec(), peer))
    }

    /// Suspends until a datagram arrives from the connected peer.
    pub async fn recv(&self) -> io::Result<Vec<u8>> {
        let mut buf = [0u8; RECV_BUFFER_SIZE];
        let len = self.socket.recv(&mut buf).await?;
        Ok(buf[..len].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn localhost() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn delivers_between_endpoints() -> anyhow::Result<()> {
        let listener = DatagramSocket::bind(localhost()).await?;
        let sender = DatagramSocket::bind_to_peer(listener.local_addr()?).await?;

        sender.send(b"ping").await?;
        let (bytes, peer) = listener.recv_from().await?;
        assert_eq!(bytes, b"ping");
        assert_eq!(peer, sender.local_addr()?);

        listener.send_to(b"pong", peer).await?;
        assert_eq!(sender.recv().await?, b"pong");
        Ok(())
    }
}
