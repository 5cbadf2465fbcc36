//! A connection socket: an ordered, peer-addressed packet channel with
//! connection establishment and graceful teardown layered over the raw
//! datagram endpoint.
//!
//! Two flavours share one contract. The client flavour owns a dedicated
//! endpoint connected to the server. The server flavour receives from its
//! flow-table queue and answers through the shared listening endpoint.

use crate::datagram::DatagramSocket;
use crate::packet::{Packet, PacketError, ProtocolKind, TransferMode};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error as ThisError;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// How long to wait for a SYN|ACK before retransmitting the SYN.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(1500);

/// How many SYNs to send before giving up on a handshake.
pub const HANDSHAKE_RETRIES: usize = 5;

/// How long to wait for a FIN|ACK before retransmitting the FIN.
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// How many FINs to send before closing unilaterally.
pub const DISCONNECT_RETRIES: usize = 5;

/// The connection state machine. Transitions run strictly left to right;
/// a socket never reopens.
///
/// ```text
/// CONNECTING ──► ESTABLISHED ──► CLOSING ──► CLOSED
///     │                            ▲            ▲
///     └── SYN|ACK received         │            │
///             FIN sent ────────────┘            │
///             FIN received / retries spent ─────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnState {
    /// Waiting for the accept of a sent connection request.
    Connecting,
    /// The data-phase state; packets flow in both directions.
    Established,
    /// A teardown request was sent and its accept is outstanding.
    Closing,
    /// Terminal. Any further send or receive is an error.
    Closed,
}

#[derive(Debug)]
enum Transport {
    /// Client side: a dedicated endpoint connected to the peer.
    Dedicated(DatagramSocket),
    /// Server side: packets arrive through the flow table, replies go out
    /// through the shared listening endpoint.
    Demuxed {
        queue: mpsc::Receiver<Packet>,
        endpoint: Arc<DatagramSocket>,
    },
}

/// One end of a connection. Owned by a single session task; all operations
/// take `&mut self`.
#[derive(Debug)]
pub struct ConnectionSocket {
    peer: SocketAddr,
    protocol: ProtocolKind,
    transport: Transport,
    state: ConnState,
}

impl ConnectionSocket {
    /// Establishes a connection to a listening server. Sends SYN and waits
    /// for SYN|ACK, retrying up to [`HANDSHAKE_RETRIES`] times.
    pub async fn connect(peer: SocketAddr, protocol: ProtocolKind) -> Result<Self, SocketError> {
        Self::connect_with(peer, protocol, HANDSHAKE_RETRIES, HANDSHAKE_TIMEOUT).await
    }

    /// [`connect`](Self::connect) with explicit retry bounds.
    pub async fn connect_with(
        peer: SocketAddr,
        protocol: ProtocolKind,
        retries: usize,
        handshake_timeout: Duration,
    ) -> Result<Self, SocketError> {
        let endpoint = DatagramSocket::bind_to_peer(peer).await?;
        let mut socket = Self {
            peer,
            protocol,
            transport: Transport::Dedicated(endpoint),
            state: ConnState::Connecting,
        };

        let syn = Packet::syn(protocol, TransferMode::Download);
        for attempt in 0..retries {
            if let Err(e) = socket.send(&syn).await {
                // A dead peer surfaces as ICMP unreachable on a connected
                // socket; pace the retries as if we had waited out an answer.
                tracing::debug!(%peer, attempt, %e, "handshake send failed");
                tokio::time::sleep(handshake_timeout).await;
                continue;
            }
            match timeout(handshake_timeout, socket.recv()).await {
                Err(_elapsed) => {
                    tracing::debug!(%peer, attempt, "handshake timed out, retrying");
                }
                Ok(Err(SocketError::Io(e))) => {
                    tracing::debug!(%peer, attempt, %e, "handshake receive failed");
                    tokio::time::sleep(handshake_timeout).await;
                }
                Ok(Err(e)) => return Err(e),
                Ok(Ok(reply)) => {
                    if socket.is_closed() {
                        // The server FIN'd us during the handshake, e.g. a
                        // protocol mismatch.
                        return Err(SocketError::HandshakeRefused { peer });
                    }
                    if reply.is_syn() && reply.is_ack() {
                        tracing::debug!(%peer, "connection established");
                        socket.state = ConnState::Established;
                        return Ok(socket);
                    }
                    tracing::debug!(%peer, "unexpected packet during handshake, dropping");
                }
            }
        }
        Err(SocketError::HandshakeFailed { peer })
    }

    /// Builds the server-side socket for an accepted peer. The handshake has
    /// already happened at the acceptor, so the socket starts ESTABLISHED.
    pub(crate) fn accepted(
        peer: SocketAddr,
        protocol: ProtocolKind,
        queue: mpsc::Receiver<Packet>,
        endpoint: Arc<DatagramSocket>,
    ) -> Self {
        Self {
            peer,
            protocol,
            transport: Transport::Demuxed { queue, endpoint },
            state: ConnState::Established,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn protocol(&self) -> ProtocolKind {
        self.protocol
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnState::Closed
    }

    /// Forwards `packet` to the peer. Fails with [`SocketError::ClosedSocket`]
    /// once the connection is CLOSED.
    pub async fn send(&mut self, packet: &Packet) -> Result<(), SocketError> {
        if self.is_closed() {
            return Err(SocketError::ClosedSocket);
        }
        let bytes = packet.encode()?;
        match &self.transport {
            Transport::Dedicated(endpoint) => endpoint.send(&bytes).await?,
            Transport::Demuxed { endpoint, .. } => endpoint.send_to(&bytes, self.peer).await?,
        }
        Ok(())
    }

    /// Suspends until the next packet from the peer arrives.
    ///
    /// A received FIN is answered with FIN|ACK (unless it carries ACK
    /// itself) and transitions the socket to CLOSED; the FIN is still
    /// returned so the caller observes the teardown.
    pub async fn recv(&mut self) -> Result<Packet, SocketError> {
        if self.is_closed() {
            return Err(SocketError::ClosedSocket);
        }
        let packet = match &mut self.transport {
            Transport::Dedicated(endpoint) => loop {
                let bytes = endpoint.recv().await?;
                match Packet::decode(&bytes) {
                    Ok(packet) => break packet,
                    Err(e) => {
                        tracing::debug!(peer = %self.peer, %e, "dropping malformed datagram");
                    }
                }
            },
            Transport::Demuxed { queue, .. } => match queue.recv().await {
                Some(packet) => packet,
                None => {
                    // The acceptor removed our flow; nothing more will come.
                    self.state = ConnState::Closed;
                    return Err(SocketError::ClosedSocket);
                }
            },
        };

        if packet.is_fin() {
            tracing::debug!(peer = %self.peer, "received FIN");
            if !packet.is_ack() {
                let fin_ack = Packet::fin_ack(self.protocol);
                self.send(&fin_ack).await?;
            }
            self.state = ConnState::Closed;
        }
        Ok(packet)
    }

    /// Initiates a graceful teardown: sends FIN and waits for FIN|ACK,
    /// retrying up to [`DISCONNECT_RETRIES`] times. The socket always ends
    /// CLOSED, even when the peer never answers.
    pub async fn disconnect(&mut self) -> Result<(), SocketError> {
        self.disconnect_with(DISCONNECT_RETRIES, DISCONNECT_TIMEOUT).await
    }

    /// [`disconnect`](Self::disconnect) with explicit retry bounds.
    pub async fn disconnect_with(
        &mut self,
        retries: usize,
        fin_timeout: Duration,
    ) -> Result<(), SocketError> {
        if self.is_closed() {
            return Ok(());
        }
        self.state = ConnState::Closing;
        let fin = Packet::fin(self.protocol);

        'attempts: for _ in 0..retries {
            if self.send(&fin).await.is_err() {
                break;
            }
            let deadline = tokio::time::Instant::now() + fin_timeout;
            loop {
                match tokio::time::timeout_at(deadline, self.recv()).await {
                    Err(_elapsed) => continue 'attempts,
                    Ok(Err(_)) => break 'attempts,
                    Ok(Ok(reply)) => {
                        if reply.is_fin() && reply.is_ack() {
                            break 'attempts;
                        }
                        if self.is_closed() {
                            // Simultaneous close: the peer's own FIN arrived
                            // and was answered inside recv.
                            break 'attempts;
                        }
                        // Stale data or ACKs may still be in flight; keep
                        // waiting for the FIN|ACK within this attempt.
                        tracing::debug!(peer = %self.peer, "ignoring packet during teardown");
                    }
                }
            }
        }
        self.state = ConnState::Closed;
        tracing::debug!(peer = %self.peer, "connection closed");
        Ok(())
    }

    /// Sends a single best-effort FIN and closes immediately. Used when the
    /// peer is unresponsive or the session is cancelled, where waiting out
    /// the full teardown exchange is pointless.
    pub async fn abort(&mut self) {
        if !self.is_closed() {
            let fin = Packet::fin(self.protocol);
            let _ = self.send(&fin).await;
            self.state = ConnState::Closed;
        }
    }

    /// A pair of established sockets wired to each other over localhost,
    /// bypassing the handshake. Test harness for the protocol engines.
    #[cfg(test)]
    pub(crate) async fn test_pair(
        protocol: ProtocolKind,
    ) -> io::Result<(ConnectionSocket, ConnectionSocket)> {
        let left = DatagramSocket::bind("127.0.0.1:0".parse().unwrap()).await?;
        let right = DatagramSocket::bind("127.0.0.1:0".parse().unwrap()).await?;
        let left_addr = left.local_addr()?;
        let right_addr = right.local_addr()?;
        left.connect_peer(right_addr).await?;
        right.connect_peer(left_addr).await?;
        let make = |endpoint: DatagramSocket, peer: SocketAddr| ConnectionSocket {
            peer,
            protocol,
            transport: Transport::Dedicated(endpoint),
            state: ConnState::Established,
        };
        Ok((make(left, right_addr), make(right, left_addr)))
    }
}

#[derive(Debug, ThisError)]
pub enum SocketError {
    #[error("Handshake with {peer} timed out")]
    HandshakeFailed { peer: SocketAddr },
    #[error("Connection refused by {peer}")]
    HandshakeRefused { peer: SocketAddr },
    #[error("The socket is closed")]
    ClosedSocket,
    #[error(transparent)]
    Packet(#[from] PacketError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::TransferMode;

    #[tokio::test]
    async fn sends_and_receives_in_order() -> anyhow::Result<()> {
        let (mut left, mut right) = ConnectionSocket::test_pair(ProtocolKind::GoBackN).await?;
        for seq in 0..4 {
            left.send(&Packet::data(
                ProtocolKind::GoBackN,
                TransferMode::Upload,
                seq,
                vec![seq as u8],
            ))
            .await?;
        }
        for seq in 0..4 {
            let packet = right.recv().await?;
            assert_eq!(packet.seq_num, seq);
            assert_eq!(packet.payload, vec![seq as u8]);
        }
        Ok(())
    }

    #[tokio::test]
    async fn fin_is_answered_and_closes_both_ends() -> anyhow::Result<()> {
        let (mut left, mut right) = ConnectionSocket::test_pair(ProtocolKind::StopAndWait).await?;

        let teardown = tokio::spawn(async move {
            left.disconnect().await.unwrap();
            left
        });

        let packet = right.recv().await?;
        assert!(packet.is_fin());
        assert!(right.is_closed());

        let left = teardown.await?;
        assert!(left.is_closed());
        Ok(())
    }

    #[tokio::test]
    async fn closed_socket_rejects_send_and_recv() -> anyhow::Result<()> {
        let (mut left, mut right) = ConnectionSocket::test_pair(ProtocolKind::GoBackN).await?;
        left.abort().await;

        assert!(matches!(
            left.send(&Packet::default()).await,
            Err(SocketError::ClosedSocket)
        ));
        assert!(matches!(left.recv().await, Err(SocketError::ClosedSocket)));

        // The aborting side still announced itself with a FIN.
        let packet = right.recv().await?;
        assert!(packet.is_fin());
        Ok(())
    }

    #[tokio::test]
    async fn disconnect_without_peer_still_closes() -> anyhow::Result<()> {
        let (mut left, right) = ConnectionSocket::test_pair(ProtocolKind::GoBackN).await?;
        drop(right);
        left.disconnect_with(2, Duration::from_millis(50)).await?;
        assert!(left.is_closed());
        Ok(())
    }

    #[tokio::test]
    async fn connect_to_dead_port_fails_after_retries() {
        let target: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let started = tokio::time::Instant::now();
        let result = ConnectionSocket::connect_with(
            target,
            ProtocolKind::GoBackN,
            3,
            Duration::from_millis(50),
        )
        .await;
        assert!(matches!(
            result,
            Err(SocketError::HandshakeFailed { peer }) if peer == target
        ));
        assert!(started.elapsed() >= Duration::from_millis(150));
    }
}
