//! The server-side acceptor: a single background task that owns the
//! listening endpoint's receive half, performs SYN handshakes, and fans
//! every other packet out to the per-peer flow queues.

use crate::connection::ConnectionSocket;
use crate::datagram::DatagramSocket;
use crate::flow::FlowTable;
use crate::packet::{Packet, ProtocolKind};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// How many accepted-but-unclaimed connections may queue up before the
/// demux task stops admitting new peers.
const ACCEPT_BACKLOG: usize = 16;

/// Listens on one datagram endpoint and turns it into many logical flows.
///
/// Admission and dispatch rules, applied to every received datagram:
///
/// | Packet                     | Flow state | Action                        |
/// |----------------------------|------------|-------------------------------|
/// | wrong protocol             | any        | answer FIN, drop              |
/// | SYN                        | unknown    | add flow, answer SYN\|ACK     |
/// | SYN                        | live       | drop (duplicate handshake)    |
/// | FIN                        | live       | dispatch, then remove flow    |
/// | other                      | live       | dispatch                      |
/// | other                      | unknown    | drop                          |
#[derive(Debug)]
pub struct Acceptor {
    endpoint: Arc<DatagramSocket>,
    ready: mpsc::Receiver<ConnectionSocket>,
    demux: JoinHandle<()>,
}

impl Acceptor {
    /// Binds the listening endpoint and starts the demux task.
    pub async fn bind(addr: SocketAddr, protocol: ProtocolKind) -> io::Result<Self> {
        let endpoint = Arc::new(DatagramSocket::bind(addr).await?);
        let (ready_tx, ready_rx) = mpsc::channel(ACCEPT_BACKLOG);
        let demux = tokio::spawn(demux_loop(endpoint.clone(), protocol, ready_tx));
        tracing::debug!(%addr, %protocol, "acceptor listening");
        Ok(Self {
            endpoint,
            ready: ready_rx,
            demux,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.endpoint.local_addr()
    }

    /// Yields the next established connection, in handshake arrival order.
    /// Returns `None` once the demux task has stopped.
    pub async fn accept(&mut self) -> Option<ConnectionSocket> {
        self.ready.recv().await
    }
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        self.demux.abort();
    }
}

async fn demux_loop(
    endpoint: Arc<DatagramSocket>,
    protocol: ProtocolKind,
    ready: mpsc::Sender<ConnectionSocket>,
) {
    let flows = FlowTable::new();
    loop {
        let (bytes, peer) = match endpoint.recv_from().await {
            Ok(received) => received,
            Err(e) => {
                tracing::debug!(%e, "listening endpoint receive failed");
                continue;
            }
        };
        let packet = match Packet::decode(&bytes) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::debug!(%peer, %e, "dropping malformed datagram");
                continue;
            }
        };

        if packet.protocol() != Some(protocol) {
            tracing::debug!(%peer, "protocol mismatch, answering FIN");
            send_control(&endpoint, Packet::fin(protocol), peer).await;
            continue;
        }

        if packet.is_syn() {
            if flows.contains(peer) {
                // Retransmitted handshake; the first SYN|ACK is either still
                // in flight or the peer will give up on its own.
                tracing::debug!(%peer, "duplicate SYN, dropping");
                continue;
            }
            tracing::debug!(%peer, "admitting new flow");
            let queue = flows.add(peer);
            send_control(&endpoint, Packet::syn_ack(protocol), peer).await;
            let connection = ConnectionSocket::accepted(peer, protocol, queue, endpoint.clone());
            if ready.send(connection).await.is_err() {
                // The acceptor handle is gone; stop demultiplexing.
                return;
            }
            continue;
        }

        if !flows.contains(peer) {
            tracing::debug!(%peer, "packet from unknown peer, dropping");
            continue;
        }

        let teardown = packet.is_fin();
        if let Err(e) = flows.dispatch(peer, packet) {
            tracing::debug!(%peer, %e, "dispatch failed");
        }
        if teardown {
            flows.remove(peer);
        }
    }
}

async fn send_control(endpoint: &DatagramSocket, packet: Packet, peer: SocketAddr) {
    match packet.encode() {
        Ok(bytes) => {
            if let Err(e) = endpoint.send_to(&bytes, peer).await {
                tracing::debug!(%peer, %e, "control packet send failed");
            }
        }
        Err(e) => tracing::debug!(%peer, %e, "control packet encode failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::SocketError;
    use crate::packet::TransferMode;

    fn localhost() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn accepts_a_handshake() -> anyhow::Result<()> {
        let mut acceptor = Acceptor::bind(localhost(), ProtocolKind::GoBackN).await?;
        let server = acceptor.local_addr()?;

        let client = tokio::spawn(ConnectionSocket::connect(server, ProtocolKind::GoBackN));
        let mut accepted = acceptor.accept().await.unwrap();
        let mut client = client.await??;

        client
            .send(&Packet::data(
                ProtocolKind::GoBackN,
                TransferMode::Upload,
                0,
                b"hello".to_vec(),
            ))
            .await?;
        let packet = accepted.recv().await?;
        assert_eq!(packet.payload, b"hello");
        assert_eq!(accepted.protocol(), ProtocolKind::GoBackN);
        Ok(())
    }

    #[tokio::test]
    async fn rejects_mismatched_protocol_with_fin() -> anyhow::Result<()> {
        let acceptor = Acceptor::bind(localhost(), ProtocolKind::StopAndWait).await?;
        let server = acceptor.local_addr()?;

        let result = ConnectionSocket::connect_with(
            server,
            ProtocolKind::GoBackN,
            2,
            std::time::Duration::from_millis(500),
        )
        .await;
        assert!(matches!(
            result,
            Err(SocketError::HandshakeRefused { peer }) if peer == server
        ));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_peer_data_is_dropped_but_syn_admits() -> anyhow::Result<()> {
        let mut acceptor = Acceptor::bind(localhost(), ProtocolKind::GoBackN).await?;
        let server = acceptor.local_addr()?;

        let stranger = DatagramSocket::bind_to_peer(server).await?;
        // Data before any handshake: silently dropped, no flow created.
        stranger
            .send(
                &Packet::data(ProtocolKind::GoBackN, TransferMode::Upload, 0, vec![1])
                    .encode()?,
            )
            .await?;
        // Now a proper SYN admits the same peer.
        stranger
            .send(&Packet::syn(ProtocolKind::GoBackN, TransferMode::Upload).encode()?)
            .await?;

        let reply = Packet::decode(&stranger.recv().await?)?;
        assert!(reply.is_syn() && reply.is_ack());

        let mut accepted = acceptor.accept().await.unwrap();
        // Only packets after admission reach the flow queue.
        stranger
            .send(
                &Packet::data(ProtocolKind::GoBackN, TransferMode::Upload, 7, vec![2])
                    .encode()?,
            )
            .await?;
        let delivered = accepted.recv().await?;
        assert_eq!(delivered.seq_num, 7);
        Ok(())
    }

    #[tokio::test]
    async fn fin_dispatches_and_removes_the_flow() -> anyhow::Result<()> {
        let mut acceptor = Acceptor::bind(localhost(), ProtocolKind::GoBackN).await?;
        let server = acceptor.local_addr()?;

        let client = tokio::spawn(async move {
            let mut client = ConnectionSocket::connect(server, ProtocolKind::GoBackN)
                .await
                .unwrap();
            client.disconnect().await.unwrap();
        });

        let mut accepted = acceptor.accept().await.unwrap();
        let packet = accepted.recv().await?;
        assert!(packet.is_fin());
        assert!(accepted.is_closed());
        client.await?;

        // The flow is gone: a further recv reports the closed queue.
        assert!(matches!(
            accepted.recv().await,
            Err(SocketError::ClosedSocket)
        ));
        Ok(())
    }
}
