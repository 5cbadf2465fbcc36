//! Stop-and-Wait: the alternating-bit protocol. One data packet in flight
//! per direction; the sequence space is `{0, 1}`.

use super::{TransferError, RETRANSMISSION_RETRIES, TIMEOUT_INTERVAL};
use crate::connection::{ConnectionSocket, SocketError};
use crate::file_stream::FileStream;
use crate::packet::{Packet, ProtocolKind, TransferMode};
use tokio::time::timeout;

#[derive(Debug)]
pub struct StopAndWait {
    mode: TransferMode,
    /// Sequence number of the next data packet to send.
    seq_num: u16,
    /// Sequence number the receiver expects next.
    ack_num: u16,
}

impl StopAndWait {
    pub fn new(mode: TransferMode, initial_seq: u16) -> Self {
        let initial = initial_seq & 1;
        Self {
            mode,
            seq_num: initial,
            ack_num: initial,
        }
    }

    pub async fn send_file(
        &mut self,
        socket: &mut ConnectionSocket,
        file: &mut FileStream,
    ) -> Result<(), TransferError> {
        loop {
            let chunk = file.read_chunk().await?;
            if chunk.is_empty() {
                break;
            }
            let packet = Packet::data(ProtocolKind::StopAndWait, self.mode, self.seq_num, chunk);
            self.deliver(socket, &packet).await?;
            self.seq_num ^= 1;
        }
        socket.disconnect().await?;
        Ok(())
    }

    /// Sends one packet and blocks until its acknowledgement arrives,
    /// retransmitting on every timeout.
    async fn deliver(
        &mut self,
        socket: &mut ConnectionSocket,
        packet: &Packet,
    ) -> Result<(), TransferError> {
        let mut strikes = 0;
        'resend: loop {
            socket.send(packet).await?;
            let deadline = tokio::time::Instant::now() + TIMEOUT_INTERVAL;
            loop {
                match tokio::time::timeout_at(deadline, socket.recv()).await {
                    Err(_elapsed) => {
                        strikes += 1;
                        if strikes >= RETRANSMISSION_RETRIES {
                            socket.abort().await;
                            return Err(TransferError::PeerUnresponsive);
                        }
                        tracing::debug!(seq = self.seq_num, "timeout, retransmitting");
                        continue 'resend;
                    }
                    Ok(Err(e)) => return Err(e.into()),
                    Ok(Ok(reply)) => {
                        if socket.is_closed() {
                            return Err(TransferError::Socket(SocketError::ClosedSocket));
                        }
                        if reply.is_ack() && reply.ack_num == self.seq_num {
                            return Ok(());
                        }
                        // A stale ACK from the previous exchange; keep
                        // waiting within the same timeout window.
                        tracing::debug!(
                            seq = self.seq_num,
                            ack = reply.ack_num,
                            "ignoring out-of-phase acknowledgement"
                        );
                    }
                }
            }
        }
    }

    pub async fn recv_file(
        &mut self,
        socket: &mut ConnectionSocket,
        file: &mut FileStream,
    ) -> Result<(), TransferError> {
        let mut strikes = 0;
        while !socket.is_closed() {
            let packet = match timeout(TIMEOUT_INTERVAL, socket.recv()).await {
                Err(_elapsed) => {
                    strikes += 1;
                    if strikes >= RETRANSMISSION_RETRIES {
                        socket.abort().await;
                        return Err(TransferError::PeerUnresponsive);
                    }
                    continue;
                }
                Ok(Err(SocketError::ClosedSocket)) => break,
                Ok(Err(e)) => return Err(e.into()),
                Ok(Ok(packet)) => packet,
            };
            strikes = 0;
            if socket.is_closed() {
                // The packet was the peer's FIN.
                break;
            }
            if packet.is_ack() {
                tracing::debug!("ignoring stray acknowledgement");
                continue;
            }

            if packet.seq_num == self.ack_num {
                file.write_chunk(&packet.payload).await?;
                self.ack_num ^= 1;
            } else {
                tracing::debug!(
                    seq = packet.seq_num,
                    expected = self.ack_num,
                    "duplicate data, re-acknowledging"
                );
            }
            // Acknowledge the last in-phase packet, whether this one was
            // consumed or a duplicate; either way it resynchronises the
            // sender.
            let ack = Packet::ack(ProtocolKind::StopAndWait, self.mode, self.ack_num ^ 1);
            socket.send(&ack).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_stream::{Overwrite, CHUNK_SIZE};
    use std::path::PathBuf;

    fn scratch(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("arq-sw-{name}-{}", std::process::id()));
        let _ = std::fs::remove_file(&path);
        path
    }

    async fn transfer(name: &str, content: &[u8]) -> anyhow::Result<Vec<u8>> {
        let source = scratch(&format!("{name}-src"));
        let sink = scratch(&format!("{name}-dst"));
        std::fs::write(&source, content)?;

        let (mut tx_socket, mut rx_socket) =
            ConnectionSocket::test_pair(ProtocolKind::StopAndWait).await?;

        let sender = tokio::spawn({
            let source = source.clone();
            async move {
                let mut file = FileStream::reader(&source).await?;
                StopAndWait::new(TransferMode::Upload, 1)
                    .send_file(&mut tx_socket, &mut file)
                    .await
            }
        });
        let receiver = tokio::spawn({
            let sink = sink.clone();
            async move {
                let mut file = FileStream::writer(&sink, Overwrite::Truncate).await?;
                StopAndWait::new(TransferMode::Upload, 1)
                    .recv_file(&mut rx_socket, &mut file)
                    .await?;
                file.close().await?;
                Ok::<_, TransferError>(())
            }
        });

        sender.await.unwrap()?;
        receiver.await.unwrap()?;

        let received = std::fs::read(&sink)?;
        let _ = std::fs::remove_file(&source);
        let _ = std::fs::remove_file(&sink);
        Ok(received)
    }

    #[tokio::test]
    async fn transfers_a_single_chunk() -> anyhow::Result<()> {
        let content = vec![0x5A; 500];
        assert_eq!(transfer("single", &content).await?, content);
        Ok(())
    }

    #[tokio::test]
    async fn transfers_across_many_chunks() -> anyhow::Result<()> {
        let content: Vec<u8> = (0..10 * CHUNK_SIZE).map(|i| (i % 241) as u8).collect();
        assert_eq!(transfer("many", &content).await?, content);
        Ok(())
    }

    #[tokio::test]
    async fn sender_gives_up_on_a_silent_peer() -> anyhow::Result<()> {
        let source = scratch("silent-src");
        std::fs::write(&source, b"payload")?;
        let (mut tx_socket, _rx_socket) =
            ConnectionSocket::test_pair(ProtocolKind::StopAndWait).await?;

        let mut file = FileStream::reader(&source).await?;
        let result = tokio::time::timeout(
            TIMEOUT_INTERVAL * (RETRANSMISSION_RETRIES as u32 + 2),
            StopAndWait::new(TransferMode::Upload, 1).send_file(&mut tx_socket, &mut file),
        )
        .await?;
        assert!(matches!(result, Err(TransferError::PeerUnresponsive)));
        assert!(tx_socket.is_closed());
        std::fs::remove_file(&source)?;
        Ok(())
    }
}
