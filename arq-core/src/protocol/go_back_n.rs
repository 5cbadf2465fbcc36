//! Go-Back-N: a sliding window of up to [`WINDOW_SIZE`] packets in flight
//! over the 16-bit modular sequence space, cumulative acknowledgements, and
//! a single retransmit timer covering the oldest unacknowledged packet.
//!
//! The timer is a deadline owned by the sender loop rather than a spawned
//! task, so stopping it is a plain assignment and a cancelled timer can
//! never fire late.

use super::modular_cmp::{mod_leq, within_window};
use super::{TransferError, RETRANSMISSION_RETRIES, TIMEOUT_INTERVAL, WINDOW_SIZE};
use crate::connection::{ConnectionSocket, SocketError};
use crate::file_stream::FileStream;
use crate::packet::{Packet, ProtocolKind, TransferMode};
use std::collections::VecDeque;
use tokio::time::{timeout, timeout_at, Instant};

#[derive(Debug)]
pub struct GoBackN {
    mode: TransferMode,
    /// Oldest unacknowledged sequence number. When `unacked` is non-empty,
    /// its front packet carries exactly this number.
    base: u16,
    /// Next sequence number to send.
    next_seq: u16,
    /// Next sequence number the receiver expects.
    ack_num: u16,
    /// In-flight packets, oldest first. Never longer than [`WINDOW_SIZE`].
    unacked: VecDeque<Packet>,
}

impl GoBackN {
    pub fn new(mode: TransferMode, initial_seq: u16) -> Self {
        Self {
            mode,
            base: initial_seq,
            next_seq: initial_seq,
            ack_num: initial_seq,
            unacked: VecDeque::with_capacity(WINDOW_SIZE as usize),
        }
    }

    fn in_flight(&self) -> u16 {
        self.next_seq.wrapping_sub(self.base)
    }

    pub async fn send_file(
        &mut self,
        socket: &mut ConnectionSocket,
        file: &mut FileStream,
    ) -> Result<(), TransferError> {
        let mut eof = false;
        // Deadline of the retransmit timer; meaningful exactly while
        // `unacked` is non-empty.
        let mut deadline = Instant::now();
        let mut expiries = 0;

        loop {
            // Keep the window full while the file has chunks left.
            if !eof && self.in_flight() < WINDOW_SIZE {
                let chunk = file.read_chunk().await?;
                if chunk.is_empty() {
                    eof = true;
                } else {
                    let packet =
                        Packet::data(ProtocolKind::GoBackN, self.mode, self.next_seq, chunk);
                    socket.send(&packet).await?;
                    if self.unacked.is_empty() {
                        deadline = Instant::now() + TIMEOUT_INTERVAL;
                    }
                    self.unacked.push_back(packet);
                    self.next_seq = self.next_seq.wrapping_add(1);
                    continue;
                }
            }
            if eof && self.unacked.is_empty() {
                break;
            }

            // Window full, or draining after EOF: wait for an ACK or for
            // the retransmit timer.
            match timeout_at(deadline, socket.recv()).await {
                Err(_elapsed) => {
                    expiries += 1;
                    if expiries >= RETRANSMISSION_RETRIES {
                        socket.abort().await;
                        return Err(TransferError::PeerUnresponsive);
                    }
                    tracing::debug!(
                        base = self.base,
                        next_seq = self.next_seq,
                        "timer expired, retransmitting window"
                    );
                    for packet in &self.unacked {
                        socket.send(packet).await?;
                    }
                    deadline = Instant::now() + TIMEOUT_INTERVAL;
                }
                Ok(Err(e)) => return Err(e.into()),
                Ok(Ok(reply)) => {
                    if socket.is_closed() {
                        return Err(TransferError::Socket(SocketError::ClosedSocket));
                    }
                    if !reply.is_ack() {
                        tracing::debug!("ignoring non-acknowledgement in data phase");
                        continue;
                    }
                    if !within_window(self.base, WINDOW_SIZE, reply.ack_num) {
                        // A duplicate of an ACK we already consumed; no
                        // window movement, no timer reset.
                        tracing::debug!(ack = reply.ack_num, "ignoring stale acknowledgement");
                        continue;
                    }
                    expiries = 0;
                    while self
                        .unacked
                        .front()
                        .map_or(false, |packet| mod_leq(packet.seq_num, reply.ack_num))
                    {
                        self.unacked.pop_front();
                    }
                    self.base = reply.ack_num.wrapping_add(1);
                    if !self.unacked.is_empty() {
                        deadline = Instant::now() + TIMEOUT_INTERVAL;
                    }
                }
            }
        }

        socket.disconnect().await?;
        Ok(())
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
                break;
            }
            if packet.is_ack() {
                tracing::debug!("ignoring stray acknowledgement");
                continue;
            }

            if packet.seq_num == self.ack_num {
                file.write_chunk(&packet.payload).await?;
                self.ack_num = self.ack_num.wrapping_add(1);
            } else {
                tracing::debug!(
                    seq = packet.seq_num,
                    expected = self.ack_num,
                    "out-of-order data, re-acknowledging last in-order"
                );
            }
            // Cumulative ACK for everything up to the last in-order packet.
            let ack = Packet::ack(
                ProtocolKind::GoBackN,
                self.mode,
                self.ack_num.wrapping_sub(1),
            );
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
        let path = std::env::temp_dir().join(format!("arq-gbn-{name}-{}", std::process::id()));
        let _ = std::fs::remove_file(&path);
        path
    }

    async fn transfer(name: &str, content: &[u8], initial_seq: u16) -> anyhow::Result<Vec<u8>> {
        let source = scratch(&format!("{name}-src"));
        let sink = scratch(&format!("{name}-dst"));
        std::fs::write(&source, content)?;

        let (mut tx_socket, mut rx_socket) =
            ConnectionSocket::test_pair(ProtocolKind::GoBackN).await?;

        let sender = tokio::spawn({
            let source = source.clone();
            async move {
                let mut file = FileStream::reader(&source).await?;
                GoBackN::new(TransferMode::Download, initial_seq)
                    .send_file(&mut tx_socket, &mut file)
                    .await
            }
        });
        let receiver = tokio::spawn({
            let sink = sink.clone();
            async move {
                let mut file = FileStream::writer(&sink, Overwrite::Truncate).await?;
                GoBackN::new(TransferMode::Download, initial_seq)
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
    async fn transfers_more_chunks_than_the_window_holds() -> anyhow::Result<()> {
        let content: Vec<u8> = (0..64 * CHUNK_SIZE).map(|i| (i % 239) as u8).collect();
        assert_eq!(transfer("sixty-four", &content, 0).await?, content);
        Ok(())
    }

    #[tokio::test]
    async fn transfers_a_partial_chunk() -> anyhow::Result<()> {
        let content = vec![7u8; 123];
        assert_eq!(transfer("partial", &content, 0).await?, content);
        Ok(())
    }

    #[tokio::test]
    async fn survives_sequence_wrap() -> anyhow::Result<()> {
        // Ten chunks starting four numbers below the wrap point exercise
        // window arithmetic across 2^16.
        let content: Vec<u8> = (0..10 * CHUNK_SIZE).map(|i| (i % 233) as u8).collect();
        assert_eq!(
            transfer("wrap", &content, u16::MAX - 3).await?,
            content
        );
        Ok(())
    }

    #[tokio::test]
    async fn window_never_exceeds_its_bound() -> anyhow::Result<()> {
        // A sender facing a silent receiver stalls with a full window
        // rather than spilling past it.
        let source = scratch("stall-src");
        let content: Vec<u8> = vec![1; 32 * CHUNK_SIZE];
        std::fs::write(&source, &content)?;

        let (mut tx_socket, mut rx_socket) =
            ConnectionSocket::test_pair(ProtocolKind::GoBackN).await?;

        let sender = tokio::spawn(async move {
            let mut file = FileStream::reader(&source).await.unwrap();
            let mut engine = GoBackN::new(TransferMode::Download, 0);
            let result = engine.send_file(&mut tx_socket, &mut file).await;
            (engine, result)
        });

        // Count the distinct packets observed during the first timeout
        // window: exactly WINDOW_SIZE, none beyond.
        let mut seen = std::collections::HashSet::new();
        while let Ok(Ok(packet)) = timeout(TIMEOUT_INTERVAL / 2, rx_socket.recv()).await {
            seen.insert(packet.seq_num);
        }
        assert_eq!(seen.len(), WINDOW_SIZE as usize);
        assert!(seen.iter().all(|&seq| seq < WINDOW_SIZE));

        // The receiver stays bound but silent; the sender eventually
        // declares it unresponsive without ever widening the window.
        let (engine, result) = sender.await?;
        assert!(matches!(result, Err(TransferError::PeerUnresponsive)));
        assert!(engine.unacked.len() <= WINDOW_SIZE as usize);
        drop(rx_socket);
        Ok(())
    }
}
