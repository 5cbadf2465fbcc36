//! Session orchestration: the thin layer that runs the handshake, the
//! filename exchange, and then hands the connection to a recovery engine.
//!
//! The filename packet is the first packet of the client-to-server sequence
//! space (SEQ 0), so the engines seed their counters at 1 for that
//! direction; a retransmitted filename then looks like any other duplicate
//! and is re-acknowledged instead of being written into the file.

use crate::connection::{ConnectionSocket, SocketError};
use crate::file_stream::{FileError, FileStream, Overwrite};
use crate::packet::{Packet, ProtocolKind, TransferMode};
use crate::protocol::{Engine, TransferError, RETRANSMISSION_RETRIES, TIMEOUT_INTERVAL};
use crate::shutdown::Shutdown;
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use thiserror::Error as ThisError;
use tokio::time::timeout;

/// Sequence number carried by the filename packet.
const NEGOTIATION_SEQ: u16 = 0;

fn engine_initial_seq(mode: TransferMode) -> u16 {
    match mode {
        // Client-to-server data follows the filename packet.
        TransferMode::Upload => NEGOTIATION_SEQ.wrapping_add(1),
        TransferMode::Download => 0,
    }
}

/// The client half of a transfer: connects, names the file, then sends or
/// receives it.
#[derive(Debug)]
pub struct ClientSession {
    socket: ConnectionSocket,
    mode: TransferMode,
    dir: PathBuf,
    filename: String,
}

impl ClientSession {
    /// Performs the handshake with `server` and prepares a session for
    /// `filename` under the local directory `dir`.
    pub async fn connect(
        server: SocketAddr,
        protocol: ProtocolKind,
        mode: TransferMode,
        dir: impl Into<PathBuf>,
        filename: impl Into<String>,
    ) -> Result<Self, SessionError> {
        let socket = ConnectionSocket::connect(server, protocol).await?;
        Ok(Self {
            socket,
            mode,
            dir: dir.into(),
            filename: filename.into(),
        })
    }

    /// Runs the transfer to completion.
    pub async fn run(&mut self) -> Result<(), SessionError> {
        self.negotiate().await?;

        let path = self.dir.join(&self.filename);
        let protocol = self.socket.protocol();
        let mut engine = Engine::new(protocol, self.mode, engine_initial_seq(self.mode));
        match self.mode {
            TransferMode::Upload => {
                let mut file = match FileStream::reader(&path).await {
                    Ok(file) => file,
                    Err(e) => {
                        self.socket.disconnect().await?;
                        return Err(e.into());
                    }
                };
                engine.send_file(&mut self.socket, &mut file).await?;
                file.close().await?;
            }
            TransferMode::Download => {
                let mut file = FileStream::writer(&path, Overwrite::Truncate).await?;
                let received = engine.recv_file(&mut self.socket, &mut file).await;
                file.close().await?;
                received?;
            }
        }
        Ok(())
    }

    /// Announces the requested file and direction, retrying until the
    /// server acknowledges.
    async fn negotiate(&mut self) -> Result<(), SessionError> {
        let protocol = self.socket.protocol();
        let request = Packet::data(
            protocol,
            self.mode,
            NEGOTIATION_SEQ,
            self.filename.clone().into_bytes(),
        );
        for _ in 0..RETRANSMISSION_RETRIES {
            self.socket.send(&request).await?;
            match timeout(TIMEOUT_INTERVAL, self.socket.recv()).await {
                Err(_elapsed) => continue,
                Ok(Err(e)) => return Err(e.into()),
                Ok(Ok(reply)) => {
                    if self.socket.is_closed() {
                        // The server refused the transfer with a FIN.
                        return Err(SessionError::Socket(SocketError::ClosedSocket));
                    }
                    // An explicit acknowledgement, or data from a server
                    // that has already moved on to sending: either proves
                    // the request arrived. A consumed data packet is
                    // recovered by the engine's retransmission.
                    if reply.is_ack() || !reply.payload.is_empty() {
                        return Ok(());
                    }
                }
            }
        }
        self.socket.disconnect().await?;
        Err(SessionError::NegotiationFailed)
    }

    /// Best-effort teardown for cancellation paths.
    pub async fn abort(&mut self) {
        self.socket.abort().await;
    }
}

/// The server half of one accepted connection.
#[derive(Debug)]
pub struct ServerSession {
    socket: ConnectionSocket,
    storage: PathBuf,
}

impl ServerSession {
    pub fn new(socket: ConnectionSocket, storage: impl Into<PathBuf>) -> Self {
        Self {
            socket,
            storage: storage.into(),
        }
    }

    /// Runs the mirrored side of the client's transfer to completion.
    pub async fn run(&mut self) -> Result<(), SessionError> {
        let (filename, mode) = self.await_filename().await?;
        tracing::debug!(peer = %self.socket.peer(), %filename, ?mode, "transfer negotiated");

        let path = self.storage.join(&filename);
        let protocol = self.socket.protocol();
        let open = match mode {
            TransferMode::Upload => FileStream::writer(&path, Overwrite::Reject).await,
            TransferMode::Download => FileStream::reader(&path).await,
        };
        let mut file = match open {
            Ok(file) => file,
            Err(e) => {
                // The client is still waiting for the filename ACK; a FIN
                // instead tells it the transfer was refused.
                tracing::debug!(peer = %self.socket.peer(), %e, "refusing transfer");
                self.socket.disconnect().await?;
                return Err(e.into());
            }
        };

        let ack = Packet::ack(protocol, mode, NEGOTIATION_SEQ);
        self.socket.send(&ack).await?;

        let mut engine = Engine::new(protocol, mode, engine_initial_seq(mode));
        let result = match mode {
            TransferMode::Upload => engine.recv_file(&mut self.socket, &mut file).await,
            TransferMode::Download => engine.send_file(&mut self.socket, &mut file).await,
        };
        file.close().await?;
        result?;
        Ok(())
    }

    /// [`run`](Self::run), abandoned early if `shutdown` trips. A cancelled
    /// session stops its timers with the dropped future, emits one
    /// best-effort FIN, and reports [`SessionError::Cancelled`].
    pub async fn run_until(&mut self, shutdown: &Shutdown) -> Result<(), SessionError> {
        let result = tokio::select! {
            result = self.run() => result,
            _ = shutdown.wait() => Err(SessionError::Cancelled),
        };
        if matches!(result, Err(SessionError::Cancelled)) {
            self.abort().await;
        }
        result
    }

    /// Waits for the client's filename packet. The acknowledgement is sent
    /// by [`run`](Self::run) once the file is known to open.
    async fn await_filename(&mut self) -> Result<(String, TransferMode), SessionError> {
        let protocol = self.socket.protocol();
        for _ in 0..RETRANSMISSION_RETRIES {
            let packet = match timeout(TIMEOUT_INTERVAL, self.socket.recv()).await {
                Err(_elapsed) => continue,
                Ok(Err(e)) => return Err(e.into()),
                Ok(Ok(packet)) => packet,
            };
            if self.socket.is_closed() {
                return Err(SessionError::Socket(SocketError::ClosedSocket));
            }
            if packet.protocol() != Some(protocol) {
                self.socket.disconnect().await?;
                return Err(SessionError::ProtocolMismatch);
            }
            if packet.payload.is_empty() {
                tracing::debug!("ignoring empty packet while awaiting filename");
                continue;
            }

            let mode = packet.mode();
            let filename = match String::from_utf8(packet.payload) {
                Ok(name) if is_plain_filename(&name) => name,
                _ => {
                    self.socket.disconnect().await?;
                    return Err(SessionError::NegotiationFailed);
                }
            };
            return Ok((filename, mode));
        }
        self.socket.disconnect().await?;
        Err(SessionError::NegotiationFailed)
    }

    /// Best-effort teardown for cancellation paths.
    pub async fn abort(&mut self) {
        self.socket.abort().await;
    }
}

/// Accept only bare file names; a peer does not get to walk out of the
/// storage directory.
fn is_plain_filename(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

#[derive(Debug, ThisError)]
pub enum SessionError {
    #[error("Failed to negotiate the transfer with the peer")]
    NegotiationFailed,
    #[error("The peer requested a different recovery protocol")]
    ProtocolMismatch,
    #[error("The session was cancelled")]
    Cancelled,
    #[error(transparent)]
    Socket(#[from] SocketError),
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error(transparent)]
    File(#[from] FileError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_validation_rejects_traversal() {
        assert!(is_plain_filename("report.txt"));
        assert!(is_plain_filename("no extension"));
        assert!(!is_plain_filename("../report.txt"));
        assert!(!is_plain_filename("nested/report.txt"));
        assert!(!is_plain_filename("/etc/passwd"));
        assert!(!is_plain_filename(""));
        assert!(!is_plain_filename(".."));
    }

    #[test]
    fn upload_data_starts_after_the_filename_sequence() {
        assert_eq!(engine_initial_seq(TransferMode::Upload), 1);
        assert_eq!(engine_initial_seq(TransferMode::Download), 0);
    }
}
