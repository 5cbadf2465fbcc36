//! The ARQ recovery engines. Each engine drives the data phase of one
//! transfer direction over a [`ConnectionSocket`] and a [`FileStream`]:
//! `send_file` chunks a file onto the wire, `recv_file` reassembles it.
//!
//! The two engines are selected at handshake time and dispatched through
//! the [`Engine`] variant, one per protocol the header can name.

use crate::connection::{ConnectionSocket, SocketError};
use crate::file_stream::{FileError, FileStream};
use crate::packet::{ProtocolKind, TransferMode};
use std::time::Duration;
use thiserror::Error as ThisError;

pub(crate) mod modular_cmp;

mod stop_and_wait;
pub use stop_and_wait::StopAndWait;

mod go_back_n;
pub use go_back_n::GoBackN;

/// How long a sender waits for an acknowledgement before retransmitting,
/// and how long a receiver idles before counting a strike.
pub const TIMEOUT_INTERVAL: Duration = Duration::from_millis(500);

/// How many consecutive timeouts either side tolerates before declaring
/// the peer unresponsive.
pub const RETRANSMISSION_RETRIES: usize = 10;

/// The fixed Go-Back-N window. Must stay at or below 2^15 so cumulative
/// acknowledgements remain unambiguous in the 16-bit sequence space.
pub const WINDOW_SIZE: u16 = 8;

/// A recovery engine bound to one connection's protocol and direction.
#[derive(Debug)]
pub enum Engine {
    StopAndWait(StopAndWait),
    GoBackN(GoBackN),
}

impl Engine {
    /// Builds the engine for `protocol`. `initial_seq` seeds both the
    /// sender's next sequence number and the receiver's next expected one;
    /// the session layer passes 1 for the client-to-server direction
    /// (the filename packet consumed 0) and 0 otherwise.
    pub fn new(protocol: ProtocolKind, mode: TransferMode, initial_seq: u16) -> Self {
        match protocol {
            ProtocolKind::StopAndWait => Self::StopAndWait(StopAndWait::new(mode, initial_seq)),
            ProtocolKind::GoBackN => Self::GoBackN(GoBackN::new(mode, initial_seq)),
        }
    }

    /// Streams `file` to the peer, then initiates teardown.
    pub async fn send_file(
        &mut self,
        socket: &mut ConnectionSocket,
        file: &mut FileStream,
    ) -> Result<(), TransferError> {
        match self {
            Self::StopAndWait(engine) => engine.send_file(socket, file).await,
            Self::GoBackN(engine) => engine.send_file(socket, file).await,
        }
    }

    /// Reassembles the peer's stream into `file` until the peer tears the
    /// connection down.
    pub async fn recv_file(
        &mut self,
        socket: &mut ConnectionSocket,
        file: &mut FileStream,
    ) -> Result<(), TransferError> {
        match self {
            Self::StopAndWait(engine) => engine.recv_file(socket, file).await,
            Self::GoBackN(engine) => engine.recv_file(socket, file).await,
        }
    }
}

#[derive(Debug, ThisError)]
pub enum TransferError {
    #[error("The peer stopped responding")]
    PeerUnresponsive,
    #[error(transparent)]
    Socket(#[from] SocketError),
    #[error(transparent)]
    File(#[from] FileError),
}
