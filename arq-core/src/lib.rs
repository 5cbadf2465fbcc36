//! Reliable file transfer over an unreliable datagram substrate.
//!
//! Clients upload files to or download files from a server; the server
//! multiplexes many concurrent sessions over a single listening endpoint.
//! Each session runs one of two ARQ recovery protocols, chosen by the
//! client and carried in every packet header: Stop-and-Wait or Go-Back-N.
//!
//! # Organization
//!
//! The transport is layered leaves-first:
//!
//! - [`packet`] frames and parses datagrams;
//! - [`datagram`] owns the bound sockets;
//! - [`flow`] fans the server endpoint out into per-peer queues;
//! - [`connection`] adds the handshake/teardown state machine;
//! - [`acceptor`] demultiplexes the listening endpoint into connections;
//! - [`protocol`] holds the Stop-and-Wait and Go-Back-N engines;
//! - [`session`] ties a connection, an engine and a [`FileStream`]
//!   together on either side.
//!
//! The binaries in the companion `arq` crate are thin wrappers around
//! [`ClientSession`] and [`Acceptor`] + [`ServerSession`].

pub mod packet;
pub use packet::{Packet, PacketError, ProtocolKind, TransferMode};

pub mod datagram;
pub use datagram::DatagramSocket;

pub mod flow;
pub use flow::{FlowError, FlowTable};

pub mod connection;
pub use connection::{ConnState, ConnectionSocket, SocketError};

pub mod acceptor;
pub use acceptor::Acceptor;

pub mod protocol;
pub use protocol::{Engine, GoBackN, StopAndWait, TransferError};

pub mod session;
pub use session::{ClientSession, ServerSession, SessionError};

pub mod file_stream;
pub use file_stream::{FileError, FileStream, Overwrite, CHUNK_SIZE};

pub mod shutdown;
pub use shutdown::Shutdown;

use dashmap::DashMap;
use std::hash::BuildHasherDefault;
pub type FxDashMap<K, V> = DashMap<K, V, BuildHasherDefault<rustc_hash::FxHasher>>;
