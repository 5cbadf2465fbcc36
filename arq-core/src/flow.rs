//! The server's flow table: one inbound packet queue per live peer. The
//! acceptor's demux task fans received packets out through it; each server
//! session drains its own queue.

use crate::{FxDashMap, Packet};
use std::net::SocketAddr;
use thiserror::Error as ThisError;
use tokio::sync::mpsc;

/// Soft cap on a flow's inbound queue. Beyond this, packets are dropped
/// tail-first; ARQ retransmission recovers them.
const FLOW_QUEUE_DEPTH: usize = 256;

/// Maps peer addresses to their inbound queues. Entries are created when a
/// SYN admits a new peer and removed when its FIN arrives.
#[derive(Debug, Default)]
pub struct FlowTable {
    flows: FxDashMap<SocketAddr, mpsc::Sender<Packet>>,
}

impl FlowTable {
    pub fn new() -> Self {
        Default::default()
    }

    /// Admits `peer` and returns the receiving half of its queue.
    pub fn add(&self, peer: SocketAddr) -> mpsc::Receiver<Packet> {
        let (sender, receiver) = mpsc::channel(FLOW_QUEUE_DEPTH);
        self.flows.insert(peer, sender);
        receiver
    }

    /// Removes `peer`, closing its queue. The owning session observes the
    /// close as end-of-input once the queue drains.
    pub fn remove(&self, peer: SocketAddr) {
        self.flows.remove(&peer);
    }

    pub fn contains(&self, peer: SocketAddr) -> bool {
        self.flows.contains_key(&peer)
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// Enqueues `packet` for `peer`. A full queue drops the packet.
    pub fn dispatch(&self, peer: SocketAddr, packet: Packet) -> Result<(), FlowError> {
        let sender = self
            .flows
            .get(&peer)
            .ok_or(FlowError::UnknownFlow { peer })?;
        if sender.try_send(packet).is_err() {
            tracing::debug!(%peer, "flow queue full, dropping packet");
        }
        Ok(())
    }
}

#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum FlowError {
    #[error("No flow for peer {peer}")]
    UnknownFlow { peer: SocketAddr },
}
