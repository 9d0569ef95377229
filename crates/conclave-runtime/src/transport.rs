//! Group transport abstraction.
//!
//! The executive is written against [`Transport`] rather than a concrete
//! protocol stack: join a closed process group, multicast framed buffers to
//! it with a delivery guarantee, and finalize on shutdown. The in-process
//! [`LoopbackTransport`] delivers every multicast back to the local node
//! over a channel; it backs the executive's tests and single-node runs.

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use conclave_core::engine::NodeId;

use crate::error::TransportError;

/// Multicast delivery guarantee requested by the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guarantee {
    /// Agreed (totally ordered) delivery.
    Agreed,
    /// Safe delivery: ordered and acknowledged by all members.
    Safe,
}

/// Name of a closed process group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupId(pub String);

/// One delivered multicast, possibly fragmented.
#[derive(Debug)]
pub struct Delivery {
    /// Ordered fragments of one logical message.
    pub fragments: Vec<Vec<u8>>,
    /// Originating node.
    pub nodeid: NodeId,
    /// True when the sender's byte order differs from ours.
    pub foreign_endian: bool,
}

/// Closed-process-group multicast transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Joins the named group; deliveries begin after this returns.
    async fn join(&self, group: &GroupId) -> Result<(), TransportError>;

    /// Multicasts one logical message, presented as an iovec.
    async fn mcast(&self, iovec: &[Vec<u8>], guarantee: Guarantee) -> Result<(), TransportError>;

    /// Tears the transport down; all subsequent traffic is refused.
    async fn finalize(&self) -> Result<(), TransportError>;
}

/// In-process transport that loops every multicast back to the local node.
pub struct LoopbackTransport {
    nodeid: NodeId,
    tx: Mutex<Option<mpsc::UnboundedSender<Delivery>>>,
}

impl LoopbackTransport {
    /// Creates the transport and its delivery receiver.
    pub fn channel(nodeid: NodeId) -> (Self, mpsc::UnboundedReceiver<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                nodeid,
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn join(&self, group: &GroupId) -> Result<(), TransportError> {
        if self.tx.lock().is_none() {
            return Err(TransportError::Finalized);
        }
        debug!(group = %group.0, node = %self.nodeid, "joined group");
        Ok(())
    }

    async fn mcast(&self, iovec: &[Vec<u8>], _guarantee: Guarantee) -> Result<(), TransportError> {
        let tx = self.tx.lock();
        let Some(tx) = tx.as_ref() else {
            return Err(TransportError::Finalized);
        };
        tx.send(Delivery {
            fragments: iovec.to_vec(),
            nodeid: self.nodeid,
            foreign_endian: false,
        })
        .map_err(|_| TransportError::ChannelClosed)
    }

    async fn finalize(&self) -> Result<(), TransportError> {
        // Dropping the sender closes the delivery stream.
        self.tx.lock().take();
        debug!(node = %self.nodeid, "transport finalized");
        Ok(())
    }
}
