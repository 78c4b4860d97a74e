//! In-process mesh over bounded channels
//!
//! Every node holds an uplink into one shared queue that the root drains.
//! Used by the `simulate` command and by tests.

use std::fmt;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use crate::transport::{MeshTransport, TransportError};

/// MAC-style station address inside the in-process mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshAddr(pub [u8; 6]);

impl MeshAddr {
    /// Address derived from a logical id, for simulated stations
    pub fn for_node(id: u8) -> Self {
        MeshAddr([0x02, 0x00, 0x00, 0x00, 0x00, id])
    }
}

impl fmt::Display for MeshAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", a, b, c, d, e, g)
    }
}

type Frame = (MeshAddr, Vec<u8>);

/// Factory for node uplinks into one root
#[derive(Debug, Clone)]
pub struct MemoryMesh {
    tx: mpsc::Sender<Frame>,
}

/// Create a mesh whose root queue holds at most `capacity` frames
pub fn memory_mesh(capacity: usize) -> (MemoryMesh, MemoryRootTransport) {
    let (tx, rx) = mpsc::channel(capacity);
    (MemoryMesh { tx }, MemoryRootTransport { rx })
}

impl MemoryMesh {
    /// Attach a station to the mesh
    pub fn attach(&self, addr: MeshAddr) -> MemoryNodeTransport {
        MemoryNodeTransport {
            addr,
            tx: self.tx.clone(),
        }
    }
}

/// Uplink-only transport of a simulated node
#[derive(Debug, Clone)]
pub struct MemoryNodeTransport {
    addr: MeshAddr,
    tx: mpsc::Sender<Frame>,
}

impl MemoryNodeTransport {
    pub fn addr(&self) -> MeshAddr {
        self.addr
    }
}

impl MeshTransport for MemoryNodeTransport {
    type Addr = MeshAddr;

    /// Enqueue without waiting; a full root queue is a send failure.
    async fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        self.tx
            .try_send((self.addr, frame.to_vec()))
            .map_err(|e| match e {
                TrySendError::Full(_) => TransportError::QueueFull,
                TrySendError::Closed(_) => TransportError::Closed,
            })
    }

    /// Nodes never receive in this mesh.
    async fn recv(&mut self) -> Result<(MeshAddr, Vec<u8>), TransportError> {
        Err(TransportError::Closed)
    }
}

/// Downlink of the simulated root
#[derive(Debug)]
pub struct MemoryRootTransport {
    rx: mpsc::Receiver<Frame>,
}

impl MeshTransport for MemoryRootTransport {
    type Addr = MeshAddr;

    async fn send(&self, _frame: &[u8]) -> Result<(), TransportError> {
        Err(TransportError::NoParent)
    }

    async fn recv(&mut self) -> Result<(MeshAddr, Vec<u8>), TransportError> {
        let (addr, frame) = self.rx.recv().await.ok_or(TransportError::Closed)?;
        debug!("Frame of {} bytes from {}", frame.len(), addr);
        Ok((addr, frame))
    }
}
