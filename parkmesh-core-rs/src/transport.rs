//! Mesh transport seam and UDP stand-in
//!
//! The real mesh (tree formation, parent election, routing) is owned by the
//! radio stack. This crate only needs a way to push a frame towards the root
//! and, on the root, to block until the next frame arrives. Topology changes
//! are reported separately as [`MeshEvent`]s.
//!
//! [`UdpMeshTransport`] stands in for the radio mesh on ordinary hosts: every
//! node has a static parent address and frames travel in one UDP datagram,
//! prefixed with the mesh id so that two installations on one LAN ignore
//! each other.

use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::{debug, info};

use crate::connectivity::{EventSender, MeshEvent};
use crate::types::{MeshId, NodeIdentity};

/// Default UDP port for the mesh stand-in
pub const DEFAULT_PORT: u16 = 9990;

/// Layer reported by UDP nodes: one hop below the root
const UDP_NODE_LAYER: u8 = 2;

/// Largest datagram accepted
const MAX_DATAGRAM_SIZE: usize = 256;

const MESH_ID_LEN: usize = 6;

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("transport closed")]
    Closed,

    #[error("transport queue full")]
    QueueFull,

    #[error("no parent to send to")]
    NoParent,

    #[error("frame too large: {len} bytes")]
    Oversized { len: usize },
}

/// Send/receive primitive offered by the mesh
pub trait MeshTransport: Send + Sync {
    /// Address of the last hop a frame came from
    type Addr: fmt::Display + Send + Sync;

    /// Send one frame towards the root. Returns promptly; never retried here.
    fn send(&self, frame: &[u8]) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Wait, without timeout, for the next frame addressed to this device
    fn recv(
        &mut self,
    ) -> impl Future<Output = Result<(Self::Addr, Vec<u8>), TransportError>> + Send;
}

/// UDP implementation of [`MeshTransport`]
pub struct UdpMeshTransport {
    socket: UdpSocket,
    mesh_id: MeshId,
    parent: Option<SocketAddr>,
}

impl UdpMeshTransport {
    /// Bind the transport. Nodes pass the address of their parent.
    pub async fn bind(
        addr: SocketAddr,
        mesh_id: MeshId,
        parent: Option<SocketAddr>,
    ) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr).await?;

        Ok(Self {
            socket,
            mesh_id,
            parent,
        })
    }

    /// Get the local address this transport is bound to
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    /// Report the static topology to the connectivity state machine
    pub async fn announce(&self, identity: &NodeIdentity, events: &EventSender) {
        let mut announced = vec![MeshEvent::Started];
        if identity.is_root() {
            announced.push(MeshEvent::RoleChanged { is_root: true });
        } else if self.parent.is_some() {
            announced.push(MeshEvent::ParentConnected {
                layer: UDP_NODE_LAYER,
            });
        }

        for event in announced {
            if events.send(event.into()).await.is_err() {
                debug!("Connectivity channel closed, dropping {:?}", event);
            }
        }

        info!(
            "UDP mesh {} up on {}, parent {}",
            self.mesh_id,
            self.socket
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "?".into()),
            self.parent
                .map(|p| p.to_string())
                .unwrap_or_else(|| "none".into())
        );
    }
}

impl MeshTransport for UdpMeshTransport {
    type Addr = SocketAddr;

    async fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        let parent = self.parent.ok_or(TransportError::NoParent)?;
        if frame.len() + MESH_ID_LEN > MAX_DATAGRAM_SIZE {
            return Err(TransportError::Oversized { len: frame.len() });
        }

        let mut datagram = Vec::with_capacity(MESH_ID_LEN + frame.len());
        datagram.extend_from_slice(&self.mesh_id.0);
        datagram.extend_from_slice(frame);

        debug!("Sending {} bytes to {}", frame.len(), parent);
        self.socket.send_to(&datagram, parent).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<(SocketAddr, Vec<u8>), TransportError> {
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];

        loop {
            let (len, src) = self.socket.recv_from(&mut buf).await?;
            if len < MESH_ID_LEN || buf[..MESH_ID_LEN] != self.mesh_id.0 {
                debug!("Dropping {} byte datagram from {}: foreign mesh", len, src);
                continue;
            }
            return Ok((src, buf[MESH_ID_LEN..len].to_vec()));
        }
    }
}
