//! Root aggregation
//!
//! The root waits on the mesh for status frames, checks them, and forwards
//! the raw status text to the broker under `<prefix>/node/<src_id>`. Nothing
//! is buffered: a frame that cannot be published right now is dropped and
//! superseded by the node's next report.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::broker::BrokerBridge;
use crate::config::NodeConfig;
use crate::connectivity::ConnectivityHandle;
use crate::message::{topic_for, CodecError, StatusMessage, FRAME_LEN};
use crate::transport::{MeshTransport, TransportError};

/// What happened to one received frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Published { topic: String },
    /// Shorter than a status frame
    Undersized { len: usize },
    /// Right size, unreadable text
    Malformed(CodecError),
    /// Broker not connected; dropped without trying
    BrokerUnavailable,
    /// Broker rejected or timed out; not retried
    PublishFailed,
}

/// Receive loop of the root
pub struct RootAggregator<T, B> {
    transport: T,
    broker: Arc<B>,
    connectivity: ConnectivityHandle,
    topic_prefix: String,
}

impl<T, B> RootAggregator<T, B>
where
    T: MeshTransport,
    B: BrokerBridge,
{
    pub fn new(
        config: &NodeConfig,
        transport: T,
        broker: Arc<B>,
        connectivity: ConnectivityHandle,
    ) -> Self {
        Self {
            transport,
            broker,
            connectivity,
            topic_prefix: config.broker.topic_prefix.clone(),
        }
    }

    /// Validate one frame and forward it if the broker is reachable
    pub async fn handle_frame(&self, from: &T::Addr, bytes: &[u8]) -> Delivery {
        let msg = match StatusMessage::decode(bytes) {
            Ok(msg) => msg,
            Err(CodecError::Undersized { len }) => {
                warn!(
                    "Dropping {} byte frame from {}: shorter than {}",
                    len, from, FRAME_LEN
                );
                return Delivery::Undersized { len };
            }
            Err(e) => {
                warn!("Dropping malformed frame from {}: {}", from, e);
                return Delivery::Malformed(e);
            }
        };

        let occupied = msg.reports_occupied();
        info!(
            "Node {} via {}: {} [occupied={}]",
            msg.src_id(),
            from,
            msg.payload(),
            occupied
        );

        let topic = topic_for(&self.topic_prefix, msg.src_id());
        if !self.connectivity.is_broker_connected() {
            warn!("Broker not connected, dropping report for {}", topic);
            return Delivery::BrokerUnavailable;
        }

        match self.broker.publish(&topic, msg.payload().as_bytes()).await {
            Ok(()) => {
                info!("Published to {}: {}", topic, msg.payload());
                Delivery::Published { topic }
            }
            Err(e) => {
                warn!("Publish to {} failed: {}", topic, e);
                Delivery::PublishFailed
            }
        }
    }

    /// Receive until the transport is closed for good
    pub async fn run(mut self) {
        info!("Root aggregator listening");

        loop {
            match self.transport.recv().await {
                Ok((from, bytes)) => {
                    let delivery = self.handle_frame(&from, &bytes).await;
                    debug!("Frame from {}: {:?}", from, delivery);
                }
                Err(TransportError::Closed) => {
                    warn!("Mesh transport closed, aggregator stopping");
                    return;
                }
                Err(e) => warn!("Receive error: {}", e),
            }
        }
    }
}
