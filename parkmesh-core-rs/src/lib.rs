//! Parkmesh Core Library
//!
//! Parking slot occupancy over a wireless mesh. Field nodes sample an
//! ultrasonic sensor and report fixed-size status frames to the root; the
//! root validates them and forwards the status text to a broker.
//!
//! ```text
//!  node: SensorSampler -> NodeReportTask --frame--> MeshTransport
//!                                                        |
//!  root:              BrokerBridge <- RootAggregator <---+
//!
//!  both: mesh / IP / broker events -> ConnectivityStateMachine -> ConnectivityHandle
//! ```

pub mod types;
pub mod message;
pub mod sensor;
pub mod connectivity;
pub mod transport;
pub mod memory;
pub mod broker;
pub mod reporter;
pub mod aggregator;
pub mod config;

pub use types::*;
pub use message::{status_text, topic_for, CodecError, StatusMessage, FRAME_LEN};
pub use sensor::{EchoPins, HalEchoPins, SensorError, SensorSampler, SimulatedEcho};
pub use connectivity::{
    event_channel, ConnectivityEvent, ConnectivityHandle, ConnectivitySnapshot,
    ConnectivityStateMachine, EventSender, MeshEvent, MeshState, UpstreamEvent, UpstreamState,
};
pub use transport::{MeshTransport, TransportError, UdpMeshTransport};
pub use memory::{memory_mesh, MemoryMesh, MeshAddr};
pub use broker::{BrokerBridge, BrokerError, LogBroker};
pub use reporter::{NodeReportTask, ReportOutcome};
pub use aggregator::{Delivery, RootAggregator};
pub use config::{ConfigError, NodeConfig};
