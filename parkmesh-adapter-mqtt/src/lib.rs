//! # Parkmesh MQTT Adapter
//!
//! [`BrokerBridge`](parkmesh_core::BrokerBridge) over MQTT 3.1.1 for the
//! root aggregator.
//!
//! ```text
//!  RootAggregator --publish(QoS 1, retain=false)--> MqttBridge --TCP--> broker
//!                                                       |
//!        ConnectivityStateMachine <--Broker(Dis)Connected+
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use parkmesh_adapter_mqtt::MqttBridge;
//! use parkmesh_core::{event_channel, BrokerBridge, NodeConfig, Role};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = NodeConfig::new(0, Role::Root).with_broker_uri("mqtt://localhost:1883");
//!     let (events, _rx) = event_channel(config.event_capacity);
//!
//!     let bridge = MqttBridge::new(&config.broker, events)?;
//!     bridge.start()?;
//!     bridge.publish("esp32/parking/node/7", b"Node 7: FREE").await?;
//!
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod endpoint;

pub use bridge::{MqttBridge, MqttBridgeConfig};
pub use endpoint::{BrokerEndpoint, DEFAULT_MQTT_PORT};
