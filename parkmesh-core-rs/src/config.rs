//! Device configuration
//!
//! Everything fixed at provisioning time: identity, sensor wiring, broker
//! endpoint and task timing. Loadable from a JSON file; durations are
//! written in milliseconds and every missing field takes its default.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::connectivity::DEFAULT_EVENT_CAPACITY;
use crate::message::MAX_PAYLOAD_LEN;
use crate::sensor::DEFAULT_ECHO_TIMEOUT;
use crate::types::{LogicalId, MeshId, NodeIdentity, Role, DEFAULT_THRESHOLD_CM};

/// Longest topic prefix accepted; leaves room for `/node/255`
pub const MAX_TOPIC_PREFIX_LEN: usize = 64;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Complete device configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Shared by every device of one installation
    pub mesh_id: MeshId,

    pub logical_id: LogicalId,

    pub role: Role,

    pub sensor: SensorConfig,

    /// Only used on the root
    pub broker: BrokerConfig,

    pub timing: TimingConfig,

    /// Capacity of the connectivity event channel
    pub event_capacity: usize,
}

/// Ultrasonic sensor wiring and classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// GPIO numbers, resolved into [`HalEchoPins`](crate::sensor::HalEchoPins)
    /// by board bring-up
    pub trigger_pin: u8,
    pub echo_pin: u8,

    /// Occupied when the distance is at most this many centimeters
    pub threshold_cm: f32,

    /// Bound on each echo edge
    #[serde(rename = "echo_timeout_ms", with = "millis")]
    pub echo_timeout: Duration,
}

/// Broker endpoint and topic layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// `mqtt://host[:port]`
    pub uri: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,

    /// Topics are `<topic_prefix>/node/<src_id>`
    pub topic_prefix: String,

    /// Bound on a single publish
    #[serde(rename = "publish_timeout_ms", with = "millis")]
    pub publish_timeout: Duration,
}

/// Report task timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Time between reports while connected
    #[serde(rename = "report_period_ms", with = "millis")]
    pub report_period: Duration,

    /// Time between connectivity checks while disconnected
    #[serde(rename = "reconnect_poll_ms", with = "millis")]
    pub reconnect_poll: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            mesh_id: MeshId::default(),
            logical_id: 0,
            role: Role::Node,
            sensor: SensorConfig::default(),
            broker: BrokerConfig::default(),
            timing: TimingConfig::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            trigger_pin: 2,
            echo_pin: 21,
            threshold_cm: DEFAULT_THRESHOLD_CM,
            echo_timeout: DEFAULT_ECHO_TIMEOUT,
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            uri: "mqtt://localhost:1883".to_string(),
            username: None,
            password: None,
            client_id: "parking_root".to_string(),
            topic_prefix: "esp32/parking".to_string(),
            publish_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            report_period: Duration::from_secs(5),
            reconnect_poll: Duration::from_secs(1),
        }
    }
}

impl NodeConfig {
    /// Create config for one device
    pub fn new(logical_id: LogicalId, role: Role) -> Self {
        Self {
            logical_id,
            role,
            ..Default::default()
        }
    }

    /// Load and validate a JSON config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: NodeConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn identity(&self) -> NodeIdentity {
        NodeIdentity::new(self.logical_id, self.role)
    }

    /// Reject values no device could run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| -> Result<(), ConfigError> {
            Err(ConfigError::Invalid(msg.to_string()))
        };

        if !(self.sensor.threshold_cm.is_finite() && self.sensor.threshold_cm > 0.0) {
            return invalid("threshold_cm must be positive");
        }
        if self.sensor.echo_timeout.is_zero() {
            return invalid("echo_timeout_ms must be positive");
        }
        if self.timing.report_period.is_zero() || self.timing.reconnect_poll.is_zero() {
            return invalid("report and reconnect periods must be positive");
        }
        if self.event_capacity == 0 {
            return invalid("event_capacity must be positive");
        }
        if self.role == Role::Root {
            if self.broker.uri.trim().is_empty() {
                return invalid("root needs a broker uri");
            }
            if self.broker.publish_timeout.is_zero() {
                return invalid("publish_timeout_ms must be positive");
            }
        }
        if self.broker.topic_prefix.len() > MAX_TOPIC_PREFIX_LEN {
            return Err(ConfigError::Invalid(format!(
                "topic_prefix longer than {} bytes",
                MAX_TOPIC_PREFIX_LEN
            )));
        }
        if self.broker.client_id.len() > MAX_PAYLOAD_LEN {
            return invalid("client_id too long");
        }
        Ok(())
    }

    /// Set mesh id
    pub fn with_mesh_id(mut self, mesh_id: MeshId) -> Self {
        self.mesh_id = mesh_id;
        self
    }

    /// Set occupancy threshold
    pub fn with_threshold(mut self, threshold_cm: f32) -> Self {
        self.sensor.threshold_cm = threshold_cm;
        self
    }

    /// Set broker endpoint
    pub fn with_broker_uri(mut self, uri: impl Into<String>) -> Self {
        self.broker.uri = uri.into();
        self
    }

    /// Set broker credentials
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.broker.username = Some(username.into());
        self.broker.password = Some(password.into());
        self
    }

    /// Set topic prefix
    pub fn with_topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.broker.topic_prefix = prefix.into();
        self
    }

    /// Set report and reconnect-poll periods
    pub fn with_periods(mut self, report_period: Duration, reconnect_poll: Duration) -> Self {
        self.timing.report_period = report_period;
        self.timing.reconnect_poll = reconnect_poll;
        self
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.mesh_id.to_string(), "11:11:11:11:11:11");
        assert_eq!(config.sensor.threshold_cm, 20.0);
        assert_eq!(config.sensor.echo_timeout, Duration::from_millis(30));
        assert_eq!(config.broker.client_id, "parking_root");
        assert_eq!(config.broker.topic_prefix, "esp32/parking");
        assert_eq!(config.timing.report_period, Duration::from_secs(5));
        assert_eq!(config.timing.reconnect_poll, Duration::from_secs(1));
        assert_eq!(config.event_capacity, 32);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = NodeConfig::new(0, Role::Root)
            .with_broker_uri("mqtt://broker.local:1884")
            .with_credentials("esp32", "secret")
            .with_topic_prefix("lot/a")
            .with_threshold(25.0);

        assert!(config.identity().is_root());
        assert_eq!(config.broker.uri, "mqtt://broker.local:1884");
        assert_eq!(config.broker.username.as_deref(), Some("esp32"));
        assert_eq!(config.broker.topic_prefix, "lot/a");
        assert_eq!(config.sensor.threshold_cm, 25.0);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(NodeConfig::default().with_threshold(0.0).validate().is_err());
        assert!(NodeConfig::default().with_threshold(f32::NAN).validate().is_err());
        assert!(NodeConfig::default()
            .with_periods(Duration::ZERO, Duration::from_secs(1))
            .validate()
            .is_err());
        assert!(NodeConfig::new(0, Role::Root)
            .with_broker_uri("  ")
            .validate()
            .is_err());
        assert!(NodeConfig::default()
            .with_topic_prefix("x".repeat(65))
            .validate()
            .is_err());

        // an empty broker uri is fine on a node
        assert!(NodeConfig::new(4, Role::Node)
            .with_broker_uri("")
            .validate()
            .is_ok());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "mesh_id": "aa:bb:cc:dd:ee:01",
                "logical_id": 7,
                "role": "node",
                "sensor": {{ "threshold_cm": 30.0, "echo_timeout_ms": 25 }},
                "timing": {{ "report_period_ms": 2000 }}
            }}"#
        )
        .unwrap();

        let config = NodeConfig::from_file(file.path()).unwrap();
        assert_eq!(config.mesh_id, MeshId([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01]));
        assert_eq!(config.logical_id, 7);
        assert_eq!(config.role, Role::Node);
        assert_eq!(config.sensor.threshold_cm, 30.0);
        assert_eq!(config.sensor.echo_timeout, Duration::from_millis(25));
        assert_eq!(config.sensor.trigger_pin, 2);
        assert_eq!(config.timing.report_period, Duration::from_secs(2));
        assert_eq!(config.timing.reconnect_poll, Duration::from_secs(1));
    }

    #[test]
    fn test_from_file_errors() {
        let missing = NodeConfig::from_file("/nonexistent/parkmesh.json");
        assert!(matches!(missing, Err(ConfigError::Io(_))));

        let mut garbled = tempfile::NamedTempFile::new().unwrap();
        write!(garbled, "{{ \"mesh_id\": \"not-a-mesh-id\" }}").unwrap();
        assert!(matches!(
            NodeConfig::from_file(garbled.path()),
            Err(ConfigError::Parse(_))
        ));

        let mut invalid = tempfile::NamedTempFile::new().unwrap();
        write!(invalid, "{{ \"sensor\": {{ \"threshold_cm\": -1.0 }} }}").unwrap();
        assert!(matches!(
            NodeConfig::from_file(invalid.path()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_json_round_trip() {
        let config = NodeConfig::new(3, Role::Root).with_topic_prefix("lot/b");
        let text = serde_json::to_string(&config).unwrap();
        assert!(text.contains("\"report_period_ms\":5000"));
        assert!(text.contains("\"mesh_id\":\"11:11:11:11:11:11\""));

        let back: NodeConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(back, config);
    }
}
