//! Core types for the parking mesh

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Logical identifier of a device, fixed at provisioning time
pub type LogicalId = u8;

/// Default occupancy threshold in centimeters
pub const DEFAULT_THRESHOLD_CM: f32 = 20.0;

/// Role a device was provisioned with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Field device that samples a slot and reports to the root
    Node,
    /// The single aggregator that bridges the mesh to the broker
    Root,
}

impl Default for Role {
    fn default() -> Self {
        Role::Node
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Node => write!(f, "node"),
            Role::Root => write!(f, "root"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "node" => Ok(Role::Node),
            "root" => Ok(Role::Root),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// Identity of this device. Immutable for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeIdentity {
    pub logical_id: LogicalId,
    pub role: Role,
}

impl NodeIdentity {
    pub fn new(logical_id: LogicalId, role: Role) -> Self {
        Self { logical_id, role }
    }

    pub fn is_root(&self) -> bool {
        self.role == Role::Root
    }
}

/// Six byte mesh network identifier shared by every device of one installation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MeshId(pub [u8; 6]);

impl Default for MeshId {
    fn default() -> Self {
        MeshId([0x11; 6])
    }
}

impl fmt::Display for MeshId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", a, b, c, d, e, g)
    }
}

impl FromStr for MeshId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');
        for byte in bytes.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| format!("mesh id needs 6 bytes: {}", s))?;
            *byte = u8::from_str_radix(part, 16)
                .map_err(|_| format!("invalid mesh id byte '{}' in {}", part, s))?;
        }
        if parts.next().is_some() {
            return Err(format!("mesh id has more than 6 bytes: {}", s));
        }
        Ok(MeshId(bytes))
    }
}

impl TryFrom<String> for MeshId {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MeshId> for String {
    fn from(id: MeshId) -> Self {
        id.to_string()
    }
}

/// One distance sample. Created fresh every cycle and never stored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorReading {
    pub distance_cm: f32,
    pub valid: bool,
}

impl SensorReading {
    pub fn valid(distance_cm: f32) -> Self {
        Self {
            distance_cm,
            valid: true,
        }
    }

    pub fn invalid() -> Self {
        Self {
            distance_cm: 0.0,
            valid: false,
        }
    }

    /// Classify this reading against an occupancy threshold
    pub fn occupancy(&self, threshold_cm: f32) -> Occupancy {
        classify(self, threshold_cm)
    }
}

impl<E> From<Result<f32, E>> for SensorReading {
    fn from(measurement: Result<f32, E>) -> Self {
        match measurement {
            Ok(distance_cm) => SensorReading::valid(distance_cm),
            Err(_) => SensorReading::invalid(),
        }
    }
}

/// Occupancy of a single parking slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Occupancy {
    Occupied,
    Free,
    /// The sensor gave no usable reading
    Unknown,
}

impl Occupancy {
    /// Keyword carried in the status text
    pub fn keyword(&self) -> &'static str {
        match self {
            Occupancy::Occupied => OCCUPIED_KEYWORD,
            Occupancy::Free => FREE_KEYWORD,
            Occupancy::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Occupancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

pub const OCCUPIED_KEYWORD: &str = "OCCUPIED";
pub const FREE_KEYWORD: &str = "FREE";

/// Pure occupancy classification: a slot is occupied when something is
/// within `threshold_cm` of the sensor, inclusive.
pub fn classify(reading: &SensorReading, threshold_cm: f32) -> Occupancy {
    if !reading.valid || !reading.distance_cm.is_finite() {
        return Occupancy::Unknown;
    }

    if reading.distance_cm <= threshold_cm {
        Occupancy::Occupied
    } else {
        Occupancy::Free
    }
}
