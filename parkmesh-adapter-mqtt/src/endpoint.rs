//! Broker endpoint parsing

use std::fmt;
use std::str::FromStr;

use parkmesh_core::BrokerError;

/// Port used when the endpoint names none
pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Plain TCP MQTT endpoint, `mqtt://host[:port]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
}

impl BrokerEndpoint {
    pub fn parse(uri: &str) -> Result<Self, BrokerError> {
        let invalid = |reason: &str| BrokerError::InvalidEndpoint(format!("{} ({})", reason, uri));

        let uri = uri.trim();
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| invalid("missing scheme"))?;

        match scheme.to_ascii_lowercase().as_str() {
            "mqtt" | "tcp" => {}
            "mqtts" | "ssl" => return Err(invalid("TLS endpoints are not supported")),
            _ => return Err(invalid("unknown scheme")),
        }

        let authority = rest.trim_end_matches('/');
        if authority.contains('/') {
            return Err(invalid("unexpected path"));
        }
        if authority.contains('@') {
            return Err(invalid("credentials belong in the broker config"));
        }

        let (host, port) = split_host_port(authority).ok_or_else(|| invalid("bad port"))?;
        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        Ok(Self {
            host: host.to_string(),
            port: port.unwrap_or(DEFAULT_MQTT_PORT),
        })
    }
}

/// Split `host[:port]`, with IPv6 hosts in brackets
fn split_host_port(authority: &str) -> Option<(&str, Option<u16>)> {
    if let Some(v6) = authority.strip_prefix('[') {
        let (host, tail) = v6.split_once(']')?;
        return match tail {
            "" => Some((host, None)),
            _ => Some((host, Some(tail.strip_prefix(':')?.parse().ok()?))),
        };
    }

    match authority.rsplit_once(':') {
        Some((host, port)) => Some((host, Some(port.parse().ok()?))),
        None => Some((authority, None)),
    }
}

impl FromStr for BrokerEndpoint {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for BrokerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "mqtt://[{}]:{}", self.host, self.port)
        } else {
            write!(f, "mqtt://{}:{}", self.host, self.port)
        }
    }
}
