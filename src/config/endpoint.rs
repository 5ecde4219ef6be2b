//! Broker Endpoint Configuration
//!
//! Connection settings for one side of the bridge. The same structure is
//! used for the source (subscriber) and destination (publisher) broker.

use std::time::Duration;

use serde::Deserialize;

use crate::protocol::ProtocolVersion;

/// Which side of the bridge an endpoint serves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointRole {
    Source,
    Destination,
}

impl EndpointRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointRole::Source => "source",
            EndpointRole::Destination => "destination",
        }
    }
}

impl std::fmt::Display for EndpointRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for a single broker connection
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerEndpointConfig {
    /// Broker host name or IP
    pub host: String,

    /// Broker TCP port
    pub port: u16,

    /// Client ID to present; empty means `replicator-<role>-<pid>`
    pub client_id: String,

    /// Username for authentication
    pub username: Option<String>,

    /// Password for authentication
    pub password: Option<String>,

    /// MQTT protocol version
    pub protocol: ProtocolVersion,

    /// Keep-alive interval in seconds
    pub keepalive: u16,

    /// Start without a persistent session
    pub clean_session: bool,

    /// First reconnect delay; doubled after every failed attempt
    #[serde(with = "humantime_serde")]
    pub reconnect_interval: Duration,

    /// Upper bound for the reconnect delay
    #[serde(with = "humantime_serde")]
    pub max_reconnect_interval: Duration,

    /// Depth of the client's outgoing request queue
    pub request_capacity: usize,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_keepalive() -> u16 {
    60
}

fn default_reconnect_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_max_reconnect_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_request_capacity() -> usize {
    100
}

impl Default for BrokerEndpointConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            client_id: String::new(),
            username: None,
            password: None,
            protocol: ProtocolVersion::default(),
            keepalive: default_keepalive(),
            clean_session: true,
            reconnect_interval: default_reconnect_interval(),
            max_reconnect_interval: default_max_reconnect_interval(),
            request_capacity: default_request_capacity(),
        }
    }
}

impl BrokerEndpointConfig {
    /// Endpoint for `host:port` with every other setting at its default
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Fill in a role-specific client ID if none was configured
    pub fn with_default_client_id(mut self, role: EndpointRole) -> Self {
        if self.client_id.is_empty() {
            self.client_id = format!("replicator-{}-{}", role, std::process::id());
        }
        self
    }

    /// Username and password, if a non-empty username is configured
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match self.username.as_deref() {
            Some(user) if !user.is_empty() => {
                Some((user, self.password.as_deref().unwrap_or("")))
            }
            _ => None,
        }
    }

    /// `host:port` for logging
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Override host and port from `host:port` or just `host`
    pub fn set_address(&mut self, address: &str) {
        let (host, port) = parse_address(address, self.port);
        self.host = host;
        self.port = port;
    }
}

/// Split `host:port`, falling back to `default_port` when no valid port is given
pub fn parse_address(address: &str, default_port: u16) -> (String, u16) {
    if let Some((host, port_str)) = address.rsplit_once(':') {
        if let Ok(port) = port_str.parse::<u16>() {
            return (host.to_string(), port);
        }
    }
    (address.to_string(), default_port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address_with_port() {
        let (host, port) = parse_address("broker.example.com:8883", 1883);
        assert_eq!(host, "broker.example.com");
        assert_eq!(port, 8883);
    }

    #[test]
    fn test_parse_address_without_port() {
        let (host, port) = parse_address("broker.example.com", 1883);
        assert_eq!(host, "broker.example.com");
        assert_eq!(port, 1883);
    }

    #[test]
    fn test_default_client_id_per_role() {
        let source = BrokerEndpointConfig::default().with_default_client_id(EndpointRole::Source);
        let destination =
            BrokerEndpointConfig::default().with_default_client_id(EndpointRole::Destination);
        assert!(source.client_id.starts_with("replicator-source-"));
        assert!(destination.client_id.starts_with("replicator-destination-"));

        let explicit = BrokerEndpointConfig {
            client_id: "edge-01".to_string(),
            ..Default::default()
        }
        .with_default_client_id(EndpointRole::Source);
        assert_eq!(explicit.client_id, "edge-01");
    }

    #[test]
    fn test_credentials_require_username() {
        let mut config = BrokerEndpointConfig::default();
        assert_eq!(config.credentials(), None);

        config.password = Some("secret".to_string());
        assert_eq!(config.credentials(), None);

        config.username = Some(String::new());
        assert_eq!(config.credentials(), None);

        config.username = Some("bridge".to_string());
        assert_eq!(config.credentials(), Some(("bridge", "secret")));

        config.password = None;
        assert_eq!(config.credentials(), Some(("bridge", "")));
    }
}
