//! Broker Client Contract
//!
//! The endpoints only ever talk to a broker through these traits. A
//! [`Connector`] turns an endpoint configuration into a request handle
//! ([`BrokerClient`]) and an event stream ([`EventSource`]). Polling the
//! event stream drives the connection: it performs the handshake, reports
//! inbound traffic, and re-establishes the transport after a failure.
//!
//! Implemented by:
//! - [`RumqttConnector`]: real brokers via `rumqttc` (MQTT 3.1.1 and 5.0)
//! - [`MockConnector`]: in-memory broker double for tests

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::BrokerEndpointConfig;
use crate::message::Message;
use crate::protocol::QoS;
use crate::topic::TopicPattern;

pub mod mock;
mod rumqtt;

pub use mock::{MockBroker, MockConnector};
pub use rumqtt::RumqttConnector;

/// Error type for broker client operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Transport or handshake failure (including CONNACK refusal)
    Connect(String),
    /// An established connection was lost
    ConnectionLost(String),
    /// Broker rejected a subscription
    Subscribe { filter: String, reason: String },
    /// Request could not be handed to the client's network loop
    Request(String),
    /// Client has been shut down and will not reconnect
    Closed,
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Connect(msg) => write!(f, "Connect failed: {}", msg),
            ClientError::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            ClientError::Subscribe { filter, reason } => {
                write!(f, "Subscribe to '{}' failed: {}", filter, reason)
            }
            ClientError::Request(msg) => write!(f, "Request failed: {}", msg),
            ClientError::Closed => write!(f, "Client closed"),
        }
    }
}

impl std::error::Error for ClientError {}

/// Something that happened on a broker connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Broker accepted the connection (CONNACK success)
    Connected { session_present: bool },
    /// Inbound application message
    Message(Message),
    /// SUBACK for an earlier subscribe request
    Subscribed { pkid: u16, granted: usize, rejected: usize },
    /// A publish request has been written to the network
    ///
    /// `pkid` is 0 for QoS 0 publishes.
    PublishSent { pkid: u16 },
    /// Broker acknowledged a QoS 1 (PUBACK) or QoS 2 (PUBCOMP) publish
    PublishAcked { pkid: u16 },
    /// Broker sent DISCONNECT
    Disconnected { reason: String },
    /// Anything the endpoints do not act on (pings, outgoing acks, ...)
    Other,
}

/// Request side of a broker connection
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Queue a SUBSCRIBE; completion is reported as [`ClientEvent::Subscribed`]
    async fn subscribe(&self, pattern: &TopicPattern, qos: QoS) -> Result<(), ClientError>;

    /// Queue a PUBLISH; it is reported as [`ClientEvent::PublishSent`] once on the wire
    async fn publish(&self, message: Message) -> Result<(), ClientError>;

    /// Queue a DISCONNECT
    async fn disconnect(&self) -> Result<(), ClientError>;
}

/// Event side of a broker connection
///
/// Returning `Err` means the connection is down. Polling again attempts to
/// reconnect, except after [`ClientError::Closed`].
#[async_trait]
pub trait EventSource: Send {
    async fn poll(&mut self) -> Result<ClientEvent, ClientError>;
}

/// A request handle plus the event stream driving it
pub struct Connection {
    pub client: Arc<dyn BrokerClient>,
    pub events: Box<dyn EventSource>,
}

/// Factory for broker connections
pub trait Connector: Send + Sync {
    fn connect(&self, config: &BrokerEndpointConfig) -> Result<Connection, ClientError>;
}
