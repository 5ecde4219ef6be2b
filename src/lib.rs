//! MQTT Replicator - topic replication bridge between two MQTT brokers
//!
//! Subscribes to a set of topic patterns on a source broker and republishes
//! every matching message, unchanged, on a destination broker. Both
//! connections survive broker restarts and network failures on their own.

pub mod bridge;
pub mod client;
pub mod config;
pub mod endpoint;
pub mod loadgen;
pub mod message;
pub mod metrics;
pub mod probe;
pub mod protocol;
pub mod relay;
pub mod shutdown;
pub mod topic;

pub use bridge::{Bridge, BridgeError};
pub use client::{Connector, RumqttConnector};
pub use config::Config;
pub use endpoint::{DestinationEndpoint, EndpointState, PublishOutcome, SourceEndpoint};
pub use message::Message;
pub use metrics::{Metrics, MetricsServer};
pub use protocol::{ProtocolVersion, QoS};
pub use relay::RelayPipeline;
pub use topic::{TopicFilter, TopicPattern};
