//! Relayed Message Type
//!
//! A message as received from the source broker and republished on the
//! destination broker. Values are immutable; the payload is shared, so
//! cloning a message never copies its bytes.

use bytes::Bytes;

use crate::protocol::QoS;

/// A single MQTT application message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Topic name (no wildcards)
    pub topic: String,
    /// Opaque payload bytes
    pub payload: Bytes,
    /// Quality of Service level
    pub qos: QoS,
    /// Retain flag
    pub retain: bool,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>, qos: QoS, retain: bool) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
        }
    }

    /// Same topic, payload and retain flag, published at a different QoS
    pub fn with_qos(self, qos: QoS) -> Self {
        Self { qos, ..self }
    }
}
