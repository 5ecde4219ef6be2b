//! rumqttc-backed broker connections
//!
//! rumqttc keeps its own network loop behind `EventLoop::poll`; after a
//! failed poll the next poll dials the broker again, so reconnection is a
//! matter of polling after a backoff delay.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::config::BrokerEndpointConfig;
use crate::message::Message;
use crate::protocol::{ProtocolVersion, QoS};
use crate::topic::TopicPattern;

use super::{BrokerClient, ClientError, ClientEvent, Connection, Connector, EventSource};

/// Builds rumqttc clients for the configured protocol version
#[derive(Debug, Clone, Copy, Default)]
pub struct RumqttConnector;

impl RumqttConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for RumqttConnector {
    fn connect(&self, config: &BrokerEndpointConfig) -> Result<Connection, ClientError> {
        if config.host.is_empty() {
            return Err(ClientError::Connect("empty host".to_string()));
        }
        let keep_alive = Duration::from_secs(u64::from(config.keepalive));
        let capacity = config.request_capacity.max(1);

        debug!(
            "Creating MQTT {} client '{}' for {}:{}",
            config.protocol, config.client_id, config.host, config.port
        );

        match config.protocol {
            ProtocolVersion::V311 => {
                let mut options =
                    rumqttc::MqttOptions::new(&config.client_id, &config.host, config.port);
                options.set_keep_alive(keep_alive);
                options.set_clean_session(config.clean_session);
                if let Some((username, password)) = config.credentials() {
                    options.set_credentials(username, password);
                }
                let (client, eventloop) = rumqttc::AsyncClient::new(options, capacity);
                Ok(Connection {
                    client: Arc::new(V311Client { client }),
                    events: Box::new(V311Events { eventloop }),
                })
            }
            ProtocolVersion::V5 => {
                let mut options =
                    rumqttc::v5::MqttOptions::new(&config.client_id, &config.host, config.port);
                options.set_keep_alive(keep_alive);
                options.set_clean_start(config.clean_session);
                if let Some((username, password)) = config.credentials() {
                    options.set_credentials(username, password);
                }
                let (client, eventloop) = rumqttc::v5::AsyncClient::new(options, capacity);
                Ok(Connection {
                    client: Arc::new(V5Client { client }),
                    events: Box::new(V5Events { eventloop }),
                })
            }
        }
    }
}

// =============================================================================
// MQTT 3.1.1
// =============================================================================

fn to_v311_qos(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

fn from_v311_qos(qos: rumqttc::QoS) -> QoS {
    match qos {
        rumqttc::QoS::AtMostOnce => QoS::AtMostOnce,
        rumqttc::QoS::AtLeastOnce => QoS::AtLeastOnce,
        rumqttc::QoS::ExactlyOnce => QoS::ExactlyOnce,
    }
}

struct V311Client {
    client: rumqttc::AsyncClient,
}

#[async_trait]
impl BrokerClient for V311Client {
    async fn subscribe(&self, pattern: &TopicPattern, qos: QoS) -> Result<(), ClientError> {
        self.client
            .subscribe(pattern.as_str(), to_v311_qos(qos))
            .await
            .map_err(|e| ClientError::Subscribe {
                filter: pattern.to_string(),
                reason: e.to_string(),
            })
    }

    async fn publish(&self, message: Message) -> Result<(), ClientError> {
        self.client
            .publish_bytes(
                message.topic,
                to_v311_qos(message.qos),
                message.retain,
                message.payload,
            )
            .await
            .map_err(|e| ClientError::Request(e.to_string()))
    }

    async fn disconnect(&self) -> Result<(), ClientError> {
        self.client
            .disconnect()
            .await
            .map_err(|e| ClientError::Request(e.to_string()))
    }
}

struct V311Events {
    eventloop: rumqttc::EventLoop,
}

#[async_trait]
impl EventSource for V311Events {
    async fn poll(&mut self) -> Result<ClientEvent, ClientError> {
        use rumqttc::{Event, Outgoing, Packet};

        let event = self
            .eventloop
            .poll()
            .await
            .map_err(|e| ClientError::Connect(e.to_string()))?;

        Ok(match event {
            Event::Incoming(Packet::ConnAck(ack)) => ClientEvent::Connected {
                session_present: ack.session_present,
            },
            Event::Incoming(Packet::Publish(publish)) => ClientEvent::Message(Message {
                topic: publish.topic,
                payload: publish.payload,
                qos: from_v311_qos(publish.qos),
                retain: publish.retain,
            }),
            Event::Incoming(Packet::SubAck(ack)) => {
                let granted = ack
                    .return_codes
                    .iter()
                    .filter(|c| matches!(c, rumqttc::SubscribeReasonCode::Success(_)))
                    .count();
                ClientEvent::Subscribed {
                    pkid: ack.pkid,
                    granted,
                    rejected: ack.return_codes.len() - granted,
                }
            }
            Event::Incoming(Packet::PubAck(ack)) => ClientEvent::PublishAcked { pkid: ack.pkid },
            Event::Incoming(Packet::PubComp(comp)) => {
                ClientEvent::PublishAcked { pkid: comp.pkid }
            }
            Event::Incoming(Packet::Disconnect) => ClientEvent::Disconnected {
                reason: "broker sent DISCONNECT".to_string(),
            },
            Event::Outgoing(Outgoing::Publish(pkid)) => ClientEvent::PublishSent { pkid },
            _ => ClientEvent::Other,
        })
    }
}

// =============================================================================
// MQTT 5.0
// =============================================================================

fn to_v5_qos(qos: QoS) -> rumqttc::v5::mqttbytes::QoS {
    use rumqttc::v5::mqttbytes::QoS as V5QoS;
    match qos {
        QoS::AtMostOnce => V5QoS::AtMostOnce,
        QoS::AtLeastOnce => V5QoS::AtLeastOnce,
        QoS::ExactlyOnce => V5QoS::ExactlyOnce,
    }
}

fn from_v5_qos(qos: rumqttc::v5::mqttbytes::QoS) -> QoS {
    use rumqttc::v5::mqttbytes::QoS as V5QoS;
    match qos {
        V5QoS::AtMostOnce => QoS::AtMostOnce,
        V5QoS::AtLeastOnce => QoS::AtLeastOnce,
        V5QoS::ExactlyOnce => QoS::ExactlyOnce,
    }
}

struct V5Client {
    client: rumqttc::v5::AsyncClient,
}

#[async_trait]
impl BrokerClient for V5Client {
    async fn subscribe(&self, pattern: &TopicPattern, qos: QoS) -> Result<(), ClientError> {
        self.client
            .subscribe(pattern.as_str(), to_v5_qos(qos))
            .await
            .map_err(|e| ClientError::Subscribe {
                filter: pattern.to_string(),
                reason: e.to_string(),
            })
    }

    async fn publish(&self, message: Message) -> Result<(), ClientError> {
        self.client
            .publish_bytes(
                message.topic,
                to_v5_qos(message.qos),
                message.retain,
                message.payload,
            )
            .await
            .map_err(|e| ClientError::Request(e.to_string()))
    }

    async fn disconnect(&self) -> Result<(), ClientError> {
        self.client
            .disconnect()
            .await
            .map_err(|e| ClientError::Request(e.to_string()))
    }
}

struct V5Events {
    eventloop: rumqttc::v5::EventLoop,
}

#[async_trait]
impl EventSource for V5Events {
    async fn poll(&mut self) -> Result<ClientEvent, ClientError> {
        use rumqttc::v5::mqttbytes::v5::{Packet, SubscribeReasonCode};
        use rumqttc::v5::Event;

        let event = self
            .eventloop
            .poll()
            .await
            .map_err(|e| ClientError::Connect(e.to_string()))?;

        Ok(match event {
            Event::Incoming(Packet::ConnAck(ack)) => ClientEvent::Connected {
                session_present: ack.session_present,
            },
            Event::Incoming(Packet::Publish(publish)) => ClientEvent::Message(Message {
                topic: String::from_utf8_lossy(&publish.topic).into_owned(),
                payload: publish.payload,
                qos: from_v5_qos(publish.qos),
                retain: publish.retain,
            }),
            Event::Incoming(Packet::SubAck(ack)) => {
                let granted = ack
                    .return_codes
                    .iter()
                    .filter(|c| matches!(c, SubscribeReasonCode::Success(_)))
                    .count();
                ClientEvent::Subscribed {
                    pkid: ack.pkid,
                    granted,
                    rejected: ack.return_codes.len() - granted,
                }
            }
            Event::Incoming(Packet::PubAck(ack)) => ClientEvent::PublishAcked { pkid: ack.pkid },
            Event::Incoming(Packet::PubComp(comp)) => {
                ClientEvent::PublishAcked { pkid: comp.pkid }
            }
            Event::Incoming(Packet::Disconnect(disconnect)) => ClientEvent::Disconnected {
                reason: format!("{:?}", disconnect.reason_code),
            },
            Event::Outgoing(rumqttc::Outgoing::Publish(pkid)) => ClientEvent::PublishSent { pkid },
            _ => ClientEvent::Other,
        })
    }
}
