//! Destination Endpoint
//!
//! Publishes relayed messages on the downstream broker. A publish never
//! waits for a connection: while the endpoint is not connected it returns
//! [`PublishOutcome::Skipped`] at once, and a connected publish waits at
//! most `ack_timeout` for the broker's acknowledgement.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use crate::client::{BrokerClient, ClientError, ClientEvent, Connector};
use crate::config::{BrokerEndpointConfig, EndpointRole};
use crate::message::Message;

use super::ack::{AckReceiver, AckTracker};
use super::driver::{Driver, EventHandler, LifecycleHooks};
use super::{ConnectCallback, DisconnectCallback, EndpointState, StateCell};

/// Bound on handing a publish to the client when acknowledgements are not awaited
const SUBMIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of a publish attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Sent, and acknowledged if acknowledgements are awaited
    Delivered,
    /// Sent, but no acknowledgement within the timeout
    Unacknowledged,
    /// Not sent; the destination is not connected
    Skipped,
}

/// Configures and starts a [`DestinationEndpoint`]
pub struct DestinationEndpointBuilder {
    config: BrokerEndpointConfig,
    ack_timeout: Duration,
    hooks: LifecycleHooks,
}

impl DestinationEndpointBuilder {
    /// Maximum wait for PUBACK / PUBCOMP; zero disables waiting (default 5s)
    pub fn ack_timeout(mut self, ack_timeout: Duration) -> Self {
        self.ack_timeout = ack_timeout;
        self
    }

    pub fn on_connect(mut self, callback: ConnectCallback) -> Self {
        self.hooks.on_connect = Some(callback);
        self
    }

    pub fn on_disconnect(mut self, callback: DisconnectCallback) -> Self {
        self.hooks.on_disconnect = Some(callback);
        self
    }

    /// Create the client and start connecting
    pub fn start(self, connector: &dyn Connector) -> Result<DestinationEndpoint, ClientError> {
        let connection = connector.connect(&self.config)?;
        let acks = Arc::new(AckTracker::new());

        let handler = Arc::new(DestinationHandler { acks: acks.clone() });
        let driver = Driver::spawn(
            EndpointRole::Destination,
            &self.config,
            connection.client.clone(),
            connection.events,
            handler,
            self.hooks,
        );

        Ok(DestinationEndpoint {
            driver,
            client: connection.client,
            acks,
            submit: tokio::sync::Mutex::new(()),
            ack_timeout: self.ack_timeout,
        })
    }
}

/// Publisher-side broker connection
pub struct DestinationEndpoint {
    driver: Driver,
    client: Arc<dyn BrokerClient>,
    acks: Arc<AckTracker>,
    /// Serializes submissions so packet IDs pair up in order
    submit: tokio::sync::Mutex<()>,
    ack_timeout: Duration,
}

impl DestinationEndpoint {
    pub fn builder(config: BrokerEndpointConfig) -> DestinationEndpointBuilder {
        DestinationEndpointBuilder {
            config,
            ack_timeout: Duration::from_secs(5),
            hooks: LifecycleHooks::default(),
        }
    }

    pub fn state(&self) -> EndpointState {
        self.driver.state().get()
    }

    pub fn state_cell(&self) -> &StateCell {
        self.driver.state()
    }

    /// Whether the broker has acknowledged the current connection
    pub fn is_connected(&self) -> bool {
        self.state() == EndpointState::Connected
    }

    /// Wait until connected; false on timeout
    pub async fn wait_connected(&self, timeout: Duration) -> bool {
        self.driver
            .state()
            .wait_for(EndpointState::Connected, timeout)
            .await
    }

    /// Publish a message
    ///
    /// Returns `Skipped` without touching the client when not connected.
    /// QoS 1/2 publishes wait for the broker's acknowledgement up to the
    /// configured timeout. Errors mean the client refused the request.
    pub async fn publish(&self, message: Message) -> Result<PublishOutcome, ClientError> {
        if !self.is_connected() {
            return Ok(PublishOutcome::Skipped);
        }

        let await_ack = message.qos.is_acknowledged() && !self.ack_timeout.is_zero();
        let deadline = Instant::now()
            + if self.ack_timeout.is_zero() {
                SUBMIT_TIMEOUT
            } else {
                self.ack_timeout
            };

        let ack = match timeout_at(deadline, self.submit(message)).await {
            Ok(Ok(ack)) => ack,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                debug!(
                    "Endpoint '{}': Client did not accept publish in time",
                    EndpointRole::Destination
                );
                return Ok(PublishOutcome::Skipped);
            }
        };

        if !await_ack {
            return Ok(PublishOutcome::Delivered);
        }

        match timeout_at(deadline, ack).await {
            Ok(Ok(())) => Ok(PublishOutcome::Delivered),
            Ok(Err(_)) => {
                debug!(
                    "Endpoint '{}': Connection reset before acknowledgement",
                    EndpointRole::Destination
                );
                Ok(PublishOutcome::Unacknowledged)
            }
            Err(_) => Ok(PublishOutcome::Unacknowledged),
        }
    }

    async fn submit(&self, message: Message) -> Result<AckReceiver, ClientError> {
        let _guard = self.submit.lock().await;
        self.client.publish(message).await?;
        Ok(self.acks.submitted())
    }

    /// Disconnect; idempotent
    pub async fn stop(&self) {
        self.driver.stop().await;
    }
}

struct DestinationHandler {
    acks: Arc<AckTracker>,
}

impl EventHandler for DestinationHandler {
    fn on_connected(&self, _session_present: bool) {}

    fn on_event(&self, event: ClientEvent) {
        match event {
            ClientEvent::PublishSent { pkid } => self.acks.sent(pkid),
            ClientEvent::PublishAcked { pkid } => self.acks.acked(pkid),
            ClientEvent::Message(message) => warn!(
                "Endpoint '{}': Ignoring unexpected message on '{}'",
                EndpointRole::Destination,
                message.topic
            ),
            _ => {}
        }
    }

    fn on_disconnected(&self, _reason: &str) {
        self.acks.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{MockBroker, MockConnector};
    use crate::protocol::QoS;
    use pretty_assertions::assert_eq;

    const WAIT: Duration = Duration::from_secs(5);

    fn start_destination(broker: &MockBroker, ack_timeout: Duration) -> DestinationEndpoint {
        let connector = MockConnector::new().with_broker("downstream", broker.clone());
        let config = BrokerEndpointConfig {
            reconnect_interval: Duration::from_millis(10),
            max_reconnect_interval: Duration::from_millis(50),
            ..BrokerEndpointConfig::new("downstream", 1883)
        };
        DestinationEndpoint::builder(config)
            .ack_timeout(ack_timeout)
            .start(&connector)
            .unwrap()
    }

    #[tokio::test]
    async fn test_skipped_while_not_connected() {
        let broker = MockBroker::new();
        let destination = start_destination(&broker, WAIT);

        let outcome = destination
            .publish(Message::new("a/b", "x", QoS::AtLeastOnce, false))
            .await
            .unwrap();
        assert_eq!(outcome, PublishOutcome::Skipped);
        assert!(broker.published().is_empty());

        destination.stop().await;
    }

    #[tokio::test]
    async fn test_delivered_after_ack() {
        let broker = MockBroker::new();
        let destination = start_destination(&broker, WAIT);
        broker.accept_connection();
        assert!(destination.wait_connected(WAIT).await);

        for qos in [QoS::AtMostOnce, QoS::AtLeastOnce, QoS::ExactlyOnce] {
            let outcome = destination
                .publish(Message::new("a/b", "x", qos, true))
                .await
                .unwrap();
            assert_eq!(outcome, PublishOutcome::Delivered);
        }

        let published = broker.published();
        assert_eq!(published.len(), 3);
        assert!(published.iter().all(|m| m.topic == "a/b" && m.retain));

        destination.stop().await;
    }

    #[tokio::test]
    async fn test_unacknowledged_on_timeout() {
        let broker = MockBroker::new();
        broker.set_auto_ack(false);
        let destination = start_destination(&broker, Duration::from_millis(50));
        broker.accept_connection();
        assert!(destination.wait_connected(WAIT).await);

        let outcome = destination
            .publish(Message::new("a/b", "x", QoS::AtLeastOnce, false))
            .await
            .unwrap();
        assert_eq!(outcome, PublishOutcome::Unacknowledged);
        assert_eq!(broker.published().len(), 1);

        // QoS 0 has nothing to wait for
        let outcome = destination
            .publish(Message::new("a/b", "x", QoS::AtMostOnce, false))
            .await
            .unwrap();
        assert_eq!(outcome, PublishOutcome::Delivered);

        destination.stop().await;
    }

    #[tokio::test]
    async fn test_zero_ack_timeout_does_not_wait() {
        let broker = MockBroker::new();
        broker.set_auto_ack(false);
        let destination = start_destination(&broker, Duration::ZERO);
        broker.accept_connection();
        assert!(destination.wait_connected(WAIT).await);

        let outcome = destination
            .publish(Message::new("a/b", "x", QoS::ExactlyOnce, false))
            .await
            .unwrap();
        assert_eq!(outcome, PublishOutcome::Delivered);

        destination.stop().await;
    }

    #[tokio::test]
    async fn test_skipped_after_connection_lost() {
        let broker = MockBroker::new();
        let destination = start_destination(&broker, WAIT);
        broker.accept_connection();
        assert!(destination.wait_connected(WAIT).await);

        broker.drop_connection("broker restarted");
        let mut states = destination.state_cell().subscribe();
        tokio::time::timeout(WAIT, states.wait_for(|s| *s != EndpointState::Connected))
            .await
            .unwrap()
            .unwrap();

        let outcome = destination
            .publish(Message::new("a/b", "x", QoS::AtMostOnce, false))
            .await
            .unwrap();
        assert_eq!(outcome, PublishOutcome::Skipped);
        assert!(broker.published().is_empty());

        // Recovers once the broker accepts again
        broker.accept_connection();
        assert!(destination.wait_connected(WAIT).await);
        let outcome = destination
            .publish(Message::new("a/b", "x", QoS::AtMostOnce, false))
            .await
            .unwrap();
        assert_eq!(outcome, PublishOutcome::Delivered);

        destination.stop().await;
        destination.stop().await;
        assert_eq!(broker.disconnect_count(), 1);
    }
}
