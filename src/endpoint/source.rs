//! Source Endpoint
//!
//! Subscribes to the configured patterns on the upstream broker and hands
//! every inbound message to a callback. Subscriptions are issued from a
//! separate task so the connection driver keeps polling while the client
//! works through them; they are issued again after every reconnect.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::client::{BrokerClient, ClientError, ClientEvent, Connector};
use crate::config::{BrokerEndpointConfig, EndpointRole};
use crate::message::Message;
use crate::protocol::QoS;
use crate::topic::{TopicFilter, TopicPattern};

use super::driver::{Driver, EventHandler, LifecycleHooks};
use super::{ConnectCallback, DisconnectCallback, EndpointState, StateCell};

/// Receives every inbound message; must not block
pub type InboundCallback = Arc<dyn Fn(Message) + Send + Sync>;

/// Configures and starts a [`SourceEndpoint`]
pub struct SourceEndpointBuilder {
    config: BrokerEndpointConfig,
    patterns: TopicFilter,
    qos: QoS,
    on_message: Option<InboundCallback>,
    hooks: LifecycleHooks,
}

impl SourceEndpointBuilder {
    /// QoS requested for every subscription (default 0)
    pub fn subscribe_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    pub fn on_message(mut self, callback: InboundCallback) -> Self {
        self.on_message = Some(callback);
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
    ///
    /// Connection failures are retried in the background; only a client
    /// that cannot be created at all is reported here.
    pub fn start(self, connector: &dyn Connector) -> Result<SourceEndpoint, ClientError> {
        let connection = connector.connect(&self.config)?;

        info!(
            "Endpoint '{}': Subscribing to {} pattern(s) on {}",
            EndpointRole::Source,
            self.patterns.len(),
            self.config.address()
        );

        let handler = Arc::new(SourceHandler {
            client: connection.client.clone(),
            patterns: Arc::new(self.patterns.patterns().to_vec()),
            qos: self.qos,
            on_message: self.on_message,
        });
        let driver = Driver::spawn(
            EndpointRole::Source,
            &self.config,
            connection.client,
            connection.events,
            handler,
            self.hooks,
        );

        Ok(SourceEndpoint {
            driver,
            patterns: self.patterns,
        })
    }
}

/// Subscriber-side broker connection
pub struct SourceEndpoint {
    driver: Driver,
    patterns: TopicFilter,
}

impl SourceEndpoint {
    pub fn builder(config: BrokerEndpointConfig, patterns: TopicFilter) -> SourceEndpointBuilder {
        SourceEndpointBuilder {
            config,
            patterns,
            qos: QoS::AtMostOnce,
            on_message: None,
            hooks: LifecycleHooks::default(),
        }
    }

    pub fn patterns(&self) -> &TopicFilter {
        &self.patterns
    }

    pub fn state(&self) -> EndpointState {
        self.driver.state().get()
    }

    pub fn state_cell(&self) -> &StateCell {
        self.driver.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == EndpointState::Connected
    }

    /// Disconnect and stop delivering messages; idempotent
    pub async fn stop(&self) {
        self.driver.stop().await;
    }
}

struct SourceHandler {
    client: Arc<dyn BrokerClient>,
    patterns: Arc<Vec<TopicPattern>>,
    qos: QoS,
    on_message: Option<InboundCallback>,
}

impl EventHandler for SourceHandler {
    fn on_connected(&self, _session_present: bool) {
        let client = self.client.clone();
        let patterns = self.patterns.clone();
        let qos = self.qos;
        tokio::spawn(async move {
            subscribe_all(client.as_ref(), &patterns, qos).await;
        });
    }

    fn on_event(&self, event: ClientEvent) {
        match event {
            ClientEvent::Message(message) => {
                if let Some(on_message) = &self.on_message {
                    on_message(message);
                }
            }
            ClientEvent::Subscribed {
                pkid,
                granted,
                rejected,
            } => {
                if rejected > 0 {
                    warn!(
                        "Endpoint '{}': Broker rejected {} subscription(s) (pkid {})",
                        EndpointRole::Source,
                        rejected,
                        pkid
                    );
                } else {
                    debug!(
                        "Endpoint '{}': SUBACK pkid {} granted {}",
                        EndpointRole::Source,
                        pkid,
                        granted
                    );
                }
            }
            _ => {}
        }
    }

    fn on_disconnected(&self, _reason: &str) {}
}

/// Subscribe every pattern; one failure does not stop the others
async fn subscribe_all(client: &dyn BrokerClient, patterns: &[TopicPattern], qos: QoS) {
    let mut failed = 0;
    for pattern in patterns {
        match client.subscribe(pattern, qos).await {
            Ok(()) => match pattern.share_group() {
                Some(group) => debug!(
                    "Endpoint '{}': Subscribe '{}' (QoS {}, shared group '{}') sent",
                    EndpointRole::Source,
                    pattern.filter(),
                    qos,
                    group
                ),
                None => debug!(
                    "Endpoint '{}': Subscribe '{}' (QoS {}) sent",
                    EndpointRole::Source,
                    pattern,
                    qos
                ),
            },
            Err(e) => {
                failed += 1;
                warn!("Endpoint '{}': {}", EndpointRole::Source, e);
            }
        }
    }
    info!(
        "Endpoint '{}': Requested {} of {} subscription(s)",
        EndpointRole::Source,
        patterns.len() - failed,
        patterns.len()
    );
}
