//! In-memory broker double
//!
//! A [`MockBroker`] stands in for one remote broker. Tests drive the
//! connection lifecycle explicitly (`accept_connection`, `drop_connection`)
//! and inspect what the endpoints asked for (`subscriptions`, `published`).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

use crate::config::BrokerEndpointConfig;
use crate::message::Message;
use crate::protocol::QoS;
use crate::topic::TopicPattern;

use super::{BrokerClient, ClientError, ClientEvent, Connection, Connector, EventSource};

type EventResult = Result<ClientEvent, ClientError>;

struct BrokerState {
    events_tx: mpsc::UnboundedSender<EventResult>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<EventResult>>>,
    subscriptions: Mutex<Vec<(String, QoS)>>,
    published: Mutex<Vec<Message>>,
    rejected_filters: Mutex<Vec<String>>,
    disconnects: AtomicU16,
    next_pkid: AtomicU16,
    auto_ack: AtomicBool,
    fail_publishes: AtomicBool,
    changed: Notify,
}

/// Handle to a simulated broker; clones share the same state
#[derive(Clone)]
pub struct MockBroker {
    state: Arc<BrokerState>,
}

impl MockBroker {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(BrokerState {
                events_tx,
                events_rx: Mutex::new(Some(events_rx)),
                subscriptions: Mutex::new(Vec::new()),
                published: Mutex::new(Vec::new()),
                rejected_filters: Mutex::new(Vec::new()),
                disconnects: AtomicU16::new(0),
                next_pkid: AtomicU16::new(1),
                auto_ack: AtomicBool::new(true),
                fail_publishes: AtomicBool::new(false),
                changed: Notify::new(),
            }),
        }
    }

    /// Whether QoS 1/2 publishes are acknowledged (default: true)
    pub fn set_auto_ack(&self, enabled: bool) {
        self.state.auto_ack.store(enabled, Ordering::SeqCst);
    }

    /// Make the client refuse publish requests (nothing reaches the broker)
    pub fn fail_publishes(&self, enabled: bool) {
        self.state.fail_publishes.store(enabled, Ordering::SeqCst);
    }

    /// Make SUBSCRIBE requests for this filter fail
    pub fn reject_subscriptions_to(&self, filter: &str) {
        self.state.rejected_filters.lock().push(filter.to_string());
    }

    /// Complete the handshake (CONNACK success)
    pub fn accept_connection(&self) {
        self.push(Ok(ClientEvent::Connected {
            session_present: false,
        }));
    }

    /// Fail the transport; the endpoint sees a connection error
    pub fn drop_connection(&self, reason: &str) {
        self.push(Err(ClientError::ConnectionLost(reason.to_string())));
    }

    /// Broker-initiated DISCONNECT
    pub fn send_disconnect(&self, reason: &str) {
        self.push(Ok(ClientEvent::Disconnected {
            reason: reason.to_string(),
        }));
    }

    /// Shut the client down for good; the endpoint stops reconnecting
    pub fn close_client(&self) {
        self.push(Err(ClientError::Closed));
    }

    /// Deliver an inbound application message to the connected client
    pub fn deliver(&self, message: Message) {
        self.push(Ok(ClientEvent::Message(message)));
    }

    fn push(&self, event: EventResult) {
        // The receiver lives as long as the broker state
        let _ = self.state.events_tx.send(event);
    }

    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        self.state.subscriptions.lock().clone()
    }

    /// Number of SUBSCRIBE requests issued for an exact filter
    pub fn subscribe_count(&self, filter: &str) -> usize {
        self.state
            .subscriptions
            .lock()
            .iter()
            .filter(|(f, _)| f == filter)
            .count()
    }

    pub fn published(&self) -> Vec<Message> {
        self.state.published.lock().clone()
    }

    pub fn disconnect_count(&self) -> u16 {
        self.state.disconnects.load(Ordering::SeqCst)
    }

    /// Wait until `predicate` holds, re-checking after every recorded request
    pub async fn wait_until<F>(&self, timeout: Duration, predicate: F) -> bool
    where
        F: Fn(&MockBroker) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.state.changed.notified();
            if predicate(self) {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return predicate(self);
            }
        }
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<EventResult>> {
        self.state.events_rx.lock().take()
    }
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new()
    }
}

struct MockClient {
    broker: MockBroker,
}

#[async_trait]
impl BrokerClient for MockClient {
    async fn subscribe(&self, pattern: &TopicPattern, qos: QoS) -> Result<(), ClientError> {
        let state = &self.broker.state;
        state
            .subscriptions
            .lock()
            .push((pattern.as_str().to_string(), qos));
        state.changed.notify_waiters();

        if state
            .rejected_filters
            .lock()
            .iter()
            .any(|f| f == pattern.as_str())
        {
            return Err(ClientError::Subscribe {
                filter: pattern.to_string(),
                reason: "rejected by mock broker".to_string(),
            });
        }

        let pkid = state.next_pkid.fetch_add(1, Ordering::SeqCst);
        self.broker.push(Ok(ClientEvent::Subscribed {
            pkid,
            granted: 1,
            rejected: 0,
        }));
        Ok(())
    }

    async fn publish(&self, message: Message) -> Result<(), ClientError> {
        let state = &self.broker.state;
        if state.fail_publishes.load(Ordering::SeqCst) {
            return Err(ClientError::Request("request queue closed".to_string()));
        }
        let qos = message.qos;
        state.published.lock().push(message);

        if qos.is_acknowledged() {
            let pkid = state.next_pkid.fetch_add(1, Ordering::SeqCst);
            self.broker.push(Ok(ClientEvent::PublishSent { pkid }));
            if state.auto_ack.load(Ordering::SeqCst) {
                self.broker.push(Ok(ClientEvent::PublishAcked { pkid }));
            }
        } else {
            self.broker.push(Ok(ClientEvent::PublishSent { pkid: 0 }));
        }
        state.changed.notify_waiters();
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ClientError> {
        self.broker.state.disconnects.fetch_add(1, Ordering::SeqCst);
        self.broker.state.changed.notify_waiters();
        self.broker
            .push(Err(ClientError::ConnectionLost("client disconnected".to_string())));
        Ok(())
    }
}

struct MockEvents {
    rx: mpsc::UnboundedReceiver<EventResult>,
}

#[async_trait]
impl EventSource for MockEvents {
    async fn poll(&mut self) -> Result<ClientEvent, ClientError> {
        match self.rx.recv().await {
            Some(event) => event,
            None => Err(ClientError::Closed),
        }
    }
}

/// Routes connections to mock brokers by configured host name
#[derive(Clone, Default)]
pub struct MockConnector {
    brokers: HashMap<String, MockBroker>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a broker reachable as `host`
    pub fn with_broker(mut self, host: &str, broker: MockBroker) -> Self {
        self.brokers.insert(host.to_string(), broker);
        self
    }
}

impl Connector for MockConnector {
    fn connect(&self, config: &BrokerEndpointConfig) -> Result<Connection, ClientError> {
        let broker = self
            .brokers
            .get(&config.host)
            .ok_or_else(|| ClientError::Connect(format!("unknown host {}", config.host)))?;
        let rx = broker
            .take_events()
            .ok_or_else(|| ClientError::Connect(format!("{} already connected", config.host)))?;

        Ok(Connection {
            client: Arc::new(MockClient {
                broker: broker.clone(),
            }),
            events: Box::new(MockEvents { rx }),
        })
    }
}
