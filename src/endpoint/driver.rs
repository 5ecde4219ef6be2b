//! Connection driver shared by both endpoints

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::client::{BrokerClient, ClientError, ClientEvent, EventSource};
use crate::config::{BrokerEndpointConfig, EndpointRole};
use crate::shutdown::{Shutdown, ShutdownHandle};

use super::{Backoff, EndpointState, StateCell};

/// How long shutdown waits for the DISCONNECT to be flushed
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Called after the broker acknowledged a connection
pub type ConnectCallback = Arc<dyn Fn() + Send + Sync>;

/// Called when an established connection ends, with the reason
pub type DisconnectCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Optional lifecycle observers registered on an endpoint
#[derive(Clone, Default)]
pub(crate) struct LifecycleHooks {
    pub on_connect: Option<ConnectCallback>,
    pub on_disconnect: Option<DisconnectCallback>,
}

/// Role-specific reaction to connection events
///
/// Called from the driver task; implementations must not block.
pub(crate) trait EventHandler: Send + Sync + 'static {
    fn on_connected(&self, session_present: bool);
    fn on_event(&self, event: ClientEvent);
    fn on_disconnected(&self, reason: &str);
}

/// Handle to a running connection driver
pub(crate) struct Driver {
    state: StateCell,
    shutdown: ShutdownHandle,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Driver {
    pub(crate) fn spawn(
        role: EndpointRole,
        config: &BrokerEndpointConfig,
        client: Arc<dyn BrokerClient>,
        events: Box<dyn EventSource>,
        handler: Arc<dyn EventHandler>,
        hooks: LifecycleHooks,
    ) -> Self {
        let state = StateCell::new();
        let (shutdown, shutdown_rx) = crate::shutdown::channel();

        let connection = ConnectionLoop {
            role,
            address: config.address(),
            client,
            events,
            handler,
            hooks,
            state: state.clone(),
            backoff: Backoff::new(config.reconnect_interval, config.max_reconnect_interval),
            shutdown: shutdown_rx,
        };
        let task = tokio::spawn(connection.run());

        Self {
            state,
            shutdown,
            task: Mutex::new(Some(task)),
        }
    }

    pub(crate) fn state(&self) -> &StateCell {
        &self.state
    }

    /// Stop the driver and wait for it to disconnect; later calls are no-ops
    pub(crate) async fn stop(&self) {
        self.shutdown.trigger();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Connection task failed: {}", e);
            }
        }
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

struct ConnectionLoop {
    role: EndpointRole,
    address: String,
    client: Arc<dyn BrokerClient>,
    events: Box<dyn EventSource>,
    handler: Arc<dyn EventHandler>,
    hooks: LifecycleHooks,
    state: StateCell,
    backoff: Backoff,
    shutdown: Shutdown,
}

impl ConnectionLoop {
    async fn run(mut self) {
        self.state.set(EndpointState::Connecting);
        info!("Endpoint '{}': Connecting to {}", self.role, self.address);

        loop {
            let polled = tokio::select! {
                biased;
                _ = self.shutdown.wait() => break,
                polled = self.events.poll() => polled,
            };

            match polled {
                Ok(ClientEvent::Connected { session_present }) => {
                    self.backoff.reset();
                    self.state.set(EndpointState::Connected);
                    info!(
                        "Endpoint '{}': Connected to {} (session present: {})",
                        self.role, self.address, session_present
                    );
                    self.handler.on_connected(session_present);
                    if let Some(on_connect) = &self.hooks.on_connect {
                        on_connect();
                    }
                }
                Ok(ClientEvent::Disconnected { reason }) => {
                    warn!(
                        "Endpoint '{}': Broker {} disconnected: {}",
                        self.role, self.address, reason
                    );
                    self.connection_ended(&reason);
                    self.state.set(EndpointState::Connecting);
                }
                Ok(event) => self.handler.on_event(event),
                Err(ClientError::Closed) => {
                    error!("Endpoint '{}': Client closed, giving up", self.role);
                    self.connection_ended("client closed");
                    self.state.set(EndpointState::Failed);
                    return;
                }
                Err(e) => {
                    if self.state.get() == EndpointState::Connected {
                        warn!(
                            "Endpoint '{}': Connection to {} lost: {}",
                            self.role, self.address, e
                        );
                    } else {
                        warn!(
                            "Endpoint '{}': Connection to {} failed: {}",
                            self.role, self.address, e
                        );
                    }
                    self.connection_ended(&e.to_string());

                    let delay = self.backoff.next_delay();
                    debug!("Endpoint '{}': Reconnecting in {:?}", self.role, delay);
                    tokio::select! {
                        biased;
                        _ = self.shutdown.wait() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    self.state.set(EndpointState::Connecting);
                    debug!("Endpoint '{}': Connecting to {}", self.role, self.address);
                }
            }
        }

        self.close().await;
    }

    /// Mark the connection down, notifying observers if it was up
    fn connection_ended(&self, reason: &str) {
        if self.state.set(EndpointState::Disconnected) == EndpointState::Connected {
            self.handler.on_disconnected(reason);
            if let Some(on_disconnect) = &self.hooks.on_disconnect {
                on_disconnect(reason);
            }
        }
    }

    async fn close(&mut self) {
        if self.state.get() == EndpointState::Connected {
            info!("Endpoint '{}': Disconnecting from {}", self.role, self.address);
            match self.client.disconnect().await {
                Ok(()) => {
                    // Keep polling until the client reports the connection closed
                    let events = &mut self.events;
                    let handler = &self.handler;
                    let drained = tokio::time::timeout(DISCONNECT_TIMEOUT, async {
                        while let Ok(event) = events.poll().await {
                            handler.on_event(event);
                        }
                    })
                    .await;
                    if drained.is_err() {
                        debug!(
                            "Endpoint '{}': Disconnect not confirmed within {:?}",
                            self.role, DISCONNECT_TIMEOUT
                        );
                    }
                }
                Err(e) => debug!("Endpoint '{}': Disconnect failed: {}", self.role, e),
            }
        }
        self.connection_ended("shutdown");
        info!("Endpoint '{}': Stopped", self.role);
    }
}
