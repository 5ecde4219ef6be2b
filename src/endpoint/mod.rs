//! Broker Endpoints
//!
//! An endpoint owns one broker connection for the lifetime of the bridge.
//! Both sides share the same connection driver: a task that polls the
//! client's event stream, tracks [`EndpointState`], and reconnects with
//! exponential backoff after a failure.
//!
//! - [`SourceEndpoint`] subscribes to the configured patterns (again after
//!   every reconnect) and hands inbound messages to a callback.
//! - [`DestinationEndpoint`] publishes messages and reports whether the
//!   broker acknowledged them in time.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

mod ack;
mod destination;
mod driver;
mod source;

pub use destination::{DestinationEndpoint, DestinationEndpointBuilder, PublishOutcome};
pub use driver::{ConnectCallback, DisconnectCallback};
pub use source::{InboundCallback, SourceEndpoint, SourceEndpointBuilder};

/// Connection state of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    /// No connection (initial state, after a failure, and after shutdown)
    Disconnected,
    /// Transport handshake in progress
    Connecting,
    /// Broker acknowledged the connection
    Connected,
    /// Client closed; no further reconnect attempts
    Failed,
}

impl fmt::Display for EndpointState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointState::Disconnected => write!(f, "disconnected"),
            EndpointState::Connecting => write!(f, "connecting"),
            EndpointState::Connected => write!(f, "connected"),
            EndpointState::Failed => write!(f, "failed"),
        }
    }
}

/// Shared, observable endpoint state
///
/// Only the connection driver writes it; everyone else reads or waits.
#[derive(Debug, Clone)]
pub struct StateCell {
    tx: Arc<watch::Sender<EndpointState>>,
}

impl StateCell {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(EndpointState::Disconnected);
        Self { tx: Arc::new(tx) }
    }

    pub fn get(&self) -> EndpointState {
        *self.tx.borrow()
    }

    /// Set the state, returning the previous one
    pub(crate) fn set(&self, state: EndpointState) -> EndpointState {
        self.tx.send_replace(state)
    }

    /// Receiver notified on every state change
    pub fn subscribe(&self) -> watch::Receiver<EndpointState> {
        self.tx.subscribe()
    }

    /// Wait until the state equals `state`; false on timeout
    pub async fn wait_for(&self, state: EndpointState, timeout: Duration) -> bool {
        let mut rx = self.tx.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|current| *current == state))
            .await
            .is_ok_and(|changed| changed.is_ok())
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Exponential reconnect delay
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.max(Duration::from_millis(1));
        Self {
            initial,
            max: max.max(initial),
            current: initial,
        }
    }

    /// Delay before the next attempt; doubles up to the cap
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = std::cmp::min(self.current * 2, self.max);
        delay
    }

    /// Start over after a successful connection
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_until_cap() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(5));
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(4));
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_backoff_never_zero() {
        let mut backoff = Backoff::new(Duration::ZERO, Duration::ZERO);
        assert!(backoff.next_delay() > Duration::ZERO);
    }

    #[tokio::test]
    async fn test_state_cell_wait_for() {
        let state = StateCell::new();
        assert_eq!(state.get(), EndpointState::Disconnected);

        let waiter = {
            let state = state.clone();
            tokio::spawn(async move {
                state
                    .wait_for(EndpointState::Connected, Duration::from_secs(5))
                    .await
            })
        };

        assert_eq!(state.set(EndpointState::Connecting), EndpointState::Disconnected);
        state.set(EndpointState::Connected);
        assert!(waiter.await.unwrap());

        assert!(
            !state
                .wait_for(EndpointState::Failed, Duration::from_millis(10))
                .await
        );
    }
}
