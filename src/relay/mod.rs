//! Relay Pipeline
//!
//! Glue between the two endpoints. The source's message callback (the
//! [`RelayPipeline::inlet`]) only filters, counts and enqueues; it never
//! waits. A single relay task takes messages off the queue in arrival order
//! and publishes each one on the destination with the same topic, payload
//! and retain flag.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{RelayConfig, RelayQos};
use crate::endpoint::{DestinationEndpoint, InboundCallback, PublishOutcome};
use crate::message::Message;
use crate::metrics::Metrics;
use crate::shutdown::{Shutdown, ShutdownHandle};
use crate::topic::{PatternError, TopicFilter};

mod throttle;

use throttle::LogThrottle;

/// Relay behavior
#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Messages outside these patterns are counted as filtered
    pub filter: TopicFilter,
    /// QoS used on the destination
    pub qos: RelayQos,
    /// Hand-off queue depth
    pub queue_capacity: usize,
    /// Minimum spacing between drop warnings
    pub drop_log_interval: Duration,
}

impl RelaySettings {
    pub fn from_config(config: &RelayConfig) -> Result<Self, PatternError> {
        Ok(Self {
            filter: config.filter()?,
            qos: config.qos,
            queue_capacity: config.queue_capacity,
            drop_log_interval: config.drop_log_interval,
        })
    }
}

/// State shared by the inlet and the relay task
struct Shared {
    filter: TopicFilter,
    metrics: Arc<Metrics>,
    queue: mpsc::Sender<Message>,
    drops: LogThrottle,
}

impl Shared {
    fn update_depth(&self) {
        let depth = self.queue.max_capacity() - self.queue.capacity();
        self.metrics.queue_depth.set(depth as i64);
    }

    fn dropped(&self, count: u64, reason: &str) {
        self.metrics.dropped.inc_by(count);
        if let Some(suppressed) = self.drops.hit() {
            warn!(
                "Relay: Dropping messages: {} ({} dropped in total, {} since last warning)",
                reason,
                self.metrics.dropped.get(),
                suppressed + count
            );
        }
    }
}

/// Forwards messages from the source endpoint to the destination endpoint
pub struct RelayPipeline {
    shared: Arc<Shared>,
    shutdown: ShutdownHandle,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RelayPipeline {
    /// Spawn the relay task
    pub fn start(
        settings: RelaySettings,
        destination: Arc<DestinationEndpoint>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let (queue, rx) = mpsc::channel(settings.queue_capacity.max(1));
        let shared = Arc::new(Shared {
            filter: settings.filter,
            metrics,
            queue,
            drops: LogThrottle::new(settings.drop_log_interval),
        });
        let (shutdown, shutdown_rx) = crate::shutdown::channel();

        let relay = RelayTask {
            shared: shared.clone(),
            destination,
            qos: settings.qos,
            unacked: LogThrottle::new(settings.drop_log_interval),
        };
        let task = tokio::spawn(relay.run(rx, shutdown_rx));

        info!(
            "Relay: Forwarding {} pattern(s) at QoS {}",
            shared.filter.len(),
            settings.qos
        );

        Self {
            shared,
            shutdown,
            task: Mutex::new(Some(task)),
        }
    }

    /// Message callback for the source endpoint; never blocks
    pub fn inlet(&self) -> InboundCallback {
        let shared = self.shared.clone();
        Arc::new(move |message: Message| {
            shared.metrics.received.inc();

            if !shared.filter.matches(&message.topic) {
                shared.metrics.filtered.inc();
                debug!("Relay: '{}' outside relay patterns", message.topic);
                return;
            }

            match shared.queue.try_send(message) {
                Ok(()) => shared.update_depth(),
                Err(TrySendError::Full(_)) => shared.dropped(1, "relay queue full"),
                Err(TrySendError::Closed(_)) => shared.dropped(1, "relay stopped"),
            }
        })
    }

    /// Finish the publish in progress, drop whatever is still queued; idempotent
    pub async fn stop(&self) {
        self.shutdown.trigger();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Relay task failed: {}", e);
            }
        }
    }
}

struct RelayTask {
    shared: Arc<Shared>,
    destination: Arc<DestinationEndpoint>,
    qos: RelayQos,
    unacked: LogThrottle,
}

impl RelayTask {
    async fn run(self, mut rx: mpsc::Receiver<Message>, mut shutdown: Shutdown) {
        loop {
            let message = tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                message = rx.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };
            self.shared.update_depth();
            self.forward(message).await;
        }

        rx.close();
        let mut remaining = 0;
        while rx.try_recv().is_ok() {
            remaining += 1;
        }
        if remaining > 0 {
            self.shared.dropped(remaining, "relay shutting down");
        }
        self.shared.update_depth();
        debug!("Relay: Stopped");
    }

    async fn forward(&self, message: Message) {
        let metrics = &self.shared.metrics;
        let qos = self.qos.resolve(message.qos);
        let topic = message.topic.clone();

        match self.destination.publish(message.with_qos(qos)).await {
            Ok(PublishOutcome::Delivered) => {
                metrics.forwarded.inc();
            }
            Ok(PublishOutcome::Unacknowledged) => {
                metrics.forwarded.inc();
                metrics.unacknowledged.inc();
                if let Some(suppressed) = self.unacked.hit() {
                    warn!(
                        "Relay: No acknowledgement for '{}' ({} more since last warning)",
                        topic, suppressed
                    );
                }
            }
            Ok(PublishOutcome::Skipped) => {
                self.shared.dropped(1, "destination not connected");
            }
            Err(e) => {
                metrics.failed.inc();
                error!("Relay: Failed to publish '{}': {}", topic, e);
            }
        }
    }
}

#[cfg(test)]
mod tests;
