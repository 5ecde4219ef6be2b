//! Synthetic load generator
//!
//! Publishes a deterministic topic tree to a broker at a fixed rate. Every
//! node of the tree is a topic (`prefix/0`, `prefix/0/0`, ...), visited
//! depth-first with each node before its children, so a replicated broker
//! ends up holding one retained message per topic.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};

use crate::config::LoadGenConfig;
use crate::endpoint::{DestinationEndpoint, EndpointState, PublishOutcome};
use crate::message::Message;
use crate::protocol::QoS;
use crate::shutdown::Shutdown;

/// Lazy, finite iterator over the generated messages
pub struct SyntheticMessages {
    prefix: String,
    depth: usize,
    fanout: usize,
    qos: QoS,
    retain: bool,
    /// Path of the next node, `None` once the tree is exhausted
    next: Option<Vec<usize>>,
    remaining: Option<u64>,
    seq: u64,
}

impl SyntheticMessages {
    pub fn new(config: &LoadGenConfig) -> Self {
        let next = (config.depth > 0 && config.fanout > 0).then(|| vec![0]);
        Self {
            prefix: config.prefix.trim_end_matches('/').to_string(),
            depth: config.depth,
            fanout: config.fanout,
            qos: config.qos(),
            retain: config.retain,
            next,
            remaining: (config.max_messages > 0).then_some(config.max_messages),
            seq: 0,
        }
    }

    /// Number of nodes in the full tree
    pub fn tree_size(depth: usize, fanout: usize) -> u64 {
        let fanout = fanout as u64;
        let mut level = 1u64;
        let mut total = 0u64;
        for _ in 0..depth {
            level = level.saturating_mul(fanout);
            total = total.saturating_add(level);
        }
        total
    }

    fn topic(&self, path: &[usize]) -> String {
        let mut topic = self.prefix.clone();
        for index in path {
            if !topic.is_empty() {
                topic.push('/');
            }
            topic.push_str(&index.to_string());
        }
        topic
    }

    /// Pre-order successor: descend first, then the next sibling up the tree
    fn advance(&self, mut path: Vec<usize>) -> Option<Vec<usize>> {
        if path.len() < self.depth {
            path.push(0);
            return Some(path);
        }
        while let Some(last) = path.pop() {
            if last + 1 < self.fanout {
                path.push(last + 1);
                return Some(path);
            }
        }
        None
    }
}

impl Iterator for SyntheticMessages {
    type Item = Message;

    fn next(&mut self) -> Option<Message> {
        if self.remaining == Some(0) {
            return None;
        }
        let path = self.next.take()?;
        let topic = self.topic(&path);
        self.next = self.advance(path);
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= 1;
        }

        self.seq += 1;
        let payload = serde_json::json!({ "topic": topic, "seq": self.seq }).to_string();
        Some(Message::new(topic, Bytes::from(payload), self.qos, self.retain))
    }
}

/// Counts from one load generator run
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoadGenSummary {
    pub delivered: u64,
    pub unacknowledged: u64,
    pub skipped: u64,
    pub failed: u64,
    pub elapsed: Duration,
}

impl LoadGenSummary {
    pub fn published(&self) -> u64 {
        self.delivered + self.unacknowledged
    }
}

/// Time between two publishes at `rate` messages per second, never zero
fn publish_period(rate: u32) -> Duration {
    (Duration::from_secs(1) / rate.max(1)).max(Duration::from_nanos(1))
}

/// Publish the configured tree through `destination`
///
/// Waits for the first connection before sending anything. Returns early,
/// with whatever was sent so far, when `shutdown` fires.
pub async fn run_loadgen(
    config: &LoadGenConfig,
    destination: Arc<DestinationEndpoint>,
    mut shutdown: Shutdown,
) -> LoadGenSummary {
    let mut summary = LoadGenSummary::default();

    let mut states = destination.state_cell().subscribe();
    let connected = tokio::select! {
        _ = shutdown.wait() => false,
        state = states.wait_for(|s| *s == EndpointState::Connected) => state.is_ok(),
    };
    if !connected {
        return summary;
    }

    let messages = SyntheticMessages::new(config);
    let total = match config.max_messages {
        0 => SyntheticMessages::tree_size(config.depth, config.fanout),
        limit => limit.min(SyntheticMessages::tree_size(config.depth, config.fanout)),
    };
    info!(
        "Load generator: Publishing {} message(s) under '{}' at {} msg/s",
        total, config.prefix, config.rate
    );

    let started = Instant::now();
    let mut ticker = tokio::time::interval(publish_period(config.rate));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
    let mut last_log = started;

    for message in messages {
        tokio::select! {
            biased;
            _ = shutdown.wait() => break,
            _ = ticker.tick() => {}
        }

        let topic = message.topic.clone();
        match destination.publish(message).await {
            Ok(PublishOutcome::Delivered) => summary.delivered += 1,
            Ok(PublishOutcome::Unacknowledged) => summary.unacknowledged += 1,
            Ok(PublishOutcome::Skipped) => summary.skipped += 1,
            Err(e) => {
                summary.failed += 1;
                warn!("Load generator: Failed to publish '{}': {}", topic, e);
            }
        }

        let now = Instant::now();
        if now.duration_since(last_log) >= Duration::from_secs(1) {
            last_log = now;
            let elapsed = now.duration_since(started).as_secs_f64();
            info!(
                "Load generator: Published {} message(s) ({:.2} msg/s)",
                summary.published(),
                summary.published() as f64 / elapsed
            );
        }
    }

    summary.elapsed = started.elapsed();
    info!(
        "Load generator: Done, {} published, {} skipped, {} unacknowledged in {:.2}s",
        summary.published(),
        summary.skipped,
        summary.unacknowledged,
        summary.elapsed.as_secs_f64()
    );
    summary
}
