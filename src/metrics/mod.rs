//! Relay metrics
//!
//! Counters are Prometheus integer counters: the relay increments them, the
//! throughput reporter and the optional HTTP endpoint only read them.

use prometheus::{IntCounter, IntGauge, Opts, Registry};

mod reporter;
mod server;

pub use reporter::{ThroughputReport, ThroughputReporter};
pub use server::MetricsServer;

/// Point-in-time copy of the relay counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub received: u64,
    pub forwarded: u64,
    pub dropped: u64,
    pub unacknowledged: u64,
    pub failed: u64,
    pub filtered: u64,
}

/// All relay metrics in one place
#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,

    // Relay path
    pub received: IntCounter,
    pub forwarded: IntCounter,
    pub dropped: IntCounter,
    pub unacknowledged: IntCounter,
    pub failed: IntCounter,
    pub filtered: IntCounter,

    // Endpoint and queue state
    pub source_connected: IntGauge,
    pub destination_connected: IntGauge,
    pub queue_depth: IntGauge,
}

fn counter(name: &str, help: &str) -> IntCounter {
    IntCounter::with_opts(Opts::new(name, help)).expect("valid counter definition")
}

fn gauge(name: &str, help: &str) -> IntGauge {
    IntGauge::with_opts(Opts::new(name, help)).expect("valid gauge definition")
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let received = counter(
            "replicator_messages_received_total",
            "Messages received from the source broker",
        );
        let forwarded = counter(
            "replicator_messages_forwarded_total",
            "Messages published to the destination broker",
        );
        let dropped = counter(
            "replicator_messages_dropped_total",
            "Messages dropped because the destination was unavailable or the queue was full",
        );
        let unacknowledged = counter(
            "replicator_messages_unacknowledged_total",
            "Forwarded messages whose acknowledgement did not arrive in time",
        );
        let failed = counter(
            "replicator_messages_failed_total",
            "Messages the destination client refused to publish",
        );
        let filtered = counter(
            "replicator_messages_filtered_total",
            "Received messages outside the configured patterns",
        );

        let source_connected = gauge(
            "replicator_source_connected",
            "1 while the source broker connection is established",
        );
        let destination_connected = gauge(
            "replicator_destination_connected",
            "1 while the destination broker connection is established",
        );
        let queue_depth = gauge(
            "replicator_queue_depth",
            "Messages waiting between source and destination",
        );

        let collectors: [Box<dyn prometheus::core::Collector>; 9] = [
            Box::new(received.clone()),
            Box::new(forwarded.clone()),
            Box::new(dropped.clone()),
            Box::new(unacknowledged.clone()),
            Box::new(failed.clone()),
            Box::new(filtered.clone()),
            Box::new(source_connected.clone()),
            Box::new(destination_connected.clone()),
            Box::new(queue_depth.clone()),
        ];
        for collector in collectors {
            registry
                .register(collector)
                .expect("metric names are unique");
        }

        Self {
            registry,
            received,
            forwarded,
            dropped,
            unacknowledged,
            failed,
            filtered,
            source_connected,
            destination_connected,
            queue_depth,
        }
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            received: self.received.get(),
            forwarded: self.forwarded.get(),
            dropped: self.dropped.get(),
            unacknowledged: self.unacknowledged.get(),
            failed: self.failed.get(),
            filtered: self.filtered.get(),
        }
    }

    /// Both endpoints are connected
    pub fn is_ready(&self) -> bool {
        self.source_connected.get() == 1 && self.destination_connected.get() == 1
    }

    /// Prometheus text exposition of all metrics
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        use prometheus::{Encoder, TextEncoder};

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reads_counters() {
        let metrics = Metrics::new();
        metrics.received.inc_by(5);
        metrics.forwarded.inc_by(3);
        metrics.dropped.inc();
        metrics.filtered.inc();

        assert_eq!(
            metrics.snapshot(),
            CounterSnapshot {
                received: 5,
                forwarded: 3,
                dropped: 1,
                unacknowledged: 0,
                failed: 0,
                filtered: 1,
            }
        );
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = Metrics::new();
        let clone = metrics.clone();
        clone.forwarded.inc();
        assert_eq!(metrics.forwarded.get(), 1);
    }

    #[test]
    fn test_ready_needs_both_endpoints() {
        let metrics = Metrics::new();
        assert!(!metrics.is_ready());
        metrics.source_connected.set(1);
        assert!(!metrics.is_ready());
        metrics.destination_connected.set(1);
        assert!(metrics.is_ready());
    }

    #[test]
    fn test_encode_text_format() {
        let metrics = Metrics::new();
        metrics.forwarded.inc_by(42);
        let text = metrics.encode().unwrap();
        assert!(text.contains("replicator_messages_forwarded_total 42"));
        assert!(text.contains("# TYPE replicator_queue_depth gauge"));
    }
}
