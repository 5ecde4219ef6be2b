//! Periodic throughput report
//!
//! Keeps the start time and the (time, forwarded count) pair from the
//! previous tick, so every report carries both the rate since start and the
//! rate over the last interval.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tracing::info;

use crate::shutdown::Shutdown;

use super::Metrics;

/// One throughput report
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThroughputReport {
    /// Messages forwarded since start
    pub forwarded: u64,
    /// Messages dropped since start
    pub dropped: u64,
    /// Time since start
    pub elapsed: Duration,
    /// `forwarded / elapsed`
    pub overall_rate: f64,
    /// Forwarded during the last interval divided by its length
    pub interval_rate: f64,
}

impl fmt::Display for ThroughputReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Forwarded {} messages in {:.1}s ({:.1} msg/s overall, {:.1} msg/s last interval), {} dropped",
            self.forwarded,
            self.elapsed.as_secs_f64(),
            self.overall_rate,
            self.interval_rate,
            self.dropped
        )
    }
}

fn rate(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}

pub struct ThroughputReporter {
    metrics: Arc<Metrics>,
    started: Instant,
    previous: (Instant, u64),
}

impl ThroughputReporter {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self::starting_at(metrics, Instant::now())
    }

    pub fn starting_at(metrics: Arc<Metrics>, started: Instant) -> Self {
        let forwarded = metrics.forwarded.get();
        Self {
            metrics,
            started,
            previous: (started, forwarded),
        }
    }

    /// Build the report for `now` and start the next interval there
    pub fn report_at(&mut self, now: Instant) -> ThroughputReport {
        let forwarded = self.metrics.forwarded.get();
        let (previous_at, previous_count) = self.previous;
        self.previous = (now, forwarded);

        ThroughputReport {
            forwarded,
            dropped: self.metrics.dropped.get(),
            elapsed: now.saturating_duration_since(self.started),
            overall_rate: rate(forwarded, now.saturating_duration_since(self.started)),
            interval_rate: rate(
                forwarded.saturating_sub(previous_count),
                now.saturating_duration_since(previous_at),
            ),
        }
    }

    /// Log a report every `interval` until shutdown, then a final one
    pub async fn run(mut self, interval: Duration, mut shutdown: Shutdown) -> ThroughputReport {
        let mut ticker = tokio::time::interval_at(self.started + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                _ = ticker.tick() => {
                    let report = self.report_at(Instant::now());
                    info!("{}", report);
                }
            }
        }

        let report = self.report_at(Instant::now());
        info!("Final: {}", report);
        report
    }
}
