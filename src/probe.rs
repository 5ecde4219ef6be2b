//! First-message latency probe
//!
//! Measures, per subscribed pattern, how long it takes after subscribing
//! until the first matching message arrives. Useful to see how fast a
//! broker delivers retained messages for deep wildcard subscriptions.
//! Timings restart on every (re)connect.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::client::{ClientError, Connector};
use crate::config::{BrokerEndpointConfig, ProbeConfig};
use crate::endpoint::SourceEndpoint;
use crate::protocol::QoS;
use crate::shutdown::Shutdown;
use crate::topic::{PatternError, TopicFilter, TopicPattern};

/// Outcome for one probed pattern
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub label: String,
    pub pattern: String,
    /// First matching topic seen
    pub topic: Option<String>,
    /// Time from arming to the first matching message
    pub latency: Option<Duration>,
}

impl fmt::Display for ProbeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.latency, &self.topic) {
            (Some(latency), Some(topic)) => write!(
                f,
                "{} ({}): first message after {:.4}s on '{}'",
                self.label,
                self.pattern,
                latency.as_secs_f64(),
                topic
            ),
            _ => write!(f, "{} ({}): no message received", self.label, self.pattern),
        }
    }
}

struct Target {
    pattern: TopicPattern,
    label: String,
}

#[derive(Default, Clone)]
struct Recording {
    topic: Option<String>,
    latency: Option<Duration>,
}

struct ProbeState {
    armed_at: Option<Instant>,
    recordings: Vec<Recording>,
}

pub struct FirstMessageProbe {
    targets: Vec<Target>,
    state: Mutex<ProbeState>,
    complete: Notify,
}

impl FirstMessageProbe {
    pub fn new(targets: impl IntoIterator<Item = (TopicPattern, String)>) -> Self {
        let targets: Vec<Target> = targets
            .into_iter()
            .map(|(pattern, label)| Target { pattern, label })
            .collect();
        let recordings = vec![Recording::default(); targets.len()];
        Self {
            targets,
            state: Mutex::new(ProbeState {
                armed_at: None,
                recordings,
            }),
            complete: Notify::new(),
        }
    }

    /// Targets from `[probe]`, falling back to the relay patterns
    pub fn from_config(config: &ProbeConfig, fallback: &[String]) -> Result<Self, PatternError> {
        let targets = if config.patterns.is_empty() {
            fallback
                .iter()
                .map(|p| Ok((TopicPattern::parse(p)?, p.clone())))
                .collect::<Result<Vec<_>, PatternError>>()?
        } else {
            config
                .patterns
                .iter()
                .map(|t| Ok((TopicPattern::parse(&t.pattern)?, t.label().to_string())))
                .collect::<Result<Vec<_>, PatternError>>()?
        };
        Ok(Self::new(targets))
    }

    /// Patterns to subscribe to
    pub fn filter(&self) -> TopicFilter {
        TopicFilter::new(self.targets.iter().map(|t| t.pattern.clone()))
    }

    /// Start (or restart) timing every pattern
    pub fn arm(&self) {
        self.arm_at(Instant::now());
    }

    fn arm_at(&self, now: Instant) {
        let mut state = self.state.lock();
        state.armed_at = Some(now);
        state.recordings.iter_mut().for_each(|r| *r = Recording::default());
    }

    /// Attribute a message to every armed pattern it matches; returns how many were newly recorded
    pub fn record(&self, topic: &str) -> usize {
        self.record_at(topic, Instant::now())
    }

    fn record_at(&self, topic: &str, now: Instant) -> usize {
        let mut state = self.state.lock();
        let Some(armed_at) = state.armed_at else {
            return 0;
        };

        let mut recorded = 0;
        for (target, recording) in self.targets.iter().zip(state.recordings.iter_mut()) {
            if recording.latency.is_none() && target.pattern.matches(topic) {
                let latency = now.saturating_duration_since(armed_at);
                info!(
                    "Probe: {} ({}) first message after {:.4}s on '{}'",
                    target.label,
                    target.pattern,
                    latency.as_secs_f64(),
                    topic
                );
                recording.latency = Some(latency);
                recording.topic = Some(topic.to_string());
                recorded += 1;
            }
        }

        if recorded > 0 && state.recordings.iter().all(|r| r.latency.is_some()) {
            self.complete.notify_waiters();
        }
        recorded
    }

    pub fn is_complete(&self) -> bool {
        let state = self.state.lock();
        !self.targets.is_empty() && state.recordings.iter().all(|r| r.latency.is_some())
    }

    /// Wait until every pattern has a recording; false on timeout
    pub async fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.complete.notified();
            if self.is_complete() {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.is_complete();
            }
        }
    }

    pub fn results(&self) -> Vec<ProbeResult> {
        let state = self.state.lock();
        self.targets
            .iter()
            .zip(state.recordings.iter())
            .map(|(target, recording)| ProbeResult {
                label: target.label.clone(),
                pattern: target.pattern.to_string(),
                topic: recording.topic.clone(),
                latency: recording.latency,
            })
            .collect()
    }
}

/// Connect to `config`, subscribe to the probe patterns and wait for results
pub async fn run_probe(
    config: BrokerEndpointConfig,
    probe: Arc<FirstMessageProbe>,
    connector: &dyn Connector,
    timeout: Duration,
    mut shutdown: Shutdown,
) -> Result<Vec<ProbeResult>, ClientError> {
    let source = {
        let on_connect = probe.clone();
        let on_message = probe.clone();
        SourceEndpoint::builder(config, probe.filter())
            .subscribe_qos(QoS::AtMostOnce)
            .on_connect(Arc::new(move || on_connect.arm()))
            .on_message(Arc::new(move |message| {
                on_message.record(&message.topic);
            }))
            .start(connector)?
    };

    let complete = tokio::select! {
        complete = probe.wait(timeout) => complete,
        _ = shutdown.wait() => false,
    };
    source.stop().await;

    let results = probe.results();
    if complete {
        info!("Probe: All {} pattern(s) received their first message", results.len());
    } else {
        for result in results.iter().filter(|r| r.latency.is_none()) {
            warn!("Probe: {}", result);
        }
    }
    Ok(results)
}
