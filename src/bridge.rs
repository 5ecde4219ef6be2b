//! Bridge
//!
//! Wires the pieces together for one replication run: metrics, the
//! destination endpoint, the relay pipeline, the source endpoint feeding
//! the relay, the periodic throughput report and the optional HTTP metrics
//! endpoint. [`Bridge::shutdown`] tears them down in an order that never
//! hands a message to a stopped component.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::client::{ClientError, Connector};
use crate::config::Config;
use crate::endpoint::{DestinationEndpoint, EndpointState, SourceEndpoint};
use crate::metrics::{Metrics, MetricsServer, ThroughputReport, ThroughputReporter};
use crate::relay::{RelayPipeline, RelaySettings};
use crate::shutdown::ShutdownHandle;
use crate::topic::PatternError;

/// Error starting a bridge
#[derive(Debug)]
pub enum BridgeError {
    Pattern(PatternError),
    Client(ClientError),
    MetricsBind(std::io::Error),
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::Pattern(e) => write!(f, "Invalid relay pattern: {}", e),
            BridgeError::Client(e) => write!(f, "Broker client error: {}", e),
            BridgeError::MetricsBind(e) => write!(f, "Failed to bind metrics endpoint: {}", e),
        }
    }
}

impl std::error::Error for BridgeError {}

impl From<PatternError> for BridgeError {
    fn from(e: PatternError) -> Self {
        BridgeError::Pattern(e)
    }
}

impl From<ClientError> for BridgeError {
    fn from(e: ClientError) -> Self {
        BridgeError::Client(e)
    }
}

/// A running source → destination replication
pub struct Bridge {
    metrics: Arc<Metrics>,
    source: SourceEndpoint,
    relay: RelayPipeline,
    destination: Arc<DestinationEndpoint>,
    shutdown: ShutdownHandle,
    reporter: JoinHandle<ThroughputReport>,
    server: Option<(SocketAddr, JoinHandle<()>)>,
}

impl Bridge {
    /// Start every component; endpoints keep connecting in the background
    pub async fn start(config: &Config, connector: &dyn Connector) -> Result<Self, BridgeError> {
        let metrics = Arc::new(Metrics::new());
        let settings = RelaySettings::from_config(&config.relay)?;

        // Bind first so a taken port fails before any broker is contacted
        let server = match config.metrics.bind {
            Some(addr) => Some(
                MetricsServer::bind(metrics.clone(), addr)
                    .await
                    .map_err(BridgeError::MetricsBind)?,
            ),
            None => None,
        };

        let destination = {
            let connected = metrics.clone();
            let disconnected = metrics.clone();
            Arc::new(
                DestinationEndpoint::builder(config.destination.clone())
                    .ack_timeout(config.relay.ack_timeout)
                    .on_connect(Arc::new(move || connected.destination_connected.set(1)))
                    .on_disconnect(Arc::new(move |_reason: &str| {
                        disconnected.destination_connected.set(0)
                    }))
                    .start(connector)?,
            )
        };

        let relay = RelayPipeline::start(settings.clone(), destination.clone(), metrics.clone());

        let source = {
            let connected = metrics.clone();
            let disconnected = metrics.clone();
            SourceEndpoint::builder(config.source.clone(), settings.filter)
                .subscribe_qos(config.relay.subscribe_qos())
                .on_message(relay.inlet())
                .on_connect(Arc::new(move || connected.source_connected.set(1)))
                .on_disconnect(Arc::new(move |_reason: &str| {
                    disconnected.source_connected.set(0)
                }))
                .start(connector)
        };
        let source = match source {
            Ok(source) => source,
            Err(e) => {
                relay.stop().await;
                destination.stop().await;
                return Err(e.into());
            }
        };

        let (shutdown, shutdown_rx) = crate::shutdown::channel();
        let reporter = tokio::spawn(
            ThroughputReporter::new(metrics.clone()).run(config.metrics.interval, shutdown_rx.clone()),
        );
        let server = match server {
            Some(server) => {
                let addr = server.local_addr().map_err(BridgeError::MetricsBind)?;
                Some((addr, tokio::spawn(server.run(shutdown_rx))))
            }
            None => None,
        };

        info!(
            "Bridge: Replicating {} -> {}",
            config.source.address(),
            config.destination.address()
        );
        info!("  Patterns: {}", config.relay.patterns.join(", "));
        info!(
            "  QoS: subscribe {}, publish {}",
            config.relay.subscribe_qos, config.relay.qos
        );
        match &server {
            Some((addr, _)) => info!("  Metrics: enabled (http://{}/metrics)", addr),
            None => info!("  Metrics: disabled"),
        }

        Ok(Self {
            metrics,
            source,
            relay,
            destination,
            shutdown,
            reporter,
            server,
        })
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn source_state(&self) -> EndpointState {
        self.source.state()
    }

    pub fn destination_state(&self) -> EndpointState {
        self.destination.state()
    }

    /// Address the metrics endpoint is listening on, if enabled
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().map(|(addr, _)| *addr)
    }

    /// Stop everything and return the final throughput report
    ///
    /// The source stops first so nothing new enters the relay; the relay
    /// finishes its current publish before the destination disconnects.
    pub async fn shutdown(self) -> ThroughputReport {
        info!("Bridge: Shutting down");
        self.source.stop().await;
        self.relay.stop().await;
        self.destination.stop().await;

        self.shutdown.trigger();
        if let Some((_, server)) = self.server {
            if let Err(e) = server.await {
                error!("Metrics server task failed: {}", e);
            }
        }
        match self.reporter.await {
            Ok(report) => report,
            Err(e) => {
                error!("Throughput reporter task failed: {}", e);
                let mut reporter = ThroughputReporter::new(self.metrics.clone());
                reporter.report_at(tokio::time::Instant::now())
            }
        }
    }
}
