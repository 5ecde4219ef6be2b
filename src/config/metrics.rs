//! Metrics configuration

use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;

/// Metrics configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Throughput report period
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// HTTP bind address for the Prometheus endpoint (disabled when unset)
    pub bind: Option<SocketAddr>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            bind: None,
        }
    }
}
