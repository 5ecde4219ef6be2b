//! Configuration Module
//!
//! TOML-based configuration for the replicator:
//! - Source and destination broker connections
//! - Relay scope (topic patterns), QoS and hand-off queue
//! - Metrics reporting and the optional Prometheus endpoint
//! - First-message probe and synthetic load generator
//! - Environment variable overrides (REPLICATOR__* prefix)

use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

use crate::protocol::QoS;
use crate::topic::{PatternError, TopicFilter, TopicPattern};

pub use endpoint::{parse_address, BrokerEndpointConfig, EndpointRole};
pub use metrics::MetricsConfig;

mod endpoint;
mod metrics;

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> String {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").expect("valid substitution pattern")
    });
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .to_string()
}

#[cfg(test)]
mod tests;

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Config crate error
    Config(config::ConfigError),
    /// Invalid topic pattern
    Pattern(PatternError),
    /// Validation error
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Pattern(e) => write!(f, "Invalid topic pattern: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

impl From<PatternError> for ConfigError {
    fn from(e: PatternError) -> Self {
        ConfigError::Pattern(e)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// Broker the bridge subscribes to
    pub source: BrokerEndpointConfig,
    /// Broker the bridge republishes to
    pub destination: BrokerEndpointConfig,
    /// Relay scope and delivery settings
    pub relay: RelayConfig,
    /// Throughput reporting and Prometheus endpoint
    pub metrics: MetricsConfig,
    /// First-message probe
    pub probe: ProbeConfig,
    /// Synthetic load generator
    pub loadgen: LoadGenConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// QoS used when republishing on the destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawRelayQos")]
pub enum RelayQos {
    /// Always publish at this level
    Fixed(QoS),
    /// Publish at the level the message was received with
    Preserve,
}

impl RelayQos {
    /// QoS for a message received at `received`
    pub fn resolve(self, received: QoS) -> QoS {
        match self {
            RelayQos::Fixed(qos) => qos,
            RelayQos::Preserve => received,
        }
    }
}

impl Default for RelayQos {
    fn default() -> Self {
        RelayQos::Fixed(QoS::AtMostOnce)
    }
}

impl std::fmt::Display for RelayQos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayQos::Fixed(qos) => write!(f, "{}", qos),
            RelayQos::Preserve => f.write_str("preserve"),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawRelayQos {
    Level(u8),
    Mode(String),
}

impl TryFrom<RawRelayQos> for RelayQos {
    type Error = String;

    fn try_from(raw: RawRelayQos) -> Result<Self, Self::Error> {
        let level = match raw {
            RawRelayQos::Level(level) => level,
            RawRelayQos::Mode(mode) if mode.eq_ignore_ascii_case("preserve") => {
                return Ok(RelayQos::Preserve)
            }
            RawRelayQos::Mode(mode) => mode
                .trim()
                .parse::<u8>()
                .map_err(|_| format!("relay qos must be 0, 1, 2 or \"preserve\", got '{}'", mode))?,
        };
        QoS::from_u8(level)
            .map(RelayQos::Fixed)
            .ok_or_else(|| format!("relay qos must be 0, 1, 2 or \"preserve\", got {}", level))
    }
}

/// Relay pipeline configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Topic patterns subscribed on the source and used to filter deliveries
    pub patterns: Vec<String>,
    /// QoS requested when subscribing on the source
    pub subscribe_qos: u8,
    /// QoS used when publishing on the destination
    pub qos: RelayQos,
    /// How long to wait for a destination acknowledgement (0 disables waiting)
    #[serde(with = "humantime_serde")]
    pub ack_timeout: Duration,
    /// Maximum number of messages waiting between source and destination
    pub queue_capacity: usize,
    /// Minimum spacing between "messages dropped" warnings
    #[serde(with = "humantime_serde")]
    pub drop_log_interval: Duration,
}

fn default_patterns() -> Vec<String> {
    vec!["#".to_string()]
}

fn default_ack_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_drop_log_interval() -> Duration {
    Duration::from_secs(10)
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            patterns: default_patterns(),
            subscribe_qos: 0,
            qos: RelayQos::default(),
            ack_timeout: default_ack_timeout(),
            queue_capacity: default_queue_capacity(),
            drop_log_interval: default_drop_log_interval(),
        }
    }
}

impl RelayConfig {
    /// Compile the configured patterns
    pub fn filter(&self) -> Result<TopicFilter, PatternError> {
        TopicFilter::parse(&self.patterns)
    }

    pub fn subscribe_qos(&self) -> QoS {
        QoS::from_u8(self.subscribe_qos).unwrap_or_default()
    }
}

/// A pattern watched by the first-message probe
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeTarget {
    /// Topic pattern to subscribe to
    pub pattern: String,
    /// Name used in the report (defaults to the pattern)
    #[serde(default)]
    pub label: Option<String>,
}

impl ProbeTarget {
    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.pattern)
    }
}

/// First-message probe configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Patterns to time; empty means the relay patterns
    pub patterns: Vec<ProbeTarget>,
    /// Give up on patterns that have not seen a message after this long
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            patterns: Vec::new(),
            timeout: Duration::from_secs(120),
        }
    }
}

/// Upper bound for `loadgen.rate`; keeps the publish period above zero
pub const MAX_LOADGEN_RATE: u32 = 1_000_000;

/// Synthetic load generator configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoadGenConfig {
    /// Topic prefix (empty for a top-level tree)
    pub prefix: String,
    /// Number of topic levels below the prefix
    pub depth: usize,
    /// Children per topic level
    pub fanout: usize,
    /// Messages per second
    pub rate: u32,
    /// Stop after this many messages (0 = the whole tree)
    pub max_messages: u64,
    /// QoS of generated messages
    pub qos: u8,
    /// Retain flag of generated messages
    pub retain: bool,
}

impl Default for LoadGenConfig {
    fn default() -> Self {
        Self {
            prefix: "replicator/test".to_string(),
            depth: 3,
            fanout: 10,
            rate: 100,
            max_messages: 0,
            qos: 0,
            retain: true,
        }
    }
}

impl LoadGenConfig {
    pub fn qos(&self) -> QoS {
        QoS::from_u8(self.qos).unwrap_or_default()
    }
}

impl Config {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// Supports two forms of environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}` syntax in the TOML file
    /// 2. Override via env vars: `REPLICATOR__` prefix with double underscores for nesting:
    ///    - `REPLICATOR__SOURCE__HOST=scada` overrides `source.host`
    ///    - `REPLICATOR__RELAY__PATTERNS=a/#,b/+` overrides `relay.patterns`
    ///    - `REPLICATOR__RELAY__QOS=preserve` overrides `relay.qos`
    ///
    /// A missing file is not an error; defaults and the environment apply.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("log.level", "info")?
            .set_default("source.host", "localhost")?
            .set_default("source.port", 1883)?
            .set_default("destination.host", "localhost")?
            .set_default("destination.port", 1883)?
            .set_default("relay.subscribe_qos", 0)?
            .set_default("relay.ack_timeout", "5s")?
            .set_default("relay.queue_capacity", 1000)?
            .set_default("metrics.interval", "10s")?;

        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let substituted = substitute_env_vars(&content);
                builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(ConfigError::Io(e)),
        }

        // Double underscore separates nested keys, single underscore preserved in field names
        let cfg = builder
            .add_source(
                Environment::with_prefix("REPLICATOR")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("relay.patterns"),
            )
            .build()?;

        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config.with_default_client_ids())
    }

    /// Load configuration with environment variable overrides only (no file).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Path::new(""))
    }

    /// Parse configuration from a string (for testing, no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config.with_default_client_ids())
    }

    fn with_default_client_ids(mut self) -> Self {
        self.source = self.source.with_default_client_id(EndpointRole::Source);
        self.destination = self
            .destination
            .with_default_client_id(EndpointRole::Destination);
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_endpoint(EndpointRole::Source, &self.source)?;
        validate_endpoint(EndpointRole::Destination, &self.destination)?;

        if self.relay.patterns.is_empty() {
            return Err(ConfigError::Validation(
                "relay.patterns must contain at least one pattern".to_string(),
            ));
        }
        self.relay.filter()?;

        if QoS::from_u8(self.relay.subscribe_qos).is_none() {
            return Err(ConfigError::Validation(
                "relay.subscribe_qos must be 0, 1, or 2".to_string(),
            ));
        }
        if self.relay.queue_capacity == 0 {
            return Err(ConfigError::Validation(
                "relay.queue_capacity must be greater than 0".to_string(),
            ));
        }

        if self.metrics.interval.is_zero() {
            return Err(ConfigError::Validation(
                "metrics.interval must be greater than 0".to_string(),
            ));
        }

        for target in &self.probe.patterns {
            TopicPattern::parse(&target.pattern)?;
        }

        let loadgen = &self.loadgen;
        if loadgen.rate == 0 || loadgen.rate > MAX_LOADGEN_RATE {
            return Err(ConfigError::Validation(format!(
                "loadgen.rate must be between 1 and {} messages per second",
                MAX_LOADGEN_RATE
            )));
        }
        if loadgen.depth == 0 || loadgen.fanout == 0 {
            return Err(ConfigError::Validation(
                "loadgen.depth and loadgen.fanout must be greater than 0".to_string(),
            ));
        }
        if QoS::from_u8(loadgen.qos).is_none() {
            return Err(ConfigError::Validation(
                "loadgen.qos must be 0, 1, or 2".to_string(),
            ));
        }
        if loadgen.prefix.contains(['+', '#']) {
            return Err(ConfigError::Validation(
                "loadgen.prefix must not contain wildcards".to_string(),
            ));
        }

        Ok(())
    }
}

fn validate_endpoint(role: EndpointRole, endpoint: &BrokerEndpointConfig) -> Result<(), ConfigError> {
    if endpoint.host.is_empty() {
        return Err(ConfigError::Validation(format!("{}.host must not be empty", role)));
    }
    if endpoint.port == 0 {
        return Err(ConfigError::Validation(format!("{}.port must not be 0", role)));
    }
    if endpoint.keepalive < 5 {
        return Err(ConfigError::Validation(format!(
            "{}.keepalive must be at least 5 seconds",
            role
        )));
    }
    if endpoint.reconnect_interval.is_zero() {
        return Err(ConfigError::Validation(format!(
            "{}.reconnect_interval must be greater than 0",
            role
        )));
    }
    if endpoint.max_reconnect_interval < endpoint.reconnect_interval {
        return Err(ConfigError::Validation(format!(
            "{}.max_reconnect_interval must not be less than reconnect_interval",
            role
        )));
    }
    if endpoint.request_capacity == 0 {
        return Err(ConfigError::Validation(format!(
            "{}.request_capacity must be greater than 0",
            role
        )));
    }
    Ok(())
}
