//! Config module tests

use super::*;
use pretty_assertions::assert_eq;

#[test]
fn test_substitute_env_vars_simple() {
    std::env::set_var("REPL_TEST_VAR_SIMPLE", "hello");
    let result = substitute_env_vars("value = \"${REPL_TEST_VAR_SIMPLE}\"");
    assert_eq!(result, "value = \"hello\"");
    std::env::remove_var("REPL_TEST_VAR_SIMPLE");
}

#[test]
fn test_substitute_env_vars_with_default() {
    std::env::remove_var("REPL_TEST_VAR_UNSET");
    let result = substitute_env_vars("value = \"${REPL_TEST_VAR_UNSET:-default_value}\"");
    assert_eq!(result, "value = \"default_value\"");

    std::env::set_var("REPL_TEST_VAR_SET", "env_value");
    let result = substitute_env_vars("value = \"${REPL_TEST_VAR_SET:-default_value}\"");
    assert_eq!(result, "value = \"env_value\"");
    std::env::remove_var("REPL_TEST_VAR_SET");
}

#[test]
fn test_substitute_env_vars_missing_no_default() {
    std::env::remove_var("REPL_TEST_VAR_MISSING");
    let result = substitute_env_vars("value = \"${REPL_TEST_VAR_MISSING}\"");
    assert_eq!(result, "value = \"\"");
}

#[test]
fn test_default_config() {
    let config = Config::default();
    assert_eq!(config.log.level, "info");
    assert_eq!(config.source.host, "localhost");
    assert_eq!(config.source.port, 1883);
    assert_eq!(config.relay.patterns, vec!["#".to_string()]);
    assert_eq!(config.relay.qos, RelayQos::Fixed(QoS::AtMostOnce));
    assert_eq!(config.relay.ack_timeout, Duration::from_secs(5));
    assert_eq!(config.relay.queue_capacity, 1000);
    assert_eq!(config.metrics.interval, Duration::from_secs(10));
    assert!(config.metrics.bind.is_none());
    assert!(config.validate().is_ok());
}

#[test]
fn test_parse_minimal_config() {
    let config = Config::parse("").unwrap();
    assert!(config.source.client_id.starts_with("replicator-source-"));
    assert!(config
        .destination
        .client_id
        .starts_with("replicator-destination-"));
    assert_eq!(config.relay.filter().unwrap().len(), 1);
}

#[test]
fn test_parse_full_config() {
    let config = Config::parse(
        r#"
[log]
level = "debug"

[source]
host = "scada"
port = 1883
client_id = "bridge-in"
username = "reader"
password = "secret"
protocol = "v5"
keepalive = 30
clean_session = false
reconnect_interval = "500ms"
max_reconnect_interval = "30s"

[destination]
host = "cloud.example.com"
port = 8883
protocol = "v311"

[relay]
patterns = ["plant/+/temperature", "plant/alarms/#"]
subscribe_qos = 1
qos = "preserve"
ack_timeout = "2s"
queue_capacity = 64
drop_log_interval = "1m"

[metrics]
interval = "5s"
bind = "127.0.0.1:9100"

[[probe.patterns]]
pattern = "plant/#"
label = "plant"

[[probe.patterns]]
pattern = "$SYS/#"

[loadgen]
prefix = "load"
depth = 2
fanout = 4
rate = 50
qos = 1
retain = false
"#,
    )
    .unwrap();

    assert_eq!(config.log.level, "debug");

    assert_eq!(config.source.host, "scada");
    assert_eq!(config.source.client_id, "bridge-in");
    assert_eq!(config.source.credentials(), Some(("reader", "secret")));
    assert_eq!(config.source.protocol, crate::protocol::ProtocolVersion::V5);
    assert_eq!(config.source.keepalive, 30);
    assert!(!config.source.clean_session);
    assert_eq!(config.source.reconnect_interval, Duration::from_millis(500));
    assert_eq!(config.source.max_reconnect_interval, Duration::from_secs(30));

    assert_eq!(config.destination.address(), "cloud.example.com:8883");
    assert!(config
        .destination
        .client_id
        .starts_with("replicator-destination-"));

    assert_eq!(config.relay.filter().unwrap().len(), 2);
    assert_eq!(config.relay.subscribe_qos(), QoS::AtLeastOnce);
    assert_eq!(config.relay.qos, RelayQos::Preserve);
    assert_eq!(config.relay.ack_timeout, Duration::from_secs(2));
    assert_eq!(config.relay.queue_capacity, 64);
    assert_eq!(config.relay.drop_log_interval, Duration::from_secs(60));

    assert_eq!(config.metrics.interval, Duration::from_secs(5));
    assert_eq!(
        config.metrics.bind,
        Some("127.0.0.1:9100".parse().unwrap())
    );

    assert_eq!(config.probe.patterns.len(), 2);
    assert_eq!(config.probe.patterns[0].label(), "plant");
    assert_eq!(config.probe.patterns[1].label(), "$SYS/#");

    assert_eq!(config.loadgen.prefix, "load");
    assert_eq!(config.loadgen.qos(), QoS::AtLeastOnce);
    assert!(!config.loadgen.retain);
}

#[test]
fn test_relay_qos_values() {
    let config = Config::parse("[relay]\nqos = 2").unwrap();
    assert_eq!(config.relay.qos, RelayQos::Fixed(QoS::ExactlyOnce));
    assert_eq!(config.relay.qos.resolve(QoS::AtMostOnce), QoS::ExactlyOnce);

    let config = Config::parse("[relay]\nqos = \"PRESERVE\"").unwrap();
    assert_eq!(config.relay.qos.resolve(QoS::AtLeastOnce), QoS::AtLeastOnce);

    assert!(Config::parse("[relay]\nqos = 3").is_err());
    assert!(Config::parse("[relay]\nqos = \"fastest\"").is_err());
}

#[test]
fn test_invalid_pattern_rejected() {
    let result = Config::parse("[relay]\npatterns = [\"a/#/b\"]");
    assert!(matches!(result, Err(ConfigError::Pattern(_))));

    let result = Config::parse("[relay]\npatterns = [\"a/b+\"]");
    assert!(matches!(result, Err(ConfigError::Pattern(_))));

    let result = Config::parse("[[probe.patterns]]\npattern = \"x/#/y\"");
    assert!(matches!(result, Err(ConfigError::Pattern(_))));
}

#[test]
fn test_empty_patterns_rejected() {
    let result = Config::parse("[relay]\npatterns = []");
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_invalid_endpoint_settings() {
    let result = Config::parse("[source]\nhost = \"\"");
    assert!(matches!(result, Err(ConfigError::Validation(_))));

    let result = Config::parse("[destination]\nkeepalive = 2");
    assert!(matches!(result, Err(ConfigError::Validation(_))));

    let result = Config::parse("[source]\nreconnect_interval = \"0s\"");
    assert!(matches!(result, Err(ConfigError::Validation(_))));

    let result = Config::parse(
        "[source]\nreconnect_interval = \"10s\"\nmax_reconnect_interval = \"1s\"",
    );
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_invalid_relay_and_metrics_settings() {
    let result = Config::parse("[relay]\nsubscribe_qos = 3");
    assert!(matches!(result, Err(ConfigError::Validation(_))));

    let result = Config::parse("[relay]\nqueue_capacity = 0");
    assert!(matches!(result, Err(ConfigError::Validation(_))));

    let result = Config::parse("[metrics]\ninterval = \"0s\"");
    assert!(matches!(result, Err(ConfigError::Validation(_))));

    let result = Config::parse("[loadgen]\nrate = 0");
    assert!(matches!(result, Err(ConfigError::Validation(_))));

    let result = Config::parse("[loadgen]\nprefix = \"load/#\"");
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_loadgen_rate_upper_bound() {
    let result = Config::parse("[loadgen]\nrate = 2000000000");
    assert!(matches!(result, Err(ConfigError::Validation(_))));

    let config = Config::parse(&format!("[loadgen]\nrate = {}", MAX_LOADGEN_RATE)).unwrap();
    assert_eq!(config.loadgen.rate, MAX_LOADGEN_RATE);
}

#[test]
fn test_load_config_with_env_substitution() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("replicator.toml");

    std::env::set_var("REPL_TEST_SOURCE_HOST", "scada.local");
    std::env::remove_var("REPL_TEST_SOURCE_PORT");

    std::fs::write(
        &config_path,
        r#"
[source]
host = "${REPL_TEST_SOURCE_HOST}"
port = ${REPL_TEST_SOURCE_PORT:-1884}

[metrics]
interval = "3s"
"#,
    )
    .unwrap();

    let config = Config::load(&config_path).unwrap();
    assert_eq!(config.source.host, "scada.local");
    assert_eq!(config.source.port, 1884);
    assert_eq!(config.metrics.interval, Duration::from_secs(3));

    std::env::remove_var("REPL_TEST_SOURCE_HOST");
}

#[test]
fn test_load_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load(dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.destination.port, 1883);
    assert!(config.destination.client_id.starts_with("replicator-destination-"));
}

#[test]
fn test_load_env_overrides() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("replicator.toml");
    std::fs::write(&config_path, "[destination]\nhost = \"from-file\"\n").unwrap();

    std::env::set_var("REPLICATOR__DESTINATION__HOST", "from-env");
    std::env::set_var("REPLICATOR__RELAY__PATTERNS", "plant/+/temp,alarms/#");
    std::env::set_var("REPLICATOR__RELAY__QOS", "preserve");

    let result = Config::load(&config_path);

    std::env::remove_var("REPLICATOR__DESTINATION__HOST");
    std::env::remove_var("REPLICATOR__RELAY__PATTERNS");
    std::env::remove_var("REPLICATOR__RELAY__QOS");

    let config = result.unwrap();
    assert_eq!(config.destination.host, "from-env");
    assert_eq!(
        config.relay.patterns,
        vec!["plant/+/temp".to_string(), "alarms/#".to_string()]
    );
    assert_eq!(config.relay.qos, RelayQos::Preserve);
}
