//! Relay pipeline tests

use super::*;
use crate::client::{MockBroker, MockConnector};
use crate::config::BrokerEndpointConfig;
use crate::protocol::QoS;
use bytes::Bytes;
use pretty_assertions::assert_eq;

const WAIT: Duration = Duration::from_secs(5);

fn settings(patterns: &[&str], qos: RelayQos, queue_capacity: usize) -> RelaySettings {
    RelaySettings {
        filter: TopicFilter::parse(patterns).unwrap(),
        qos,
        queue_capacity,
        drop_log_interval: Duration::from_secs(10),
    }
}

fn start_destination(broker: &MockBroker, ack_timeout: Duration) -> Arc<DestinationEndpoint> {
    let connector = MockConnector::new().with_broker("downstream", broker.clone());
    let config = BrokerEndpointConfig {
        reconnect_interval: Duration::from_millis(10),
        max_reconnect_interval: Duration::from_millis(50),
        ..BrokerEndpointConfig::new("downstream", 1883)
    };
    Arc::new(
        DestinationEndpoint::builder(config)
            .ack_timeout(ack_timeout)
            .start(&connector)
            .unwrap(),
    )
}

async fn connected_destination(broker: &MockBroker, ack_timeout: Duration) -> Arc<DestinationEndpoint> {
    let destination = start_destination(broker, ack_timeout);
    broker.accept_connection();
    assert!(destination.wait_connected(WAIT).await);
    destination
}

async fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    true
}

#[tokio::test]
async fn test_forwards_identical_messages_in_order() {
    let broker = MockBroker::new();
    let destination = connected_destination(&broker, WAIT).await;
    let metrics = Arc::new(Metrics::new());
    let relay = RelayPipeline::start(
        settings(&["#"], RelayQos::default(), 100),
        destination.clone(),
        metrics.clone(),
    );
    let inlet = relay.inlet();

    let sent = vec![
        Message::new("plant/1/temp", Bytes::from_static(b"21.5"), QoS::AtMostOnce, true),
        Message::new("plant/2/temp", Bytes::from_static(b"\x00\xff"), QoS::AtLeastOnce, false),
        Message::new("alarms", Bytes::new(), QoS::ExactlyOnce, true),
    ];
    for message in &sent {
        inlet(message.clone());
    }

    assert!(broker.wait_until(WAIT, |b| b.published().len() == 3).await);
    let published = broker.published();
    for (out, original) in published.iter().zip(&sent) {
        assert_eq!(out.topic, original.topic);
        assert_eq!(out.payload, original.payload);
        assert_eq!(out.retain, original.retain);
        assert_eq!(out.qos, QoS::AtMostOnce);
    }
    assert!(eventually(|| metrics.forwarded.get() == 3).await);
    assert_eq!(metrics.received.get(), 3);
    assert_eq!(metrics.dropped.get(), 0);

    relay.stop().await;
    destination.stop().await;
}

#[tokio::test]
async fn test_all_skipped_while_destination_disconnected() {
    let broker = MockBroker::new();
    let destination = start_destination(&broker, WAIT);
    let metrics = Arc::new(Metrics::new());
    let relay = RelayPipeline::start(
        settings(&["#"], RelayQos::default(), 100),
        destination.clone(),
        metrics.clone(),
    );
    let inlet = relay.inlet();

    for i in 0..25 {
        inlet(Message::new(format!("a/{}", i), "x", QoS::AtMostOnce, false));
    }

    assert!(eventually(|| metrics.dropped.get() == 25).await);
    assert_eq!(metrics.forwarded.get(), 0);
    assert!(broker.published().is_empty());

    relay.stop().await;
    destination.stop().await;
}

#[tokio::test]
async fn test_messages_outside_patterns_are_filtered() {
    let broker = MockBroker::new();
    let destination = connected_destination(&broker, WAIT).await;
    let metrics = Arc::new(Metrics::new());
    let relay = RelayPipeline::start(
        settings(&["a/#", "+/status"], RelayQos::default(), 100),
        destination.clone(),
        metrics.clone(),
    );
    let inlet = relay.inlet();

    inlet(Message::new("a/1", "x", QoS::AtMostOnce, false));
    inlet(Message::new("b/1", "x", QoS::AtMostOnce, false));
    inlet(Message::new("b/status", "x", QoS::AtMostOnce, false));
    // Matches both patterns, relayed once
    inlet(Message::new("a/status", "x", QoS::AtMostOnce, false));

    assert!(eventually(|| metrics.forwarded.get() == 3).await);
    assert_eq!(metrics.received.get(), 4);
    assert_eq!(metrics.filtered.get(), 1);
    let topics: Vec<String> = broker.published().into_iter().map(|m| m.topic).collect();
    assert_eq!(topics, vec!["a/1", "b/status", "a/status"]);

    relay.stop().await;
    destination.stop().await;
}

#[tokio::test]
async fn test_preserve_qos() {
    let broker = MockBroker::new();
    let destination = connected_destination(&broker, WAIT).await;
    let metrics = Arc::new(Metrics::new());
    let relay = RelayPipeline::start(
        settings(&["#"], RelayQos::Preserve, 100),
        destination.clone(),
        metrics.clone(),
    );
    let inlet = relay.inlet();

    inlet(Message::new("q/0", "x", QoS::AtMostOnce, false));
    inlet(Message::new("q/1", "x", QoS::AtLeastOnce, false));
    inlet(Message::new("q/2", "x", QoS::ExactlyOnce, false));

    assert!(broker.wait_until(WAIT, |b| b.published().len() == 3).await);
    let levels: Vec<QoS> = broker.published().into_iter().map(|m| m.qos).collect();
    assert_eq!(
        levels,
        vec![QoS::AtMostOnce, QoS::AtLeastOnce, QoS::ExactlyOnce]
    );

    relay.stop().await;
    destination.stop().await;
}

#[tokio::test]
async fn test_full_queue_drops_without_blocking() {
    let broker = MockBroker::new();
    let destination = connected_destination(&broker, WAIT).await;
    let metrics = Arc::new(Metrics::new());
    let relay = RelayPipeline::start(
        settings(&["#"], RelayQos::default(), 1),
        destination.clone(),
        metrics.clone(),
    );
    let inlet = relay.inlet();

    // The relay task cannot run between these calls on the test runtime
    for i in 0..4 {
        inlet(Message::new(format!("burst/{}", i), "x", QoS::AtMostOnce, false));
    }
    assert_eq!(metrics.dropped.get(), 3);
    assert_eq!(metrics.queue_depth.get(), 1);

    assert!(eventually(|| metrics.forwarded.get() == 1).await);
    assert_eq!(broker.published()[0].topic, "burst/0");

    relay.stop().await;
    destination.stop().await;
}

#[tokio::test]
async fn test_stop_finishes_current_publish_and_drops_queue() {
    let broker = MockBroker::new();
    broker.set_auto_ack(false);
    let destination = connected_destination(&broker, Duration::from_millis(200)).await;
    let metrics = Arc::new(Metrics::new());
    let relay = RelayPipeline::start(
        settings(&["#"], RelayQos::Fixed(QoS::AtLeastOnce), 10),
        destination.clone(),
        metrics.clone(),
    );
    let inlet = relay.inlet();

    for i in 0..4 {
        inlet(Message::new(format!("slow/{}", i), "x", QoS::AtMostOnce, false));
    }
    assert!(broker.wait_until(WAIT, |b| b.published().len() == 1).await);

    relay.stop().await;
    relay.stop().await;

    assert_eq!(metrics.forwarded.get(), 1);
    assert_eq!(metrics.unacknowledged.get(), 1);
    assert_eq!(metrics.dropped.get(), 3);
    assert_eq!(metrics.queue_depth.get(), 0);
    assert_eq!(broker.published().len(), 1);

    // Late deliveries are dropped, not queued
    inlet(Message::new("late", "x", QoS::AtMostOnce, false));
    assert_eq!(metrics.dropped.get(), 4);

    destination.stop().await;
}

#[tokio::test]
async fn test_publish_error_counted_as_failed_and_relay_continues() {
    let broker = MockBroker::new();
    let destination = connected_destination(&broker, WAIT).await;
    let metrics = Arc::new(Metrics::new());
    let relay = RelayPipeline::start(
        settings(&["#"], RelayQos::default(), 100),
        destination.clone(),
        metrics.clone(),
    );
    let inlet = relay.inlet();

    broker.fail_publishes(true);
    inlet(Message::new("refused", "x", QoS::AtMostOnce, false));
    assert!(eventually(|| metrics.failed.get() == 1).await);
    assert_eq!(metrics.forwarded.get(), 0);
    assert_eq!(metrics.dropped.get(), 0);

    broker.fail_publishes(false);
    inlet(Message::new("accepted", "x", QoS::AtMostOnce, false));
    assert!(eventually(|| metrics.forwarded.get() == 1).await);
    assert_eq!(metrics.failed.get(), 1);
    let topics: Vec<String> = broker.published().into_iter().map(|m| m.topic).collect();
    assert_eq!(topics, vec!["accepted"]);
    assert!(destination.is_connected());

    relay.stop().await;
    destination.stop().await;
}
