// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! End-to-end bus scenarios.
//!
//! A publisher bus and a subscriber bus share one loopback engine pair, so
//! every scenario exercises the full path: context creation, topic
//! registration, subscription, notification dispatch, reconnect, and
//! teardown. No external OPC-UA server is required.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use databus_core::bus::{ChannelHandler, DataBus, SubscriptionTrigger, TopicSample};
use databus_core::config::{ContextConfig, Direction, TopicConfig};
use databus_core::error::BusError;

use databus_opcua::{MemoryBus, OpcUaBus};

const ENDPOINT: &str = "opcua://localhost:65003";
const NUM_TOPICS: usize = 10;
const DELIVERY_DEADLINE: Duration = Duration::from_secs(5);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

fn pub_config() -> ContextConfig {
    ContextConfig::builder()
        .endpoint(ENDPOINT)
        .direction(Direction::Pub)
        .build()
        .unwrap()
}

fn sub_config() -> ContextConfig {
    ContextConfig::builder()
        .endpoint(ENDPOINT)
        .direction(Direction::Sub)
        .build()
        .unwrap()
}

fn topics() -> Vec<TopicConfig> {
    (0..NUM_TOPICS)
        .map(|i| TopicConfig::new("streammanager", format!("topic{i}")))
        .collect()
}

/// Publishes one round of values; each payload carries its topic name.
async fn publish_round(bus: &mut OpcUaBus, round: u32) {
    for topic in topics() {
        let payload = format!("round:{round} data for {}", topic.name);
        bus.publish(&topic, &payload).await.unwrap();
    }
}

async fn drain_until_all_topics(
    rx: &mut tokio::sync::mpsc::Receiver<TopicSample>,
) -> Vec<usize> {
    let mut counts = vec![0usize; NUM_TOPICS];
    let deadline = tokio::time::Instant::now() + DELIVERY_DEADLINE;
    while counts.iter().any(|&c| c == 0) {
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .expect("all topics delivered within the deadline");
        let sample = timeout(remaining, rx.recv())
            .await
            .expect("delivery within deadline")
            .expect("channel open");
        let index: usize = sample
            .topic
            .strip_prefix("topic")
            .and_then(|s| s.parse().ok())
            .unwrap();
        assert!(sample.payload.contains(&sample.topic));
        counts[index] += 1;
    }
    counts
}

// =============================================================================
// Scenario A — subscriber before any publisher exists
// =============================================================================

#[tokio::test]
async fn scenario_a_sub_create_fails_without_publisher() {
    init_tracing();
    let memory = MemoryBus::new();
    let mut sub_bus = OpcUaBus::new(memory);

    let err = sub_bus.context_create(&sub_config()).await.unwrap_err();
    assert!(matches!(err, BusError::Connect { .. }));
    assert!(err.to_string().contains("BadConnectionRejected"));

    sub_bus.context_destroy().await;
}

// =============================================================================
// Scenario B — ten topics, publish/subscribe round trip
// =============================================================================

#[tokio::test]
async fn scenario_b_all_topics_deliver_within_deadline() {
    init_tracing();
    let memory = MemoryBus::new();
    let mut pub_bus = OpcUaBus::new(memory.clone());
    let mut sub_bus = OpcUaBus::new(memory.clone());

    pub_bus.context_create(&pub_config()).await.unwrap();
    // First round creates the ten topic nodes.
    publish_round(&mut pub_bus, 1).await;

    sub_bus.context_create(&sub_config()).await.unwrap();
    let (handler, mut rx) = ChannelHandler::with_channel(256);
    sub_bus
        .subscribe(&topics(), SubscriptionTrigger::Start, Arc::new(handler))
        .await
        .unwrap();

    // At most one monitored item per topic, all good.
    let stats = sub_bus.subscription_stats().unwrap();
    assert_eq!(stats.items_requested(), NUM_TOPICS as u64);
    assert_eq!(stats.items_good(), NUM_TOPICS as u64);
    assert_eq!(memory.monitored_item_count(), NUM_TOPICS);

    // Second round must reach the callback at least once per topic.
    publish_round(&mut pub_bus, 2).await;
    let counts = drain_until_all_topics(&mut rx).await;
    assert!(counts.iter().all(|&c| c >= 1));

    sub_bus.context_destroy().await;
    pub_bus.context_destroy().await;
}

// =============================================================================
// Scenario C — subscribing to names that were never published
// =============================================================================

#[tokio::test]
async fn scenario_c_unknown_topic_names_succeed_with_zero_deliveries() {
    init_tracing();
    let memory = MemoryBus::new();
    let mut pub_bus = OpcUaBus::new(memory.clone());
    let mut sub_bus = OpcUaBus::new(memory.clone());

    pub_bus.context_create(&pub_config()).await.unwrap();
    publish_round(&mut pub_bus, 1).await;

    sub_bus.context_create(&sub_config()).await.unwrap();
    let uppercase: Vec<TopicConfig> = (0..NUM_TOPICS)
        .map(|i| TopicConfig::new("streammanager", format!("TOPIC{i}")))
        .collect();
    let (handler, mut rx) = ChannelHandler::with_channel(64);

    // Succeeds with an empty result set rather than failing fast.
    sub_bus
        .subscribe(&uppercase, SubscriptionTrigger::Start, Arc::new(handler))
        .await
        .unwrap();

    let stats = sub_bus.subscription_stats().unwrap();
    assert_eq!(stats.items_requested(), NUM_TOPICS as u64);
    assert_eq!(stats.items_good(), 0);

    publish_round(&mut pub_bus, 2).await;
    let silent = timeout(Duration::from_millis(300), rx.recv()).await;
    assert!(silent.is_err(), "no deliveries expected for unknown topics");

    sub_bus.context_destroy().await;
    pub_bus.context_destroy().await;
}

// =============================================================================
// Scenario D — developer mode
// =============================================================================

#[tokio::test]
async fn scenario_d_insecure_create_for_both_directions() {
    init_tracing();
    let memory = MemoryBus::new();
    let mut pub_bus = OpcUaBus::new(memory.clone());
    let mut sub_bus = OpcUaBus::new(memory.clone());

    // All three security fields empty: no certificate I/O at all.
    pub_bus.context_create(&pub_config()).await.unwrap();
    sub_bus.context_create(&sub_config()).await.unwrap();

    sub_bus.context_destroy().await;
    pub_bus.context_destroy().await;
}

// =============================================================================
// Secure mode with on-disk certificate material
// =============================================================================

#[tokio::test]
async fn secure_create_loads_certificate_files() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let cert = dir.path().join("server.der");
    let key = dir.path().join("server.key.der");
    let ca = dir.path().join("ca.der");
    std::fs::write(&cert, b"dummy certificate").unwrap();
    std::fs::write(&key, b"dummy private key").unwrap();
    std::fs::write(&ca, b"dummy ca").unwrap();

    let memory = MemoryBus::new();
    let mut bus = OpcUaBus::new(memory);
    let config = ContextConfig::builder()
        .endpoint(ENDPOINT)
        .direction(Direction::Pub)
        .certificate_file(cert.to_str().unwrap())
        .private_key_file(key.to_str().unwrap())
        .trusted_certificate_file(ca.to_str().unwrap())
        .build()
        .unwrap();

    bus.context_create(&config).await.unwrap();
    bus.context_destroy().await;
}

#[tokio::test]
async fn secure_create_fails_on_missing_certificate_file() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let cert = dir.path().join("server.der");
    let ca = dir.path().join("ca.der");
    std::fs::write(&cert, b"dummy certificate").unwrap();
    std::fs::write(&ca, b"dummy ca").unwrap();

    let memory = MemoryBus::new();
    let mut bus = OpcUaBus::new(memory);
    let config = ContextConfig::builder()
        .endpoint(ENDPOINT)
        .direction(Direction::Pub)
        .certificate_file(cert.to_str().unwrap())
        .private_key_file(dir.path().join("missing.key.der").to_str().unwrap())
        .trusted_certificate_file(ca.to_str().unwrap())
        .build()
        .unwrap();

    let err = bus.context_create(&config).await.unwrap_err();
    assert!(matches!(err, BusError::CertificateLoad { .. }));
    bus.context_destroy().await;
}

// =============================================================================
// Reconnect
// =============================================================================

#[tokio::test]
async fn reconnect_restores_deliveries_after_dropped_link() {
    init_tracing();
    let memory = MemoryBus::new();
    let mut pub_bus = OpcUaBus::new(memory.clone());
    let mut sub_bus = OpcUaBus::new(memory.clone());

    pub_bus.context_create(&pub_config()).await.unwrap();
    publish_round(&mut pub_bus, 1).await;

    sub_bus.context_create(&sub_config()).await.unwrap();
    let (handler, mut rx) = ChannelHandler::with_channel(256);
    sub_bus
        .subscribe(&topics(), SubscriptionTrigger::Start, Arc::new(handler))
        .await
        .unwrap();

    memory.drop_link();

    // The reconnect loop re-establishes the session and the subscription.
    let deadline = tokio::time::Instant::now() + DELIVERY_DEADLINE;
    while memory.monitored_item_count() < NUM_TOPICS {
        assert!(
            tokio::time::Instant::now() < deadline,
            "subscription not restored in time"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    publish_round(&mut pub_bus, 2).await;
    let counts = drain_until_all_topics(&mut rx).await;
    assert!(counts.iter().all(|&c| c >= 1));

    // Exactly one subscription set: no duplicates from the reconnect.
    assert_eq!(memory.subscription_count(), 1);

    sub_bus.context_destroy().await;
    pub_bus.context_destroy().await;
}

#[tokio::test]
async fn reconnect_keeps_retrying_while_connects_are_refused() {
    init_tracing();
    let memory = MemoryBus::new();
    let mut pub_bus = OpcUaBus::new(memory.clone());
    let mut sub_bus = OpcUaBus::new(memory.clone());

    pub_bus.context_create(&pub_config()).await.unwrap();
    publish_round(&mut pub_bus, 1).await;

    sub_bus.context_create(&sub_config()).await.unwrap();
    let (handler, mut rx) = ChannelHandler::with_channel(256);
    sub_bus
        .subscribe(&topics(), SubscriptionTrigger::Start, Arc::new(handler))
        .await
        .unwrap();

    // Sever the link and refuse reconnects for a while.
    memory.set_accept_connections(false);
    memory.drop_link();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(memory.subscription_count(), 0);

    // Once connects are accepted again the loop recovers on its own.
    memory.set_accept_connections(true);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while memory.monitored_item_count() < NUM_TOPICS {
        assert!(
            tokio::time::Instant::now() < deadline,
            "subscription not restored after connects resumed"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    publish_round(&mut pub_bus, 2).await;
    let counts = drain_until_all_topics(&mut rx).await;
    assert!(counts.iter().all(|&c| c >= 1));

    sub_bus.context_destroy().await;
    pub_bus.context_destroy().await;
}

// =============================================================================
// Teardown
// =============================================================================

#[tokio::test]
async fn context_destroy_is_idempotent() {
    init_tracing();
    let memory = MemoryBus::new();
    let mut pub_bus = OpcUaBus::new(memory.clone());
    let mut sub_bus = OpcUaBus::new(memory.clone());

    pub_bus.context_create(&pub_config()).await.unwrap();
    publish_round(&mut pub_bus, 1).await;
    sub_bus.context_create(&sub_config()).await.unwrap();

    let (handler, _rx) = ChannelHandler::with_channel(16);
    sub_bus
        .subscribe(&topics(), SubscriptionTrigger::Start, Arc::new(handler))
        .await
        .unwrap();

    sub_bus.context_destroy().await;
    sub_bus.context_destroy().await;
    pub_bus.context_destroy().await;
    pub_bus.context_destroy().await;

    // Operations after destroy fail cleanly.
    let err = pub_bus
        .publish(&TopicConfig::new("streammanager", "topic0"), "late")
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::ServerNotRunning));
}
