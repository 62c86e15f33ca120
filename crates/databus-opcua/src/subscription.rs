// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Subscription manager for the subscriber side.
//!
//! Owns the current subscription set: the topic list, the user handler, the
//! per-topic monitor contexts, and the lifecycle phase:
//!
//! ```text
//! NoSubscription → Requested → Active → (disconnect) Lost → Requested …
//! ```
//!
//! Namespace resolution happens per topic through a browse of the server's
//! objects folder, matched on the topic's string identifier. A topic with
//! no match resolves to namespace 0 and is logged, not failed: subscribing
//! to a topic nobody has published yet succeeds with zero deliveries.
//!
//! Monitored items are submitted in one batch; the batch's service result
//! and each item's individual status are logged and counted but never fail
//! the subscribe call. The [`SubscriptionStats`] counters make the
//! good-item count observable to callers and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use databus_core::bus::DataChangeHandler;
use databus_core::config::TopicConfig;
use databus_core::error::{BusError, BusResult};

use crate::engine::{
    ClientEngine, MonitoredItemRequest, ValueChange, MAX_PAYLOAD_BYTES,
    REQUESTED_PUBLISHING_INTERVAL,
};

// =============================================================================
// SubscriptionPhase
// =============================================================================

/// Lifecycle phase of the subscription set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SubscriptionPhase {
    /// No subscription has been requested yet.
    #[default]
    NoSubscription,

    /// A subscription-create request is in flight.
    Requested,

    /// The subscription and its monitored items are live.
    Active,

    /// The session dropped; the subscription must be re-created.
    Lost,
}

// =============================================================================
// MonitorContext
// =============================================================================

/// Per-topic monitoring record, registered once per subscribe and owned
/// until destroy or re-subscribe.
#[derive(Debug, Clone)]
pub struct MonitorContext {
    /// Namespace index the topic resolved to (0 when unresolved).
    pub namespace_index: u16,

    /// Topic name.
    pub topic: String,
}

// =============================================================================
// SubscriptionStats
// =============================================================================

/// Counters for subscription activity.
#[derive(Debug, Default)]
pub struct SubscriptionStats {
    subscriptions_created: AtomicU64,
    items_requested: AtomicU64,
    items_good: AtomicU64,
    notifications_delivered: AtomicU64,
    notifications_filtered: AtomicU64,
}

impl SubscriptionStats {
    /// Creates zeroed statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful subscription-create requests.
    pub fn subscriptions_created(&self) -> u64 {
        self.subscriptions_created.load(Ordering::Relaxed)
    }

    /// Number of monitored items requested across all creates.
    pub fn items_requested(&self) -> u64 {
        self.items_requested.load(Ordering::Relaxed)
    }

    /// Number of monitored items created with a good status.
    pub fn items_good(&self) -> u64 {
        self.items_good.load(Ordering::Relaxed)
    }

    /// Number of notifications delivered to the handler.
    pub fn notifications_delivered(&self) -> u64 {
        self.notifications_delivered.load(Ordering::Relaxed)
    }

    /// Number of notifications dropped by the cross-talk gate.
    pub fn notifications_filtered(&self) -> u64 {
        self.notifications_filtered.load(Ordering::Relaxed)
    }

    fn record_subscription_created(&self) {
        self.subscriptions_created.fetch_add(1, Ordering::Relaxed);
    }

    fn record_items_requested(&self, count: u64) {
        self.items_requested.fetch_add(count, Ordering::Relaxed);
    }

    fn record_item_good(&self) {
        self.items_good.fetch_add(1, Ordering::Relaxed);
    }

    fn record_delivered(&self) {
        self.notifications_delivered.fetch_add(1, Ordering::Relaxed);
    }

    fn record_filtered(&self) {
        self.notifications_filtered.fetch_add(1, Ordering::Relaxed);
    }
}

// =============================================================================
// SubscriptionManager
// =============================================================================

/// Owns the active subscription set for one client context.
pub struct SubscriptionManager {
    topics: Vec<TopicConfig>,
    handler: Arc<dyn DataChangeHandler>,
    phase: SubscriptionPhase,
    subscription_id: Option<u32>,
    monitors: HashMap<u32, MonitorContext>,
    stats: Arc<SubscriptionStats>,
}

impl SubscriptionManager {
    /// Creates a manager for the given subscription set.
    pub fn new(
        topics: Vec<TopicConfig>,
        handler: Arc<dyn DataChangeHandler>,
        stats: Arc<SubscriptionStats>,
    ) -> Self {
        Self {
            topics,
            handler,
            phase: SubscriptionPhase::NoSubscription,
            subscription_id: None,
            monitors: HashMap::new(),
            stats,
        }
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> SubscriptionPhase {
        self.phase
    }

    /// Number of live monitor contexts.
    pub fn monitor_count(&self) -> usize {
        self.monitors.len()
    }

    /// Marks the subscription as lost after a detected disconnect.
    pub fn mark_lost(&mut self) {
        if self.phase == SubscriptionPhase::Active {
            tracing::warn!("Subscription lost");
        }
        self.phase = SubscriptionPhase::Lost;
        self.monitors.clear();
        self.subscription_id = None;
    }

    /// Replaces the subscription set and re-creates it on the engine.
    ///
    /// The previous server-side subscription, if any, is deleted first so
    /// that at most one subscription set exists per client.
    pub async fn replace(
        &mut self,
        engine: &mut (dyn ClientEngine + '_),
        topics: Vec<TopicConfig>,
        handler: Arc<dyn DataChangeHandler>,
    ) -> BusResult<()> {
        if let Some(old_id) = self.subscription_id.take() {
            let status = engine.delete_subscription(old_id).await;
            if status.is_bad() {
                tracing::debug!(subscription_id = old_id, status = %status, "Delete of replaced subscription failed");
            }
        }
        self.topics = topics;
        self.handler = handler;
        self.monitors.clear();
        self.phase = SubscriptionPhase::NoSubscription;
        self.create_subscription(engine).await
    }

    /// Issues the subscription-create request and registers one monitored
    /// item per topic.
    ///
    /// # Errors
    ///
    /// [`BusError::SubscriptionCreate`] when the subscription-create
    /// request itself fails. Monitored-item problems are logged and
    /// counted, never returned.
    pub async fn create_subscription(
        &mut self,
        engine: &mut (dyn ClientEngine + '_),
    ) -> BusResult<()> {
        self.phase = SubscriptionPhase::Requested;

        let subscription_id = match engine
            .create_subscription(REQUESTED_PUBLISHING_INTERVAL)
            .await
        {
            Ok(id) => id,
            Err(status) => {
                self.phase = SubscriptionPhase::Lost;
                return Err(BusError::subscription_create(status.name()));
            }
        };
        self.stats.record_subscription_created();
        tracing::info!(subscription_id, "Subscription created");

        self.subscription_id = Some(subscription_id);
        self.monitors.clear();

        // Resolve each topic's namespace by browsing the objects folder.
        let browse = match engine.browse_objects().await {
            Ok(nodes) => nodes,
            Err(status) => {
                tracing::warn!(status = %status, "Browse of objects folder failed");
                Vec::new()
            }
        };

        let mut requests = Vec::with_capacity(self.topics.len());
        let mut contexts = Vec::with_capacity(self.topics.len());
        for topic in &self.topics {
            let namespace_index = match browse
                .iter()
                .find(|node| node.identifier == topic.name)
            {
                Some(node) => node.namespace_index,
                None => {
                    tracing::warn!(
                        topic = %topic.name,
                        namespace = %topic.namespace,
                        "Topic not found in objects folder"
                    );
                    0
                }
            };
            requests.push(MonitoredItemRequest {
                namespace_index,
                identifier: topic.name.clone(),
            });
            contexts.push(MonitorContext {
                namespace_index,
                topic: topic.name.clone(),
            });
        }
        self.stats.record_items_requested(requests.len() as u64);

        // One batch for the whole set; individual results are logged and
        // counted but never propagated.
        match engine.create_monitored_items(subscription_id, &requests).await {
            Ok(results) => {
                for (result, context) in results.into_iter().zip(contexts) {
                    if result.status.is_good() {
                        tracing::info!(
                            monitored_item_id = result.monitored_item_id,
                            topic = %context.topic,
                            "Monitored item created"
                        );
                        self.stats.record_item_good();
                        self.monitors.insert(result.monitored_item_id, context);
                    } else {
                        tracing::error!(
                            topic = %context.topic,
                            status = %result.status,
                            "Monitored item creation failed"
                        );
                    }
                }
            }
            Err(status) => {
                tracing::error!(status = %status, "Monitored item batch failed");
            }
        }

        self.phase = SubscriptionPhase::Active;
        Ok(())
    }

    /// Dispatches engine notifications to the user handler.
    ///
    /// The payload is bounded to the bus size cap, and a notification is
    /// delivered only when its content contains the topic name — the gate
    /// against cross-talk between topics sharing one value buffer.
    pub async fn dispatch(&self, changes: Vec<ValueChange>) {
        for change in changes {
            let Some(monitor) = self.monitors.get(&change.monitored_item_id) else {
                tracing::debug!(
                    monitored_item_id = change.monitored_item_id,
                    "Notification for unknown monitored item"
                );
                continue;
            };

            let payload = bounded(&change.value);
            if payload.contains(&monitor.topic) {
                self.handler.on_data_change(&monitor.topic, payload).await;
                self.stats.record_delivered();
            } else {
                self.stats.record_filtered();
                tracing::debug!(
                    topic = %monitor.topic,
                    "Dropped notification without topic marker"
                );
            }
        }
    }
}

/// Truncates a payload to the bus size cap on a character boundary.
fn bounded(value: &str) -> &str {
    if value.len() <= MAX_PAYLOAD_BYTES {
        return value;
    }
    let mut end = MAX_PAYLOAD_BYTES;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

// =============================================================================
// Tests
// =============================================================================
