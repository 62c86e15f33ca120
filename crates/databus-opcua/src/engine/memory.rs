// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! In-process loopback engine pair.
//!
//! A [`MemoryBus`] stands in for a running OPC-UA stack: a server engine
//! and a client engine created from the same bus share one information
//! model, so a value written on the publisher side surfaces as a
//! value-change notification on the subscriber side.
//!
//! The bus doubles as a fault injector for the reconnect-loop tests: the
//! link can be dropped, connects can be refused, and a session renewal can
//! be simulated without tearing the link down.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::{
    BrowseNode, ClientEngine, ClientEngineConfig, ClientState, EngineFactory,
    MonitoredItemRequest, MonitoredItemResult, PayloadSource, ServerEngine, ServerEngineConfig,
    StatusCode, ValueChange,
};

/// Namespace indices 0 and 1 belong to the protocol and the application.
const FIRST_CUSTOM_NAMESPACE: u16 = 2;

// =============================================================================
// MemoryBus
// =============================================================================

/// Shared state connecting one loopback server engine and one loopback
/// client engine.
#[derive(Clone, Default)]
pub struct MemoryBus {
    state: Arc<Mutex<BusState>>,
}

struct BusState {
    server_online: bool,
    accept_connections: bool,
    link_up: bool,
    session_renewed: bool,
    namespaces: Vec<String>,
    nodes: HashMap<(u16, String), PayloadSource>,
    subscriptions: HashMap<u32, SubscriptionSlot>,
    next_subscription_id: u32,
    next_item_id: u32,
    pending: Vec<ValueChange>,
}

#[derive(Default)]
struct SubscriptionSlot {
    /// monitored item id -> node key
    items: HashMap<u32, (u16, String)>,
}

impl Default for BusState {
    fn default() -> Self {
        Self {
            server_online: false,
            accept_connections: true,
            link_up: false,
            session_renewed: false,
            namespaces: Vec::new(),
            nodes: HashMap::new(),
            subscriptions: HashMap::new(),
            next_subscription_id: 1,
            next_item_id: 1,
            pending: Vec::new(),
        }
    }
}

impl MemoryBus {
    /// Creates an empty loopback bus.
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Fault injection and introspection
    // =========================================================================

    /// Severs the client link, discarding server-side subscription state and
    /// any undelivered notifications.
    pub fn drop_link(&self) {
        let mut state = self.state.lock();
        state.link_up = false;
        state.session_renewed = false;
        state.subscriptions.clear();
        state.pending.clear();
    }

    /// Controls whether new connects are accepted.
    pub fn set_accept_connections(&self, accept: bool) {
        self.state.lock().accept_connections = accept;
    }

    /// Simulates an in-place session renewal: subscriptions survive and the
    /// client observes `SessionRenewed` instead of a reconnect.
    pub fn renew_session(&self) {
        self.state.lock().session_renewed = true;
    }

    /// Returns `true` while the client link is up.
    pub fn is_link_up(&self) -> bool {
        self.state.lock().link_up
    }

    /// Number of live subscriptions on the server side.
    pub fn subscription_count(&self) -> usize {
        self.state.lock().subscriptions.len()
    }

    /// Number of live monitored items across all subscriptions.
    pub fn monitored_item_count(&self) -> usize {
        self.state
            .lock()
            .subscriptions
            .values()
            .map(|slot| slot.items.len())
            .sum()
    }

    /// Reads a node's data source directly, bypassing the client path.
    pub fn read_node(&self, namespace_index: u16, identifier: &str) -> Option<String> {
        self.state
            .lock()
            .nodes
            .get(&(namespace_index, identifier.to_string()))
            .map(PayloadSource::read)
    }
}

impl EngineFactory for MemoryBus {
    fn server_engine(&self) -> Box<dyn ServerEngine> {
        Box::new(MemoryServerEngine {
            bus: self.clone(),
            config: None,
        })
    }

    fn client_engine(&self) -> Box<dyn ClientEngine> {
        Box::new(MemoryClientEngine {
            bus: self.clone(),
            config: None,
            connected: false,
        })
    }
}

// =============================================================================
// MemoryServerEngine
// =============================================================================

/// Loopback publisher-side engine.
pub struct MemoryServerEngine {
    bus: MemoryBus,
    config: Option<ServerEngineConfig>,
}

#[async_trait]
impl ServerEngine for MemoryServerEngine {
    async fn configure(&mut self, config: &ServerEngineConfig) -> Result<(), StatusCode> {
        if config.hostname.is_empty() {
            return Err(StatusCode::BAD_CONFIGURATION_ERROR);
        }
        self.config = Some(config.clone());
        Ok(())
    }

    async fn startup(&mut self) -> Result<(), StatusCode> {
        if self.config.is_none() {
            return Err(StatusCode::BAD_CONFIGURATION_ERROR);
        }
        let mut state = self.bus.state.lock();
        if state.server_online {
            // One server per endpoint; a second startup is refused.
            return Err(StatusCode::BAD_INTERNAL_ERROR);
        }
        state.server_online = true;
        Ok(())
    }

    async fn iterate(&mut self) -> Duration {
        self.config
            .as_ref()
            .map(|c| c.interval_limits.max)
            .unwrap_or(Duration::from_millis(10))
    }

    async fn shutdown(&mut self) {
        let mut state = self.bus.state.lock();
        state.server_online = false;
        state.link_up = false;
        state.subscriptions.clear();
        state.pending.clear();
        state.nodes.clear();
        state.namespaces.clear();
    }

    async fn find_namespace(&mut self, namespace: &str) -> Option<u16> {
        let state = self.bus.state.lock();
        state
            .namespaces
            .iter()
            .position(|n| n == namespace)
            .map(|pos| FIRST_CUSTOM_NAMESPACE + pos as u16)
    }

    async fn add_namespace(&mut self, namespace: &str) -> Result<u16, StatusCode> {
        let mut state = self.bus.state.lock();
        if let Some(pos) = state.namespaces.iter().position(|n| n == namespace) {
            return Ok(FIRST_CUSTOM_NAMESPACE + pos as u16);
        }
        state.namespaces.push(namespace.to_string());
        Ok(FIRST_CUSTOM_NAMESPACE + (state.namespaces.len() - 1) as u16)
    }

    async fn add_data_source_node(
        &mut self,
        namespace_index: u16,
        identifier: &str,
        source: PayloadSource,
    ) -> StatusCode {
        let mut state = self.bus.state.lock();
        let key = (namespace_index, identifier.to_string());
        if state.nodes.contains_key(&key) {
            return StatusCode::BAD_NODE_ID_EXISTS;
        }
        state.nodes.insert(key, source);
        StatusCode::GOOD
    }

    async fn write_value(
        &mut self,
        namespace_index: u16,
        identifier: &str,
        payload: &str,
    ) -> StatusCode {
        let mut state = self.bus.state.lock();
        if !state.server_online {
            return StatusCode::BAD_SERVER_HALTED;
        }
        let key = (namespace_index, identifier.to_string());
        if !state.nodes.contains_key(&key) {
            return StatusCode::BAD_NODE_ID_UNKNOWN;
        }

        // Fan the change out to every monitored item watching this node.
        // Nothing is queued while the link is down; those samples are lost,
        // like any notification the transport cannot deliver.
        if state.link_up {
            let hits: Vec<u32> = state
                .subscriptions
                .values()
                .flat_map(|slot| {
                    slot.items
                        .iter()
                        .filter(|(_, node)| **node == key)
                        .map(|(id, _)| *id)
                })
                .collect();
            for item_id in hits {
                state.pending.push(ValueChange::new(item_id, payload));
            }
        }
        StatusCode::GOOD
    }
}

// =============================================================================
// MemoryClientEngine
// =============================================================================

/// Loopback subscriber-side engine.
pub struct MemoryClientEngine {
    bus: MemoryBus,
    config: Option<ClientEngineConfig>,
    connected: bool,
}

#[async_trait]
impl ClientEngine for MemoryClientEngine {
    async fn configure(&mut self, config: &ClientEngineConfig) -> Result<(), StatusCode> {
        if config.endpoint.is_empty() {
            return Err(StatusCode::BAD_CONFIGURATION_ERROR);
        }
        self.config = Some(config.clone());
        Ok(())
    }

    async fn connect(&mut self) -> StatusCode {
        if self.config.is_none() {
            return StatusCode::BAD_CONFIGURATION_ERROR;
        }
        let mut state = self.bus.state.lock();
        if !state.server_online || !state.accept_connections {
            self.connected = false;
            return StatusCode::BAD_CONNECTION_REJECTED;
        }
        state.link_up = true;
        state.session_renewed = false;
        self.connected = true;
        StatusCode::GOOD
    }

    async fn disconnect(&mut self) {
        self.connected = false;
        let mut state = self.bus.state.lock();
        state.link_up = false;
        state.subscriptions.clear();
        state.pending.clear();
    }

    fn state(&self) -> ClientState {
        if !self.connected {
            return ClientState::Disconnected;
        }
        let state = self.bus.state.lock();
        if !state.link_up {
            ClientState::Disconnected
        } else if state.session_renewed {
            ClientState::SessionRenewed
        } else {
            ClientState::Session
        }
    }

    async fn browse_objects(&mut self) -> Result<Vec<BrowseNode>, StatusCode> {
        let state = self.bus.state.lock();
        if !state.link_up {
            return Err(StatusCode::BAD_SERVER_NOT_CONNECTED);
        }
        Ok(state
            .nodes
            .keys()
            .map(|(namespace_index, identifier)| BrowseNode {
                namespace_index: *namespace_index,
                identifier: identifier.clone(),
            })
            .collect())
    }

    async fn create_subscription(
        &mut self,
        _publishing_interval: Duration,
    ) -> Result<u32, StatusCode> {
        let mut state = self.bus.state.lock();
        if !state.link_up {
            return Err(StatusCode::BAD_SERVER_NOT_CONNECTED);
        }
        let id = state.next_subscription_id;
        state.next_subscription_id += 1;
        state.subscriptions.insert(id, SubscriptionSlot::default());
        Ok(id)
    }

    async fn delete_subscription(&mut self, subscription_id: u32) -> StatusCode {
        let mut state = self.bus.state.lock();
        match state.subscriptions.remove(&subscription_id) {
            Some(_) => StatusCode::GOOD,
            None => StatusCode::BAD_SUBSCRIPTION_ID_INVALID,
        }
    }

    async fn create_monitored_items(
        &mut self,
        subscription_id: u32,
        items: &[MonitoredItemRequest],
    ) -> Result<Vec<MonitoredItemResult>, StatusCode> {
        let mut state = self.bus.state.lock();
        if !state.link_up {
            return Err(StatusCode::BAD_SERVER_NOT_CONNECTED);
        }
        if !state.subscriptions.contains_key(&subscription_id) {
            return Err(StatusCode::BAD_SUBSCRIPTION_ID_INVALID);
        }

        let mut results = Vec::with_capacity(items.len());
        for request in items {
            let key = (request.namespace_index, request.identifier.clone());
            if state.nodes.contains_key(&key) {
                let item_id = state.next_item_id;
                state.next_item_id += 1;
                if let Some(slot) = state.subscriptions.get_mut(&subscription_id) {
                    slot.items.insert(item_id, key);
                }
                results.push(MonitoredItemResult {
                    monitored_item_id: item_id,
                    status: StatusCode::GOOD,
                });
            } else {
                results.push(MonitoredItemResult {
                    monitored_item_id: 0,
                    status: StatusCode::BAD_NODE_ID_UNKNOWN,
                });
            }
        }
        Ok(results)
    }

    async fn run_iterate(&mut self, timeout: Duration) -> Vec<ValueChange> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut state = self.bus.state.lock();
                if !state.link_up {
                    return Vec::new();
                }
                if !state.pending.is_empty() {
                    return std::mem::take(&mut state.pending);
                }
            }
            if Instant::now() >= deadline {
                return Vec::new();
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{INSECURE_INTERVAL_LIMITS, REQUESTED_PUBLISHING_INTERVAL};
    use crate::security::SecurityArtifacts;

    fn server_config() -> ServerEngineConfig {
        ServerEngineConfig {
            hostname: "localhost".to_string(),
            port: 65003,
            interval_limits: INSECURE_INTERVAL_LIMITS,
            security: SecurityArtifacts::insecure(),
        }
    }

    fn client_config() -> ClientEngineConfig {
        ClientEngineConfig {
            endpoint: "opc.tcp://localhost:65003".to_string(),
            connect_timeout: Duration::from_millis(1000),
            security: SecurityArtifacts::insecure(),
        }
    }

    async fn online_pair(bus: &MemoryBus) -> (Box<dyn ServerEngine>, Box<dyn ClientEngine>) {
        let mut server = bus.server_engine();
        server.configure(&server_config()).await.unwrap();
        server.startup().await.unwrap();

        let mut client = bus.client_engine();
        client.configure(&client_config()).await.unwrap();
        assert!(client.connect().await.is_good());
        (server, client)
    }

    #[tokio::test]
    async fn test_connect_refused_without_server() {
        let bus = MemoryBus::new();
        let mut client = bus.client_engine();
        client.configure(&client_config()).await.unwrap();
        assert_eq!(client.connect().await, StatusCode::BAD_CONNECTION_REJECTED);
        assert!(client.state().is_disconnected());
    }

    #[tokio::test]
    async fn test_node_creation_is_idempotent_at_engine_level() {
        let bus = MemoryBus::new();
        let (mut server, _client) = online_pair(&bus).await;

        let ns = server.add_namespace("factory").await.unwrap();
        assert_eq!(ns, FIRST_CUSTOM_NAMESPACE);
        assert_eq!(server.find_namespace("factory").await, Some(ns));

        let source = PayloadSource::new();
        assert!(server
            .add_data_source_node(ns, "topic0", source.clone())
            .await
            .is_good());
        assert_eq!(
            server.add_data_source_node(ns, "topic0", source).await,
            StatusCode::BAD_NODE_ID_EXISTS
        );
    }

    #[tokio::test]
    async fn test_write_fans_out_to_monitored_items() {
        let bus = MemoryBus::new();
        let (mut server, mut client) = online_pair(&bus).await;

        let ns = server.add_namespace("factory").await.unwrap();
        server
            .add_data_source_node(ns, "topic0", PayloadSource::new())
            .await;

        let sub = client
            .create_subscription(REQUESTED_PUBLISHING_INTERVAL)
            .await
            .unwrap();
        let results = client
            .create_monitored_items(
                sub,
                &[MonitoredItemRequest {
                    namespace_index: ns,
                    identifier: "topic0".to_string(),
                }],
            )
            .await
            .unwrap();
        assert!(results[0].status.is_good());

        assert!(server.write_value(ns, "topic0", "hello topic0").await.is_good());
        let changes = client.run_iterate(Duration::from_millis(100)).await;
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].value, "hello topic0");
        assert_eq!(changes[0].monitored_item_id, results[0].monitored_item_id);
    }

    #[tokio::test]
    async fn test_monitored_item_for_unknown_node_fails_per_item() {
        let bus = MemoryBus::new();
        let (_server, mut client) = online_pair(&bus).await;

        let sub = client
            .create_subscription(REQUESTED_PUBLISHING_INTERVAL)
            .await
            .unwrap();
        let results = client
            .create_monitored_items(
                sub,
                &[MonitoredItemRequest {
                    namespace_index: 0,
                    identifier: "TOPIC0".to_string(),
                }],
            )
            .await
            .unwrap();
        assert_eq!(results[0].status, StatusCode::BAD_NODE_ID_UNKNOWN);
        assert_eq!(bus.monitored_item_count(), 0);
    }

    #[tokio::test]
    async fn test_drop_link_discards_subscriptions() {
        let bus = MemoryBus::new();
        let (_server, mut client) = online_pair(&bus).await;

        client
            .create_subscription(REQUESTED_PUBLISHING_INTERVAL)
            .await
            .unwrap();
        assert_eq!(bus.subscription_count(), 1);

        bus.drop_link();
        assert!(client.state().is_disconnected());
        assert_eq!(bus.subscription_count(), 0);

        // Reconnect restores the link; the subscription must be re-created.
        assert!(client.connect().await.is_good());
        assert_eq!(client.state(), ClientState::Session);
    }

    #[tokio::test]
    async fn test_session_renewal_is_visible_without_disconnect() {
        let bus = MemoryBus::new();
        let (_server, mut client) = online_pair(&bus).await;
        client
            .create_subscription(REQUESTED_PUBLISHING_INTERVAL)
            .await
            .unwrap();

        bus.renew_session();
        assert_eq!(client.state(), ClientState::SessionRenewed);
        // Subscriptions survive a renewal.
        assert_eq!(bus.subscription_count(), 1);
    }
}
