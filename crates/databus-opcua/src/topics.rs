// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Topic registry and namespace resolution for the publisher side.
//!
//! The registry maps `(namespace, topic)` pairs to protocol namespace
//! indices and makes sure a data-source-backed variable node exists for
//! every published topic. Creation is idempotent for all topics uniformly:
//! a created-set keyed by `(namespace index, topic)` short-circuits repeat
//! publishes, and an engine-level `BadNodeIdExists` is treated as success
//! so out-of-order creation cannot wedge the registry.

use std::collections::{HashMap, HashSet};

use databus_core::error::{BusError, BusResult};

use crate::engine::{PayloadSource, ServerEngine, StatusCode};

// =============================================================================
// TopicRegistry
// =============================================================================

/// Publisher-side map from topic identity to protocol addressing.
#[derive(Debug, Default)]
pub struct TopicRegistry {
    /// Namespace name -> namespace index.
    namespaces: HashMap<String, u16>,

    /// Nodes known to exist.
    created: HashSet<(u16, String)>,
}

impl TopicRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves `(namespace, topic)` to a namespace index, creating the
    /// namespace and the topic's variable node on first use.
    ///
    /// The returned index is stable across repeated calls with the same
    /// namespace.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::TopicCreate`] when the engine rejects namespace
    /// or node creation.
    pub async fn resolve(
        &mut self,
        engine: &mut (dyn ServerEngine + '_),
        namespace: &str,
        topic: &str,
        source: &PayloadSource,
    ) -> BusResult<u16> {
        let namespace_index = match self.namespaces.get(namespace) {
            Some(index) => *index,
            None => {
                let index = match engine.find_namespace(namespace).await {
                    Some(index) => {
                        tracing::debug!(namespace = %namespace, index, "Namespace exists");
                        index
                    }
                    None => engine.add_namespace(namespace).await.map_err(|status| {
                        BusError::topic_create(namespace, topic, status.name())
                    })?,
                };
                self.namespaces.insert(namespace.to_string(), index);
                index
            }
        };

        let key = (namespace_index, topic.to_string());
        if self.created.contains(&key) {
            return Ok(namespace_index);
        }

        let status = engine
            .add_data_source_node(namespace_index, topic, source.clone())
            .await;
        match status {
            StatusCode::GOOD => {
                tracing::info!(
                    namespace = %namespace,
                    topic = %topic,
                    index = namespace_index,
                    "Added variable node"
                );
            }
            StatusCode::BAD_NODE_ID_EXISTS => {
                tracing::debug!(namespace = %namespace, topic = %topic, "Topic already exists");
            }
            other => {
                return Err(BusError::topic_create(namespace, topic, other.name()));
            }
        }
        self.created.insert(key);

        Ok(namespace_index)
    }

    /// Number of distinct topics registered so far.
    pub fn topic_count(&self) -> usize {
        self.created.len()
    }
}

// =============================================================================
// Tests
// =============================================================================
