// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The OPC-UA data bus.
//!
//! [`OpcUaBus`] is the runtime object behind the [`DataBus`] contract: it
//! owns at most one publisher context and one subscriber context, created
//! on demand by `context_create` and torn down together by
//! `context_destroy`. There is no process-global state — a second
//! independent bus value is just a second `OpcUaBus`.

use std::sync::Arc;

use async_trait::async_trait;

use databus_core::bus::{DataBus, DataChangeHandler, SubscriptionTrigger};
use databus_core::config::{ContextConfig, Direction, TopicConfig};
use databus_core::endpoint::Endpoint;
use databus_core::error::{BusError, BusResult};

use crate::client::ClientContext;
use crate::engine::EngineFactory;
use crate::security::{self, CertificateLoader, FsCertificateLoader};
use crate::server::ServerContext;
use crate::subscription::SubscriptionStats;

/// Endpoint scheme served by this bus.
pub const OPCUA_SCHEME: &str = "opcua";

// =============================================================================
// OpcUaBus
// =============================================================================

/// Publish/subscribe data bus over OPC-UA.
///
/// # Example
///
/// ```rust,ignore
/// use databus_opcua::OpcUaBus;
/// use databus_core::{ContextConfig, DataBus, Direction, TopicConfig};
///
/// let mut bus = OpcUaBus::new(factory);
/// let config = ContextConfig::builder()
///     .endpoint("opcua://localhost:65003")
///     .direction(Direction::Pub)
///     .build()?;
/// bus.context_create(&config).await?;
/// bus.publish(&TopicConfig::new("factory", "topic0"), "data for topic0").await?;
/// bus.context_destroy().await;
/// ```
pub struct OpcUaBus {
    engines: Box<dyn EngineFactory>,
    loader: Box<dyn CertificateLoader>,
    server: Option<ServerContext>,
    client: Option<ClientContext>,
}

impl OpcUaBus {
    /// Creates a bus using `engines` for protocol sessions and the
    /// filesystem for certificate material.
    pub fn new(engines: impl EngineFactory + 'static) -> Self {
        Self::with_loader(engines, FsCertificateLoader)
    }

    /// Creates a bus with a custom certificate loader.
    pub fn with_loader(
        engines: impl EngineFactory + 'static,
        loader: impl CertificateLoader + 'static,
    ) -> Self {
        Self {
            engines: Box::new(engines),
            loader: Box::new(loader),
            server: None,
            client: None,
        }
    }

    /// Subscription counters of the subscriber context, if one exists.
    pub fn subscription_stats(&self) -> Option<Arc<SubscriptionStats>> {
        self.client.as_ref().map(ClientContext::stats)
    }

    fn resolve_endpoint(config: &ContextConfig) -> BusResult<Endpoint> {
        let endpoint = Endpoint::parse(&config.endpoint)?;
        if endpoint.scheme != OPCUA_SCHEME {
            return Err(BusError::config_invalid(format!(
                "Unsupported bus scheme '{}'",
                endpoint.scheme
            )));
        }
        Ok(endpoint)
    }
}

#[async_trait]
impl DataBus for OpcUaBus {
    /// Runs the endpoint resolver and security configurator once, then
    /// creates the publisher or subscriber session for `config.direction`.
    async fn context_create(&mut self, config: &ContextConfig) -> BusResult<()> {
        let endpoint = Self::resolve_endpoint(config)?;
        let artifacts = security::configure(config, self.loader.as_ref())?;

        match config.direction {
            Direction::Pub => {
                if self.server.is_some() {
                    return Err(BusError::config_invalid(
                        "Publisher context already exists",
                    ));
                }
                let context = ServerContext::create(
                    &endpoint,
                    artifacts,
                    self.engines.server_engine(),
                )
                .await?;
                self.server = Some(context);
            }
            Direction::Sub => {
                if self.client.is_some() {
                    return Err(BusError::config_invalid(
                        "Subscriber context already exists",
                    ));
                }
                let context = ClientContext::create(
                    &endpoint,
                    artifacts,
                    self.engines.client_engine(),
                )
                .await?;
                self.client = Some(context);
            }
        }

        tracing::info!(
            endpoint = %config.endpoint,
            direction = %config.direction,
            "Bus context created"
        );
        Ok(())
    }

    async fn publish(&mut self, topic: &TopicConfig, payload: &str) -> BusResult<()> {
        let Some(server) = self.server.as_mut() else {
            return Err(BusError::ServerNotRunning);
        };
        server.publish(topic, payload).await
    }

    async fn subscribe(
        &mut self,
        topics: &[TopicConfig],
        trigger: SubscriptionTrigger,
        handler: Arc<dyn DataChangeHandler>,
    ) -> BusResult<()> {
        let Some(client) = self.client.as_mut() else {
            return Err(BusError::ClientNotConnected);
        };
        client.subscribe(topics, trigger, handler).await
    }

    /// Destroys whichever contexts exist, in subscriber-then-publisher
    /// order so the client observes the server going away last.
    async fn context_destroy(&mut self) {
        if let Some(mut client) = self.client.take() {
            client.destroy().await;
        }
        if let Some(mut server) = self.server.take() {
            server.destroy().await;
        }
        tracing::info!("Bus context destroyed");
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::memory::MemoryBus;

    fn pub_config() -> ContextConfig {
        ContextConfig::builder()
            .endpoint("opcua://localhost:65003")
            .direction(Direction::Pub)
            .build()
            .unwrap()
    }

    fn sub_config() -> ContextConfig {
        ContextConfig::builder()
            .endpoint("opcua://localhost:65003")
            .direction(Direction::Sub)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_publish_without_context_is_server_not_running() {
        let mut bus = OpcUaBus::new(MemoryBus::new());
        let err = bus
            .publish(&TopicConfig::new("factory", "topic0"), "data")
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::ServerNotRunning));
    }

    #[tokio::test]
    async fn test_subscribe_without_context_is_client_not_connected() {
        let mut bus = OpcUaBus::new(MemoryBus::new());
        let (handler, _rx) = databus_core::bus::ChannelHandler::with_channel(1);
        let err = bus
            .subscribe(
                &[TopicConfig::new("factory", "topic0")],
                SubscriptionTrigger::Start,
                Arc::new(handler),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::ClientNotConnected));
    }

    #[tokio::test]
    async fn test_unsupported_scheme_rejected() {
        let mut bus = OpcUaBus::new(MemoryBus::new());
        let config = ContextConfig::builder()
            .endpoint("mqtt://localhost:1883")
            .direction(Direction::Pub)
            .build()
            .unwrap();
        let err = bus.context_create(&config).await.unwrap_err();
        assert!(matches!(err, BusError::ConfigInvalid { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_publisher_context_rejected() {
        let memory = MemoryBus::new();
        let mut bus = OpcUaBus::new(memory);
        bus.context_create(&pub_config()).await.unwrap();
        let err = bus.context_create(&pub_config()).await.unwrap_err();
        assert!(matches!(err, BusError::ConfigInvalid { .. }));
        bus.context_destroy().await;
    }

    #[tokio::test]
    async fn test_destroy_without_create_is_safe() {
        let mut bus = OpcUaBus::new(MemoryBus::new());
        bus.context_destroy().await;
        bus.context_destroy().await;
    }

    #[tokio::test]
    async fn test_sub_create_fails_before_pub_exists() {
        let memory = MemoryBus::new();
        let mut bus = OpcUaBus::new(memory);
        let err = bus.context_create(&sub_config()).await.unwrap_err();
        assert!(matches!(err, BusError::Connect { .. }));
        // A failed create leaves the bus usable and destroyable.
        bus.context_destroy().await;
    }
}
