// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Publisher-side context: a running server session plus its background
//! loop.
//!
//! The engine sits behind a single `tokio::sync::Mutex`; the loop's iterate
//! step and the publish path are the only two callers, and each holds the
//! lock for exactly one engine call. The loop itself follows the engine's
//! pacing hint: iterate once under the lock, release, then sleep for the
//! suggested maximum delay.
//!
//! Teardown is cooperative: `destroy` clears the running flag and awaits
//! the loop task, which observes the flag at the top of its next iteration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use databus_core::config::TopicConfig;
use databus_core::endpoint::Endpoint;
use databus_core::error::{BusError, BusResult};

use crate::engine::{
    IntervalLimits, PayloadSource, ServerEngine, ServerEngineConfig, StatusCode,
    INSECURE_INTERVAL_LIMITS, MAX_PAYLOAD_BYTES, SECURE_INTERVAL_LIMITS,
};
use crate::security::SecurityArtifacts;
use crate::topics::TopicRegistry;

// =============================================================================
// ServerContext
// =============================================================================

/// Owns one running publisher session.
pub struct ServerContext {
    engine: Arc<Mutex<Box<dyn ServerEngine>>>,
    registry: TopicRegistry,
    payload: PayloadSource,
    running: Arc<AtomicBool>,
    loop_handle: Option<JoinHandle<()>>,
    interval_limits: IntervalLimits,
}

impl ServerContext {
    /// Builds the server configuration, starts the engine, and spawns the
    /// server loop.
    ///
    /// Interval limits follow the security mode: 5–10 ms insecure, fixed
    /// 5 ms secure.
    ///
    /// # Errors
    ///
    /// [`BusError::ServerConfig`] when the engine rejects the
    /// configuration, [`BusError::ServerStart`] when startup fails.
    pub async fn create(
        endpoint: &Endpoint,
        security: SecurityArtifacts,
        mut engine: Box<dyn ServerEngine>,
    ) -> BusResult<Self> {
        let interval_limits = if security.is_secure() {
            SECURE_INTERVAL_LIMITS
        } else {
            INSECURE_INTERVAL_LIMITS
        };

        let config = ServerEngineConfig {
            hostname: endpoint.host.clone(),
            port: endpoint.port,
            interval_limits,
            security,
        };

        engine
            .configure(&config)
            .await
            .map_err(|status| BusError::server_config(status.name()))?;
        engine
            .startup()
            .await
            .map_err(|status| BusError::server_start(status.name()))?;

        let engine = Arc::new(Mutex::new(engine));
        let running = Arc::new(AtomicBool::new(true));
        let loop_handle = tokio::spawn(run_server_loop(
            Arc::clone(&engine),
            Arc::clone(&running),
        ));

        tracing::info!(
            host = %endpoint.host,
            port = endpoint.port,
            "Publisher context created"
        );

        Ok(Self {
            engine,
            registry: TopicRegistry::new(),
            payload: PayloadSource::new(),
            running,
            loop_handle: Some(loop_handle),
            interval_limits,
        })
    }

    /// Publishes `payload` as the current value of `topic`.
    ///
    /// The topic's namespace and node are created on first publish;
    /// re-publishing an existing topic skips creation. The call sleeps for
    /// the minimum publishing interval before writing, respecting the
    /// session's pacing contract.
    ///
    /// # Errors
    ///
    /// [`BusError::ServerNotRunning`] after destroy,
    /// [`BusError::TopicCreate`] when node creation fails, and
    /// [`BusError::Write`] when the engine rejects the value — including
    /// payloads beyond the size cap, which are rejected rather than
    /// truncated.
    pub async fn publish(&mut self, topic: &TopicConfig, payload: &str) -> BusResult<()> {
        if !self.running.load(Ordering::Acquire) {
            return Err(BusError::ServerNotRunning);
        }

        if payload.len() > MAX_PAYLOAD_BYTES {
            tracing::error!(
                topic = %topic.name,
                size = payload.len(),
                limit = MAX_PAYLOAD_BYTES,
                "Payload exceeds size cap"
            );
            return Err(BusError::write(
                &topic.name,
                StatusCode::BAD_REQUEST_TOO_LARGE.name(),
            ));
        }

        let namespace_index = {
            let mut engine = self.engine.lock().await;
            self.registry
                .resolve(engine.as_mut(), &topic.namespace, &topic.name, &self.payload)
                .await?
        };

        // The data-source read path serves whatever was published last.
        self.payload.store(payload);

        tokio::time::sleep(self.interval_limits.min).await;

        let status = {
            let mut engine = self.engine.lock().await;
            engine
                .write_value(namespace_index, &topic.name, payload)
                .await
        };

        if status.is_good() {
            tracing::debug!(
                topic = %topic.name,
                namespace_index,
                bytes = payload.len(),
                "Published"
            );
            Ok(())
        } else {
            Err(BusError::write(&topic.name, status.name()))
        }
    }

    /// Last payload accepted by [`publish`](Self::publish).
    pub fn last_published(&self) -> String {
        self.payload.read()
    }

    /// Stops the server loop and shuts the engine down. Idempotent.
    pub async fn destroy(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.loop_handle.take() {
            let _ = handle.await;
            self.engine.lock().await.shutdown().await;
            tracing::info!("Publisher context destroyed");
        }
    }
}

// =============================================================================
// Server loop
// =============================================================================

/// Iterates the engine until the running flag clears.
async fn run_server_loop(engine: Arc<Mutex<Box<dyn ServerEngine>>>, running: Arc<AtomicBool>) {
    tracing::debug!("Server loop started");
    while running.load(Ordering::Acquire) {
        let delay = {
            let mut engine = engine.lock().await;
            engine.iterate().await
        };
        // Lock released while sleeping so the publish path can write.
        tokio::time::sleep(delay).await;
    }
    tracing::debug!("Server loop stopped");
}

// =============================================================================
// Tests
// =============================================================================
