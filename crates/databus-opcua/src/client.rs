// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Subscriber-side context: a client session plus the reconnect loop.
//!
//! The reconnect loop owns the engine and the subscription state
//! exclusively. `subscribe` talks to a running loop over an `mpsc` command
//! channel and awaits the outcome on a `oneshot`, so no shared structure is
//! ever mutated from two tasks.
//!
//! Loop behavior per iteration: if the session dropped, mark the
//! subscription lost and reconnect — waiting one second between failed
//! attempts — and re-create the subscription set once the session is
//! re-established. A renewed session keeps its subscriptions and is treated
//! as a no-op. Otherwise drive the engine's bounded iterate step and
//! dispatch whatever notifications arrived.
//!
//! A failed subscription re-creation during a background reconnect is
//! retried on subsequent passes; only the initial, caller-visible
//! `subscribe` treats it as fatal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use databus_core::bus::{DataChangeHandler, SubscriptionTrigger};
use databus_core::config::TopicConfig;
use databus_core::endpoint::Endpoint;
use databus_core::error::{BusError, BusResult};

use crate::engine::{
    ClientEngine, ClientEngineConfig, CLIENT_ITERATE_TIMEOUT, CONNECT_TIMEOUT, RECONNECT_BACKOFF,
};
use crate::security::SecurityArtifacts;
use crate::subscription::{SubscriptionManager, SubscriptionStats};

// =============================================================================
// ClientCommand
// =============================================================================

/// Commands accepted by the reconnect loop.
enum ClientCommand {
    /// Replace the active subscription set.
    Replace {
        topics: Vec<TopicConfig>,
        handler: Arc<dyn DataChangeHandler>,
        reply: oneshot::Sender<BusResult<()>>,
    },
}

// =============================================================================
// ClientContext
// =============================================================================

/// Owns one subscriber session.
pub struct ClientContext {
    endpoint_url: String,
    exited: Arc<AtomicBool>,
    stats: Arc<SubscriptionStats>,
    /// Present until the first subscribe hands the engine to the loop.
    engine: Option<Box<dyn ClientEngine>>,
    command_tx: Option<mpsc::Sender<ClientCommand>>,
    loop_handle: Option<JoinHandle<()>>,
}

impl ClientContext {
    /// Configures the client engine and performs the initial connect.
    ///
    /// # Errors
    ///
    /// [`BusError::ClientConfig`] when the engine rejects the
    /// configuration, [`BusError::Connect`] (carrying the protocol status
    /// name) when the initial connect fails.
    pub async fn create(
        endpoint: &Endpoint,
        security: SecurityArtifacts,
        mut engine: Box<dyn ClientEngine>,
    ) -> BusResult<Self> {
        let endpoint_url = format!("opc.tcp://{}:{}", endpoint.host, endpoint.port);

        let config = ClientEngineConfig {
            endpoint: endpoint_url.clone(),
            connect_timeout: CONNECT_TIMEOUT,
            security,
        };
        engine
            .configure(&config)
            .await
            .map_err(|status| BusError::client_config(status.name()))?;

        let status = engine.connect().await;
        if status.is_bad() {
            return Err(BusError::connect(&endpoint_url, status.name()));
        }

        tracing::info!(endpoint = %endpoint_url, "Subscriber context created");

        Ok(Self {
            endpoint_url,
            exited: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(SubscriptionStats::new()),
            engine: Some(engine),
            command_tx: None,
            loop_handle: None,
        })
    }

    /// Subscription activity counters for this context.
    pub fn stats(&self) -> Arc<SubscriptionStats> {
        Arc::clone(&self.stats)
    }

    /// Subscribes to `topics`, replacing any previous subscription set.
    ///
    /// The first call creates the subscription synchronously — failure is
    /// fatal to the call — and then starts the reconnect loop, which keeps
    /// the subscription alive from that point on. Later calls route a
    /// replace command through the loop.
    pub async fn subscribe(
        &mut self,
        topics: &[TopicConfig],
        trigger: SubscriptionTrigger,
        handler: Arc<dyn DataChangeHandler>,
    ) -> BusResult<()> {
        // Single trigger today; the match keeps the contract explicit.
        match trigger {
            SubscriptionTrigger::Start => {}
        }

        if let Some(tx) = &self.command_tx {
            let (reply_tx, reply_rx) = oneshot::channel();
            tx.send(ClientCommand::Replace {
                topics: topics.to_vec(),
                handler,
                reply: reply_tx,
            })
            .await
            .map_err(|_| BusError::ClientNotConnected)?;
            return reply_rx.await.map_err(|_| BusError::ClientNotConnected)?;
        }

        let Some(mut engine) = self.engine.take() else {
            return Err(BusError::ClientNotConnected);
        };

        let mut manager = SubscriptionManager::new(
            topics.to_vec(),
            handler,
            Arc::clone(&self.stats),
        );
        if let Err(err) = manager.create_subscription(engine.as_mut()).await {
            // Keep the connected client so a corrected subscribe can retry.
            self.engine = Some(engine);
            return Err(err);
        }

        let (tx, rx) = mpsc::channel(4);
        self.command_tx = Some(tx);
        self.loop_handle = Some(tokio::spawn(run_reconnect_loop(
            engine,
            manager,
            Arc::clone(&self.exited),
            rx,
            self.endpoint_url.clone(),
        )));

        Ok(())
    }

    /// Stops the reconnect loop and disconnects. Idempotent.
    pub async fn destroy(&mut self) {
        self.exited.store(true, Ordering::Release);
        // Closing the command channel wakes the loop immediately.
        self.command_tx = None;
        if let Some(handle) = self.loop_handle.take() {
            let _ = handle.await;
            tracing::info!(endpoint = %self.endpoint_url, "Subscriber context destroyed");
        }
        if let Some(mut engine) = self.engine.take() {
            engine.disconnect().await;
        }
    }
}

// =============================================================================
// Reconnect loop
// =============================================================================

async fn run_reconnect_loop(
    mut engine: Box<dyn ClientEngine>,
    mut manager: SubscriptionManager,
    exited: Arc<AtomicBool>,
    mut commands: mpsc::Receiver<ClientCommand>,
    endpoint_url: String,
) {
    tracing::info!(endpoint = %endpoint_url, "Reconnect loop started");

    while !exited.load(Ordering::Acquire) {
        if engine.state().is_disconnected() {
            manager.mark_lost();

            let status = engine.connect().await;
            if status.is_bad() {
                tracing::warn!(
                    endpoint = %endpoint_url,
                    status = %status,
                    "Not connected, retrying in 1 second"
                );
                tokio::select! {
                    biased;
                    cmd = commands.recv() => match cmd {
                        Some(cmd) => handle_command(&mut engine, &mut manager, cmd).await,
                        None => break,
                    },
                    _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
                }
                continue;
            }

            if engine.state().has_session() {
                match manager.create_subscription(engine.as_mut()).await {
                    Ok(()) => {
                        tracing::info!(endpoint = %endpoint_url, "Subscription restored");
                    }
                    Err(err) => {
                        // Retried on the next pass; the session may still
                        // be settling.
                        err.log("subscription restore");
                        tokio::time::sleep(RECONNECT_BACKOFF).await;
                        continue;
                    }
                }
            }
        }

        tokio::select! {
            biased;
            cmd = commands.recv() => match cmd {
                Some(cmd) => handle_command(&mut engine, &mut manager, cmd).await,
                None => break,
            },
            changes = engine.run_iterate(CLIENT_ITERATE_TIMEOUT) => {
                manager.dispatch(changes).await;
            }
        }
    }

    engine.disconnect().await;
    tracing::info!(endpoint = %endpoint_url, "Reconnect loop stopped");
}

async fn handle_command(
    engine: &mut Box<dyn ClientEngine>,
    manager: &mut SubscriptionManager,
    command: ClientCommand,
) {
    match command {
        ClientCommand::Replace {
            topics,
            handler,
            reply,
        } => {
            let result = manager.replace(engine.as_mut(), topics, handler).await;
            let _ = reply.send(result);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
