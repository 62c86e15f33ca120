// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The data bus boundary contract.
//!
//! A [`DataBus`] hides the session/namespace/node model of the underlying
//! messaging protocol behind a topic-oriented interface: create a publisher
//! or subscriber context, publish a value to a named topic, subscribe to a
//! set of topics with a handler, and tear everything down.
//!
//! Notifications are delivered through a [`DataChangeHandler`]. The handler
//! runs on the bus's background execution context: it is invoked zero or
//! more times per active subscription, with no delivery-order guarantee
//! across distinct topics, and must not block indefinitely or it will stall
//! reconnect detection and all further notifications.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::{ContextConfig, TopicConfig};
use crate::error::{BusError, BusResult};

// =============================================================================
// SubscriptionTrigger
// =============================================================================

/// Trigger word accepted by [`DataBus::subscribe`].
///
/// Only `START` is meaningful today; it is kept as an explicit type so the
/// boundary stays compatible with the historical string-typed trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionTrigger {
    /// Begin delivering notifications for the subscribed topics.
    Start,
}

impl fmt::Display for SubscriptionTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "START"),
        }
    }
}

impl FromStr for SubscriptionTrigger {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "START" => Ok(Self::Start),
            other => Err(BusError::config_invalid(format!(
                "Unknown subscription trigger '{other}'"
            ))),
        }
    }
}

// =============================================================================
// DataChangeHandler
// =============================================================================

/// Receives value-change notifications for subscribed topics.
///
/// Implementations must be cheap: the handler is awaited from the
/// subscriber's background loop, so a slow handler delays reconnect
/// detection and every following notification.
#[async_trait]
pub trait DataChangeHandler: Send + Sync {
    /// Called when a subscribed topic's value changes.
    async fn on_data_change(&self, topic: &str, payload: &str);
}

/// A value-change sample as delivered over a [`ChannelHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSample {
    /// The topic whose value changed.
    pub topic: String,

    /// The new payload.
    pub payload: String,
}

/// Channel-backed handler: forwards every notification into an `mpsc`
/// channel so the application consumes samples at its own pace.
pub struct ChannelHandler {
    sender: mpsc::Sender<TopicSample>,
}

impl ChannelHandler {
    /// Creates a handler forwarding to `sender`.
    pub fn new(sender: mpsc::Sender<TopicSample>) -> Self {
        Self { sender }
    }

    /// Creates a handler together with its receiving end.
    pub fn with_channel(capacity: usize) -> (Self, mpsc::Receiver<TopicSample>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl DataChangeHandler for ChannelHandler {
    async fn on_data_change(&self, topic: &str, payload: &str) {
        // Best effort: a closed receiver just drops the sample.
        let _ = self
            .sender
            .send(TopicSample {
                topic: topic.to_string(),
                payload: payload.to_string(),
            })
            .await;
    }
}

// =============================================================================
// DataBus
// =============================================================================

/// The public boundary of a data bus implementation.
///
/// # Lifecycle
///
/// 1. `context_create` — runs the security configurator and endpoint
///    resolver once, then establishes the publisher or subscriber session.
/// 2. `publish` / `subscribe` — topic-oriented data movement.
/// 3. `context_destroy` — stops background loops and releases everything.
///    Safe to call repeatedly, and safe to call after a failed create.
#[async_trait]
pub trait DataBus: Send + Sync {
    /// Creates the bus context described by `config`.
    ///
    /// For `PUB` this starts the server session and its background loop;
    /// for `SUB` it connects the client session.
    async fn context_create(&mut self, config: &ContextConfig) -> BusResult<()>;

    /// Publishes `payload` to `topic`, creating the topic on first use.
    async fn publish(&mut self, topic: &TopicConfig, payload: &str) -> BusResult<()>;

    /// Subscribes to `topics`, delivering notifications to `handler`.
    ///
    /// Only one active subscription set is retained per context; a second
    /// call replaces the previous set.
    async fn subscribe(
        &mut self,
        topics: &[TopicConfig],
        trigger: SubscriptionTrigger,
        handler: Arc<dyn DataChangeHandler>,
    ) -> BusResult<()>;

    /// Destroys whichever contexts exist. Idempotent.
    async fn context_destroy(&mut self);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_parse() {
        assert_eq!(
            "START".parse::<SubscriptionTrigger>().unwrap(),
            SubscriptionTrigger::Start
        );
        assert!("STOP".parse::<SubscriptionTrigger>().is_err());
    }

    #[tokio::test]
    async fn test_channel_handler_forwards_samples() {
        let (handler, mut rx) = ChannelHandler::with_channel(8);
        handler.on_data_change("topic0", "hello topic0").await;

        let sample = rx.recv().await.unwrap();
        assert_eq!(sample.topic, "topic0");
        assert_eq!(sample.payload, "hello topic0");
    }

    #[tokio::test]
    async fn test_channel_handler_tolerates_closed_receiver() {
        let (handler, rx) = ChannelHandler::with_channel(1);
        drop(rx);
        // Must not panic or error when nobody is listening.
        handler.on_data_change("topic0", "dropped").await;
    }
}
