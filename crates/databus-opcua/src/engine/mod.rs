// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Protocol engine abstraction.
//!
//! The bus core never talks OPC-UA wire primitives directly. Everything the
//! session/subscription orchestration layer needs from the protocol stack is
//! captured by two traits:
//!
//! - [`ServerEngine`] — the publisher-side surface: configuration, startup,
//!   one non-blocking iterate step, namespace/node management, value writes.
//! - [`ClientEngine`] — the subscriber-side surface: connect/state, an
//!   objects-folder browse, subscription and monitored-item creation, and a
//!   bounded iterate step that yields value-change notifications.
//!
//! Frame encoding, certificate validation and the channel handshake live
//! entirely behind these traits. The [`memory`] module provides an
//! in-process loopback engine pair for tests and development; the `real`
//! module (feature `real-transport`) adapts the `opcua` crate.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::security::SecurityArtifacts;

pub mod memory;

#[cfg(feature = "real-transport")]
pub mod real;

// =============================================================================
// Tuning constants
// =============================================================================

/// Hard ceiling on a topic payload, in bytes. Keeps a value comfortably
/// under the wire/application message size limit.
pub const MAX_PAYLOAD_BYTES: usize = 61 * 1024;

/// Publishing/sampling interval limits for insecure contexts.
pub const INSECURE_INTERVAL_LIMITS: IntervalLimits = IntervalLimits {
    min: Duration::from_millis(5),
    max: Duration::from_millis(10),
};

/// Publishing/sampling interval limits for secure contexts.
pub const SECURE_INTERVAL_LIMITS: IntervalLimits = IntervalLimits {
    min: Duration::from_millis(5),
    max: Duration::from_millis(5),
};

/// Client connect timeout.
pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Bound on one client iterate step.
pub const CLIENT_ITERATE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Wait between reconnect attempts.
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Requested publishing interval for subscriptions; zero lets the server
/// revise it to its own minimum.
pub const REQUESTED_PUBLISHING_INTERVAL: Duration = Duration::ZERO;

// =============================================================================
// StatusCode
// =============================================================================

/// An OPC-UA service status code.
///
/// Only the top-level severity bits and a handful of names matter to the
/// bus; everything else is carried through verbatim for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatusCode(pub u32);

impl StatusCode {
    /// Operation succeeded.
    pub const GOOD: StatusCode = StatusCode(0x0000_0000);
    /// Unspecified failure.
    pub const BAD: StatusCode = StatusCode(0x8000_0000);
    /// Internal engine failure.
    pub const BAD_INTERNAL_ERROR: StatusCode = StatusCode(0x8002_0000);
    /// Request exceeded the message size limit.
    pub const BAD_REQUEST_TOO_LARGE: StatusCode = StatusCode(0x8009_0000);
    /// Operation timed out.
    pub const BAD_TIMEOUT: StatusCode = StatusCode(0x800C_0000);
    /// No session with the server.
    pub const BAD_SERVER_NOT_CONNECTED: StatusCode = StatusCode(0x800F_0000);
    /// The addressed node already exists.
    pub const BAD_NODE_ID_EXISTS: StatusCode = StatusCode(0x805E_0000);
    /// The addressed node does not exist.
    pub const BAD_NODE_ID_UNKNOWN: StatusCode = StatusCode(0x8062_0000);
    /// The peer refused the connection.
    pub const BAD_CONNECTION_REJECTED: StatusCode = StatusCode(0x80AC_0000);
    /// The configuration is unusable.
    pub const BAD_CONFIGURATION_ERROR: StatusCode = StatusCode(0x8089_0000);
    /// The server has been stopped.
    pub const BAD_SERVER_HALTED: StatusCode = StatusCode(0x8010_0000);
    /// The subscription id is not known to the server.
    pub const BAD_SUBSCRIPTION_ID_INVALID: StatusCode = StatusCode(0x802C_0000);

    /// Returns `true` for a good (success) status.
    #[inline]
    pub fn is_good(&self) -> bool {
        self.0 & 0x8000_0000 == 0
    }

    /// Returns `true` for a bad (failure) status.
    #[inline]
    pub fn is_bad(&self) -> bool {
        !self.is_good()
    }

    /// Returns the symbolic name of this status code.
    pub fn name(&self) -> &'static str {
        match self.0 {
            0x0000_0000 => "Good",
            0x8000_0000 => "Bad",
            0x8001_0000 => "BadUnexpectedError",
            0x8002_0000 => "BadInternalError",
            0x8003_0000 => "BadOutOfMemory",
            0x8004_0000 => "BadResourceUnavailable",
            0x8005_0000 => "BadCommunicationError",
            0x8009_0000 => "BadRequestTooLarge",
            0x800C_0000 => "BadTimeout",
            0x800F_0000 => "BadServerNotConnected",
            0x8010_0000 => "BadServerHalted",
            0x8013_0000 => "BadTooManyMonitoredItems",
            0x8015_0000 => "BadCertificateInvalid",
            0x8016_0000 => "BadSecurityChecksFailed",
            0x801D_0000 => "BadCertificateUntrusted",
            0x8025_0000 => "BadIdentityTokenRejected",
            0x8029_0000 => "BadSessionIdInvalid",
            0x802A_0000 => "BadSessionClosed",
            0x802C_0000 => "BadSubscriptionIdInvalid",
            0x805E_0000 => "BadNodeIdExists",
            0x8061_0000 => "BadNodeIdInvalid",
            0x8062_0000 => "BadNodeIdUnknown",
            0x8068_0000 => "BadNotReadable",
            0x8069_0000 => "BadNotWritable",
            0x806B_0000 => "BadNotSupported",
            0x806C_0000 => "BadNotFound",
            0x8089_0000 => "BadConfigurationError",
            0x80AC_0000 => "BadConnectionRejected",
            0x80AD_0000 => "BadDisconnect",
            _ => "UnknownStatusCode",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl Default for StatusCode {
    fn default() -> Self {
        Self::GOOD
    }
}

// =============================================================================
// ClientState
// =============================================================================

/// Connection state of a client engine.
///
/// The renewed-session distinction matters: a renewed session keeps its
/// subscriptions alive on the server, so the reconnect loop must treat it
/// as a no-op instead of re-creating the subscription set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientState {
    /// No transport connection.
    #[default]
    Disconnected,

    /// TCP open, waiting for the hello acknowledgement.
    WaitingForAck,

    /// Transport connection established.
    Connected,

    /// Secure channel open, no session yet.
    SecureChannel,

    /// An activated session with the server.
    Session,

    /// The session was renewed in place; subscriptions survived.
    SessionRenewed,

    /// The session dropped; the transport may still be up.
    SessionDisconnected,
}

impl ClientState {
    /// Returns `true` when no usable transport connection exists.
    #[inline]
    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    /// Returns `true` when an activated session exists.
    #[inline]
    pub fn has_session(&self) -> bool {
        matches!(self, Self::Session | Self::SessionRenewed)
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::WaitingForAck => write!(f, "WaitingForAck"),
            Self::Connected => write!(f, "Connected"),
            Self::SecureChannel => write!(f, "SecureChannel"),
            Self::Session => write!(f, "Session"),
            Self::SessionRenewed => write!(f, "SessionRenewed"),
            Self::SessionDisconnected => write!(f, "SessionDisconnected"),
        }
    }
}

// =============================================================================
// PayloadSource
// =============================================================================

/// Shared buffer backing a topic node's data source.
///
/// The read half of the node's data-source callback pair returns the last
/// published payload; writes arriving from the bus side are accepted but
/// never applied (publish direction is server-to-bus only).
#[derive(Debug, Clone, Default)]
pub struct PayloadSource {
    inner: Arc<parking_lot::RwLock<String>>,
}

impl PayloadSource {
    /// Creates an empty payload source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a newly published payload.
    pub fn store(&self, payload: &str) {
        *self.inner.write() = payload.to_string();
    }

    /// Returns the last published payload.
    pub fn read(&self) -> String {
        self.inner.read().clone()
    }
}

// =============================================================================
// Engine data types
// =============================================================================

/// Publishing/sampling interval bounds applied to a server configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalLimits {
    /// Minimum interval; publishes pace themselves by this bound.
    pub min: Duration,

    /// Maximum interval.
    pub max: Duration,
}

/// Configuration handed to a [`ServerEngine`] before startup.
#[derive(Debug, Clone)]
pub struct ServerEngineConfig {
    /// Hostname the server binds and announces.
    pub hostname: String,

    /// TCP port to listen on.
    pub port: u16,

    /// Interval limits derived from the security mode.
    pub interval_limits: IntervalLimits,

    /// Security material; `SecurityMode::None` for developer mode.
    pub security: SecurityArtifacts,
}

/// Configuration handed to a [`ClientEngine`] before the first connect.
#[derive(Debug, Clone)]
pub struct ClientEngineConfig {
    /// Full endpoint URL, `opc.tcp://host:port`.
    pub endpoint: String,

    /// Connect timeout.
    pub connect_timeout: Duration,

    /// Security material; `SecurityMode::None` for developer mode.
    pub security: SecurityArtifacts,
}

/// One entry of an objects-folder browse: a string-identified node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowseNode {
    /// Namespace index the node lives in.
    pub namespace_index: u16,

    /// The node's string identifier (the topic name on this bus).
    pub identifier: String,
}

/// Request to monitor one topic node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredItemRequest {
    /// Namespace index of the node.
    pub namespace_index: u16,

    /// String identifier of the node.
    pub identifier: String,
}

/// Per-item result of a batched monitored-item creation.
#[derive(Debug, Clone, Copy)]
pub struct MonitoredItemResult {
    /// Server-assigned monitored item id (meaningful when `status` is good).
    pub monitored_item_id: u32,

    /// Creation status for this item.
    pub status: StatusCode,
}

/// A value-change notification drained from the client engine.
#[derive(Debug, Clone)]
pub struct ValueChange {
    /// Monitored item the change belongs to.
    pub monitored_item_id: u32,

    /// The new scalar string value.
    pub value: String,

    /// When the engine surfaced the change.
    pub received_at: DateTime<Utc>,
}

impl ValueChange {
    /// Creates a notification stamped with the current time.
    pub fn new(monitored_item_id: u32, value: impl Into<String>) -> Self {
        Self {
            monitored_item_id,
            value: value.into(),
            received_at: Utc::now(),
        }
    }
}

// =============================================================================
// ServerEngine
// =============================================================================

/// Publisher-side protocol engine.
///
/// # Contract
///
/// All methods are called with the engine behind a single mutex: the server
/// loop's [`iterate`](Self::iterate) step and the publish path never run
/// concurrently. Implementations therefore do not need interior locking.
#[async_trait]
pub trait ServerEngine: Send + Sync {
    /// Applies the server configuration. Called exactly once, before
    /// [`startup`](Self::startup).
    async fn configure(&mut self, config: &ServerEngineConfig) -> Result<(), StatusCode>;

    /// Starts the server.
    async fn startup(&mut self) -> Result<(), StatusCode>;

    /// Performs one non-blocking engine iteration and returns the maximum
    /// delay until the next call must happen.
    async fn iterate(&mut self) -> Duration;

    /// Stops the server and releases engine resources.
    async fn shutdown(&mut self);

    /// Returns the index of an existing namespace, if any.
    async fn find_namespace(&mut self, namespace: &str) -> Option<u16>;

    /// Registers a namespace and returns its index.
    async fn add_namespace(&mut self, namespace: &str) -> Result<u16, StatusCode>;

    /// Adds a data-source-backed variable node at
    /// `(namespace_index, identifier)`. Returns `BadNodeIdExists` when the
    /// node is already present; callers treat that as success.
    async fn add_data_source_node(
        &mut self,
        namespace_index: u16,
        identifier: &str,
        source: PayloadSource,
    ) -> StatusCode;

    /// Writes the node's current value.
    async fn write_value(
        &mut self,
        namespace_index: u16,
        identifier: &str,
        payload: &str,
    ) -> StatusCode;
}

// =============================================================================
// ClientEngine
// =============================================================================

/// Subscriber-side protocol engine.
///
/// The reconnect loop owns the engine exclusively; no interior locking is
/// required of implementations.
#[async_trait]
pub trait ClientEngine: Send + Sync {
    /// Applies the client configuration. Called exactly once, before the
    /// first [`connect`](Self::connect).
    async fn configure(&mut self, config: &ClientEngineConfig) -> Result<(), StatusCode>;

    /// Connects (or reconnects) to the configured endpoint.
    async fn connect(&mut self) -> StatusCode;

    /// Closes the connection.
    async fn disconnect(&mut self);

    /// Returns the current connection state.
    fn state(&self) -> ClientState;

    /// Browses the server's objects folder, returning every
    /// string-identified node.
    async fn browse_objects(&mut self) -> Result<Vec<BrowseNode>, StatusCode>;

    /// Issues a subscription-create request and returns the subscription id.
    async fn create_subscription(
        &mut self,
        publishing_interval: Duration,
    ) -> Result<u32, StatusCode>;

    /// Deletes a subscription and all of its monitored items.
    async fn delete_subscription(&mut self, subscription_id: u32) -> StatusCode;

    /// Submits a batch of monitored-item creation requests. The outer
    /// `Result` is the service-level outcome; per-item statuses are
    /// reported individually and must not fail the batch.
    async fn create_monitored_items(
        &mut self,
        subscription_id: u32,
        items: &[MonitoredItemRequest],
    ) -> Result<Vec<MonitoredItemResult>, StatusCode>;

    /// Drives the engine for at most `timeout`, returning any value-change
    /// notifications that arrived.
    async fn run_iterate(&mut self, timeout: Duration) -> Vec<ValueChange>;
}

// =============================================================================
// EngineFactory
// =============================================================================

/// Produces engine instances for a bus.
///
/// A factory lets one bus value build its publisher and subscriber engines
/// from the same backing (the loopback memory bus in tests, the `opcua`
/// stack in production).
pub trait EngineFactory: Send + Sync {
    /// Creates a fresh, unconfigured server engine.
    fn server_engine(&self) -> Box<dyn ServerEngine>;

    /// Creates a fresh, unconfigured client engine.
    fn client_engine(&self) -> Box<dyn ClientEngine>;
}

// =============================================================================
// Tests
// =============================================================================
