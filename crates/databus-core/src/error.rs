// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Error types for the data bus.
//!
//! A single [`BusError`] enum covers every failure the bus surfaces to a
//! caller. Creation-time and publish-time failures are returned
//! synchronously; failures on the background loops (reconnects, individual
//! monitored-item results) have no open call frame to report through and are
//! recorded via `tracing` only.
//!
//! # Error Categories
//!
//! ```text
//! BusError
//! ├── ConfigInvalid        - Bad or inconsistent bus configuration
//! ├── MalformedEndpoint    - Endpoint string could not be parsed
//! ├── CertificateLoad      - Certificate/key/trust material unreadable
//! ├── ServerConfig         - Publisher-side engine configuration failed
//! ├── ServerStart          - Publisher-side engine failed to start
//! ├── ServerNotRunning     - Publish before the publisher context exists
//! ├── TopicCreate          - Topic node creation failed
//! ├── Write                - Value write rejected by the engine
//! ├── ClientConfig         - Subscriber-side engine configuration failed
//! ├── Connect              - Initial connect failed
//! ├── ClientNotConnected   - Subscribe before the subscriber context exists
//! └── SubscriptionCreate   - Subscription creation failed
//! ```

use std::time::Duration;

use thiserror::Error;

/// Convenience result alias used throughout the bus.
pub type BusResult<T> = Result<T, BusError>;

// =============================================================================
// BusError
// =============================================================================

/// The error type for all data bus operations.
#[derive(Debug, Error)]
pub enum BusError {
    /// The bus configuration is invalid or inconsistent.
    #[error("Invalid bus configuration: {reason}")]
    ConfigInvalid {
        /// Why the configuration was rejected.
        reason: String,
    },

    /// The endpoint string could not be parsed as `scheme://host:port`.
    #[error("Malformed endpoint '{endpoint}': {reason}")]
    MalformedEndpoint {
        /// The offending endpoint string.
        endpoint: String,
        /// Why parsing failed.
        reason: String,
    },

    /// Certificate, private key, or trust-list material could not be loaded.
    #[error("Failed to load certificate material from '{path}'")]
    CertificateLoad {
        /// Path of the file that failed to load.
        path: String,
    },

    /// The publisher-side engine configuration could not be built.
    #[error("Server configuration failed: {reason}")]
    ServerConfig {
        /// Engine-reported reason.
        reason: String,
    },

    /// The publisher-side engine failed to start.
    #[error("Server failed to start: {status}")]
    ServerStart {
        /// Engine status name.
        status: String,
    },

    /// `publish` was called before a publisher context was created.
    #[error("Server instance is not instantiated")]
    ServerNotRunning,

    /// The topic node could not be created in the information model.
    #[error("Failed to create topic '{topic}' in namespace '{namespace}': {status}")]
    TopicCreate {
        /// Topic namespace.
        namespace: String,
        /// Topic name.
        topic: String,
        /// Engine status name.
        status: String,
    },

    /// The engine rejected a value write.
    #[error("Write failed for topic '{topic}': {status}")]
    Write {
        /// Topic name.
        topic: String,
        /// Engine status name.
        status: String,
    },

    /// The subscriber-side engine configuration could not be built.
    #[error("Client configuration failed: {reason}")]
    ClientConfig {
        /// Engine-reported reason.
        reason: String,
    },

    /// The initial connect to the remote endpoint failed.
    #[error("Connect to '{endpoint}' failed: {status}")]
    Connect {
        /// Endpoint we tried to reach.
        endpoint: String,
        /// Engine status name.
        status: String,
    },

    /// `subscribe` was called before a subscriber context was created.
    #[error("Client instance is not created")]
    ClientNotConnected,

    /// The subscription-create request failed.
    #[error("Subscription creation failed: {status}")]
    SubscriptionCreate {
        /// Engine status name.
        status: String,
    },
}

impl BusError {
    // =========================================================================
    // Factory Methods
    // =========================================================================

    /// Creates a configuration error.
    pub fn config_invalid(reason: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            reason: reason.into(),
        }
    }

    /// Creates a malformed endpoint error.
    pub fn malformed_endpoint(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedEndpoint {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    /// Creates a certificate load error.
    pub fn certificate_load(path: impl Into<String>) -> Self {
        Self::CertificateLoad { path: path.into() }
    }

    /// Creates a server configuration error.
    pub fn server_config(reason: impl Into<String>) -> Self {
        Self::ServerConfig {
            reason: reason.into(),
        }
    }

    /// Creates a server start error.
    pub fn server_start(status: impl Into<String>) -> Self {
        Self::ServerStart {
            status: status.into(),
        }
    }

    /// Creates a topic creation error.
    pub fn topic_create(
        namespace: impl Into<String>,
        topic: impl Into<String>,
        status: impl Into<String>,
    ) -> Self {
        Self::TopicCreate {
            namespace: namespace.into(),
            topic: topic.into(),
            status: status.into(),
        }
    }

    /// Creates a write error.
    pub fn write(topic: impl Into<String>, status: impl Into<String>) -> Self {
        Self::Write {
            topic: topic.into(),
            status: status.into(),
        }
    }

    /// Creates a client configuration error.
    pub fn client_config(reason: impl Into<String>) -> Self {
        Self::ClientConfig {
            reason: reason.into(),
        }
    }

    /// Creates a connect error.
    pub fn connect(endpoint: impl Into<String>, status: impl Into<String>) -> Self {
        Self::Connect {
            endpoint: endpoint.into(),
            status: status.into(),
        }
    }

    /// Creates a subscription creation error.
    pub fn subscription_create(status: impl Into<String>) -> Self {
        Self::SubscriptionCreate {
            status: status.into(),
        }
    }

    // =========================================================================
    // Error Properties
    // =========================================================================

    /// Returns `true` if the operation may succeed on a later attempt.
    ///
    /// Connectivity failures are transient by nature; configuration and
    /// certificate problems require operator intervention.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connect { .. }
            | Self::Write { .. }
            | Self::SubscriptionCreate { .. }
            | Self::ServerStart { .. } => true,
            Self::ConfigInvalid { .. }
            | Self::MalformedEndpoint { .. }
            | Self::CertificateLoad { .. }
            | Self::ServerConfig { .. }
            | Self::ServerNotRunning
            | Self::TopicCreate { .. }
            | Self::ClientConfig { .. }
            | Self::ClientNotConnected => false,
        }
    }

    /// Returns the suggested delay before retrying, if retryable.
    pub fn suggested_retry_delay(&self) -> Option<Duration> {
        match self {
            Self::Connect { .. } => Some(Duration::from_secs(1)),
            Self::SubscriptionCreate { .. } => Some(Duration::from_secs(1)),
            Self::Write { .. } => Some(Duration::from_millis(100)),
            Self::ServerStart { .. } => Some(Duration::from_secs(2)),
            _ => None,
        }
    }

    /// Returns the error category for logging and metrics.
    pub fn category(&self) -> &'static str {
        match self {
            Self::ConfigInvalid { .. } => "config",
            Self::MalformedEndpoint { .. } => "endpoint",
            Self::CertificateLoad { .. } => "security",
            Self::ServerConfig { .. } | Self::ServerStart { .. } | Self::ServerNotRunning => {
                "server"
            }
            Self::TopicCreate { .. } | Self::Write { .. } => "publish",
            Self::ClientConfig { .. } | Self::Connect { .. } | Self::ClientNotConnected => {
                "client"
            }
            Self::SubscriptionCreate { .. } => "subscription",
        }
    }

    /// Logs this error with a level appropriate to its category.
    pub fn log(&self, context: &str) {
        if self.is_retryable() {
            tracing::warn!(
                category = self.category(),
                context = context,
                "{self}"
            );
        } else {
            tracing::error!(
                category = self.category(),
                context = context,
                "{self}"
            );
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(BusError::connect("opc.tcp://localhost:4840", "BadTimeout").is_retryable());
        assert!(BusError::subscription_create("BadInternalError").is_retryable());
        assert!(!BusError::config_invalid("no endpoint").is_retryable());
        assert!(!BusError::ClientNotConnected.is_retryable());
        assert!(!BusError::certificate_load("/tmp/missing.der").is_retryable());
    }

    #[test]
    fn test_category() {
        assert_eq!(BusError::ServerNotRunning.category(), "server");
        assert_eq!(BusError::write("topic0", "BadTypeMismatch").category(), "publish");
        assert_eq!(
            BusError::malformed_endpoint("opcua:/host", "missing port").category(),
            "endpoint"
        );
    }

    #[test]
    fn test_display_carries_status_name() {
        let err = BusError::connect("opc.tcp://127.0.0.1:4840", "BadConnectionRejected");
        let rendered = err.to_string();
        assert!(rendered.contains("BadConnectionRejected"));
        assert!(rendered.contains("opc.tcp://127.0.0.1:4840"));
    }

    #[test]
    fn test_retry_delay_only_for_retryable() {
        assert!(BusError::connect("e", "s").suggested_retry_delay().is_some());
        assert!(BusError::ServerNotRunning.suggested_retry_delay().is_none());
    }
}
