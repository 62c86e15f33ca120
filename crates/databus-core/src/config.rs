// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Bus configuration types.
//!
//! A bus context is configured once at creation time through a
//! [`ContextConfig`]; topics are addressed through [`TopicConfig`] values.
//! The direction of a context is fixed for its lifetime, and the security
//! mode is derived from the certificate material exactly once at creation.
//!
//! # Examples
//!
//! ```
//! use databus_core::config::{ContextConfig, Direction};
//!
//! // Insecure ("developer mode") publisher: no certificate material at all.
//! let config = ContextConfig::builder()
//!     .endpoint("opcua://localhost:65003")
//!     .direction(Direction::Pub)
//!     .build()
//!     .unwrap();
//!
//! assert!(!config.has_security_material());
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BusError;

// =============================================================================
// Direction
// =============================================================================

/// Direction of a bus context.
///
/// A process acts as a publisher or a subscriber through a given context;
/// the direction never changes after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    /// Publisher: owns a server session and serves topic values.
    Pub,

    /// Subscriber: owns a client session and receives topic notifications.
    Sub,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pub => write!(f, "PUB"),
            Self::Sub => write!(f, "SUB"),
        }
    }
}

impl FromStr for Direction {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PUB" => Ok(Self::Pub),
            "SUB" => Ok(Self::Sub),
            other => Err(BusError::config_invalid(format!(
                "Unknown direction '{other}', expected PUB or SUB"
            ))),
        }
    }
}

// =============================================================================
// DataType
// =============================================================================

/// Payload type tag carried by a topic.
///
/// Only UTF-8 string payloads are supported today; the tag exists so that
/// publishers and subscribers agree on the payload interpretation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// UTF-8 string payload.
    #[default]
    String,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => write!(f, "string"),
        }
    }
}

impl FromStr for DataType {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(Self::String),
            other => Err(BusError::config_invalid(format!(
                "Unsupported data type '{other}'"
            ))),
        }
    }
}

// =============================================================================
// TopicConfig
// =============================================================================

/// Addressing information for a single topic.
///
/// A topic is identified by its `(namespace, name)` pair; the namespace is a
/// logical grouping mapped to an integer index by the underlying protocol at
/// runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicConfig {
    /// Logical namespace the topic lives in.
    pub namespace: String,

    /// Topic name; doubles as the node's string identifier.
    pub name: String,

    /// Payload type tag.
    #[serde(default)]
    pub data_type: DataType,
}

impl TopicConfig {
    /// Creates a string-typed topic.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            data_type: DataType::String,
        }
    }

    /// Returns the identity key of this topic.
    pub fn key(&self) -> (&str, &str) {
        (&self.namespace, &self.name)
    }
}

impl fmt::Display for TopicConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// =============================================================================
// ContextConfig
// =============================================================================

/// Configuration for a bus context.
///
/// The security mode is not stored here: it is derived from the presence of
/// certificate material when the context is created, and never changes
/// afterwards. A context with no certificate, no private key and no trusted
/// certificates runs insecure ("developer mode"); anything else must supply
/// all three.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Bus endpoint, `scheme://host:port`.
    pub endpoint: String,

    /// Context direction, fixed for the context lifetime.
    pub direction: Direction,

    /// Path to the application instance certificate (DER).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_file: Option<String>,

    /// Path to the private key matching the certificate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_file: Option<String>,

    /// Ordered list of trusted certificate paths.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trusted_certificate_files: Vec<String>,
}

impl ContextConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> ContextConfigBuilder {
        ContextConfigBuilder::default()
    }

    /// Returns `true` if any certificate material is configured.
    ///
    /// Empty strings count as absent, so a config whose security fields
    /// are all `""` still selects developer mode.
    pub fn has_security_material(&self) -> bool {
        let present = |s: &Option<String>| s.as_deref().is_some_and(|p| !p.is_empty());
        present(&self.certificate_file)
            || present(&self.private_key_file)
            || self.trusted_certificate_files.iter().any(|p| !p.is_empty())
    }
}

// =============================================================================
// ContextConfigBuilder
// =============================================================================

/// Builder for [`ContextConfig`].
#[derive(Debug, Default)]
pub struct ContextConfigBuilder {
    endpoint: Option<String>,
    direction: Option<Direction>,
    certificate_file: Option<String>,
    private_key_file: Option<String>,
    trusted_certificate_files: Vec<String>,
}

impl ContextConfigBuilder {
    /// Sets the bus endpoint (`scheme://host:port`).
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Sets the context direction.
    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    /// Sets the application instance certificate path.
    pub fn certificate_file(mut self, path: impl Into<String>) -> Self {
        self.certificate_file = Some(path.into());
        self
    }

    /// Sets the private key path.
    pub fn private_key_file(mut self, path: impl Into<String>) -> Self {
        self.private_key_file = Some(path.into());
        self
    }

    /// Adds a trusted certificate path.
    pub fn trusted_certificate_file(mut self, path: impl Into<String>) -> Self {
        self.trusted_certificate_files.push(path.into());
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConfigInvalid`] when the endpoint or direction is
    /// missing.
    pub fn build(self) -> Result<ContextConfig, BusError> {
        let endpoint = self
            .endpoint
            .filter(|e| !e.is_empty())
            .ok_or_else(|| BusError::config_invalid("Missing endpoint"))?;
        let direction = self
            .direction
            .ok_or_else(|| BusError::config_invalid("Missing direction"))?;

        Ok(ContextConfig {
            endpoint,
            direction,
            certificate_file: self.certificate_file,
            private_key_file: self.private_key_file,
            trusted_certificate_files: self.trusted_certificate_files,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_parse() {
        assert_eq!("PUB".parse::<Direction>().unwrap(), Direction::Pub);
        assert_eq!("SUB".parse::<Direction>().unwrap(), Direction::Sub);
        assert!("pub".parse::<Direction>().is_err());
    }

    #[test]
    fn test_topic_identity() {
        let a = TopicConfig::new("streammanager", "topic0");
        let b = TopicConfig::new("streammanager", "topic0");
        let c = TopicConfig::new("streammanager", "topic1");
        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), c.key());
        assert_eq!(a.to_string(), "streammanager/topic0");
    }

    #[test]
    fn test_builder_requires_endpoint_and_direction() {
        assert!(ContextConfig::builder().build().is_err());
        assert!(ContextConfig::builder()
            .endpoint("opcua://localhost:65003")
            .build()
            .is_err());

        let config = ContextConfig::builder()
            .endpoint("opcua://localhost:65003")
            .direction(Direction::Sub)
            .build()
            .unwrap();
        assert_eq!(config.direction, Direction::Sub);
    }

    #[test]
    fn test_security_material_detection() {
        let insecure = ContextConfig::builder()
            .endpoint("opcua://localhost:65003")
            .direction(Direction::Pub)
            .build()
            .unwrap();
        assert!(!insecure.has_security_material());

        // Empty strings are treated as absent.
        let empty_strings = ContextConfig::builder()
            .endpoint("opcua://localhost:65003")
            .direction(Direction::Pub)
            .certificate_file("")
            .private_key_file("")
            .trusted_certificate_file("")
            .build()
            .unwrap();
        assert!(!empty_strings.has_security_material());

        let secure = ContextConfig::builder()
            .endpoint("opcua://localhost:65003")
            .direction(Direction::Pub)
            .certificate_file("/etc/certs/server.der")
            .private_key_file("/etc/certs/server.key.der")
            .trusted_certificate_file("/etc/certs/ca.der")
            .build()
            .unwrap();
        assert!(secure.has_security_material());
    }

    #[test]
    fn test_config_serde_round_trip() {
        let config = ContextConfig::builder()
            .endpoint("opcua://localhost:65003")
            .direction(Direction::Pub)
            .certificate_file("/etc/certs/server.der")
            .private_key_file("/etc/certs/server.key.der")
            .trusted_certificate_file("/etc/certs/ca.der")
            .build()
            .unwrap();

        let json = serde_json::to_string(&config).unwrap();
        let parsed: ContextConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.endpoint, config.endpoint);
        assert_eq!(parsed.direction, Direction::Pub);
        assert_eq!(parsed.trusted_certificate_files.len(), 1);
    }
}
