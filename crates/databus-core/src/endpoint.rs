// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Endpoint string resolution.
//!
//! Bus endpoints are written as `scheme://host:port`. The resolver splits
//! the string into its three tokens and validates the port. The port sign
//! is normalized to non-negative regardless of parse artifacts, so
//! `opcua://localhost:-65003` resolves to port 65003.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BusError;

// =============================================================================
// Endpoint
// =============================================================================

/// A resolved bus endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// URI scheme selecting the bus type (e.g. `opcua`).
    pub scheme: String,

    /// Host name or address.
    pub host: String,

    /// TCP port.
    pub port: u16,
}

impl Endpoint {
    /// Parses an endpoint of the form `scheme://host:port`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::MalformedEndpoint`] when fewer than three tokens
    /// are present, the host is empty, or the port is not an integer that
    /// fits a TCP port after sign normalization.
    pub fn parse(endpoint: &str) -> Result<Self, BusError> {
        let (scheme, rest) = endpoint.split_once("://").ok_or_else(|| {
            BusError::malformed_endpoint(endpoint, "expected scheme://host:port")
        })?;

        if scheme.is_empty() {
            return Err(BusError::malformed_endpoint(endpoint, "empty scheme"));
        }

        let (host, port_token) = rest.rsplit_once(':').ok_or_else(|| {
            BusError::malformed_endpoint(endpoint, "missing port separator")
        })?;

        if host.is_empty() {
            return Err(BusError::malformed_endpoint(endpoint, "empty host"));
        }

        let port = port_token.parse::<i64>().map_err(|_| {
            BusError::malformed_endpoint(
                endpoint,
                format!("port '{port_token}' is not an integer"),
            )
        })?;

        let port = u16::try_from(port.abs()).map_err(|_| {
            BusError::malformed_endpoint(
                endpoint,
                format!("port '{port_token}' is out of range"),
            )
        })?;

        Ok(Self {
            scheme: scheme.to_string(),
            host: host.to_string(),
            port,
        })
    }

    /// Returns the `host:port` authority.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_endpoint() {
        let ep = Endpoint::parse("opcua://localhost:65003").unwrap();
        assert_eq!(ep.scheme, "opcua");
        assert_eq!(ep.host, "localhost");
        assert_eq!(ep.port, 65003);
        assert_eq!(ep.authority(), "localhost:65003");
        assert_eq!(ep.to_string(), "opcua://localhost:65003");
    }

    #[test]
    fn test_parse_ipv4_host() {
        let ep = Endpoint::parse("opcua://127.0.0.1:4840").unwrap();
        assert_eq!(ep.host, "127.0.0.1");
        assert_eq!(ep.port, 4840);
    }

    #[test]
    fn test_missing_tokens_rejected() {
        assert!(Endpoint::parse("localhost:65003").is_err());
        assert!(Endpoint::parse("opcua://localhost").is_err());
        assert!(Endpoint::parse("://localhost:65003").is_err());
        assert!(Endpoint::parse("").is_err());
    }

    #[test]
    fn test_empty_host_rejected() {
        assert!(Endpoint::parse("opcua://:65003").is_err());
    }

    #[test]
    fn test_port_validation() {
        assert!(Endpoint::parse("opcua://localhost:port").is_err());
        assert!(Endpoint::parse("opcua://localhost:99999999").is_err());
        assert!(Endpoint::parse("opcua://localhost:").is_err());
    }

    #[test]
    fn test_negative_port_normalized() {
        let ep = Endpoint::parse("opcua://localhost:-65003").unwrap();
        assert_eq!(ep.port, 65003);
    }
}
