// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Security mode classification and certificate material loading.
//!
//! The bus supports two modes, decided once per context from the presence
//! of certificate material in the [`ContextConfig`]:
//!
//! - **Insecure** ("developer mode"): certificate file, private key file and
//!   every trusted certificate entry are empty. No file I/O happens at all.
//! - **Secure**: all three are supplied; the session negotiates
//!   sign-and-encrypt under the Basic256Sha256 policy. Missing or unreadable
//!   material fails context creation.
//!
//! Certificate parsing and validation stay inside the protocol engine; this
//! module only loads raw bytes through a [`CertificateLoader`] collaborator.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use databus_core::config::ContextConfig;
use databus_core::error::{BusError, BusResult};

/// Security policy URI negotiated by secure contexts.
pub const SECURITY_POLICY_URI: &str =
    "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256";

// =============================================================================
// SecurityMode
// =============================================================================

/// Message security mode of a bus context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityMode {
    /// Unauthenticated, unencrypted sessions.
    #[default]
    None,

    /// Signed and encrypted sessions (Basic256Sha256).
    SignAndEncrypt,
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::SignAndEncrypt => write!(f, "SignAndEncrypt"),
        }
    }
}

// =============================================================================
// SecurityArtifacts
// =============================================================================

/// The security decision for a context plus its loaded material.
///
/// Derived exactly once at context creation; never changes afterwards.
#[derive(Debug, Clone, Default)]
pub struct SecurityArtifacts {
    /// Negotiated security mode.
    pub mode: SecurityMode,

    /// DER-encoded application instance certificate (empty when insecure).
    pub certificate: Vec<u8>,

    /// DER-encoded private key (empty when insecure).
    pub private_key: Vec<u8>,

    /// Trusted certificate blobs (empty when insecure).
    pub trust_list: Vec<Vec<u8>>,
}

impl SecurityArtifacts {
    /// Returns the artifacts for an insecure context.
    pub fn insecure() -> Self {
        Self::default()
    }

    /// Returns `true` for a secure context.
    #[inline]
    pub fn is_secure(&self) -> bool {
        self.mode == SecurityMode::SignAndEncrypt
    }
}

// =============================================================================
// CertificateLoader
// =============================================================================

/// Loads certificate/key bytes from a path.
///
/// Mirrors the engine-side file loader contract: a failed read yields an
/// empty byte vector, and the caller decides whether empty is fatal.
pub trait CertificateLoader: Send + Sync {
    /// Reads the file at `path`, returning empty bytes on any failure.
    fn load(&self, path: &str) -> Vec<u8>;
}

/// Filesystem-backed loader used in production.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsCertificateLoader;

impl CertificateLoader for FsCertificateLoader {
    fn load(&self, path: &str) -> Vec<u8> {
        std::fs::read(path).unwrap_or_default()
    }
}

/// In-memory loader for tests.
#[derive(Debug, Default)]
pub struct MemoryCertificateLoader {
    files: HashMap<String, Vec<u8>>,
}

impl MemoryCertificateLoader {
    /// Creates an empty loader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `bytes` under `path`.
    pub fn insert(mut self, path: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.files.insert(path.into(), bytes.into());
        self
    }
}

impl CertificateLoader for MemoryCertificateLoader {
    fn load(&self, path: &str) -> Vec<u8> {
        self.files.get(path).cloned().unwrap_or_default()
    }
}

// =============================================================================
// Classification
// =============================================================================

/// Classifies a context configuration and loads its security material.
///
/// # Errors
///
/// - [`BusError::ConfigInvalid`] when secure mode is indicated but the
///   certificate, key, or trust list is missing.
/// - [`BusError::CertificateLoad`] when a required file cannot be read.
pub fn configure(
    config: &ContextConfig,
    loader: &dyn CertificateLoader,
) -> BusResult<SecurityArtifacts> {
    if !config.has_security_material() {
        tracing::debug!(endpoint = %config.endpoint, "Security mode: none (developer mode)");
        return Ok(SecurityArtifacts::insecure());
    }

    let certificate_file = config
        .certificate_file
        .as_deref()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| BusError::config_invalid("Secure mode requires a certificate file"))?;
    let private_key_file = config
        .private_key_file
        .as_deref()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| BusError::config_invalid("Secure mode requires a private key file"))?;

    let trusted: Vec<&str> = config
        .trusted_certificate_files
        .iter()
        .map(String::as_str)
        .filter(|p| !p.is_empty())
        .collect();
    if trusted.is_empty() {
        return Err(BusError::config_invalid(
            "Secure mode requires at least one trusted certificate",
        ));
    }

    let certificate = load_required(loader, certificate_file)?;
    let private_key = load_required(loader, private_key_file)?;
    let trust_list = trusted
        .iter()
        .map(|path| load_required(loader, path))
        .collect::<BusResult<Vec<_>>>()?;

    tracing::info!(
        endpoint = %config.endpoint,
        policy = SECURITY_POLICY_URI,
        trusted = trust_list.len(),
        "Security mode: sign-and-encrypt"
    );

    Ok(SecurityArtifacts {
        mode: SecurityMode::SignAndEncrypt,
        certificate,
        private_key,
        trust_list,
    })
}

fn load_required(loader: &dyn CertificateLoader, path: &str) -> BusResult<Vec<u8>> {
    let bytes = loader.load(path);
    if bytes.is_empty() {
        return Err(BusError::certificate_load(path));
    }
    Ok(bytes)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use databus_core::config::Direction;

    fn base_config() -> databus_core::config::ContextConfigBuilder {
        ContextConfig::builder()
            .endpoint("opcua://localhost:65003")
            .direction(Direction::Pub)
    }

    #[test]
    fn test_insecure_when_all_fields_empty() {
        let config = base_config().build().unwrap();
        // The loader would fail every read; it must never be consulted.
        let artifacts = configure(&config, &MemoryCertificateLoader::new()).unwrap();
        assert_eq!(artifacts.mode, SecurityMode::None);
        assert!(!artifacts.is_secure());
        assert!(artifacts.certificate.is_empty());
    }

    #[test]
    fn test_secure_with_loadable_material() {
        let loader = MemoryCertificateLoader::new()
            .insert("/pki/server.der", b"cert".to_vec())
            .insert("/pki/server.key.der", b"key".to_vec())
            .insert("/pki/ca.der", b"ca".to_vec());

        let config = base_config()
            .certificate_file("/pki/server.der")
            .private_key_file("/pki/server.key.der")
            .trusted_certificate_file("/pki/ca.der")
            .build()
            .unwrap();

        let artifacts = configure(&config, &loader).unwrap();
        assert!(artifacts.is_secure());
        assert_eq!(artifacts.certificate, b"cert");
        assert_eq!(artifacts.private_key, b"key");
        assert_eq!(artifacts.trust_list, vec![b"ca".to_vec()]);
    }

    #[test]
    fn test_unreadable_file_is_certificate_load_error() {
        let loader = MemoryCertificateLoader::new()
            .insert("/pki/server.der", b"cert".to_vec())
            .insert("/pki/ca.der", b"ca".to_vec());

        let config = base_config()
            .certificate_file("/pki/server.der")
            .private_key_file("/pki/missing.key.der")
            .trusted_certificate_file("/pki/ca.der")
            .build()
            .unwrap();

        let err = configure(&config, &loader).unwrap_err();
        assert!(matches!(err, BusError::CertificateLoad { .. }));
    }

    #[test]
    fn test_partial_material_is_config_invalid() {
        // A certificate alone indicates secure mode but cannot satisfy it.
        let loader = MemoryCertificateLoader::new().insert("/pki/server.der", b"cert".to_vec());
        let config = base_config()
            .certificate_file("/pki/server.der")
            .build()
            .unwrap();

        let err = configure(&config, &loader).unwrap_err();
        assert!(matches!(err, BusError::ConfigInvalid { .. }));
    }

    #[test]
    fn test_empty_trust_entries_do_not_count() {
        let loader = MemoryCertificateLoader::new()
            .insert("/pki/server.der", b"cert".to_vec())
            .insert("/pki/server.key.der", b"key".to_vec());
        let config = base_config()
            .certificate_file("/pki/server.der")
            .private_key_file("/pki/server.key.der")
            .trusted_certificate_file("")
            .build()
            .unwrap();

        let err = configure(&config, &loader).unwrap_err();
        assert!(matches!(err, BusError::ConfigInvalid { .. }));
    }

    #[test]
    fn test_fs_loader_returns_empty_on_missing_file() {
        let loader = FsCertificateLoader;
        assert!(loader.load("/nonexistent/path/to/cert.der").is_empty());
    }
}
