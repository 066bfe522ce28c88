//! TLS certificate references and validity rules.
//!
//! The orchestrator never reads certificate files; it only checks that a
//! cluster's certificate reference points at a record complete enough for
//! node provisioning to use.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use unimgr_core::{CertificateId, TenantId};

use crate::error::{Error, Result};

/// How a certificate's material reaches the nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum CertificateType {
    /// Generated and distributed by the platform.
    SelfSigned,
    /// Pre-installed on each node at known paths.
    CustomCertHostPath,
}

/// File locations for a host-path certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomCertInfo {
    /// Node certificate path.
    pub node_cert_path: String,
    /// Node private key path.
    pub node_key_path: String,
    /// Root certificate path.
    pub root_cert_path: String,
}

/// A certificate record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateInfo {
    /// Certificate identifier.
    pub id: CertificateId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Display label.
    pub label: String,
    /// Distribution type.
    pub cert_type: CertificateType,
    /// Paths for host-path certificates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_cert_info: Option<CustomCertInfo>,
    /// Expiry time.
    pub expires_at: DateTime<Utc>,
}

impl CertificateInfo {
    /// Returns true if the record carries everything its type requires.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        !matches!(self.cert_type, CertificateType::CustomCertHostPath)
            || self.custom_cert_info.is_some()
    }
}

/// Lookup of certificate records.
#[async_trait]
pub trait CertificateDirectory: Send + Sync {
    /// Gets a certificate by ID.
    ///
    /// Returns `None` if the certificate does not exist.
    async fn get(&self, id: &CertificateId) -> Result<Option<CertificateInfo>>;
}

/// Checks a cluster's certificate reference.
///
/// No reference is valid; a dangling reference or an incomplete host-path
/// certificate is invalid. On failure the returned message names the
/// certificate so the caller can fix it.
///
/// # Errors
///
/// Returns `InvalidCertificate` for an unusable reference, or the directory's
/// own error if the lookup fails.
pub async fn validate_certificate(
    directory: &dyn CertificateDirectory,
    reference: Option<&CertificateId>,
) -> Result<()> {
    let Some(id) = reference else {
        return Ok(());
    };
    match directory.get(id).await? {
        None => Err(Error::InvalidCertificate {
            message: format!("certificate {id} does not exist"),
        }),
        Some(cert) if !cert.is_complete() => Err(Error::InvalidCertificate {
            message: format!(
                "the certificate {} needs info. Update the cert and retry.",
                cert.label
            ),
        }),
        Some(_) => Ok(()),
    }
}

/// In-memory certificate directory.
#[derive(Debug, Default)]
pub struct InMemoryCertificateDirectory {
    certificates: RwLock<HashMap<CertificateId, CertificateInfo>>,
}

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

impl InMemoryCertificateDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a certificate.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn insert(&self, cert: CertificateInfo) -> Result<()> {
        let mut certificates = self.certificates.write().map_err(poison_err)?;
        certificates.insert(cert.id, cert);
        drop(certificates);
        Ok(())
    }
}

#[async_trait]
impl CertificateDirectory for InMemoryCertificateDirectory {
    async fn get(&self, id: &CertificateId) -> Result<Option<CertificateInfo>> {
        let result = {
            let certificates = self.certificates.read().map_err(poison_err)?;
            certificates.get(id).cloned()
        };
        Ok(result)
    }
}
