//! Credential cache - last issued material per identity and the renewal decision
//!
//! Layout under the cache root:
//!
//! ```text
//! <cache_dir>/
//! └── www.example.com/
//!     ├── cert.pem
//!     ├── chain.pem
//!     ├── issuing_ca.pem
//!     └── private.pem
//! ```

use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use x509_parser::prelude::*;

use certkeeper_core::IssuedBundle;

use crate::config::CertDescriptor;
use crate::defaults::{PRIVATE_KEY_MODE, PUBLIC_ARTIFACT_MODE};

/// Errors that can occur reading the cache
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cached certificate not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read {0}: {1}")]
    Read(PathBuf, std::io::Error),

    #[error("Failed to parse certificate {0}: {1}")]
    Parse(PathBuf, String),
}

/// Raw artifact files kept for every identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact {
    Certificate,
    Chain,
    IssuingCa,
    PrivateKey,
}

impl Artifact {
    /// Write order used by the persister.
    pub const ALL: [Artifact; 4] = [
        Artifact::Certificate,
        Artifact::Chain,
        Artifact::IssuingCa,
        Artifact::PrivateKey,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            Artifact::Certificate => "cert.pem",
            Artifact::Chain => "chain.pem",
            Artifact::IssuingCa => "issuing_ca.pem",
            Artifact::PrivateKey => "private.pem",
        }
    }

    pub fn mode(&self) -> u32 {
        match self {
            Artifact::PrivateKey => PRIVATE_KEY_MODE,
            _ => PUBLIC_ARTIFACT_MODE,
        }
    }

    pub fn select<'a>(&self, bundle: &'a IssuedBundle) -> &'a str {
        match self {
            Artifact::Certificate => &bundle.certificate,
            Artifact::Chain => &bundle.chain,
            Artifact::IssuingCa => &bundle.issuing_ca,
            Artifact::PrivateKey => &bundle.private_key,
        }
    }
}

/// The cached certificate of one identity
#[derive(Debug, Clone)]
pub struct CachedCertificate {
    pub not_after: SystemTime,
}

impl CachedCertificate {
    /// Days until expiry, negative once expired
    pub fn days_until_expiry(&self, now: SystemTime) -> i64 {
        days_between(now, self.not_after)
    }
}

fn days_between(now: SystemTime, then: SystemTime) -> i64 {
    match then.duration_since(now) {
        Ok(duration) => (duration.as_secs() / 86400) as i64,
        Err(e) => -(e.duration().as_secs() as i64 / 86400),
    }
}

/// Outcome of the renewal check for one descriptor.
///
/// Anything short of a readable certificate outside its renewal window
/// counts as due.
#[derive(Debug, Clone)]
pub enum RenewalCheck {
    OutputMissing(PathBuf),
    CacheMissing(PathBuf),
    Unreadable(PathBuf, String),
    Expiring {
        not_after: SystemTime,
        cutoff: SystemTime,
    },
    Valid {
        not_after: SystemTime,
        cutoff: SystemTime,
    },
}

impl RenewalCheck {
    pub fn is_due(&self) -> bool {
        !matches!(self, RenewalCheck::Valid { .. })
    }
}

impl fmt::Display for RenewalCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenewalCheck::OutputMissing(path) => {
                write!(f, "output file {} does not exist", path.display())
            }
            RenewalCheck::CacheMissing(path) => {
                write!(f, "cached certificate {} does not exist", path.display())
            }
            RenewalCheck::Unreadable(path, reason) => {
                write!(f, "cached certificate {} is unusable: {}", path.display(), reason)
            }
            RenewalCheck::Expiring { not_after, cutoff } => write!(
                f,
                "certificate expires {} and entered its renewal window at {}",
                humantime::format_rfc3339_seconds(*not_after),
                humantime::format_rfc3339_seconds(*cutoff)
            ),
            RenewalCheck::Valid { not_after, cutoff } => write!(
                f,
                "certificate valid until {}, renewal starts {}",
                humantime::format_rfc3339_seconds(*not_after),
                humantime::format_rfc3339_seconds(*cutoff)
            ),
        }
    }
}

/// Per-identity store of the last issued material
#[derive(Debug, Clone)]
pub struct CredentialCache {
    root: PathBuf,
}

impl CredentialCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn identity_dir(&self, common_name: &str) -> PathBuf {
        self.root.join(common_name)
    }

    pub fn artifact_path(&self, common_name: &str, artifact: Artifact) -> PathBuf {
        self.identity_dir(common_name).join(artifact.file_name())
    }

    /// Read and parse the cached certificate for an identity
    pub fn load_certificate(&self, common_name: &str) -> Result<CachedCertificate, CacheError> {
        let path = self.artifact_path(common_name, Artifact::Certificate);
        let pem_data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CacheError::NotFound(path));
            }
            Err(e) => return Err(CacheError::Read(path, e)),
        };

        let not_after = parse_not_after(&pem_data).map_err(|e| CacheError::Parse(path, e))?;
        Ok(CachedCertificate { not_after })
    }

    /// Decide whether `descriptor` needs a new certificate at `now`.
    pub fn check(&self, descriptor: &CertDescriptor, now: SystemTime) -> RenewalCheck {
        let output = descriptor.output_path();
        if !output.exists() {
            return RenewalCheck::OutputMissing(output.to_path_buf());
        }

        let cached = match self.load_certificate(&descriptor.common_name) {
            Ok(cached) => cached,
            Err(CacheError::NotFound(path)) => return RenewalCheck::CacheMissing(path),
            Err(CacheError::Read(path, e)) => return RenewalCheck::Unreadable(path, e.to_string()),
            Err(CacheError::Parse(path, e)) => return RenewalCheck::Unreadable(path, e),
        };

        let not_after = cached.not_after;
        let Some(cutoff) = not_after.checked_sub(descriptor.renew_ttl) else {
            return RenewalCheck::Expiring {
                not_after,
                cutoff: not_after,
            };
        };

        if now > cutoff {
            RenewalCheck::Expiring { not_after, cutoff }
        } else {
            RenewalCheck::Valid { not_after, cutoff }
        }
    }

    /// Whether renewal is due now. Never fails: any doubt means renew.
    pub fn is_renewal_due(&self, descriptor: &CertDescriptor) -> bool {
        let check = self.check(descriptor, SystemTime::now());
        if check.is_due() {
            tracing::info!(
                common_name = %descriptor.common_name,
                "Renewal due: {}",
                check
            );
        } else {
            tracing::debug!(
                common_name = %descriptor.common_name,
                "Renewal not due: {}",
                check
            );
        }
        check.is_due()
    }
}

/// `NotAfter` of the first PEM block, which must be a certificate.
fn parse_not_after(pem_data: &[u8]) -> Result<SystemTime, String> {
    let pem = Pem::iter_from_buffer(pem_data)
        .next()
        .ok_or_else(|| "no PEM block found".to_string())?
        .map_err(|e| e.to_string())?;

    if pem.label != "CERTIFICATE" {
        return Err(format!("expected a CERTIFICATE block, found '{}'", pem.label));
    }

    let (_, cert) = X509Certificate::from_der(&pem.contents).map_err(|e| e.to_string())?;

    let timestamp = cert.validity().not_after.timestamp();
    let offset = Duration::from_secs(timestamp.unsigned_abs());
    Ok(if timestamp >= 0 {
        UNIX_EPOCH + offset
    } else {
        UNIX_EPOCH - offset
    })
}
