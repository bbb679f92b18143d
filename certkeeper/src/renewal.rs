//! Renewal orchestrator - one pass over the managed certificates
//!
//! Descriptors are handled one at a time: check the cache, fetch a new
//! bundle when due, persist it, and remember the reload command. The reload
//! coordinator runs once at the end with everything that was owed.

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::cache::CredentialCache;
use crate::config::{CertDescriptor, ConfigError, DescriptorSet, MainConfig};
use crate::issuer::{FetchError, IssuerClient};
use crate::persist::{ArtifactPersister, PersistError};
use crate::reload::{PendingReloads, Reloader};

/// Why a single certificate could not be renewed
#[derive(Debug, Error)]
pub enum RenewError {
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Fetch(#[from] FetchError),

    #[error("failed to persist certificate: {0}")]
    Persist(#[from] PersistError),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BatchOptions {
    /// Renew without running any reload command.
    pub no_reload: bool,
    /// Stop at the first failure.
    pub fail_fast: bool,
}

#[derive(Debug)]
pub struct BatchFailure {
    /// Common name, or the configuration file path when the descriptor
    /// never loaded.
    pub identity: String,
    pub error: RenewError,
}

#[derive(Debug, Default)]
pub struct BatchResult {
    pub renewed: usize,
    pub skipped: usize,
    pub errors: Vec<BatchFailure>,
    /// Set when fail-fast stopped the batch early.
    pub aborted: bool,
}

impl BatchResult {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct RenewalEngine {
    cache: CredentialCache,
    issuer: IssuerClient,
    persister: ArtifactPersister,
    reloader: Arc<dyn Reloader>,
}

impl RenewalEngine {
    pub fn new(
        cache: CredentialCache,
        issuer: IssuerClient,
        reloader: Arc<dyn Reloader>,
    ) -> Self {
        Self {
            persister: ArtifactPersister::new(cache.clone()),
            cache,
            issuer,
            reloader,
        }
    }

    pub fn from_config(
        config: &MainConfig,
        reloader: Arc<dyn Reloader>,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(
            CredentialCache::new(&config.cache_dir),
            IssuerClient::new(&config.backend)?,
            reloader,
        ))
    }

    /// Run one batch over already validated descriptors.
    pub async fn run_batch(
        &self,
        descriptors: &[CertDescriptor],
        options: BatchOptions,
    ) -> BatchResult {
        self.run(Vec::new(), descriptors, options).await
    }

    /// Run one batch over a loaded descriptor set. Files that failed to load
    /// count as failures of this batch.
    pub async fn run_set(&self, set: DescriptorSet, options: BatchOptions) -> BatchResult {
        let DescriptorSet {
            descriptors,
            failures,
        } = set;

        let failures = failures
            .into_iter()
            .map(|(path, error)| config_failure(path, error))
            .collect();
        self.run(failures, &descriptors, options).await
    }

    async fn run(
        &self,
        config_failures: Vec<BatchFailure>,
        descriptors: &[CertDescriptor],
        options: BatchOptions,
    ) -> BatchResult {
        let mut result = BatchResult {
            errors: config_failures,
            ..Default::default()
        };
        let mut pending = PendingReloads::new();

        for failure in &result.errors {
            tracing::error!(path = %failure.identity, "Skipping certificate: {}", failure.error);
        }

        if options.fail_fast && !result.errors.is_empty() {
            result.aborted = true;
        } else {
            for descriptor in descriptors {
                if !self.cache.is_renewal_due(descriptor) {
                    result.skipped += 1;
                    continue;
                }

                match self.renew(descriptor).await {
                    Ok(()) => {
                        result.renewed += 1;
                        if !options.no_reload {
                            pending.add(&descriptor.reload_command);
                        }
                    }
                    Err(error) => {
                        tracing::error!(
                            common_name = %descriptor.common_name,
                            "Certificate renewal failed: {}",
                            error
                        );
                        result.errors.push(BatchFailure {
                            identity: descriptor.common_name.clone(),
                            error,
                        });
                        if options.fail_fast {
                            result.aborted = true;
                            break;
                        }
                    }
                }
            }
        }

        self.reloader.reload(pending).await;

        tracing::info!(
            renewed = result.renewed,
            skipped = result.skipped,
            failed = result.errors.len(),
            "Renewal batch finished"
        );
        result
    }

    async fn renew(&self, descriptor: &CertDescriptor) -> Result<(), RenewError> {
        let bundle = self.issuer.fetch_new_certificate(descriptor).await?;
        self.persister.persist(descriptor, &bundle)?;
        tracing::info!(common_name = %descriptor.common_name, "Certificate renewed");
        Ok(())
    }
}

fn config_failure(path: PathBuf, error: ConfigError) -> BatchFailure {
    BatchFailure {
        identity: path.display().to_string(),
        error: RenewError::Config(error),
    }
}
