use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::cert_config::CertDescriptor;
use super::error::{ConfigError, Result};
use crate::defaults::DEFAULT_BACKEND_TIMEOUT;

/// Main configuration file (`/etc/certkeeper/certkeeper.toml` by default).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MainConfig {
    /// Glob patterns matching certificate configuration files.
    #[serde(default)]
    pub include_paths: Vec<String>,

    /// Root of the per-identity raw artifact cache.
    pub cache_dir: PathBuf,

    #[serde(with = "super::duration")]
    pub check_interval: Duration,

    pub backend: BackendConfig,
}

/// Secret-issuance backend connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    pub base_url: String,
    pub login_path: String,
    pub cert_path: String,
    pub role_id: String,
    pub secret_id: String,

    /// Client side bound on each backend call.
    #[serde(default = "default_backend_timeout", with = "super::duration")]
    pub timeout: Duration,
}

fn default_backend_timeout() -> Duration {
    DEFAULT_BACKEND_TIMEOUT
}

/// Certificate descriptors loaded for one batch.
///
/// Files that failed to load are kept next to the good ones so a broken file
/// only costs its own certificate.
#[derive(Debug, Default)]
pub struct DescriptorSet {
    pub descriptors: Vec<CertDescriptor>,
    pub failures: Vec<(PathBuf, ConfigError)>,
}

impl MainConfig {
    /// Load and validate the main configuration file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content =
            fs::read_to_string(path).map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;
        Self::parse(path, &content)
    }

    fn parse(path: &Path, content: &str) -> Result<Self> {
        let config: MainConfig =
            toml::from_str(content).map_err(|e| ConfigError::TomlParse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation("cache_dir is not set".to_string()));
        }
        if self.check_interval.is_zero() {
            return Err(ConfigError::Validation(
                "check_interval must be greater than zero".to_string(),
            ));
        }
        self.backend.login_url()?;
        self.backend.cert_url()?;
        Ok(())
    }

    /// Expand `include_paths` into a sorted, de-duplicated list of files.
    pub fn resolve_cert_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for pattern in &self.include_paths {
            let entries = glob::glob(pattern)
                .map_err(|e| ConfigError::IncludePattern(pattern.clone(), e))?;
            for entry in entries {
                match entry {
                    Ok(path) if path.is_file() => files.push(path),
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(
                            pattern = %pattern,
                            "Skipping unreadable include path: {}",
                            e
                        );
                    }
                }
            }
        }
        files.sort();
        files.dedup();
        Ok(files)
    }

    /// Load every included certificate configuration.
    pub fn load_descriptors(&self) -> Result<DescriptorSet> {
        let mut set = DescriptorSet::default();
        for file in self.resolve_cert_files()? {
            match CertDescriptor::load_from_file(&file) {
                Ok(descriptor) => set.descriptors.push(descriptor),
                Err(e) => set.failures.push((file, e)),
            }
        }
        Ok(set)
    }
}

impl BackendConfig {
    fn base(&self) -> Result<Url> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::Validation(
                "backend.base_url is not set".to_string(),
            ));
        }
        Url::parse(&self.base_url)
            .map_err(|e| ConfigError::InvalidUrl(self.base_url.clone(), e.to_string()))
    }

    fn resolve(&self, field: &str, reference: &str) -> Result<Url> {
        if reference.trim().is_empty() {
            return Err(ConfigError::Validation(format!("backend.{} is not set", field)));
        }
        self.base()?
            .join(reference)
            .map_err(|e| ConfigError::InvalidUrl(reference.to_string(), e.to_string()))
    }

    /// Login endpoint, `login_path` resolved against `base_url`.
    pub fn login_url(&self) -> Result<Url> {
        self.resolve("login_path", &self.login_path)
    }

    /// Certificate issue endpoint, `cert_path` resolved against `base_url`.
    pub fn cert_url(&self) -> Result<Url> {
        self.resolve("cert_path", &self.cert_path)
    }
}
