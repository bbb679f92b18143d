use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use certkeeper_core::IssuedBundle;

use super::error::{ConfigError, Result};

/// Managed certificate, one per file under the main config's `include_paths`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CertDescriptor {
    /// Common name requested from the backend; also names the cache directory.
    pub common_name: String,

    #[serde(default)]
    pub alternate_names: Vec<String>,

    /// Requested validity. Zero lets the backend pick.
    #[serde(default, with = "super::duration")]
    pub ttl: Duration,

    /// Renew once the cached certificate is this close to `NotAfter`.
    #[serde(default, with = "super::duration")]
    pub renew_ttl: Duration,

    /// Shell command run after renewal, shared commands run once per batch.
    #[serde(default)]
    pub reload_command: String,

    /// Owner of the output file. Empty means the current process user.
    #[serde(default)]
    pub user: String,

    /// Group of the output file. Empty means the current process group.
    #[serde(default)]
    pub group: String,

    pub output: OutputSpec,
}

/// Operator facing output file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct OutputSpec {
    pub file: OutputFile,

    /// Bundle content, in order. See [`OutputItem`] for accepted names.
    #[serde(default)]
    pub items: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct OutputFile {
    #[serde(rename = "type")]
    pub kind: OutputKind,

    pub name: PathBuf,

    /// Mode for the file and for directories created to hold it.
    #[serde(default = "default_output_perm")]
    pub perm: u32,
}

fn default_output_perm() -> u32 {
    0o600
}

/// Supported output file layouts
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// Selected PEM items concatenated into one file.
    Bundle,
}

/// One piece of issued material that can be placed in an output file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputItem {
    Certificate,
    PrivateKey,
    IssuingCa,
    Chain,
}

impl OutputItem {
    pub const ALL: [OutputItem; 4] = [
        OutputItem::Certificate,
        OutputItem::PrivateKey,
        OutputItem::IssuingCa,
        OutputItem::Chain,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputItem::Certificate => "certificate",
            OutputItem::PrivateKey => "privateKey",
            OutputItem::IssuingCa => "issuingCa",
            OutputItem::Chain => "chain",
        }
    }

    /// The PEM text this item selects from an issued bundle.
    pub fn select<'a>(&self, bundle: &'a IssuedBundle) -> &'a str {
        match self {
            OutputItem::Certificate => &bundle.certificate,
            OutputItem::PrivateKey => &bundle.private_key,
            OutputItem::IssuingCa => &bundle.issuing_ca,
            OutputItem::Chain => &bundle.chain,
        }
    }
}

impl fmt::Display for OutputItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognized output item name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownOutputItem(pub String);

impl fmt::Display for UnknownOutputItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown output item '{}', valid values are: certificate, privateKey, issuingCa, chain",
            self.0
        )
    }
}

impl std::error::Error for UnknownOutputItem {}

impl FromStr for OutputItem {
    type Err = UnknownOutputItem;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        OutputItem::ALL
            .into_iter()
            .find(|item| item.as_str() == value)
            .ok_or_else(|| UnknownOutputItem(value.to_string()))
    }
}

impl CertDescriptor {
    /// Load and validate a certificate configuration file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content =
            fs::read_to_string(path).map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;
        let descriptor: CertDescriptor = toml::from_str(&content)
            .map_err(|e| ConfigError::TomlParse(path.to_path_buf(), e))?;
        descriptor
            .validate()
            .map_err(|e| ConfigError::InvalidCertConfig(path.to_path_buf(), e))?;
        Ok(descriptor)
    }

    /// Check the invariants the renewal engine relies on. First failure wins.
    pub fn validate(&self) -> std::result::Result<(), String> {
        self.validate_common_name()?;
        self.validate_ttl()?;
        self.validate_output()
    }

    fn validate_common_name(&self) -> std::result::Result<(), String> {
        if self.common_name.trim().is_empty() {
            return Err("common_name is not set".to_string());
        }
        if self.common_name.contains('/') || self.common_name.starts_with('.') {
            return Err(format!(
                "common_name '{}' cannot be used as a cache directory name",
                self.common_name
            ));
        }
        Ok(())
    }

    fn validate_ttl(&self) -> std::result::Result<(), String> {
        if self.renew_ttl.is_zero() {
            return Err("renew_ttl is not set".to_string());
        }
        if self.ttl.is_zero() {
            return Err("ttl is not set".to_string());
        }
        if self.renew_ttl >= self.ttl {
            return Err("renew_ttl must be lower than ttl".to_string());
        }
        Ok(())
    }

    fn validate_output(&self) -> std::result::Result<(), String> {
        if self.output.file.name.as_os_str().is_empty() {
            return Err("output.file.name is not set".to_string());
        }
        for item in &self.output.items {
            item.parse::<OutputItem>().map_err(|e| e.to_string())?;
        }
        Ok(())
    }

    /// Operator visible output file.
    pub fn output_path(&self) -> &Path {
        &self.output.file.name
    }
}
