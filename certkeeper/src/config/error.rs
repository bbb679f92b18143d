use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read file {0}: {1}")]
    FileRead(PathBuf, std::io::Error),

    #[error("Failed to parse TOML in {0}: {1}")]
    TomlParse(PathBuf, toml::de::Error),

    #[error("Invalid include pattern '{0}': {1}")]
    IncludePattern(String, glob::PatternError),

    #[error("Invalid backend URL '{0}': {1}")]
    InvalidUrl(String, String),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid certificate configuration {0}: {1}")]
    InvalidCertConfig(PathBuf, String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
