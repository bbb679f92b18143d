//! Issuance backend protocol types
//!
//! The backend speaks JSON over HTTP. A client first exchanges its role and
//! secret for a short-lived session token, then asks for a certificate with
//! that token in the [`TOKEN_HEADER`] header.

use serde::{Deserialize, Deserializer, Serialize};

/// Header carrying the session token on certificate requests.
pub const TOKEN_HEADER: &str = "X-Vault-Token";

/// Body of the login call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoginRequest {
    pub role_id: String,
    pub secret_id: String,
}

/// Envelope returned by the login call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub auth: Option<LoginAuth>,
    #[serde(default, deserialize_with = "deserialize_errors")]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoginAuth {
    #[serde(default)]
    pub client_token: String,
}

impl LoginResponse {
    /// Session token, if the backend handed out a non-empty one.
    pub fn client_token(&self) -> Option<&str> {
        self.auth
            .as_ref()
            .map(|auth| auth.client_token.as_str())
            .filter(|token| !token.is_empty())
    }
}

/// Body of the certificate issue call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CertRequest {
    pub common_name: String,
    /// Alternate names, comma separated.
    pub alt_names: String,
    /// Requested validity, e.g. `"2592000s"`. Omitted to use the backend default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
}

impl CertRequest {
    pub fn new(common_name: &str, alternate_names: &[String], ttl: Option<String>) -> Self {
        Self {
            common_name: common_name.to_string(),
            alt_names: alternate_names.join(","),
            ttl,
        }
    }
}

/// Envelope returned by the certificate issue call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CertResponse {
    #[serde(default)]
    pub data: Option<IssuedBundle>,
    #[serde(default, deserialize_with = "deserialize_errors")]
    pub errors: Vec<String>,
}

/// Certificate material handed out by the backend, all PEM text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedBundle {
    #[serde(default)]
    pub certificate: String,
    #[serde(default)]
    pub private_key: String,
    #[serde(default)]
    pub issuing_ca: String,
    /// Some backends send the chain as a list of PEM entries; those are
    /// joined with newlines so the chain is always a single text.
    #[serde(default, deserialize_with = "deserialize_chain")]
    pub chain: String,
}

fn deserialize_chain<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Chain {
        Single(String),
        Entries(Vec<String>),
    }

    Ok(match Option::<Chain>::deserialize(deserializer)? {
        None => String::new(),
        Some(Chain::Single(pem)) => pem,
        Some(Chain::Entries(entries)) => entries.join("\n"),
    })
}

/// Backends send `"errors": null` on success; that reads as no errors.
fn deserialize_errors<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Error-only view of any backend envelope, used to decode failure bodies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    #[serde(default, deserialize_with = "deserialize_errors")]
    pub errors: Vec<String>,
}
