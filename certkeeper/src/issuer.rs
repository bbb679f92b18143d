//! Issuance client for the secret-issuance backend
//!
//! Two sequential calls per certificate: log in with the role/secret pair to
//! get a session token, then request the certificate with that token. No
//! retries and no token reuse across certificates.

use reqwest::{StatusCode, Url};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use certkeeper_core::{
    CertRequest, CertResponse, ErrorEnvelope, IssuedBundle, LoginRequest, LoginResponse,
    TOKEN_HEADER,
};

use crate::config::{BackendConfig, CertDescriptor, ConfigError};

/// Errors that can occur during a single backend call
#[derive(Debug, Error)]
pub enum IssueError {
    #[error("backend returned status {status}{}", describe_errors(.errors))]
    Auth {
        status: StatusCode,
        errors: Option<Vec<String>>,
    },

    #[error("backend returned status {status}{}", describe_errors(.errors))]
    Issue {
        status: StatusCode,
        errors: Option<Vec<String>>,
    },

    #[error("unexpected backend response: {0}")]
    Protocol(String),

    #[error("error calling backend: {0}")]
    Http(#[from] reqwest::Error),
}

fn describe_errors(errors: &Option<Vec<String>>) -> String {
    match errors {
        Some(errors) if !errors.is_empty() => format!(", errors: {}", errors.join("; ")),
        _ => String::new(),
    }
}

/// Step of the issuance exchange that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStep {
    Login,
    CertificateRequest,
}

impl fmt::Display for FetchStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchStep::Login => f.write_str("login"),
            FetchStep::CertificateRequest => f.write_str("certificate request"),
        }
    }
}

/// Failure of the full login + request exchange
#[derive(Debug, Error)]
#[error("{step} failed: {source}")]
pub struct FetchError {
    pub step: FetchStep,
    #[source]
    pub source: IssueError,
}

/// HTTP client for the issuance backend
#[derive(Debug, Clone)]
pub struct IssuerClient {
    http: reqwest::Client,
    login_url: Url,
    cert_url: Url,
    role_id: String,
    secret_id: String,
}

impl IssuerClient {
    pub fn new(config: &BackendConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            http: reqwest::Client::builder().timeout(config.timeout).build()?,
            login_url: config.login_url()?,
            cert_url: config.cert_url()?,
            role_id: config.role_id.clone(),
            secret_id: config.secret_id.clone(),
        })
    }

    /// Exchange the role/secret pair for a session token
    pub async fn authenticate(&self) -> Result<String, IssueError> {
        let login = LoginRequest {
            role_id: self.role_id.clone(),
            secret_id: self.secret_id.clone(),
        };

        let resp = self
            .http
            .post(self.login_url.clone())
            .json(&login)
            .send()
            .await?;
        let status = resp.status();
        let body = resp.bytes().await?;

        if !status.is_success() {
            return Err(IssueError::Auth {
                status,
                errors: decode_error_body(&body),
            });
        }

        let message: LoginResponse = serde_json::from_slice(&body)
            .map_err(|e| IssueError::Protocol(format!("invalid login response: {}", e)))?;

        message
            .client_token()
            .map(str::to_string)
            .ok_or_else(|| IssueError::Protocol("login response has no client token".to_string()))
    }

    /// Request a certificate with an already obtained session token
    pub async fn request_certificate(
        &self,
        token: &str,
        common_name: &str,
        alternate_names: &[String],
        ttl: Duration,
    ) -> Result<IssuedBundle, IssueError> {
        let ttl = (!ttl.is_zero()).then(|| format!("{}s", ttl.as_secs()));
        let request = CertRequest::new(common_name, alternate_names, ttl);

        let resp = self
            .http
            .post(self.cert_url.clone())
            .header(TOKEN_HEADER, token)
            .json(&request)
            .send()
            .await?;
        let status = resp.status();
        let body = resp.bytes().await?;

        if !status.is_success() {
            return Err(IssueError::Issue {
                status,
                errors: decode_error_body(&body),
            });
        }

        let message: CertResponse = serde_json::from_slice(&body)
            .map_err(|e| IssueError::Protocol(format!("invalid certificate response: {}", e)))?;

        message
            .data
            .ok_or_else(|| IssueError::Protocol("certificate response has no data".to_string()))
    }

    /// Log in, then request a certificate for `descriptor`
    pub async fn fetch_new_certificate(
        &self,
        descriptor: &CertDescriptor,
    ) -> Result<IssuedBundle, FetchError> {
        let token = self.authenticate().await.map_err(|source| FetchError {
            step: FetchStep::Login,
            source,
        })?;

        self.request_certificate(
            &token,
            &descriptor.common_name,
            &descriptor.alternate_names,
            descriptor.ttl,
        )
        .await
        .map_err(|source| FetchError {
            step: FetchStep::CertificateRequest,
            source,
        })
    }
}

/// Best-effort decode of the `errors` list of a failure body. A body that
/// does not decode only loses the extra detail, never the status error.
fn decode_error_body(body: &[u8]) -> Option<Vec<String>> {
    match serde_json::from_slice::<ErrorEnvelope>(body) {
        Ok(envelope) => Some(envelope.errors),
        Err(e) => {
            tracing::debug!("Could not decode backend error body: {}", e);
            None
        }
    }
}
