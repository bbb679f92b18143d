//! Fixtures shared by unit tests

use std::path::Path;
use std::time::Duration;

use certkeeper_core::IssuedBundle;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::config::{BackendConfig, CertDescriptor, OutputFile, OutputKind, OutputSpec};

pub const LOGIN_PATH: &str = "/v1/auth/approle/login";
pub const CERT_PATH: &str = "/v1/pki/issue/web";
pub const TOKEN: &str = "98a4c7ab-b1fe-361b-ba0b-e307aacfd587";

/// Self-signed certificate and key valid for `valid_for_secs` from now
/// (negative for an already expired certificate).
pub fn certificate_pem(common_name: &str, valid_for_secs: i64) -> (String, String) {
    let mut params = CertificateParams::new(vec![common_name.to_string()]).unwrap();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    params.distinguished_name = dn;

    let now = time::OffsetDateTime::now_utc();
    params.not_before = now - time::Duration::days(2);
    params.not_after = now + time::Duration::seconds(valid_for_secs);

    let key_pair = KeyPair::generate().unwrap();
    let cert = params.self_signed(&key_pair).unwrap();
    (cert.pem(), key_pair.serialize_pem())
}

/// A bundle as the backend would hand it out, valid for 30 days.
pub fn issued_bundle(common_name: &str) -> IssuedBundle {
    let (certificate, private_key) = certificate_pem(common_name, 30 * 86400);
    let (issuing_ca, _) = certificate_pem("Test Issuing CA", 365 * 86400);
    IssuedBundle {
        certificate,
        private_key,
        chain: issuing_ca.clone(),
        issuing_ca,
    }
}

/// Descriptor with a 720h ttl and 24h renewal window writing a
/// certificate + key bundle to `output`.
pub fn descriptor(common_name: &str, output: &Path) -> CertDescriptor {
    CertDescriptor {
        common_name: common_name.to_string(),
        alternate_names: vec![format!("alt.{}", common_name)],
        ttl: Duration::from_secs(720 * 3600),
        renew_ttl: Duration::from_secs(24 * 3600),
        reload_command: String::new(),
        user: String::new(),
        group: String::new(),
        output: OutputSpec {
            file: OutputFile {
                kind: OutputKind::Bundle,
                name: output.to_path_buf(),
                perm: 0o640,
            },
            items: vec!["certificate".to_string(), "privateKey".to_string()],
        },
    }
}

pub fn backend_config(server: &MockServer) -> BackendConfig {
    BackendConfig {
        base_url: server.uri(),
        login_path: LOGIN_PATH.to_string(),
        cert_path: CERT_PATH.to_string(),
        role_id: "role".to_string(),
        secret_id: "secret".to_string(),
        timeout: Duration::from_secs(5),
    }
}

pub fn login_ok() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "auth": { "client_token": TOKEN, "policies": ["default"] },
        "errors": []
    }))
}

pub fn cert_ok(bundle: &IssuedBundle) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "data": bundle,
        "errors": []
    }))
}

pub async fn mount_login(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .respond_with(login_ok())
        .mount(server)
        .await;
}
