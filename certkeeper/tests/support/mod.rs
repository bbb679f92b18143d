use std::fs;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::{Duration, Instant};

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use tempfile::TempDir;
use tokio::process::Command;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const LOGIN_PATH: &str = "/v1/auth/approle/login";
pub const CERT_PATH: &str = "/v1/pki/issue/web";

pub struct Issued {
    pub certificate: String,
    pub private_key: String,
    pub issuing_ca: String,
}

fn self_signed(common_name: &str, valid_for: Duration) -> (String, String) {
    let mut params = CertificateParams::new(vec![common_name.to_string()]).unwrap();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    params.distinguished_name = dn;

    let now = time::OffsetDateTime::now_utc();
    params.not_before = now - time::Duration::days(1);
    params.not_after = now + time::Duration::seconds(valid_for.as_secs() as i64);

    let key_pair = KeyPair::generate().unwrap();
    let cert = params.self_signed(&key_pair).unwrap();
    (cert.pem(), key_pair.serialize_pem())
}

pub fn issued(common_name: &str) -> Issued {
    let (certificate, private_key) = self_signed(common_name, Duration::from_secs(30 * 86400));
    let (issuing_ca, _) = self_signed("Integration CA", Duration::from_secs(365 * 86400));
    Issued {
        certificate,
        private_key,
        issuing_ca,
    }
}

/// Backend that logs in anyone and issues `bundle` for every request.
pub async fn mount_backend(server: &MockServer, bundle: &Issued) {
    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "auth": { "client_token": "integration-token" }
        })))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path(CERT_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": {
                "certificate": bundle.certificate,
                "private_key": bundle.private_key,
                "issuing_ca": bundle.issuing_ca,
                "chain": [bundle.issuing_ca]
            },
            "errors": []
        })))
        .mount(server)
        .await;
}

/// Scratch directory with a main config pointing at `server`.
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new(server: &MockServer, check_interval: &str) -> Self {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("certs.d")).unwrap();
        fs::write(
            dir.path().join("certkeeper.toml"),
            format!(
                r#"
include_paths = ["{certs}/*.toml"]
cache_dir = "{cache}"
check_interval = "{check_interval}"

[backend]
base_url = "{base}"
login_path = "{LOGIN_PATH}"
cert_path = "{CERT_PATH}"
role_id = "role"
secret_id = "secret"
timeout = "5s"
"#,
                certs = dir.path().join("certs.d").display(),
                cache = dir.path().join("cache").display(),
                base = server.uri(),
            ),
        )
        .unwrap();
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn config_path(&self) -> PathBuf {
        self.path().join("certkeeper.toml")
    }

    pub fn cert_config_path(&self, common_name: &str) -> PathBuf {
        self.path().join("certs.d").join(format!("{common_name}.toml"))
    }

    pub fn output_path(&self, common_name: &str) -> PathBuf {
        self.path().join("out").join(format!("{common_name}.pem"))
    }

    pub fn cache_file(&self, common_name: &str, file: &str) -> PathBuf {
        self.path().join("cache").join(common_name).join(file)
    }

    pub fn add_cert(&self, common_name: &str, reload_command: &str) -> PathBuf {
        let path = self.cert_config_path(common_name);
        fs::write(
            &path,
            format!(
                r#"
common_name = "{common_name}"
alternate_names = ["alt.{common_name}"]
ttl = "720h"
renew_ttl = "24h"
reload_command = "{reload_command}"

[output]
items = ["certificate", "chain", "privateKey"]

[output.file]
type = "bundle"
name = "{output}"
perm = 0o750
"#,
                output = self.output_path(common_name).display(),
            ),
        )
        .unwrap();
        path
    }

    pub fn command(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_certkeeper"));
        cmd.arg("--config")
            .arg(self.config_path())
            .env_remove("CERTKEEPER_CONFIG")
            .env("RUST_LOG", "info")
            .kill_on_drop(true);
        cmd
    }

    pub async fn run(&self, args: &[&str]) -> Output {
        self.command().args(args).output().await.unwrap()
    }
}

pub async fn wait_for<F>(timeout: Duration, mut f: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if f() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

pub fn describe(output: &Output) -> String {
    format!(
        "status: {}\nstdout:\n{}\nstderr:\n{}",
        output.status,
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    )
}
