mod support;

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::time::Duration;

use support::{CERT_PATH, Workspace, describe, issued, mount_backend, wait_for};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn once_renews_every_certificate_and_reloads_once() {
    let server = MockServer::start().await;
    let bundle = issued("www.example.com");
    mount_backend(&server, &bundle).await;

    let ws = Workspace::new(&server, "1h");
    let reload_log = ws.path().join("reload.log");
    let reload = format!("echo reloaded >> {}", reload_log.display());
    ws.add_cert("www.example.com", &reload);
    ws.add_cert("api.example.com", &reload);

    let output = ws.run(&["once"]).await;
    assert!(output.status.success(), "{}", describe(&output));

    for cn in ["www.example.com", "api.example.com"] {
        let written = fs::read_to_string(ws.output_path(cn)).unwrap();
        assert_eq!(
            written,
            format!(
                "{}\n{}\n{}\n",
                bundle.certificate, bundle.issuing_ca, bundle.private_key
            )
        );
        let mode = fs::metadata(ws.output_path(cn)).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o750);

        for file in ["cert.pem", "chain.pem", "issuing_ca.pem", "private.pem"] {
            assert!(ws.cache_file(cn, file).is_file(), "{cn}/{file} missing");
        }
        let key_mode = fs::metadata(ws.cache_file(cn, "private.pem"))
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(key_mode, 0o600);
    }

    assert_eq!(fs::read_to_string(&reload_log).unwrap(), "reloaded\n");
}

#[tokio::test]
async fn second_run_skips_valid_certificates() {
    let server = MockServer::start().await;
    mount_backend(&server, &issued("www.example.com")).await;

    let ws = Workspace::new(&server, "1h");
    let marker = ws.path().join("reloaded");
    ws.add_cert("www.example.com", &format!("touch {}", marker.display()));

    let first = ws.run(&["once"]).await;
    assert!(first.status.success(), "{}", describe(&first));
    assert!(marker.exists());
    let requests = server.received_requests().await.unwrap().len();

    fs::remove_file(&marker).unwrap();
    let second = ws.run(&["once"]).await;
    assert!(second.status.success(), "{}", describe(&second));
    assert!(!marker.exists(), "unchanged certificate must not reload");
    assert_eq!(server.received_requests().await.unwrap().len(), requests);
}

#[tokio::test]
async fn once_fails_when_one_certificate_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CERT_PATH))
        .and(body_partial_json(serde_json::json!({"common_name": "bad.example.com"})))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(serde_json::json!({"errors": ["common name not allowed"]})),
        )
        .with_priority(1)
        .mount(&server)
        .await;
    mount_backend(&server, &issued("good.example.com")).await;

    let ws = Workspace::new(&server, "1h");
    ws.add_cert("bad.example.com", "");
    ws.add_cert("good.example.com", "");

    let output = ws.run(&["once"]).await;
    assert!(!output.status.success(), "{}", describe(&output));
    assert!(
        String::from_utf8_lossy(&output.stderr).contains("common name not allowed"),
        "{}",
        describe(&output)
    );
    assert!(ws.output_path("good.example.com").exists());
    assert!(!ws.output_path("bad.example.com").exists());
}

#[tokio::test]
async fn once_with_broken_cert_config_never_contacts_backend() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let ws = Workspace::new(&server, "1h");
    let cert_config = ws.add_cert("www.example.com", "");
    let content = fs::read_to_string(&cert_config)
        .unwrap()
        .replace(r#"renew_ttl = "24h""#, r#"renew_ttl = "720h""#);
    fs::write(&cert_config, content).unwrap();

    let output = ws
        .run(&["once", "--cert-config", cert_config.to_str().unwrap()])
        .await;
    assert!(!output.status.success(), "{}", describe(&output));
    assert!(
        String::from_utf8_lossy(&output.stderr).contains("renew_ttl must be lower than ttl"),
        "{}",
        describe(&output)
    );
}

#[tokio::test]
async fn no_reload_skips_reload_commands() {
    let server = MockServer::start().await;
    mount_backend(&server, &issued("www.example.com")).await;

    let ws = Workspace::new(&server, "1h");
    let marker = ws.path().join("reloaded");
    ws.add_cert("www.example.com", &format!("touch {}", marker.display()));

    let output = ws.run(&["--no-reload", "once"]).await;
    assert!(output.status.success(), "{}", describe(&output));
    assert!(ws.output_path("www.example.com").exists());
    assert!(!marker.exists());
}

#[tokio::test]
async fn status_reads_cache_without_backend() {
    let server = MockServer::start().await;
    mount_backend(&server, &issued("www.example.com")).await;

    let ws = Workspace::new(&server, "1h");
    ws.add_cert("www.example.com", "");
    ws.add_cert("new.example.com", "");

    let once = ws
        .run(&[
            "once",
            "--cert-config",
            ws.cert_config_path("www.example.com").to_str().unwrap(),
        ])
        .await;
    assert!(once.status.success(), "{}", describe(&once));
    let requests = server.received_requests().await.unwrap().len();

    let output = ws.run(&["status"]).await;
    assert!(output.status.success(), "{}", describe(&output));
    assert_eq!(server.received_requests().await.unwrap().len(), requests);

    let stdout = String::from_utf8_lossy(&output.stdout);
    let www = stdout
        .lines()
        .find(|l| l.starts_with("www.example.com"))
        .unwrap_or_else(|| panic!("{}", describe(&output)));
    assert!(www.ends_with("ok"), "{www}");
    let new = stdout
        .lines()
        .find(|l| l.starts_with("new.example.com"))
        .unwrap_or_else(|| panic!("{}", describe(&output)));
    assert!(new.contains("missing") && new.ends_with("due"), "{new}");
}

#[tokio::test]
async fn missing_main_config_fails() {
    let server = MockServer::start().await;
    let ws = Workspace::new(&server, "1h");
    fs::remove_file(ws.config_path()).unwrap();

    for args in [&["once"][..], &["status"][..], &["run"][..]] {
        let output = ws.run(args).await;
        assert!(!output.status.success(), "{args:?}: {}", describe(&output));
    }
}

#[tokio::test]
async fn run_renews_then_stops_on_sigterm() {
    let server = MockServer::start().await;
    mount_backend(&server, &issued("www.example.com")).await;

    let ws = Workspace::new(&server, "1h");
    ws.add_cert("www.example.com", "");

    let mut child = ws.command().arg("run").spawn().unwrap();
    let output = ws.output_path("www.example.com");
    assert!(
        wait_for(Duration::from_secs(30), || output.exists()).await,
        "initial batch never wrote {}",
        output.display()
    );

    let pid = child.id().unwrap().to_string();
    let kill = tokio::process::Command::new("kill")
        .args(["-TERM", &pid])
        .status()
        .await
        .unwrap();
    assert!(kill.success());

    let status = tokio::time::timeout(Duration::from_secs(30), child.wait())
        .await
        .expect("certkeeper did not stop after SIGTERM")
        .unwrap();
    assert!(status.success(), "exit status: {status}");
}
