use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::{Value, json};
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN_ENV: &str = "A2K_TEST_FEEDLY_TOKEN";

/// Config with local paths, a mocked Feedly and the stub mail transport
fn write_config(dir: &TempDir, feedly_url: &str) -> std::path::PathBuf {
    write_config_with(dir, feedly_url, "")
}

fn write_config_with(dir: &TempDir, feedly_url: &str, extra: &str) -> std::path::PathBuf {
    let config = format!(
        r#"
[general]
db_path = "{db}"
bundle_dir = "{bundles}"

[http]
retries = 0

[feedly]
access_token_env = "{token_env}"
stream_id = "user/abc/tag/global.saved"
base_url = "{feedly_url}"

[kindle]
email = "reader@kindle.com"
sender_email = "me@example.com"
transport = "stub"
{extra}
"#,
        db = dir.path().join("a2k.sqlite").display(),
        bundles = dir.path().join("bundles").display(),
        token_env = TOKEN_ENV,
        feedly_url = feedly_url,
        extra = extra,
    );
    let path = dir.path().join("config.toml");
    fs::write(&path, config).expect("write config");
    path
}

fn entry(id: &str, published_ms: i64) -> Value {
    entry_from(id, published_ms, "Money Stuff")
}

fn entry_from(id: &str, published_ms: i64, publication: &str) -> Value {
    json!({
        "id": id,
        "title": format!("Entry {}", id),
        "author": "Matt Levine",
        "content": { "content": "<p>Some body text</p>" },
        "alternate": [{ "href": format!("https://example.com/{}", id) }],
        "origin": { "title": publication },
        "published": published_ms,
        "categories": [{ "label": "Finance" }]
    })
}

fn run_json(config: &Path, args: &[&str]) -> Value {
    let output = cargo_bin_cmd!("articles2kindle")
        .arg("--config")
        .arg(config)
        .args(args)
        .output()
        .expect("run command");
    assert!(output.status.success(), "{:?} failed", args);
    serde_json::from_slice(&output.stdout).expect("valid json")
}

#[test]
fn config_init_writes_example_file() {
    let dir = TempDir::new().expect("temp dir");
    let config_path = dir.path().join("config.toml");

    let mut cmd = cargo_bin_cmd!("articles2kindle");
    cmd.args(["config", "init", "--path"])
        .arg(&config_path)
        .assert()
        .success();

    let content = fs::read_to_string(&config_path).expect("read config");
    assert!(content.contains("max_bundle_mb = 20"));
    assert!(content.contains("[kindle]"));

    // A second init refuses to overwrite
    let mut cmd = cargo_bin_cmd!("articles2kindle");
    cmd.args(["config", "init", "--path"])
        .arg(&config_path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn reset_requires_confirmation() {
    let dir = TempDir::new().expect("temp dir");
    let config = write_config(&dir, "http://127.0.0.1:9");

    let mut cmd = cargo_bin_cmd!("articles2kindle");
    cmd.arg("--config")
        .arg(&config)
        .arg("reset-bundled")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--yes"));
}

#[test]
fn bundle_unknown_publication_fails() {
    let dir = TempDir::new().expect("temp dir");
    let config = write_config(&dir, "http://127.0.0.1:9");

    let mut cmd = cargo_bin_cmd!("articles2kindle");
    cmd.arg("--config")
        .arg(&config)
        .args(["bundle", "--publication", "Nobody Writes Here"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No articles found"));
}

#[test]
fn bundle_requires_a_group() {
    let mut cmd = cargo_bin_cmd!("articles2kindle");
    cmd.arg("bundle").assert().failure();
}

#[tokio::test(flavor = "multi_thread")]
async fn fetch_bundle_send_with_stub_transport() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v3/streams/contents"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                entry("e2", 1_709_373_600_000),
                entry("e1", 1_709_287_200_000)
            ]
        })))
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("temp dir");
    let config = write_config(&dir, &server.uri());

    cargo_bin_cmd!("articles2kindle")
        .env(TOKEN_ENV, "test-token")
        .arg("--config")
        .arg(&config)
        .arg("fetch")
        .assert()
        .success()
        .stdout(predicate::str::contains("feedly: fetched 2, 2 new"));

    let publications = run_json(&config, &["list", "publications", "--json"]);
    assert_eq!(publications[0]["publication_name"], "Money Stuff");
    assert_eq!(publications[0]["unbundled_count"], 2);

    cargo_bin_cmd!("articles2kindle")
        .arg("--config")
        .arg(&config)
        .args(["bundle", "--publication", "money stuff"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Money Stuff - Matt Levine - Created"));

    cargo_bin_cmd!("articles2kindle")
        .arg("--config")
        .arg(&config)
        .arg("send")
        .assert()
        .success()
        .stdout(predicate::str::contains("reader@kindle.com"));

    let bundles = run_json(&config, &["list", "bundles", "--json"]);
    let bundles = bundles.as_array().expect("bundle array");
    assert_eq!(bundles.len(), 1);
    assert_eq!(bundles[0]["article_count"], 2);
    assert_eq!(bundles[0]["sent_to"], json!(["reader@kindle.com"]));

    // Nothing left to send
    cargo_bin_cmd!("articles2kindle")
        .arg("--config")
        .arg(&config)
        .arg("send")
        .assert()
        .success()
        .stdout(predicate::str::contains("No unsent bundles"));
}

#[test]
fn bundle_all_conflicts_with_title() {
    let mut cmd = cargo_bin_cmd!("articles2kindle");
    cmd.args(["bundle", "--all", "--title", "Weekend"])
        .assert()
        .failure();
}

#[tokio::test(flavor = "multi_thread")]
async fn bundle_all_covers_every_publication() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v3/streams/contents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                entry_from("e3", 1_709_460_000_000, "Noahpinion"),
                entry_from("e2", 1_709_373_600_000, "Money Stuff"),
                entry_from("e1", 1_709_287_200_000, "Money Stuff")
            ]
        })))
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("temp dir");
    let config = write_config(&dir, &server.uri());

    cargo_bin_cmd!("articles2kindle")
        .env(TOKEN_ENV, "test-token")
        .arg("--config")
        .arg(&config)
        .arg("fetch")
        .assert()
        .success();

    let output = cargo_bin_cmd!("articles2kindle")
        .arg("--config")
        .arg(&config)
        .args(["bundle", "--all"])
        .output()
        .expect("run command");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let money = stdout.find("publication 'Money Stuff'").expect("money stuff reported");
    let noah = stdout.find("publication 'Noahpinion'").expect("noahpinion reported");
    // Largest backlog first
    assert!(money < noah);
    assert!(stdout.contains("2 of 2 publication(s) bundled"));

    let publications = run_json(&config, &["list", "publications", "--json"]);
    for publication in publications.as_array().expect("publication array") {
        assert_eq!(publication["unbundled_count"], 0);
    }

    cargo_bin_cmd!("articles2kindle")
        .arg("--config")
        .arg(&config)
        .args(["bundle", "--all"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No unbundled articles"));
}

#[tokio::test(flavor = "multi_thread")]
async fn run_fails_when_a_source_failed_and_folder_is_empty() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v3/streams/contents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [entry("e1", 1_709_287_200_000)]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/archive"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("temp dir");
    let substack = format!(
        r#"
[substack]
connect_sid_env = "A2K_TEST_UNSET_SID"
request_delay_ms = 0

[[substack.publications]]
url = "{}"
"#,
        server.uri()
    );
    let config = write_config_with(&dir, &server.uri(), &substack);

    cargo_bin_cmd!("articles2kindle")
        .env(TOKEN_ENV, "test-token")
        .arg("--config")
        .arg(&config)
        .args(["run", "--folder", "Tech"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("No publications found in folder 'Tech'"))
        .stderr(predicate::str::contains("Run finished with errors"))
        .stderr(predicate::str::contains("substack"));
}
