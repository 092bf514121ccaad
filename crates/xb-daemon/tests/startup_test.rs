//! Stack assembly against a temporary credential export. No network: the
//! only actions exercised are served locally or by the signer helper.

use std::fs;
use std::path::Path;

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use xb_core::config::Config;
use xb_daemon::startup::build_bridge;

fn write_export(dir: &Path, cookies: &str) {
    fs::write(dir.join("twitter_cookies.json"), cookies).unwrap();
    fs::write(
        dir.join("twitter_common_headers.json"),
        r#"{"user-agent": "Mozilla/5.0", "content-type": "application/json"}"#,
    )
    .unwrap();
    fs::write(dir.join("twitter_home.html"), "<html></html>").unwrap();
    fs::write(dir.join("twitter_ondemand.js"), "(()=>{})()").unwrap();
}

fn config_for(dir: &Path, signer: &[&str]) -> Config {
    let mut config = Config::default();
    config.credentials.data_dir = Some(dir.to_path_buf());
    config.signer.command = signer.iter().map(|s| s.to_string()).collect();
    config
}

const ECHO_SIGNER: &[&str] = &["sh", "-c", "cat > /dev/null; echo \"$0-$1\""];

async fn serve_once(config: &Config, line: &str) -> Vec<Value> {
    let bridge = build_bridge(config).unwrap();
    let (mut feed, bridge_in) = tokio::io::duplex(4096);
    let (bridge_out, mut collect) = tokio::io::duplex(4096);
    let handle =
        tokio::spawn(async move { bridge.run(BufReader::new(bridge_in), bridge_out).await });

    feed.write_all(line.as_bytes()).await.unwrap();
    feed.write_all(b"\n").await.unwrap();
    drop(feed);

    let mut out = String::new();
    collect.read_to_string(&mut out).await.unwrap();
    handle.await.unwrap().unwrap();
    out.lines().map(|l| serde_json::from_str(l).unwrap()).collect()
}

#[tokio::test]
async fn built_bridge_serves_list_actions() {
    let tmp = tempfile::tempdir().unwrap();
    write_export(tmp.path(), r#"[{"name":"ct0","value":"csrf"},{"name":"auth_token","value":"a"}]"#);

    let out = serve_once(
        &config_for(tmp.path(), ECHO_SIGNER),
        r#"{"id":1,"action":"listActions"}"#,
    )
    .await;
    assert_eq!(out[0], json!({ "status": "ready" }));
    assert_eq!(out[1]["success"], true);
    assert_eq!(out[1]["data"].as_array().unwrap().len(), 21);
}

#[cfg(unix)]
#[tokio::test]
async fn transaction_id_goes_through_signer_helper() {
    let tmp = tempfile::tempdir().unwrap();
    write_export(tmp.path(), r#"{"ct0":"csrf"}"#);

    let out = serve_once(
        &config_for(tmp.path(), ECHO_SIGNER),
        r#"{"id":"t","action":"get_transaction_id","args":{"url":"https://x.com/i/api/graphql/ABC/CreateTweet","method":"post"}}"#,
    )
    .await;
    assert_eq!(
        out[1],
        json!({ "id": "t", "success": true, "data": "POST-/i/api/graphql/ABC/CreateTweet" })
    );
}

#[test]
fn missing_csrf_cookie_fails_startup() {
    let tmp = tempfile::tempdir().unwrap();
    write_export(tmp.path(), r#"{"auth_token":"a"}"#);

    let err = build_bridge(&config_for(tmp.path(), ECHO_SIGNER))
        .err()
        .expect("startup must fail");
    let message = format!("{err:#}");
    assert!(message.contains("priming signing context"), "{message}");
    assert!(message.contains("CSRF"), "{message}");
}

#[test]
fn missing_signer_command_fails_startup() {
    let tmp = tempfile::tempdir().unwrap();
    write_export(tmp.path(), r#"{"ct0":"csrf"}"#);

    let err = build_bridge(&config_for(tmp.path(), &[]))
        .err()
        .expect("startup must fail");
    assert!(format!("{err:#}").contains("no signer command configured"));
}

#[test]
fn missing_data_dir_fails_startup() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config_for(&tmp.path().join("absent"), ECHO_SIGNER);

    let err = build_bridge(&config).err().expect("startup must fail");
    assert!(format!("{err:#}").contains("credential data directory"));
}
