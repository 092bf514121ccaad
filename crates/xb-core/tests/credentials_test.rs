use std::fs;

use xb_core::config::CredentialsConfig;
use xb_core::credentials::{
    cookie_header, csrf_token, CredentialError, CredentialProvider, FileCredentialProvider,
};

fn write_fixture(dir: &std::path::Path, cookies: &str) {
    fs::write(dir.join("twitter_cookies.json"), cookies).unwrap();
    fs::write(
        dir.join("twitter_common_headers.json"),
        r#"{"user-agent": "Mozilla/5.0", "authorization": "Bearer AAAA"}"#,
    )
    .unwrap();
    fs::write(dir.join("twitter_home.html"), "<html><meta name=\"twitter-site-verification\"></html>").unwrap();
    fs::write(dir.join("twitter_ondemand.js"), "(()=>{})()").unwrap();
}

fn config_for(dir: &std::path::Path) -> CredentialsConfig {
    CredentialsConfig {
        data_dir: Some(dir.to_path_buf()),
        ..CredentialsConfig::default()
    }
}

#[test]
fn reads_playwright_cookie_array() {
    let tmp = tempfile::tempdir().unwrap();
    write_fixture(
        tmp.path(),
        r#"[{"name": "auth_token", "value": "abc", "domain": ".x.com"},
            {"name": "ct0", "value": "csrf123", "domain": ".x.com", "httpOnly": false}]"#,
    );

    let provider = FileCredentialProvider::new(&config_for(tmp.path())).unwrap();
    let cookies = provider.cookies().unwrap();
    assert_eq!(csrf_token(&cookies), Some("csrf123"));
    assert_eq!(cookie_header(&cookies), "auth_token=abc; ct0=csrf123");
}

#[test]
fn reads_flat_cookie_map() {
    let tmp = tempfile::tempdir().unwrap();
    write_fixture(tmp.path(), r#"{"ct0": "flat", "twid": "u=1"}"#);

    let provider = FileCredentialProvider::new(&config_for(tmp.path())).unwrap();
    let cookies = provider.cookies().unwrap();
    assert_eq!(cookies.len(), 2);
    assert_eq!(csrf_token(&cookies), Some("flat"));
}

#[test]
fn reads_common_headers_and_bootstrap() {
    let tmp = tempfile::tempdir().unwrap();
    write_fixture(tmp.path(), r#"{"ct0": "x"}"#);

    let provider = FileCredentialProvider::new(&config_for(tmp.path())).unwrap();
    let headers = provider.common_headers().unwrap();
    assert_eq!(headers.get("user-agent").map(String::as_str), Some("Mozilla/5.0"));

    let bootstrap = provider.transaction_bootstrap().unwrap();
    assert!(bootstrap.home_document.contains("twitter-site-verification"));
    assert_eq!(bootstrap.on_demand_script, "(()=>{})()");
}

#[test]
fn missing_directory_is_reported() {
    let tmp = tempfile::tempdir().unwrap();
    let missing = tmp.path().join("nope");
    let err = FileCredentialProvider::new(&config_for(&missing)).unwrap_err();
    assert!(matches!(err, CredentialError::MissingDataDir(_)));
}

#[test]
fn empty_cookie_export_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    write_fixture(tmp.path(), "[]");

    let provider = FileCredentialProvider::new(&config_for(tmp.path())).unwrap();
    assert!(matches!(provider.cookies(), Err(CredentialError::Empty(_))));
}

#[test]
fn malformed_headers_file_is_reported() {
    let tmp = tempfile::tempdir().unwrap();
    write_fixture(tmp.path(), r#"{"ct0": "x"}"#);
    fs::write(tmp.path().join("twitter_common_headers.json"), "not json").unwrap();

    let provider = FileCredentialProvider::new(&config_for(tmp.path())).unwrap();
    assert!(matches!(
        provider.common_headers(),
        Err(CredentialError::Malformed { .. })
    ));
}

#[test]
fn missing_bootstrap_file_is_io_error() {
    let tmp = tempfile::tempdir().unwrap();
    write_fixture(tmp.path(), r#"{"ct0": "x"}"#);
    fs::remove_file(tmp.path().join("twitter_ondemand.js")).unwrap();

    let provider = FileCredentialProvider::new(&config_for(tmp.path())).unwrap();
    assert!(matches!(
        provider.transaction_bootstrap(),
        Err(CredentialError::Io { .. })
    ));
}
