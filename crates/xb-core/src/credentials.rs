//! Session material harvested by the browser login flow.
//!
//! The login flow itself lives outside this workspace; it leaves four files
//! in the data directory (cookies, common request headers, the home page
//! document and the on-demand script). This module only reads them back.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::config::CredentialsConfig;

/// Name of the cookie carrying the CSRF token.
pub const CSRF_COOKIE: &str = "ct0";

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("credential data directory not found: {0}")]
    MissingDataDir(PathBuf),

    #[error("failed to read {path}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("malformed {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("{0} is empty")]
    Empty(&'static str),
}

pub type Result<T> = std::result::Result<T, CredentialError>;

/// Documents the transaction signer is constructed from.
#[derive(Debug, Clone)]
pub struct TransactionBootstrap {
    pub home_document: String,
    pub on_demand_script: String,
}

/// Source of the session material the bridge primes itself with.
pub trait CredentialProvider: Send + Sync {
    /// Headers the browser sent on every API call (user agent, bearer, ...).
    fn common_headers(&self) -> Result<BTreeMap<String, String>>;

    /// Session cookies, name to value.
    fn cookies(&self) -> Result<BTreeMap<String, String>>;

    /// Home page document and on-demand script used to build the signer.
    fn transaction_bootstrap(&self) -> Result<TransactionBootstrap>;
}

/// Cookie header value in `name=value; name=value` form.
pub fn cookie_header(cookies: &BTreeMap<String, String>) -> String {
    cookies
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// The CSRF token, i.e. the `ct0` cookie, if present.
pub fn csrf_token(cookies: &BTreeMap<String, String>) -> Option<&str> {
    cookies.get(CSRF_COOKIE).map(String::as_str)
}

// ---------------------------------------------------------------------------
// FileCredentialProvider
// ---------------------------------------------------------------------------

/// Reads the browser-export artifacts from a data directory.
#[derive(Debug, Clone)]
pub struct FileCredentialProvider {
    cookies_path: PathBuf,
    common_headers_path: PathBuf,
    home_path: PathBuf,
    ondemand_path: PathBuf,
}

/// Cookies may be exported either as a Playwright-style array or a flat map.
#[derive(Deserialize)]
#[serde(untagged)]
enum CookieExport {
    List(Vec<ExportedCookie>),
    Map(BTreeMap<String, String>),
}

#[derive(Deserialize)]
struct ExportedCookie {
    name: String,
    value: String,
}

impl FileCredentialProvider {
    /// Build a provider for the directory named by `config`. Fails when the
    /// directory does not exist.
    pub fn new(config: &CredentialsConfig) -> Result<Self> {
        let dir = config.resolved_data_dir();
        if !dir.is_dir() {
            return Err(CredentialError::MissingDataDir(dir));
        }
        tracing::info!(data_dir = %dir.display(), "using credential data directory");
        Ok(Self {
            cookies_path: dir.join(&config.cookies_file),
            common_headers_path: dir.join(&config.common_headers_file),
            home_path: dir.join(&config.home_file),
            ondemand_path: dir.join(&config.ondemand_file),
        })
    }

    fn read(path: &Path) -> Result<String> {
        std::fs::read_to_string(path).map_err(|e| CredentialError::Io {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
        let text = Self::read(path)?;
        serde_json::from_str(&text).map_err(|e| CredentialError::Malformed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

impl CredentialProvider for FileCredentialProvider {
    fn common_headers(&self) -> Result<BTreeMap<String, String>> {
        Self::read_json(&self.common_headers_path)
    }

    fn cookies(&self) -> Result<BTreeMap<String, String>> {
        let cookies = match Self::read_json::<CookieExport>(&self.cookies_path)? {
            CookieExport::Map(map) => map,
            CookieExport::List(list) => list.into_iter().map(|c| (c.name, c.value)).collect(),
        };
        if cookies.is_empty() {
            return Err(CredentialError::Empty("cookie export"));
        }
        Ok(cookies)
    }

    fn transaction_bootstrap(&self) -> Result<TransactionBootstrap> {
        let home_document = Self::read(&self.home_path)?;
        if home_document.trim().is_empty() {
            return Err(CredentialError::Empty("home document"));
        }
        let on_demand_script = Self::read(&self.ondemand_path)?;
        if on_demand_script.trim().is_empty() {
            return Err(CredentialError::Empty("on-demand script"));
        }
        Ok(TransactionBootstrap {
            home_document,
            on_demand_script,
        })
    }
}
