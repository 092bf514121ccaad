use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "XBRIDGE_CONFIG";
/// Environment variable overriding `[credentials] data_dir`.
pub const DATA_DIR_ENV: &str = "XBRIDGE_DATA_DIR";

/// Top-level configuration loaded from `~/.xbridge/config.toml`.
///
/// Holds no secrets. Session cookies and bootstrap documents live in the
/// credential data directory and are read by the
/// [`FileCredentialProvider`](crate::credentials::FileCredentialProvider).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub signer: SignerConfig,
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load config from `$XBRIDGE_CONFIG` or `~/.xbridge/config.toml`,
    /// falling back to defaults when the file does not exist. The
    /// `XBRIDGE_DATA_DIR` override is applied afterwards.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::default_path());

        let mut cfg = if path.exists() {
            Self::read(&path)?
        } else {
            tracing::info!(path = %path.display(), "no config file found, using defaults");
            Config::default()
        };

        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            cfg.credentials.data_dir = Some(PathBuf::from(dir));
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let cfg = Self::read(&path.into())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a TOML document.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let cfg: Config = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        self.validate()?;
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Semantic validation for settings that are not fully expressible via type checks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.platform.validate()?;
        self.bridge.validate()?;
        self.signer.validate()?;
        Ok(())
    }

    fn read(path: &PathBuf) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// `~/.xbridge`, or `./.xbridge` when no home directory is known.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".xbridge")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// Directory holding the browser-export artifacts.
    /// Defaults to `~/.xbridge/data`.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default = "default_cookies_file")]
    pub cookies_file: String,
    #[serde(default = "default_common_headers_file")]
    pub common_headers_file: String,
    #[serde(default = "default_home_file")]
    pub home_file: String,
    #[serde(default = "default_ondemand_file")]
    pub ondemand_file: String,
}

impl CredentialsConfig {
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| Config::home_dir().join("data"))
    }
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            cookies_file: default_cookies_file(),
            common_headers_file: default_common_headers_file(),
            home_file: default_home_file(),
            ondemand_file: default_ondemand_file(),
        }
    }
}

fn default_cookies_file() -> String {
    "twitter_cookies.json".into()
}
fn default_common_headers_file() -> String {
    "twitter_common_headers.json".into()
}
fn default_home_file() -> String {
    "twitter_home.html".into()
}
fn default_ondemand_file() -> String {
    "twitter_ondemand.js".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignerConfig {
    /// argv of the transaction-id helper. Empty means no signer is configured.
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default = "default_signer_timeout")]
    pub timeout_secs: u64,
}

impl SignerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "signer.timeout_secs must be greater than 0".into(),
            ));
        }
        if self.command.first().is_some_and(|c| c.trim().is_empty()) {
            return Err(ConfigError::Validation(
                "signer.command must start with a program name".into(),
            ));
        }
        Ok(())
    }
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: default_signer_timeout(),
        }
    }
}

fn default_signer_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_upload_url")]
    pub upload_url: String,
    /// Requests whose URL path starts with this prefix get a fresh
    /// transaction token.
    #[serde(default = "default_signed_path_prefix")]
    pub signed_path_prefix: String,
    #[serde(default = "default_transaction_header")]
    pub transaction_header: String,
    #[serde(default = "default_platform_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_language")]
    pub language: String,
    /// GraphQL operation name -> query id. Entries here replace the built-in ids.
    #[serde(default)]
    pub query_ids: BTreeMap<String, String>,
}

impl PlatformConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (name, url) in [("base_url", &self.base_url), ("upload_url", &self.upload_url)] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Validation(format!(
                    "platform.{name} must be an http(s) URL, got '{url}'"
                )));
            }
        }
        if !self.signed_path_prefix.starts_with('/') {
            return Err(ConfigError::Validation(
                "platform.signed_path_prefix must start with '/'".into(),
            ));
        }
        if self.transaction_header.trim().is_empty() {
            return Err(ConfigError::Validation(
                "platform.transaction_header cannot be empty".into(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "platform.timeout_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            upload_url: default_upload_url(),
            signed_path_prefix: default_signed_path_prefix(),
            transaction_header: default_transaction_header(),
            timeout_secs: default_platform_timeout(),
            language: default_language(),
            query_ids: BTreeMap::new(),
        }
    }
}

fn default_base_url() -> String {
    "https://x.com".into()
}
fn default_upload_url() -> String {
    "https://upload.x.com".into()
}
fn default_signed_path_prefix() -> String {
    "/i/api/graphql/".into()
}
fn default_transaction_header() -> String {
    "x-client-transaction-id".into()
}
fn default_platform_timeout() -> u64 {
    30
}
fn default_language() -> String {
    "en-US".into()
}

/// How parsed commands are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// One task per command; completion order is unspecified.
    #[default]
    Concurrent,
    /// Commands run one after another; completion order equals input order.
    Sequential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub dispatch: DispatchMode,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
}

impl BridgeConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_in_flight == 0 {
            return Err(ConfigError::Validation(
                "bridge.max_in_flight must be at least 1".into(),
            ));
        }
        if self.max_line_bytes < 64 {
            return Err(ConfigError::Validation(
                "bridge.max_line_bytes must be at least 64".into(),
            ));
        }
        Ok(())
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            dispatch: DispatchMode::default(),
            max_in_flight: default_max_in_flight(),
            drain_timeout_secs: default_drain_timeout(),
            max_line_bytes: default_max_line_bytes(),
        }
    }
}

fn default_max_in_flight() -> usize {
    16
}
fn default_drain_timeout() -> u64 {
    30
}
fn default_max_line_bytes() -> usize {
    1024 * 1024
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.platform.signed_path_prefix, "/i/api/graphql/");
        assert_eq!(cfg.platform.transaction_header, "x-client-transaction-id");
        assert_eq!(cfg.bridge.dispatch, DispatchMode::Concurrent);
        assert!(cfg.signer.command.is_empty());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg = Config::from_toml(
            r#"
            [bridge]
            dispatch = "sequential"
            max_in_flight = 4

            [signer]
            command = ["node", "tid.js"]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.bridge.dispatch, DispatchMode::Sequential);
        assert_eq!(cfg.bridge.max_in_flight, 4);
        assert_eq!(cfg.bridge.drain_timeout_secs, 30);
        assert_eq!(cfg.signer.command, vec!["node", "tid.js"]);
        assert_eq!(cfg.platform.base_url, "https://x.com");
    }

    #[test]
    fn rejects_zero_in_flight() {
        let err = Config::from_toml("[bridge]\nmax_in_flight = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn rejects_relative_signed_prefix() {
        let err = Config::from_toml("[platform]\nsigned_path_prefix = \"i/api\"\n").unwrap_err();
        assert!(err.to_string().contains("signed_path_prefix"));
    }

    #[test]
    fn rejects_blank_signer_program() {
        let err = Config::from_toml("[signer]\ncommand = [\" \"]\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn garbage_is_parse_error() {
        let err = Config::from_toml("[bridge\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn toml_roundtrip_keeps_query_ids() {
        let mut cfg = Config::default();
        cfg.platform
            .query_ids
            .insert("CreateTweet".into(), "abc123".into());
        let text = cfg.to_toml().unwrap();
        let back = Config::from_toml(&text).unwrap();
        assert_eq!(back.platform.query_ids.get("CreateTweet").unwrap(), "abc123");
    }
}
