//! Transaction-token signing.
//!
//! Signed endpoints require a per-request token derived from the HTTP method
//! and URL path. The derivation itself is opaque: a [`TransactionSigner`]
//! produces it. [`SigningContext`] owns the session credentials next to the
//! signer and is the only way the rest of the crate asks for a token.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use tracing::debug;
use xb_core::config::ConfigError;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("signer failed: {0}")]
    Signer(String),

    #[error("signer returned an empty token")]
    EmptyToken,

    #[error("signer timed out after {0:?}")]
    Timeout(Duration),

    #[error("token is not a valid header value")]
    InvalidToken,
}

pub type Result<T> = std::result::Result<T, SigningError>;

// ---------------------------------------------------------------------------
// TransactionSigner
// ---------------------------------------------------------------------------

/// Whether a signer may be called while another call is still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignerConcurrency {
    /// No contract stated; calls are serialized by the [`SigningContext`].
    Unspecified,
    /// Stateless per call or internally synchronized.
    Reentrant,
}

/// Produces the transaction token for `(method, path)`.
///
/// `method` arrives upper-cased and `path` without host, query or fragment.
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    async fn sign(&self, method: &str, path: &str) -> Result<String>;

    fn concurrency(&self) -> SignerConcurrency {
        SignerConcurrency::Unspecified
    }
}

/// Strip host, query string and fragment. Accepts a full URL or a bare path.
pub fn normalize_path(raw: &str) -> String {
    let path = match Url::parse(raw) {
        Ok(url) if url.has_host() => url.path().to_string(),
        _ => raw
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    };
    if path.starts_with('/') {
        path
    } else {
        format!("/{path}")
    }
}

// ---------------------------------------------------------------------------
// SigningContext
// ---------------------------------------------------------------------------

/// Session credentials plus the signer that derives transaction tokens.
///
/// Credential fields never change after [`prime`](Self::prime). The
/// last-token slot is written after each successful signing for diagnostics
/// and is never consulted when building a request.
pub struct SigningContext {
    cookie_header: String,
    csrf_token: String,
    signer: Arc<dyn TransactionSigner>,
    gate: Option<tokio::sync::Mutex<()>>,
    last_token: Mutex<Option<String>>,
}

impl std::fmt::Debug for SigningContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningContext")
            .field("cookie_header", &"<redacted>")
            .field("csrf_token", &"<redacted>")
            .field("serialized", &self.gate.is_some())
            .finish()
    }
}

impl SigningContext {
    /// Build the context. The CSRF token is required for every mutating
    /// call, so an empty one is a configuration error.
    pub fn prime(
        cookie_header: impl Into<String>,
        csrf_token: impl Into<String>,
        signer: Arc<dyn TransactionSigner>,
    ) -> std::result::Result<Self, ConfigError> {
        let csrf_token = csrf_token.into();
        if csrf_token.trim().is_empty() {
            return Err(ConfigError::Validation(
                "CSRF token (ct0 cookie) is missing; log in again to refresh the session".into(),
            ));
        }

        let gate = match signer.concurrency() {
            SignerConcurrency::Unspecified => Some(tokio::sync::Mutex::new(())),
            SignerConcurrency::Reentrant => None,
        };

        Ok(Self {
            cookie_header: cookie_header.into(),
            csrf_token,
            signer,
            gate,
            last_token: Mutex::new(None),
        })
    }

    pub fn cookie_header(&self) -> &str {
        &self.cookie_header
    }

    pub fn csrf_token(&self) -> &str {
        &self.csrf_token
    }

    /// Whether signer calls are serialized by this context.
    pub fn is_serialized(&self) -> bool {
        self.gate.is_some()
    }

    /// Ask the signer for a fresh token. Callers must use the returned value;
    /// nothing is cached between calls.
    pub async fn token_for(&self, method: &str, path: &str) -> Result<String> {
        let method = method.to_ascii_uppercase();
        let path = normalize_path(path);

        let token = match &self.gate {
            Some(gate) => {
                let _held = gate.lock().await;
                self.signer.sign(&method, &path).await?
            }
            None => self.signer.sign(&method, &path).await?,
        };

        if token.is_empty() {
            return Err(SigningError::EmptyToken);
        }

        debug!(%method, %path, "transaction token generated");
        *self.last_token.lock().expect("last token lock") = Some(token.clone());
        Ok(token)
    }

    /// Most recently generated token. Diagnostics only.
    pub fn last_token(&self) -> Option<String> {
        self.last_token.lock().expect("last token lock").clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoSigner;

    #[async_trait]
    impl TransactionSigner for EchoSigner {
        async fn sign(&self, method: &str, path: &str) -> Result<String> {
            Ok(format!("{method} {path}"))
        }

        fn concurrency(&self) -> SignerConcurrency {
            SignerConcurrency::Reentrant
        }
    }

    /// Tracks the highest number of overlapping `sign` calls.
    struct OverlapSigner {
        active: AtomicUsize,
        peak: AtomicUsize,
        concurrency: SignerConcurrency,
    }

    impl OverlapSigner {
        fn new(concurrency: SignerConcurrency) -> Self {
            Self {
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                concurrency,
            }
        }
    }

    #[async_trait]
    impl TransactionSigner for OverlapSigner {
        async fn sign(&self, _method: &str, _path: &str) -> Result<String> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok("t".into())
        }

        fn concurrency(&self) -> SignerConcurrency {
            self.concurrency
        }
    }

    struct EmptySigner;

    #[async_trait]
    impl TransactionSigner for EmptySigner {
        async fn sign(&self, _method: &str, _path: &str) -> Result<String> {
            Ok(String::new())
        }
    }

    #[test]
    fn normalize_strips_host_query_fragment() {
        assert_eq!(
            normalize_path("https://x.com/i/api/graphql/ABC/CreateTweet?variables=%7B%7D#frag"),
            "/i/api/graphql/ABC/CreateTweet"
        );
        assert_eq!(normalize_path("/i/api/1.1/x.json?a=1"), "/i/api/1.1/x.json");
        assert_eq!(normalize_path("/path#only"), "/path");
        assert_eq!(normalize_path("relative/path"), "/relative/path");
        assert_eq!(normalize_path(""), "/");
    }

    #[test]
    fn prime_rejects_empty_csrf() {
        let err = SigningContext::prime("a=b", "  ", Arc::new(EchoSigner)).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn prime_keeps_credentials() {
        let ctx = SigningContext::prime("a=b; ct0=c", "c", Arc::new(EchoSigner)).unwrap();
        assert_eq!(ctx.cookie_header(), "a=b; ct0=c");
        assert_eq!(ctx.csrf_token(), "c");
        assert!(!ctx.is_serialized());
        assert!(ctx.last_token().is_none());
    }

    #[test]
    fn debug_redacts_credentials() {
        let ctx = SigningContext::prime("secret=1", "csrf", Arc::new(EchoSigner)).unwrap();
        let rendered = format!("{ctx:?}");
        assert!(!rendered.contains("secret=1"));
        assert!(!rendered.contains("csrf\""));
    }

    #[tokio::test]
    async fn token_for_normalizes_inputs() {
        let ctx = SigningContext::prime("", "c", Arc::new(EchoSigner)).unwrap();
        let token = ctx
            .token_for("post", "https://x.com/i/api/graphql/ABC/CreateTweet?x=1")
            .await
            .unwrap();
        assert_eq!(token, "POST /i/api/graphql/ABC/CreateTweet");
        assert_eq!(ctx.last_token().as_deref(), Some(token.as_str()));
    }

    #[tokio::test]
    async fn empty_token_is_an_error() {
        let ctx = SigningContext::prime("", "c", Arc::new(EmptySigner)).unwrap();
        let err = ctx.token_for("GET", "/x").await.unwrap_err();
        assert!(matches!(err, SigningError::EmptyToken));
        assert!(ctx.last_token().is_none());
    }

    #[tokio::test]
    async fn unspecified_signer_is_serialized() {
        let signer = Arc::new(OverlapSigner::new(SignerConcurrency::Unspecified));
        let ctx = Arc::new(SigningContext::prime("", "c", signer.clone()).unwrap());
        assert!(ctx.is_serialized());

        let mut handles = Vec::new();
        for _ in 0..5 {
            let ctx = ctx.clone();
            handles.push(tokio::spawn(async move { ctx.token_for("GET", "/p").await }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(signer.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reentrant_signer_runs_in_parallel() {
        let signer = Arc::new(OverlapSigner::new(SignerConcurrency::Reentrant));
        let ctx = Arc::new(SigningContext::prime("", "c", signer.clone()).unwrap());

        let mut handles = Vec::new();
        for _ in 0..5 {
            let ctx = ctx.clone();
            handles.push(tokio::spawn(async move { ctx.token_for("GET", "/p").await }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert!(signer.peak.load(Ordering::SeqCst) > 1);
    }
}
