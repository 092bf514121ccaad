use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Url;
use tracing::{debug, warn};
use xb_core::config::{ConfigError, PlatformConfig};

use crate::headers::{merge_headers, HeaderStore};
use crate::signing::{SigningContext, SigningError};
use crate::transport::{OutboundRequest, Result, Transport, TransportResponse};

/// Which requests are signed and where the token goes.
#[derive(Debug, Clone)]
pub struct SigningPolicy {
    signed_path_prefix: String,
    transaction_header: HeaderName,
}

impl SigningPolicy {
    pub fn new(
        signed_path_prefix: impl Into<String>,
        transaction_header: &str,
    ) -> std::result::Result<Self, ConfigError> {
        let transaction_header = HeaderName::from_bytes(transaction_header.as_bytes())
            .map_err(|e| ConfigError::Validation(format!("invalid transaction header: {e}")))?;
        Ok(Self {
            signed_path_prefix: signed_path_prefix.into(),
            transaction_header,
        })
    }

    pub fn from_config(config: &PlatformConfig) -> std::result::Result<Self, ConfigError> {
        Self::new(config.signed_path_prefix.clone(), &config.transaction_header)
    }

    pub fn is_signed(&self, url: &Url) -> bool {
        url.path().starts_with(&self.signed_path_prefix)
    }

    pub fn transaction_header(&self) -> &HeaderName {
        &self.transaction_header
    }
}

/// Transport decorator that assembles the final header set for every call.
///
/// Order of precedence, lowest first: the session baseline from the
/// [`HeaderStore`], then caller headers (see [`merge_headers`]), then a fresh
/// transaction token for signed paths. The complete set is built before the
/// inner transport sees the request. If signing fails the request is dropped.
pub struct HeaderInjectionMiddleware {
    inner: Arc<dyn Transport>,
    store: Arc<HeaderStore>,
    signing: Arc<SigningContext>,
    policy: SigningPolicy,
}

impl HeaderInjectionMiddleware {
    pub fn new(
        inner: Arc<dyn Transport>,
        store: Arc<HeaderStore>,
        signing: Arc<SigningContext>,
        policy: SigningPolicy,
    ) -> Self {
        Self {
            inner,
            store,
            signing,
            policy,
        }
    }

    /// Token most recently attached to a signed request. Diagnostics only.
    pub fn last_token(&self) -> Option<String> {
        self.signing.last_token()
    }
}

#[async_trait]
impl Transport for HeaderInjectionMiddleware {
    async fn send(&self, mut request: OutboundRequest) -> Result<TransportResponse> {
        let mut headers = merge_headers(self.store.baseline(), &request.headers);

        let signed = self.policy.is_signed(&request.url);
        if signed {
            let token = self
                .signing
                .token_for(request.method.as_str(), request.url.path())
                .await
                .inspect_err(|e| {
                    warn!(method = %request.method, path = request.url.path(), error = %e,
                        "signing failed, request not sent");
                })?;
            let value = HeaderValue::from_str(&token).map_err(|_| SigningError::InvalidToken)?;
            headers.insert(self.policy.transaction_header.clone(), value);
        }

        request.headers = headers;
        debug!(
            method = %request.method,
            path = request.url.path(),
            signed,
            header_count = request.headers.len(),
            "dispatching request"
        );
        self.inner.send(request).await
    }
}
