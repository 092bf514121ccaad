//! Session header baseline and the merge rule for outbound requests.

use std::collections::BTreeMap;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, COOKIE};
use xb_core::config::ConfigError;

use crate::signing::SigningContext;

/// Header carrying the CSRF token on every call.
pub const CSRF_HEADER: &str = "x-csrf-token";

/// Baseline session headers applied to every outbound call.
///
/// Built once at startup from the browser's common headers plus the session
/// cookie and CSRF token, then shared read-only by every request.
#[derive(Debug, Clone)]
pub struct HeaderStore {
    baseline: HeaderMap,
}

impl HeaderStore {
    /// Common headers first, then the CSRF header and `Cookie`, so the
    /// session material wins over anything the export happened to contain.
    pub fn from_session(
        common_headers: &BTreeMap<String, String>,
        signing: &SigningContext,
    ) -> Result<Self, ConfigError> {
        let mut baseline = HeaderMap::new();
        for (name, value) in common_headers {
            // Request framing is owned by the transport, not the export.
            if name.eq_ignore_ascii_case("content-length") || name.eq_ignore_ascii_case("host") {
                continue;
            }
            baseline.insert(parse_name(name)?, parse_value(name, value)?);
        }
        baseline.insert(
            HeaderName::from_static(CSRF_HEADER),
            parse_value(CSRF_HEADER, signing.csrf_token())?,
        );
        if !signing.cookie_header().is_empty() {
            baseline.insert(COOKIE, parse_value("cookie", signing.cookie_header())?);
        }
        Ok(Self { baseline })
    }

    pub fn baseline(&self) -> &HeaderMap {
        &self.baseline
    }
}

fn parse_name(name: &str) -> Result<HeaderName, ConfigError> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| ConfigError::Validation(format!("invalid header name '{name}': {e}")))
}

fn parse_value(name: &str, value: &str) -> Result<HeaderValue, ConfigError> {
    HeaderValue::from_str(value)
        .map_err(|e| ConfigError::Validation(format!("invalid value for header '{name}': {e}")))
}

/// Merge caller headers over the baseline.
///
/// A caller `Content-Type` always replaces the baseline one. Every other
/// caller header is kept only when the baseline does not define that name.
/// Names compare case-insensitively.
pub fn merge_headers(baseline: &HeaderMap, caller: &HeaderMap) -> HeaderMap {
    let mut merged = baseline.clone();
    let mut caller_content_type: Option<&HeaderValue> = None;

    for (name, value) in caller {
        if name == CONTENT_TYPE {
            caller_content_type = Some(value);
        } else if !baseline.contains_key(name) {
            merged.append(name.clone(), value.clone());
        }
    }

    if let Some(value) = caller_content_type {
        merged.insert(CONTENT_TYPE, value.clone());
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::{TransactionSigner, SigningError};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct NullSigner;

    #[async_trait]
    impl TransactionSigner for NullSigner {
        async fn sign(&self, _m: &str, _p: &str) -> Result<String, SigningError> {
            Ok("t".into())
        }
    }

    fn map(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut h = HeaderMap::new();
        for (k, v) in pairs {
            h.append(
                HeaderName::from_bytes(k.as_bytes()).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        h
    }

    #[test]
    fn session_headers_override_common_export() {
        let signing = SigningContext::prime("auth=1; ct0=abc", "abc", Arc::new(NullSigner)).unwrap();
        let mut common = BTreeMap::new();
        common.insert("User-Agent".to_string(), "Mozilla".to_string());
        common.insert("x-csrf-token".to_string(), "stale".to_string());
        common.insert("content-length".to_string(), "99".to_string());

        let store = HeaderStore::from_session(&common, &signing).unwrap();
        let b = store.baseline();
        assert_eq!(b.get("user-agent").unwrap(), "Mozilla");
        assert_eq!(b.get("x-csrf-token").unwrap(), "abc");
        assert_eq!(b.get("cookie").unwrap(), "auth=1; ct0=abc");
        assert!(b.get("content-length").is_none());
    }

    #[test]
    fn invalid_common_header_is_config_error() {
        let signing = SigningContext::prime("", "abc", Arc::new(NullSigner)).unwrap();
        let mut common = BTreeMap::new();
        common.insert("bad header".to_string(), "v".to_string());
        assert!(HeaderStore::from_session(&common, &signing).is_err());
    }

    #[test]
    fn caller_content_type_wins() {
        let baseline = map(&[("content-type", "text/plain"), ("cookie", "c")]);
        let caller = map(&[("Content-Type", "application/json")]);
        let merged = merge_headers(&baseline, &caller);
        assert_eq!(merged.get("content-type").unwrap(), "application/json");
        assert_eq!(merged.get_all("content-type").iter().count(), 1);
    }

    #[test]
    fn baseline_wins_other_collisions() {
        let baseline = map(&[("cookie", "session"), ("x-csrf-token", "real")]);
        let caller = map(&[("Cookie", "stale"), ("X-Csrf-Token", "old"), ("accept", "*/*")]);
        let merged = merge_headers(&baseline, &caller);
        assert_eq!(merged.get("cookie").unwrap(), "session");
        assert_eq!(merged.get_all("cookie").iter().count(), 1);
        assert_eq!(merged.get("x-csrf-token").unwrap(), "real");
        assert_eq!(merged.get("accept").unwrap(), "*/*");
    }

    #[test]
    fn repeated_caller_values_are_kept() {
        let baseline = map(&[("cookie", "session")]);
        let caller = map(&[("x-extra", "1"), ("x-extra", "2")]);
        let merged = merge_headers(&baseline, &caller);
        assert_eq!(merged.get_all("x-extra").iter().count(), 2);
    }

    #[test]
    fn merge_is_deterministic() {
        let baseline = map(&[("cookie", "s"), ("user-agent", "ua")]);
        let caller = map(&[("content-type", "application/json"), ("referer", "r")]);
        assert_eq!(
            merge_headers(&baseline, &caller),
            merge_headers(&baseline, &caller)
        );
    }
}
