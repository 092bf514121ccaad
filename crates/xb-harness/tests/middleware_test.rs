//! Integration tests for the header-injection middleware: baseline and
//! caller header precedence, fresh per-call signing, and fail-closed
//! behaviour when the signer errors.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, COOKIE};
use reqwest::Url;

use xb_harness::headers::HeaderStore;
use xb_harness::middleware::{HeaderInjectionMiddleware, SigningPolicy};
use xb_harness::signing::{SigningContext, SigningError, TransactionSigner};
use xb_harness::transport::{
    OutboundRequest, RequestBody, Transport, TransportError, TransportResponse,
};

// ===========================================================================
// Test doubles
// ===========================================================================

/// Records every request it receives and answers 200 `{}`.
#[derive(Default)]
struct RecordingTransport {
    seen: Mutex<Vec<OutboundRequest>>,
    fail: bool,
}

impl RecordingTransport {
    fn failing() -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    fn requests(&self) -> Vec<OutboundRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, request: OutboundRequest) -> Result<TransportResponse, TransportError> {
        self.seen.lock().unwrap().push(request);
        if self.fail {
            return Err(TransportError::Http("connection reset".into()));
        }
        Ok(TransportResponse {
            status: 200,
            headers: HeaderMap::new(),
            body: b"{}".to_vec(),
        })
    }
}

/// Returns `tok-<n>` with an increasing counter and records its inputs.
#[derive(Default)]
struct CountingSigner {
    calls: AtomicUsize,
    inputs: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl TransactionSigner for CountingSigner {
    async fn sign(&self, method: &str, path: &str) -> Result<String, SigningError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.inputs
            .lock()
            .unwrap()
            .push((method.to_string(), path.to_string()));
        Ok(format!("tok-{n}"))
    }
}

struct FailingSigner;

#[async_trait]
impl TransactionSigner for FailingSigner {
    async fn sign(&self, _method: &str, _path: &str) -> Result<String, SigningError> {
        Err(SigningError::Signer("bootstrap expired".into()))
    }
}

fn common_headers() -> BTreeMap<String, String> {
    let mut common = BTreeMap::new();
    common.insert("user-agent".to_string(), "Mozilla/5.0".to_string());
    common.insert("content-type".to_string(), "text/plain".to_string());
    common
}

fn build(
    inner: Arc<RecordingTransport>,
    signer: Arc<dyn TransactionSigner>,
) -> HeaderInjectionMiddleware {
    let signing =
        Arc::new(SigningContext::prime("auth_token=a; ct0=csrf", "csrf", signer).unwrap());
    let store = Arc::new(HeaderStore::from_session(&common_headers(), &signing).unwrap());
    let policy = SigningPolicy::new("/i/api/graphql/", "x-client-transaction-id").unwrap();
    HeaderInjectionMiddleware::new(inner, store, signing, policy)
}

fn signed_url() -> Url {
    Url::parse("https://x.com/i/api/graphql/ABC/CreateTweet?variables=%7B%7D").unwrap()
}

// ===========================================================================
// Signing
// ===========================================================================

#[tokio::test]
async fn test_each_signed_call_gets_fresh_token() {
    let inner = Arc::new(RecordingTransport::default());
    let signer = Arc::new(CountingSigner::default());
    let mw = build(inner.clone(), signer.clone());

    mw.send(OutboundRequest::post(signed_url())).await.unwrap();
    mw.send(OutboundRequest::post(signed_url())).await.unwrap();

    assert_eq!(signer.calls.load(Ordering::SeqCst), 2);
    let tokens: Vec<_> = inner
        .requests()
        .iter()
        .map(|r| r.headers.get("x-client-transaction-id").unwrap().clone())
        .collect();
    assert_eq!(tokens[0], "tok-1");
    assert_eq!(tokens[1], "tok-2");
    assert_eq!(mw.last_token().as_deref(), Some("tok-2"));
}

#[tokio::test]
async fn test_signer_sees_upper_method_and_bare_path() {
    let inner = Arc::new(RecordingTransport::default());
    let signer = Arc::new(CountingSigner::default());
    let mw = build(inner, signer.clone());

    let url = signed_url();
    let req = OutboundRequest::new(reqwest::Method::POST, url);
    mw.send(req).await.unwrap();

    let inputs = signer.inputs.lock().unwrap().clone();
    assert_eq!(
        inputs,
        vec![("POST".to_string(), "/i/api/graphql/ABC/CreateTweet".to_string())]
    );
}

#[tokio::test]
async fn test_unsigned_path_skips_signer() {
    let inner = Arc::new(RecordingTransport::default());
    let signer = Arc::new(CountingSigner::default());
    let mw = build(inner.clone(), signer.clone());

    let url = Url::parse("https://x.com/i/api/1.1/friendships/create.json").unwrap();
    mw.send(OutboundRequest::post(url)).await.unwrap();

    assert_eq!(signer.calls.load(Ordering::SeqCst), 0);
    let sent = &inner.requests()[0];
    assert!(sent.headers.get("x-client-transaction-id").is_none());
    assert_eq!(sent.headers.get("x-csrf-token").unwrap(), "csrf");
}

#[tokio::test]
async fn test_signing_failure_never_reaches_transport() {
    let inner = Arc::new(RecordingTransport::default());
    let mw = build(inner.clone(), Arc::new(FailingSigner));

    let err = mw.send(OutboundRequest::post(signed_url())).await.unwrap_err();
    assert!(matches!(err, TransportError::Signing(SigningError::Signer(_))));
    assert!(inner.requests().is_empty(), "request must not be sent unsigned");
}

// ===========================================================================
// Header precedence
// ===========================================================================

#[tokio::test]
async fn test_session_headers_present_on_every_call() {
    let inner = Arc::new(RecordingTransport::default());
    let mw = build(inner.clone(), Arc::new(CountingSigner::default()));

    mw.send(OutboundRequest::post(signed_url())).await.unwrap();

    let sent = &inner.requests()[0];
    assert_eq!(sent.headers.get("cookie").unwrap(), "auth_token=a; ct0=csrf");
    assert_eq!(sent.headers.get("x-csrf-token").unwrap(), "csrf");
    assert_eq!(sent.headers.get("user-agent").unwrap(), "Mozilla/5.0");
}

#[tokio::test]
async fn test_caller_content_type_is_kept_verbatim() {
    let inner = Arc::new(RecordingTransport::default());
    let mw = build(inner.clone(), Arc::new(CountingSigner::default()));

    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("multipart/form-data; boundary=abc"),
    );
    mw.send(OutboundRequest::post(signed_url()).with_headers(headers))
        .await
        .unwrap();

    let sent = &inner.requests()[0];
    assert_eq!(
        sent.headers.get(CONTENT_TYPE).unwrap(),
        "multipart/form-data; boundary=abc"
    );
    assert_eq!(sent.headers.get_all(CONTENT_TYPE).iter().count(), 1);
}

#[tokio::test]
async fn test_baseline_wins_other_collisions() {
    let inner = Arc::new(RecordingTransport::default());
    let mw = build(inner.clone(), Arc::new(CountingSigner::default()));

    let mut headers = HeaderMap::new();
    headers.insert(COOKIE, HeaderValue::from_static("stale=1"));
    headers.insert(
        HeaderName::from_static("x-extra"),
        HeaderValue::from_static("kept"),
    );
    mw.send(OutboundRequest::post(signed_url()).with_headers(headers))
        .await
        .unwrap();

    let sent = &inner.requests()[0];
    assert_eq!(sent.headers.get("cookie").unwrap(), "auth_token=a; ct0=csrf");
    assert_eq!(sent.headers.get("x-extra").unwrap(), "kept");
}

#[tokio::test]
async fn test_caller_cannot_supply_transaction_token() {
    let inner = Arc::new(RecordingTransport::default());
    let mw = build(inner.clone(), Arc::new(CountingSigner::default()));

    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static("x-client-transaction-id"),
        HeaderValue::from_static("forged"),
    );
    mw.send(OutboundRequest::post(signed_url()).with_headers(headers))
        .await
        .unwrap();

    let sent = &inner.requests()[0];
    assert_eq!(sent.headers.get("x-client-transaction-id").unwrap(), "tok-1");
    assert_eq!(
        sent.headers.get_all("x-client-transaction-id").iter().count(),
        1
    );
}

#[tokio::test]
async fn test_body_passes_through_untouched() {
    let inner = Arc::new(RecordingTransport::default());
    let mw = build(inner.clone(), Arc::new(CountingSigner::default()));

    let body = RequestBody::Json(serde_json::json!({ "variables": { "tweet_text": "hi" } }));
    mw.send(OutboundRequest::post(signed_url()).with_body(body))
        .await
        .unwrap();

    match &inner.requests()[0].body {
        Some(RequestBody::Json(v)) => assert_eq!(v["variables"]["tweet_text"], "hi"),
        other => panic!("unexpected body {other:?}"),
    }
}

#[tokio::test]
async fn test_inner_transport_error_propagates() {
    let inner = Arc::new(RecordingTransport::failing());
    let mw = build(inner.clone(), Arc::new(CountingSigner::default()));

    let err = mw.send(OutboundRequest::post(signed_url())).await.unwrap_err();
    assert!(matches!(err, TransportError::Http(_)));
    assert_eq!(inner.requests().len(), 1);
}
