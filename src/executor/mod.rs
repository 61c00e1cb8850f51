// Request executor module
//
// Issues one GET with a fixed header set and a hard timeout, and classifies
// what came back. The HTTP client itself sits behind `HttpTransport` so the
// rest of the pipeline can be driven without a network.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::config::StatusRange;
use crate::error::LoadTestError;

/// Response headers keyed by the name the server sent. Lookups ignore case.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ResponseHeaders(BTreeMap<String, String>);

impl ResponseHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header; repeated names are folded into one comma-separated value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let value = value.into();
        self.0
            .entry(name.into())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        if let Some(v) = self.0.get(name) {
            return Some(v.as_str());
        }
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ResponseHeaders {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = ResponseHeaders::new();
        for (k, v) in iter {
            headers.insert(k, v);
        }
        headers
    }
}

/// Connection-level failure: no status, headers or body were received.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request failed: {0}")]
    Request(String),
}

/// What a transport hands back when the server answered.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: ResponseHeaders,
    pub body: Vec<u8>,
}

/// The request every iteration sends.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSpec {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + Send + 'a>>;

/// Seam between the executor and the HTTP client.
pub trait HttpTransport: Send + Sync {
    fn get<'a>(&'a self, request: &'a RequestSpec) -> TransportFuture<'a>;
}

/// `reqwest`-backed transport sharing one connection pool across all workers.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, LoadTestError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LoadTestError::HttpClientError(e.to_string()))?;
        Ok(Self { client })
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else {
        TransportError::Request(e.to_string())
    }
}

impl HttpTransport for ReqwestTransport {
    fn get<'a>(&'a self, request: &'a RequestSpec) -> TransportFuture<'a> {
        Box::pin(async move {
            let mut builder = self.client.get(&request.url).timeout(request.timeout);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            let response = builder.send().await.map_err(classify_reqwest_error)?;

            let status = response.status();
            let status_text = match status.canonical_reason() {
                Some(reason) => format!("{} {}", status.as_u16(), reason),
                None => status.as_u16().to_string(),
            };
            let headers: ResponseHeaders = response
                .headers()
                .iter()
                .map(|(k, v)| {
                    (
                        k.as_str().to_string(),
                        String::from_utf8_lossy(v.as_bytes()).into_owned(),
                    )
                })
                .collect();
            let body = response.bytes().await.map_err(classify_reqwest_error)?;

            Ok(HttpResponse {
                status: status.as_u16(),
                status_text,
                headers,
                body: body.to_vec(),
            })
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseStatus {
    Received { code: u16, text: String },
    Failed(TransportError),
}

/// Result of one executed request; consumed by the extractor and the checks, then dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOutcome {
    pub status: ResponseStatus,
    pub headers: ResponseHeaders,
    pub body: Option<Vec<u8>>,
    pub elapsed: Duration,
}

impl RequestOutcome {
    pub fn received(response: HttpResponse, elapsed: Duration) -> Self {
        Self {
            status: ResponseStatus::Received {
                code: response.status,
                text: response.status_text,
            },
            headers: response.headers,
            body: Some(response.body),
            elapsed,
        }
    }

    pub fn failed(error: TransportError, elapsed: Duration) -> Self {
        Self {
            status: ResponseStatus::Failed(error),
            headers: ResponseHeaders::new(),
            body: None,
            elapsed,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match &self.status {
            ResponseStatus::Received { code, .. } => Some(*code),
            ResponseStatus::Failed(_) => None,
        }
    }

    pub fn status_text(&self) -> Option<&str> {
        match &self.status {
            ResponseStatus::Received { text, .. } => Some(text.as_str()),
            ResponseStatus::Failed(_) => None,
        }
    }

    pub fn transport_error(&self) -> Option<&TransportError> {
        match &self.status {
            ResponseStatus::Received { .. } => None,
            ResponseStatus::Failed(e) => Some(e),
        }
    }

    /// True when a status was received and it lies inside `expected`.
    pub fn is_expected(&self, expected: &StatusRange) -> bool {
        self.status_code().is_some_and(|code| expected.contains(code))
    }
}

/// Sends the configured request through a transport, bounded by the timeout.
pub struct RequestExecutor {
    transport: Arc<dyn HttpTransport>,
    request: RequestSpec,
}

impl RequestExecutor {
    /// Executor for `GET url` carrying `Authorization: Bearer <token>`.
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        url: impl Into<String>,
        bearer_token: &str,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            request: RequestSpec {
                url: url.into(),
                headers: vec![(
                    "Authorization".to_string(),
                    format!("Bearer {}", bearer_token),
                )],
                timeout,
            },
        }
    }

    /// Add another fixed header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.headers.push((name.into(), value.into()));
        self
    }

    /// Perform one request. Never fails: transport problems become `ResponseStatus::Failed`.
    pub async fn execute(&self) -> RequestOutcome {
        let started = Instant::now();
        let result =
            tokio::time::timeout(self.request.timeout, self.transport.get(&self.request)).await;
        let elapsed = started.elapsed();
        match result {
            Ok(Ok(response)) => RequestOutcome::received(response, elapsed),
            Ok(Err(e)) => RequestOutcome::failed(e, elapsed),
            Err(_) => RequestOutcome::failed(TransportError::Timeout, elapsed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{response_with_headers, SlowTransport, StaticTransport};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    // ===== ResponseHeaders =====

    #[test]
    fn test_headers_lookup_ignores_case() {
        let headers: ResponseHeaders = [("targetresponsetime", "12")].into_iter().collect();
        assert_eq!(headers.get("Targetresponsetime"), Some("12"));
        assert_eq!(headers.get("TARGETRESPONSETIME"), Some("12"));
        assert_eq!(headers.get("Requestprocessingtime"), None);
    }

    #[test]
    fn test_headers_repeated_names_are_folded() {
        let mut headers = ResponseHeaders::new();
        headers.insert("set-cookie", "a=1");
        headers.insert("set-cookie", "b=2");
        assert_eq!(headers.get("Set-Cookie"), Some("a=1, b=2"));
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_headers_serialize_as_object() {
        let headers: ResponseHeaders = [("a", "1"), ("b", "2")].into_iter().collect();
        let json = serde_json::to_string(&headers).unwrap();
        assert_eq!(json, r#"{"a":"1","b":"2"}"#);
    }

    // ===== RequestOutcome =====

    #[test]
    fn test_outcome_expected_status_range() {
        let range = StatusRange::default();
        let ok = RequestOutcome::received(response_with_headers(204, &[], 0), Duration::ZERO);
        let not_found = RequestOutcome::received(response_with_headers(404, &[], 0), Duration::ZERO);
        let failed = RequestOutcome::failed(TransportError::Timeout, Duration::ZERO);
        assert!(ok.is_expected(&range));
        assert!(!not_found.is_expected(&range));
        assert!(!failed.is_expected(&range));
    }

    #[test]
    fn test_failed_outcome_has_no_headers_or_body() {
        let outcome = RequestOutcome::failed(TransportError::Connect("refused".into()), Duration::ZERO);
        assert!(outcome.headers.is_empty());
        assert!(outcome.body.is_none());
        assert_eq!(outcome.status_code(), None);
        assert_eq!(outcome.status_text(), None);
        assert!(matches!(outcome.transport_error(), Some(TransportError::Connect(_))));
    }

    // ===== RequestExecutor =====

    #[tokio::test]
    async fn test_executor_sends_bearer_authorization() {
        let transport = Arc::new(StaticTransport::new(response_with_headers(200, &[], 10)));
        let executor = RequestExecutor::new(
            transport.clone(),
            "http://target.test/",
            "access-token",
            Duration::from_secs(5),
        );
        let outcome = executor.execute().await;
        assert_eq!(outcome.status_code(), Some(200));
        assert_eq!(outcome.body.as_ref().map(Vec::len), Some(10));

        let seen = transport.last_request().unwrap();
        assert_eq!(seen.url, "http://target.test/");
        assert!(seen
            .headers
            .contains(&("Authorization".to_string(), "Bearer access-token".to_string())));
    }

    #[tokio::test]
    async fn test_executor_with_extra_header() {
        let transport = Arc::new(StaticTransport::new(response_with_headers(200, &[], 0)));
        let executor = RequestExecutor::new(transport.clone(), "http://t/", "tok", Duration::from_secs(1))
            .with_header("X-Test-Run", "42");
        executor.execute().await;
        let seen = transport.last_request().unwrap();
        assert_eq!(seen.headers.len(), 2);
        assert_eq!(seen.headers[1], ("X-Test-Run".to_string(), "42".to_string()));
    }

    #[tokio::test]
    async fn test_executor_passes_through_unexpected_status() {
        let transport = Arc::new(StaticTransport::new(response_with_headers(503, &[], 0)));
        let executor = RequestExecutor::new(transport, "http://t/", "tok", Duration::from_secs(1));
        let outcome = executor.execute().await;
        assert_eq!(outcome.status_code(), Some(503));
        assert!(outcome.transport_error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_executor_times_out() {
        let transport = Arc::new(SlowTransport::new(Duration::from_secs(30)));
        let executor =
            RequestExecutor::new(transport, "http://t/", "tok", Duration::from_millis(100));
        let outcome = executor.execute().await;
        assert_eq!(outcome.transport_error(), Some(&TransportError::Timeout));
        assert!(outcome.elapsed >= Duration::from_millis(100));
        assert!(outcome.elapsed < Duration::from_secs(30));
    }

    // ===== ReqwestTransport against a loopback responder =====

    async fn serve_once(response: &'static str) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        (format!("http://{}/latency", addr), rx)
    }

    #[tokio::test]
    async fn test_reqwest_transport_reads_status_headers_body() {
        let (url, request_rx) = serve_once(
            "HTTP/1.1 200 OK\r\n\
             Content-Length: 5\r\n\
             Targetresponsetime: 12.5\r\n\
             Be-In-Time: 1000\r\n\
             Connection: close\r\n\r\nhello",
        )
        .await;

        let transport = Arc::new(ReqwestTransport::new(Duration::from_secs(5)).unwrap());
        let executor = RequestExecutor::new(transport, url, "access-token", Duration::from_secs(5));
        let outcome = executor.execute().await;

        assert_eq!(outcome.status_code(), Some(200));
        assert_eq!(outcome.status_text(), Some("200 OK"));
        assert_eq!(outcome.headers.get("Targetresponsetime"), Some("12.5"));
        assert_eq!(outcome.headers.get("Be-In-Time"), Some("1000"));
        assert_eq!(outcome.body.as_deref(), Some(&b"hello"[..]));

        let raw_request = request_rx.await.unwrap().to_ascii_lowercase();
        assert!(raw_request.starts_with("get /latency http/1.1"));
        assert!(raw_request.contains("authorization: bearer access-token"));
    }

    #[tokio::test]
    async fn test_reqwest_transport_connection_refused_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = Arc::new(ReqwestTransport::new(Duration::from_secs(5)).unwrap());
        let executor = RequestExecutor::new(
            transport,
            format!("http://{}/", addr),
            "tok",
            Duration::from_secs(5),
        );
        let outcome = executor.execute().await;
        assert!(outcome.transport_error().is_some());
        assert!(outcome.body.is_none());
    }
}
