use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::checks::{Diagnostic, DiagnosticSink};
use crate::executor::{
    HttpResponse, HttpTransport, RequestSpec, ResponseHeaders, TransportError, TransportFuture,
};

/// Build a response with the given status, headers and a body of `body_len` bytes.
pub fn response_with_headers(status: u16, headers: &[(&str, &str)], body_len: usize) -> HttpResponse {
    HttpResponse {
        status,
        status_text: status.to_string(),
        headers: headers.iter().copied().collect::<ResponseHeaders>(),
        body: vec![b'x'; body_len],
    }
}

/// Transport that answers every request with the same response.
/// Records the call count and the last request seen.
pub struct StaticTransport {
    response: HttpResponse,
    calls: AtomicUsize,
    last: Mutex<Option<RequestSpec>>,
}

impl StaticTransport {
    pub fn new(response: HttpResponse) -> Self {
        Self {
            response,
            calls: AtomicUsize::new(0),
            last: Mutex::new(None),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn last_request(&self) -> Option<RequestSpec> {
        self.last.lock().unwrap().clone()
    }
}

impl HttpTransport for StaticTransport {
    fn get<'a>(&'a self, request: &'a RequestSpec) -> TransportFuture<'a> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::Relaxed);
            *self.last.lock().unwrap() = Some(request.clone());
            Ok(self.response.clone())
        })
    }
}

/// Transport that waits `delay` (tokio time) before answering 200 with a large body.
pub struct SlowTransport {
    delay: Duration,
}

impl SlowTransport {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl HttpTransport for SlowTransport {
    fn get<'a>(&'a self, _request: &'a RequestSpec) -> TransportFuture<'a> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            Ok(response_with_headers(200, &[], 60_000))
        })
    }
}

/// Transport whose every request fails at the connection level.
pub struct FailingTransport;

impl HttpTransport for FailingTransport {
    fn get<'a>(&'a self, _request: &'a RequestSpec) -> TransportFuture<'a> {
        Box::pin(async move { Err(TransportError::Connect("connection refused".to_string())) })
    }
}

/// Diagnostic sink that keeps every emitted record.
#[derive(Default)]
pub struct RecordingSink {
    pub emitted: Mutex<Vec<Diagnostic>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.emitted.lock().unwrap().len()
    }
}

impl DiagnosticSink for RecordingSink {
    fn emit(&self, diagnostic: Diagnostic) {
        self.emitted.lock().unwrap().push(diagnostic);
    }
}
