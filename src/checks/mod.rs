// Check evaluator module

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

use crate::executor::{RequestOutcome, ResponseHeaders};

/// Everything known about a response that failed its check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub check: String,
    pub status_code: Option<u16>,
    pub error: Option<String>,
    pub status_text: Option<String>,
    pub headers: ResponseHeaders,
    pub body: Option<String>,
}

impl Diagnostic {
    fn from_outcome(check: &str, outcome: &RequestOutcome) -> Self {
        Self {
            check: check.to_string(),
            status_code: outcome.status_code(),
            error: outcome.transport_error().map(|e| e.to_string()),
            status_text: outcome.status_text().map(str::to_string),
            headers: outcome.headers.clone(),
            body: outcome
                .body
                .as_ref()
                .map(|b| String::from_utf8_lossy(b).into_owned()),
        }
    }
}

/// Destination for check-failure diagnostics. `emit` runs on the worker that
/// evaluated the check, so it must not block.
pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, diagnostic: Diagnostic);
}

/// Writes each diagnostic as one JSON-valued `warn!` event.
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn emit(&self, diagnostic: Diagnostic) {
        match serde_json::to_string(&diagnostic) {
            Ok(json) => warn!(check = %diagnostic.check, response = %json, "Check failed"),
            Err(e) => warn!(check = %diagnostic.check, error = %e, ?diagnostic, "Check failed"),
        }
    }
}

/// Pass/fail totals of a check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckCounts {
    pub name: String,
    pub passes: u64,
    pub fails: u64,
}

impl CheckCounts {
    pub fn total(&self) -> u64 {
        self.passes + self.fails
    }

    pub fn pass_rate(&self) -> f64 {
        if self.total() == 0 {
            0.0
        } else {
            self.passes as f64 / self.total() as f64
        }
    }
}

/// Body-size check: passes when a body is present and longer than the threshold.
pub struct CheckEvaluator {
    name: String,
    min_body_bytes: usize,
    passes: AtomicU64,
    fails: AtomicU64,
    sink: Arc<dyn DiagnosticSink>,
}

impl CheckEvaluator {
    pub fn new(name: impl Into<String>, min_body_bytes: usize, sink: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            name: name.into(),
            min_body_bytes,
            passes: AtomicU64::new(0),
            fails: AtomicU64::new(0),
            sink,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn evaluate(&self, outcome: &RequestOutcome) -> bool {
        let passed = outcome
            .body
            .as_ref()
            .is_some_and(|b| b.len() > self.min_body_bytes);
        if passed {
            self.passes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.fails.fetch_add(1, Ordering::Relaxed);
            self.sink.emit(Diagnostic::from_outcome(&self.name, outcome));
        }
        passed
    }

    pub fn counts(&self) -> CheckCounts {
        CheckCounts {
            name: self.name.clone(),
            passes: self.passes.load(Ordering::Relaxed),
            fails: self.fails.load(Ordering::Relaxed),
        }
    }
}
