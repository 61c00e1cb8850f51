// Run statistics module

use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::time::Instant;

use crate::config::StatusRange;
use crate::executor::RequestOutcome;

/// Thread-safe request and iteration counters for one run.
pub struct RunStats {
    expected_status: StatusRange,
    requests: AtomicU64,
    expected_responses: AtomicU64,
    unexpected_responses: AtomicU64,
    transport_errors: AtomicU64,
    status_codes: DashMap<u16, AtomicU64>,
    iterations_issued: AtomicU64,
    iterations_dispatched: AtomicU64,
    iterations_completed: AtomicU64,
    iterations_dropped: AtomicU64,
    iterations_interrupted: AtomicU64,
    peak_pool_size: AtomicUsize,
    start_time: Instant,
}

/// A point-in-time copy of the run counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub elapsed_secs: f64,
    pub requests: u64,
    pub expected_responses: u64,
    pub unexpected_responses: u64,
    pub transport_errors: u64,
    pub status_codes: BTreeMap<u16, u64>,
    pub iterations_issued: u64,
    pub iterations_dispatched: u64,
    pub iterations_completed: u64,
    pub iterations_dropped: u64,
    pub iterations_interrupted: u64,
    pub iteration_rate: f64,
    pub peak_pool_size: usize,
}

impl StatsSnapshot {
    /// Requests that got a status outside the expected range or no status at all.
    pub fn failed_requests(&self) -> u64 {
        self.unexpected_responses + self.transport_errors
    }

    pub fn failed_request_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.failed_requests() as f64 / self.requests as f64
        }
    }

    /// Iterations dispatched but neither completed nor interrupted yet.
    pub fn in_flight(&self) -> u64 {
        self.iterations_dispatched
            .saturating_sub(self.iterations_completed + self.iterations_interrupted)
    }
}

impl RunStats {
    pub fn new(expected_status: StatusRange) -> Self {
        Self {
            expected_status,
            requests: AtomicU64::new(0),
            expected_responses: AtomicU64::new(0),
            unexpected_responses: AtomicU64::new(0),
            transport_errors: AtomicU64::new(0),
            status_codes: DashMap::new(),
            iterations_issued: AtomicU64::new(0),
            iterations_dispatched: AtomicU64::new(0),
            iterations_completed: AtomicU64::new(0),
            iterations_dropped: AtomicU64::new(0),
            iterations_interrupted: AtomicU64::new(0),
            peak_pool_size: AtomicUsize::new(0),
            start_time: Instant::now(),
        }
    }

    /// Classify and count one request outcome.
    pub fn record_outcome(&self, outcome: &RequestOutcome) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        match outcome.status_code() {
            Some(code) => {
                if self.expected_status.contains(code) {
                    self.expected_responses.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.unexpected_responses.fetch_add(1, Ordering::Relaxed);
                }
                self.status_codes
                    .entry(code)
                    .or_insert_with(|| AtomicU64::new(0))
                    .fetch_add(1, Ordering::Relaxed);
            }
            None => {
                self.transport_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// An iteration came due on the schedule.
    pub fn record_issued(&self) {
        self.iterations_issued.fetch_add(1, Ordering::Relaxed);
    }

    /// A due iteration got a worker and started.
    pub fn record_dispatched(&self) {
        self.iterations_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        self.iterations_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// A due iteration found the pool exhausted and was not executed.
    pub fn record_dropped(&self) {
        self.iterations_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// In-flight iterations abandoned when the graceful stop ran out.
    pub fn record_interrupted(&self, count: u64) {
        self.iterations_interrupted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn observe_pool_size(&self, size: usize) {
        self.peak_pool_size.fetch_max(size, Ordering::Relaxed);
    }

    pub fn dropped(&self) -> u64 {
        self.iterations_dropped.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let completed = self.iterations_completed.load(Ordering::Relaxed);
        let iteration_rate = if elapsed > 0.0 {
            completed as f64 / elapsed
        } else {
            0.0
        };

        let status_codes = self
            .status_codes
            .iter()
            .map(|e| (*e.key(), e.value().load(Ordering::Relaxed)))
            .collect();

        StatsSnapshot {
            elapsed_secs: elapsed,
            requests: self.requests.load(Ordering::Relaxed),
            expected_responses: self.expected_responses.load(Ordering::Relaxed),
            unexpected_responses: self.unexpected_responses.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            status_codes,
            iterations_issued: self.iterations_issued.load(Ordering::Relaxed),
            iterations_dispatched: self.iterations_dispatched.load(Ordering::Relaxed),
            iterations_completed: completed,
            iterations_dropped: self.iterations_dropped.load(Ordering::Relaxed),
            iterations_interrupted: self.iterations_interrupted.load(Ordering::Relaxed),
            iteration_rate,
            peak_pool_size: self.peak_pool_size.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::TransportError;
    use crate::testutil::response_with_headers;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn received(code: u16) -> RequestOutcome {
        RequestOutcome::received(response_with_headers(code, &[], 0), Duration::from_millis(1))
    }

    #[test]
    fn test_new_stats_are_zero() {
        let snap = RunStats::new(StatusRange::default()).snapshot();
        assert_eq!(snap.requests, 0);
        assert_eq!(snap.iterations_issued, 0);
        assert_eq!(snap.peak_pool_size, 0);
        assert!(snap.status_codes.is_empty());
        assert_eq!(snap.failed_request_rate(), 0.0);
    }

    #[test]
    fn test_record_outcome_classifies_status() {
        let stats = RunStats::new(StatusRange::default());
        stats.record_outcome(&received(200));
        stats.record_outcome(&received(299));
        stats.record_outcome(&received(301));
        stats.record_outcome(&received(500));
        stats.record_outcome(&RequestOutcome::failed(TransportError::Timeout, Duration::ZERO));

        let snap = stats.snapshot();
        assert_eq!(snap.requests, 5);
        assert_eq!(snap.expected_responses, 2);
        assert_eq!(snap.unexpected_responses, 2);
        assert_eq!(snap.transport_errors, 1);
        assert_eq!(snap.failed_requests(), 3);
        assert_eq!(snap.failed_request_rate(), 0.6);
        assert_eq!(snap.status_codes[&200], 1);
        assert_eq!(snap.status_codes[&500], 1);
        assert_eq!(snap.status_codes.len(), 4);
    }

    #[test]
    fn test_custom_expected_range() {
        let stats = RunStats::new(StatusRange { min: 200, max: 399 });
        stats.record_outcome(&received(301));
        assert_eq!(stats.snapshot().expected_responses, 1);
    }

    #[test]
    fn test_iteration_counters() {
        let stats = RunStats::new(StatusRange::default());
        for _ in 0..5 {
            stats.record_issued();
        }
        for _ in 0..4 {
            stats.record_dispatched();
        }
        stats.record_dropped();
        stats.record_completed();
        stats.record_completed();
        stats.record_interrupted(1);

        let snap = stats.snapshot();
        assert_eq!(snap.iterations_issued, 5);
        assert_eq!(snap.iterations_dispatched, 4);
        assert_eq!(snap.iterations_dropped, 1);
        assert_eq!(snap.iterations_completed, 2);
        assert_eq!(snap.iterations_interrupted, 1);
        assert_eq!(snap.in_flight(), 1);
        assert_eq!(stats.dropped(), 1);
    }

    #[test]
    fn test_peak_pool_size_keeps_maximum() {
        let stats = RunStats::new(StatusRange::default());
        stats.observe_pool_size(3);
        stats.observe_pool_size(10);
        stats.observe_pool_size(7);
        assert_eq!(stats.snapshot().peak_pool_size, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_iteration_rate_uses_elapsed_time() {
        let stats = RunStats::new(StatusRange::default());
        for _ in 0..20 {
            stats.record_completed();
        }
        tokio::time::advance(Duration::from_secs(4)).await;
        let snap = stats.snapshot();
        assert!((snap.iteration_rate - 5.0).abs() < 1e-6);
        assert!((snap.elapsed_secs - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_concurrent_record_outcome() {
        let stats = Arc::new(RunStats::new(StatusRange::default()));
        let mut handles = vec![];
        for t in 0..8u16 {
            let s = Arc::clone(&stats);
            handles.push(thread::spawn(move || {
                for _ in 0..500 {
                    s.record_outcome(&received(if t % 2 == 0 { 200 } else { 503 }));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        let snap = stats.snapshot();
        assert_eq!(snap.requests, 4000);
        assert_eq!(snap.status_codes[&200], 2000);
        assert_eq!(snap.status_codes[&503], 2000);
        assert_eq!(snap.expected_responses + snap.unexpected_responses, 4000);
    }

    #[test]
    fn test_snapshot_serializes() {
        let stats = RunStats::new(StatusRange::default());
        stats.record_outcome(&received(200));
        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(json["requests"], 1);
        assert_eq!(json["status_codes"]["200"], 1);
    }
}
