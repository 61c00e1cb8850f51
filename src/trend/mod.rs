// Trend aggregator module

use dashmap::DashMap;
use hdrhistogram::Histogram;
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::warn;

use crate::error::LoadTestError;

/// Wall-clock duration of every request in milliseconds.
pub const METRIC_HTTP_REQ_DURATION: &str = "http_req_duration";

/// Values are stored in the histogram as integer thousandths.
const VALUE_SCALE: f64 = 1000.0;
const SIGNIFICANT_FIGURES: u8 = 3;

/// Running state of one shard of one metric. Fixed size regardless of sample count.
struct TrendState {
    count: u64,
    min: f64,
    max: f64,
    sum: f64,
    sum_sq: f64,
    histogram: Histogram<u64>,
}

impl TrendState {
    fn new() -> Result<Self, LoadTestError> {
        let histogram = Histogram::<u64>::new(SIGNIFICANT_FIGURES).map_err(|e| {
            LoadTestError::ConfigError(format!("Failed to initialize trend histogram: {}", e))
        })?;
        Ok(Self {
            count: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            sum: 0.0,
            sum_sq: 0.0,
            histogram,
        })
    }

    fn record(&mut self, value: f64) {
        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += value;
        self.sum_sq += value * value;
        self.histogram
            .saturating_record((value.max(0.0) * VALUE_SCALE).round() as u64);
    }

    fn merge(&mut self, other: &TrendState) {
        self.count += other.count;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.sum += other.sum;
        self.sum_sq += other.sum_sq;
        if let Err(e) = self.histogram.add(&other.histogram) {
            warn!(error = %e, "Failed to merge trend histogram shard");
        }
    }

    fn quantile(&self, q: f64) -> f64 {
        self.histogram.value_at_quantile(q) as f64 / VALUE_SCALE
    }

    fn stats(&self) -> TrendStats {
        if self.count == 0 {
            return TrendStats::default();
        }
        let n = self.count as f64;
        let mean = self.sum / n;
        // Population variance; clamp the rounding noise below zero.
        let variance = (self.sum_sq / n - mean * mean).max(0.0);
        TrendStats {
            count: self.count,
            min: self.min,
            max: self.max,
            mean,
            std_dev: variance.sqrt(),
            // The histogram only approximates; keep percentiles inside the exact bounds.
            p50: self.quantile(0.50).clamp(self.min, self.max),
            p90: self.quantile(0.90).clamp(self.min, self.max),
            p95: self.quantile(0.95).clamp(self.min, self.max),
            p99: self.quantile(0.99).clamp(self.min, self.max),
        }
    }
}

/// Final statistics of one trend metric.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct TrendStats {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

/// One named metric: sharded running state selected by recording thread.
struct TrendMetric {
    shards: Vec<Mutex<TrendState>>,
}

impl TrendMetric {
    fn new(shard_count: usize) -> Result<Self, LoadTestError> {
        let shards = (0..shard_count)
            .map(|_| TrendState::new().map(Mutex::new))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { shards })
    }

    fn lock(shard: &Mutex<TrendState>) -> MutexGuard<'_, TrendState> {
        shard.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, shard: usize, value: f64) {
        Self::lock(&self.shards[shard % self.shards.len()]).record(value);
    }

    fn stats(&self) -> Result<TrendStats, LoadTestError> {
        let mut merged = TrendState::new()?;
        for shard in &self.shards {
            merged.merge(&Self::lock(shard));
        }
        Ok(merged.stats())
    }
}

/// Thread-safe collection of named trend metrics.
///
/// `record` may be called from any worker at any time. Every metric keeps a
/// fixed amount of state (exact count/min/max/sum plus an HDR histogram for
/// percentiles), so memory does not grow with run length. Merging is
/// commutative: the snapshot does not depend on recording order.
pub struct TrendAggregator {
    metrics: DashMap<String, Arc<TrendMetric>>,
    shard_count: usize,
}

impl Default for TrendAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl TrendAggregator {
    pub fn new() -> Self {
        let shard_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
            .max(1);
        Self {
            metrics: DashMap::new(),
            shard_count,
        }
    }

    /// Register a metric so it appears in the snapshot even with no samples.
    pub fn declare(&self, name: &str) -> Result<(), LoadTestError> {
        self.metric(name).map(|_| ())
    }

    fn metric(&self, name: &str) -> Result<Arc<TrendMetric>, LoadTestError> {
        if let Some(existing) = self.metrics.get(name) {
            return Ok(Arc::clone(existing.value()));
        }
        let entry = self
            .metrics
            .entry(name.to_string())
            .or_try_insert_with(|| TrendMetric::new(self.shard_count).map(Arc::new))?;
        Ok(Arc::clone(entry.value()))
    }

    fn shard_index(&self) -> usize {
        let mut hasher = DefaultHasher::new();
        std::thread::current().id().hash(&mut hasher);
        hasher.finish() as usize % self.shard_count
    }

    /// Merge one value into the named metric, declaring it on first use.
    /// Non-finite values are rejected with a warning.
    pub fn record(&self, name: &str, value: f64) {
        if !value.is_finite() {
            warn!(metric = name, value, "Rejected non-finite trend sample");
            return;
        }
        match self.metric(name) {
            Ok(metric) => metric.record(self.shard_index(), value),
            Err(e) => warn!(metric = name, error = %e, "Dropped trend sample"),
        }
    }

    pub fn metric_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.metrics.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Statistics for every declared metric, keyed by name.
    pub fn snapshot(&self) -> BTreeMap<String, TrendStats> {
        let metrics: Vec<(String, Arc<TrendMetric>)> = self
            .metrics
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();
        let mut out = BTreeMap::new();
        for (name, metric) in metrics {
            match metric.stats() {
                Ok(stats) => {
                    out.insert(name, stats);
                }
                Err(e) => warn!(metric = %name, error = %e, "Failed to summarize trend"),
            }
        }
        out
    }
}
