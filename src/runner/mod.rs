// Load test runner module
//
// Wires the components for one run: scheduler -> pool -> executor ->
// extractor -> aggregator/stats/check. `LoadTest::run` executes the schedule
// to completion and returns the final report; rendering is a separate step.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::checks::{CheckEvaluator, DiagnosticSink, TracingSink};
use crate::config::Config;
use crate::error::LoadTestError;
use crate::executor::{HttpTransport, ReqwestTransport, RequestExecutor};
use crate::extractor::{extract, LatencyMetric};
use crate::pool::{VirtualWorker, WorkerPool};
use crate::reporter::{RunMetadata, RunReport};
use crate::schedule::Schedule;
use crate::scheduler::{Iteration, IterationFuture, StageScheduler};
use crate::stats::RunStats;
use crate::trend::{TrendAggregator, METRIC_HTTP_REQ_DURATION};

/// One iteration: request, decompose latency, record, check.
pub struct RequestIteration {
    executor: RequestExecutor,
    aggregator: Arc<TrendAggregator>,
    stats: Arc<RunStats>,
    check: Arc<CheckEvaluator>,
}

impl RequestIteration {
    pub fn new(
        executor: RequestExecutor,
        aggregator: Arc<TrendAggregator>,
        stats: Arc<RunStats>,
        check: Arc<CheckEvaluator>,
    ) -> Self {
        Self {
            executor,
            aggregator,
            stats,
            check,
        }
    }
}

impl Iteration for RequestIteration {
    fn run<'a>(&'a self, worker: &'a VirtualWorker) -> IterationFuture<'a> {
        Box::pin(async move {
            let outcome = self.executor.execute().await;
            debug!(
                worker = worker.id(),
                status = ?outcome.status_code(),
                elapsed = ?outcome.elapsed,
                "Request finished"
            );

            self.stats.record_outcome(&outcome);
            self.aggregator
                .record(METRIC_HTTP_REQ_DURATION, outcome.elapsed.as_secs_f64() * 1000.0);
            for (metric, value) in extract(&outcome).iter() {
                self.aggregator.record(metric.name(), value);
            }
            self.check.evaluate(&outcome);
        })
    }
}

/// A configured run, ready to execute.
pub struct LoadTest {
    config: Config,
    schedule: Schedule,
    transport: Arc<dyn HttpTransport>,
    sink: Arc<dyn DiagnosticSink>,
    shutdown_flag: Arc<AtomicBool>,
}

impl LoadTest {
    /// Validate `config` and build a run backed by the real HTTP client.
    pub fn new(config: Config) -> Result<Self, LoadTestError> {
        let transport = ReqwestTransport::new(config.timeout)?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Same as `new`, with a caller-supplied transport.
    pub fn with_transport(
        config: Config,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, LoadTestError> {
        config.validate().map_err(|errors| {
            LoadTestError::ConfigError(format!("Validation errors: {}", errors.join("; ")))
        })?;
        let schedule = config.schedule()?;
        Ok(Self {
            config,
            schedule,
            transport,
            sink: Arc::new(TracingSink),
            shutdown_flag: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Route check-failure diagnostics somewhere other than the log.
    pub fn with_diagnostic_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// Set up signal handling for SIGINT/SIGTERM.
    /// When a signal is received, no further iterations are issued and the
    /// run drains.
    pub fn setup_signal_handler(&self) -> Result<(), LoadTestError> {
        let flag = self.shutdown_flag.clone();
        ctrlc::set_handler(move || {
            flag.store(true, Ordering::Relaxed);
        })
        .map_err(|e| LoadTestError::ConfigError(format!("Failed to set signal handler: {}", e)))
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
    }

    /// Request shutdown (for testing or programmatic use).
    pub fn request_shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::Relaxed);
    }

    pub fn shutdown_flag(&self) -> &Arc<AtomicBool> {
        &self.shutdown_flag
    }

    /// Execute the schedule to completion, wait for in-flight iterations,
    /// and return the final metrics.
    pub async fn run(&self) -> Result<RunReport, LoadTestError> {
        let cfg = &self.config;
        let started_at = unix_now();

        let aggregator = Arc::new(TrendAggregator::new());
        aggregator.declare(METRIC_HTTP_REQ_DURATION)?;
        for metric in LatencyMetric::ALL {
            aggregator.declare(metric.name())?;
        }
        let stats = Arc::new(RunStats::new(cfg.expected_status));
        let check = Arc::new(CheckEvaluator::new(
            cfg.check_name.clone(),
            cfg.min_body_bytes,
            Arc::clone(&self.sink),
        ));
        let pool = Arc::new(WorkerPool::new(cfg.pre_allocated_workers, cfg.max_workers));
        stats.observe_pool_size(pool.size());

        let executor = RequestExecutor::new(
            Arc::clone(&self.transport),
            cfg.target_url.clone(),
            &cfg.bearer_token,
            cfg.timeout,
        );
        let iteration = Arc::new(RequestIteration::new(
            executor,
            Arc::clone(&aggregator),
            Arc::clone(&stats),
            Arc::clone(&check),
        ));

        info!(
            target_url = %cfg.target_url,
            pre_allocated_workers = pool.size(),
            max_workers = cfg.max_workers,
            "Load test starting"
        );
        let scheduler = StageScheduler::new(
            self.schedule.clone(),
            pool,
            Arc::clone(&stats),
            iteration,
            cfg.graceful_stop,
        )
        .with_shutdown_flag(Arc::clone(&self.shutdown_flag));
        let outcome = scheduler.run().await;

        let report = RunReport {
            metadata: RunMetadata {
                target_url: cfg.target_url.clone(),
                started_at,
                finished_at: unix_now(),
                stage_count: self.schedule.stages().len(),
                schedule_duration_secs: self.schedule.total_duration().as_secs_f64(),
                expected_iterations: self.schedule.expected_iterations(),
                pre_allocated_workers: cfg.pre_allocated_workers,
                max_workers: cfg.max_workers,
                stopped_early: outcome.stopped_early,
            },
            trends: aggregator.snapshot(),
            checks: vec![check.counts()],
            stats: stats.snapshot(),
        };
        info!(
            issued = outcome.issued,
            dropped = outcome.dropped,
            interrupted = outcome.interrupted,
            elapsed = ?outcome.elapsed,
            "Load test finished"
        );
        Ok(report)
    }
}

/// Current time as unix seconds.
fn unix_now() -> String {
    use std::time::SystemTime;
    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}", now.as_secs())
}
