// Stage scheduler module
//
// Open-model issuance: iteration k is due when the integral of the target
// rate reaches k + 1. Due times come from the schedule alone, never from how
// long earlier iterations took.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::pool::{VirtualWorker, WorkerLease, WorkerPool};
use crate::schedule::Schedule;
use crate::stats::RunStats;

/// Longest single sleep, so a shutdown request is noticed promptly.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub type IterationFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// The work one iteration performs while holding a worker.
pub trait Iteration: Send + Sync + 'static {
    fn run<'a>(&'a self, worker: &'a VirtualWorker) -> IterationFuture<'a>;
}

/// How the scheduled phase ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleOutcome {
    pub issued: u64,
    pub dropped: u64,
    pub interrupted: u64,
    pub stopped_early: bool,
    pub elapsed: Duration,
}

pub struct StageScheduler {
    schedule: Schedule,
    pool: Arc<WorkerPool>,
    stats: Arc<RunStats>,
    iteration: Arc<dyn Iteration>,
    graceful_stop: Duration,
    shutdown_flag: Arc<AtomicBool>,
}

impl StageScheduler {
    pub fn new(
        schedule: Schedule,
        pool: Arc<WorkerPool>,
        stats: Arc<RunStats>,
        iteration: Arc<dyn Iteration>,
        graceful_stop: Duration,
    ) -> Self {
        Self {
            schedule,
            pool,
            stats,
            iteration,
            graceful_stop,
            shutdown_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share an externally owned shutdown flag (e.g. one set by a signal handler).
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = flag;
        self
    }

    pub fn shutdown_flag(&self) -> &Arc<AtomicBool> {
        &self.shutdown_flag
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
    }

    /// Sleep until `deadline`. Returns false if shutdown was requested first.
    async fn sleep_until(&self, deadline: Instant) -> bool {
        loop {
            if self.is_shutdown_requested() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            tokio::time::sleep((deadline - now).min(SHUTDOWN_POLL_INTERVAL)).await;
        }
    }

    /// Hand one due iteration to an idle worker. When the pool is exhausted
    /// the iteration is dropped and counted; returns whether it was dispatched.
    pub fn dispatch(&self, tasks: &mut JoinSet<()>) -> bool {
        let Some(lease) = WorkerLease::acquire(&self.pool) else {
            self.stats.record_dropped();
            let dropped = self.stats.dropped();
            if dropped == 1 {
                warn!(
                    max_workers = self.pool.max_workers(),
                    "Worker pool exhausted; dropping due iterations"
                );
            } else {
                debug!(dropped, "Dropped iteration");
            }
            return false;
        };

        self.stats.record_dispatched();
        self.stats.observe_pool_size(self.pool.size());

        let iteration = Arc::clone(&self.iteration);
        let stats = Arc::clone(&self.stats);
        tasks.spawn(async move {
            iteration.run(lease.worker()).await;
            drop(lease);
            stats.record_completed();
        });
        true
    }

    fn reap_finished(tasks: &mut JoinSet<()>) {
        while let Some(result) = tasks.try_join_next() {
            if let Err(e) = result {
                warn!(error = %e, "Iteration task failed");
            }
        }
    }

    /// Wait for in-flight iterations, up to the graceful stop. Stragglers are
    /// aborted and counted as interrupted.
    async fn drain(&self, mut tasks: JoinSet<()>) -> u64 {
        if tasks.is_empty() {
            return 0;
        }
        info!(in_flight = tasks.len(), "Waiting for in-flight iterations");
        let deadline = Instant::now() + self.graceful_stop;
        let finished = tokio::time::timeout_at(deadline, async {
            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    warn!(error = %e, "Iteration task failed");
                }
            }
        })
        .await;

        if finished.is_ok() {
            return 0;
        }
        let remaining = tasks.len() as u64;
        tasks.abort_all();
        warn!(
            remaining,
            graceful_stop = ?self.graceful_stop,
            "Graceful stop expired; interrupting in-flight iterations"
        );
        self.stats.record_interrupted(remaining);
        remaining
    }

    /// Issue iterations until the schedule is terminal or shutdown is
    /// requested, then drain.
    pub async fn run(&self) -> ScheduleOutcome {
        let start = Instant::now();
        let total = self.schedule.total_duration();
        let mut tasks = JoinSet::new();
        let mut issued: u64 = 0;
        let mut dropped: u64 = 0;
        let mut stopped_early = false;

        info!(
            stages = self.schedule.stages().len(),
            duration = ?total,
            expected_iterations = self.schedule.expected_iterations().round() as u64,
            "Starting schedule"
        );

        loop {
            if self.is_shutdown_requested() {
                stopped_early = true;
                break;
            }
            let due = match self.schedule.next_due(issued) {
                Some(due) if due < total => due,
                _ => break,
            };
            if !self.sleep_until(start + due).await {
                stopped_early = true;
                break;
            }

            issued += 1;
            self.stats.record_issued();
            if !self.dispatch(&mut tasks) {
                dropped += 1;
            }
            Self::reap_finished(&mut tasks);
        }

        if !stopped_early && !self.sleep_until(start + total).await {
            stopped_early = true;
        }
        if stopped_early {
            warn!(issued, "Shutdown requested; no further iterations will be issued");
        } else {
            info!(issued, dropped, "Schedule complete");
        }

        let interrupted = self.drain(tasks).await;

        ScheduleOutcome {
            issued,
            dropped,
            interrupted,
            stopped_early,
            elapsed: start.elapsed(),
        }
    }
}
