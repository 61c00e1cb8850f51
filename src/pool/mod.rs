// Virtual worker pool
//
// Bounded, elastic set of reusable execution units. A worker is handed out by
// value, so holding a `VirtualWorker` is the assignment: it cannot be handed to
// a second iteration until it comes back through `release`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Busy,
}

/// One reusable execution unit.
#[derive(Debug, PartialEq, Eq)]
pub struct VirtualWorker {
    id: usize,
    state: WorkerState,
    iterations: u64,
}

impl VirtualWorker {
    fn new(id: usize) -> Self {
        Self {
            id,
            state: WorkerState::Idle,
            iterations: 0,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Iterations this worker has been assigned over the run.
    pub fn iterations(&self) -> u64 {
        self.iterations
    }
}

/// Thread-safe worker pool with lazy growth up to `max_workers`.
pub struct WorkerPool {
    idle: Mutex<Vec<VirtualWorker>>,
    created: AtomicUsize,
    busy: AtomicUsize,
    max_workers: usize,
}

impl WorkerPool {
    /// Pre-allocate `pre_allocated` idle workers (clamped to `max_workers`).
    pub fn new(pre_allocated: usize, max_workers: usize) -> Self {
        let pre_allocated = pre_allocated.min(max_workers);
        // Reverse so that worker 0 is handed out first.
        let idle = (0..pre_allocated).rev().map(VirtualWorker::new).collect();
        Self {
            idle: Mutex::new(idle),
            created: AtomicUsize::new(pre_allocated),
            busy: AtomicUsize::new(0),
            max_workers,
        }
    }

    fn lock_idle(&self) -> MutexGuard<'_, Vec<VirtualWorker>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take an idle worker, creating one if the pool is below its maximum.
    /// Returns `None` when every one of `max_workers` workers is busy.
    pub fn acquire(&self) -> Option<VirtualWorker> {
        let mut idle = self.lock_idle();
        let mut worker = match idle.pop() {
            Some(w) => w,
            None => {
                // Growth happens under the idle lock so two callers cannot both
                // pass the bound check.
                let created = self.created.load(Ordering::Acquire);
                if created >= self.max_workers {
                    return None;
                }
                self.created.store(created + 1, Ordering::Release);
                VirtualWorker::new(created)
            }
        };
        drop(idle);
        worker.state = WorkerState::Busy;
        worker.iterations += 1;
        self.busy.fetch_add(1, Ordering::AcqRel);
        Some(worker)
    }

    /// Return a worker to the idle set.
    pub fn release(&self, mut worker: VirtualWorker) {
        worker.state = WorkerState::Idle;
        self.lock_idle().push(worker);
        self.busy.fetch_sub(1, Ordering::AcqRel);
    }

    /// Workers created so far (pre-allocated plus lazily grown). Never shrinks.
    pub fn size(&self) -> usize {
        self.created.load(Ordering::Acquire)
    }

    pub fn idle_count(&self) -> usize {
        self.lock_idle().len()
    }

    pub fn busy_count(&self) -> usize {
        self.busy.load(Ordering::Acquire)
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }
}

/// A worker checked out of a shared pool. Dropping the lease returns the
/// worker, so it comes back even if the task holding it panics or is aborted.
pub struct WorkerLease {
    pool: Arc<WorkerPool>,
    worker: Option<VirtualWorker>,
}

impl WorkerLease {
    /// `None` when the pool is exhausted.
    pub fn acquire(pool: &Arc<WorkerPool>) -> Option<Self> {
        pool.acquire().map(|worker| Self {
            pool: Arc::clone(pool),
            worker: Some(worker),
        })
    }

    pub fn worker(&self) -> &VirtualWorker {
        match &self.worker {
            Some(worker) => worker,
            None => unreachable!("worker is only taken when the lease drops"),
        }
    }
}

impl Drop for WorkerLease {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.pool.release(worker);
        }
    }
}
