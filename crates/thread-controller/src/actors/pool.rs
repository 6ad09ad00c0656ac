//! Pool bookkeeping for worker actors.
//!
//! Owned and mutated exclusively by the dispatcher actor; keeping all
//! structural state on one task is what serializes admission, rebinding and
//! pending-queue edits against concurrent submitters.

use crate::actors::messages::{WorkerId, WorkerStatus};
use crate::actors::worker::WorkerHandle;
use crate::alias::ThreadId;

use std::collections::HashMap;
use std::time::Instant;
use tokio::task::JoinHandle;

/// One managed worker and the dispatcher's view of its state.
pub(crate) struct ManagedWorker {
    /// Mailbox handle.
    pub handle: WorkerHandle,
    /// Join handle for monitoring the actor task.
    pub task_handle: JoinHandle<()>,
    /// Thread the worker is bound to. Cleared while a binding is broken.
    pub bound: Option<ThreadId>,
    /// Whether the worker has unfinished actions.
    pub active: bool,
    /// When the worker last went idle (or was created).
    pub last_activity: Instant,
    /// Cumulative actions routed to this worker.
    pub assigned: u64,
    /// Worker creation timestamp.
    pub created_at: i64,
}

/// The set of workers, bounded by the configured limit.
pub(crate) struct WorkerPool {
    limit: usize,
    next_id: u32,
    workers: HashMap<WorkerId, ManagedWorker>,
}

impl WorkerPool {
    /// Create an empty pool with the given worker limit.
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            next_id: 0,
            workers: HashMap::new(),
        }
    }

    /// Number of live workers.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Whether the pool has reached its worker limit.
    pub fn at_capacity(&self) -> bool {
        self.workers.len() >= self.limit
    }

    /// Allocate the next stable worker id.
    pub fn next_id(&mut self) -> WorkerId {
        let id = WorkerId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Register a worker under its handle's id.
    pub fn insert(&mut self, worker: ManagedWorker) {
        self.workers.insert(worker.handle.id, worker);
    }

    /// Mutable access to one worker.
    pub fn get_mut(&mut self, id: WorkerId) -> Option<&mut ManagedWorker> {
        self.workers.get_mut(&id)
    }

    /// Drop a worker from the pool (abnormal termination only).
    pub fn remove(&mut self, id: WorkerId) -> Option<ManagedWorker> {
        self.workers.remove(&id)
    }

    /// Worker currently bound to `thread`, if any.
    pub fn find_bound(&self, thread: &str) -> Option<WorkerId> {
        self.workers
            .iter()
            .find(|(_, worker)| worker.bound.as_deref() == Some(thread))
            .map(|(id, _)| *id)
    }

    /// Least-recently-active idle worker; equal stamps break toward the
    /// smaller id for determinism.
    pub fn find_idle(&self) -> Option<WorkerId> {
        self.workers
            .iter()
            .filter(|(_, worker)| !worker.active)
            .min_by_key(|(id, worker)| (worker.last_activity, **id))
            .map(|(id, _)| *id)
    }

    /// Status snapshot, ordered by worker id.
    pub fn statuses(&self) -> Vec<WorkerStatus> {
        let mut statuses: Vec<WorkerStatus> = self
            .workers
            .iter()
            .map(|(id, worker)| WorkerStatus {
                id: *id,
                bound: worker.bound.clone(),
                active: worker.active,
                assigned: worker.assigned,
                created_at: worker.created_at,
            })
            .collect();
        statuses.sort_by_key(|status| status.id);
        statuses
    }

    /// Take every worker out of the pool (shutdown path).
    pub fn drain(&mut self) -> Vec<(WorkerId, ManagedWorker)> {
        self.workers.drain().collect()
    }
}
