//! Message types for actor communication.
//!
//! All inter-actor communication uses strongly-typed message passing via
//! `tokio::sync::mpsc`. Response patterns use `tokio::sync::oneshot` for
//! request-reply semantics.

use crate::actions::Action;
use crate::alias::ThreadId;
use crate::errors::TcError;
use std::fmt;
use tokio::sync::oneshot;

/// Stable worker identifier, assigned at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub u32);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Messages sent to the dispatcher actor.
#[derive(Debug)]
pub enum DispatcherMessage {
    /// Route an action to the worker serving `thread`.
    Submit {
        /// Thread handle as supplied by the caller (pre-resolution).
        thread: String,
        /// The action to execute; its sink is resolved by the system.
        action: Action,
    },

    /// Get a snapshot of pool state (introspection/health).
    GetStatus {
        /// Response channel for the snapshot.
        respond_to: oneshot::Sender<PoolStatus>,
    },

    /// Initiate graceful shutdown.
    Shutdown {
        /// Response channel for completion.
        respond_to: oneshot::Sender<()>,
    },
}

/// Messages sent to a worker actor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Navigate to `thread`; enqueue `flush` once the binding holds.
    Bind {
        /// Canonical thread to bind to.
        thread: ThreadId,
        /// Actions buffered for this thread, in submission order.
        flush: Vec<Action>,
    },

    /// Append one action for the currently bound thread.
    Enqueue {
        /// The action to queue.
        action: Action,
    },
}

/// Events reported by workers back to the dispatcher.
#[derive(Debug)]
pub enum WorkerEvent {
    /// Outcome of a `Bind` navigation.
    Navigated {
        /// Reporting worker.
        worker: WorkerId,
        /// The thread the bind asked for.
        requested: ThreadId,
        /// Observed page location on success, failure otherwise.
        outcome: Result<String, TcError>,
    },

    /// The worker's queue is empty and idle.
    Drained {
        /// Reporting worker.
        worker: WorkerId,
        /// Cumulative resolved-action count; lets the dispatcher discard a
        /// drained signal that raced an in-flight enqueue.
        completed: u64,
    },
}

/// Snapshot of pool state.
#[derive(Debug, Clone)]
pub struct PoolStatus {
    /// Per-worker state, ordered by worker id.
    pub workers: Vec<WorkerStatus>,
    /// Distinct threads with parked actions.
    pub pending_threads: usize,
    /// Total parked actions.
    pub pending_actions: usize,
    /// Whether the dispatcher is draining.
    pub is_draining: bool,
    /// Current dispatcher mailbox depth.
    pub mailbox_depth: usize,
}

/// Snapshot of one worker.
#[derive(Debug, Clone)]
pub struct WorkerStatus {
    /// Worker id.
    pub id: WorkerId,
    /// Thread the worker is bound to, if any.
    pub bound: Option<ThreadId>,
    /// Whether the worker has unfinished actions.
    pub active: bool,
    /// Cumulative actions routed to the worker.
    pub assigned: u64,
    /// Worker creation timestamp.
    pub created_at: i64,
}
