//! Dispatcher actor - the public entry point for thread-affine dispatch.
//!
//! The dispatcher resolves thread handles through the alias table, routes
//! each action to the worker bound to its thread, admits new workers up to
//! the pool limit, rebinds idle workers when the pool is saturated, and
//! parks actions per thread (serviced in arrival order) when nothing is
//! free.
//!
//! # Ordering
//!
//! For a fixed resolved thread, submission order is execution order: a
//! bound worker's mailbox is FIFO, pending actions are flushed in original
//! order, and all routing decisions happen on this single actor task.

use crate::actions::{Action, ActionFn, PendingThreadQueue};
use crate::actors::messages::{
    DispatcherMessage, PoolStatus, WorkerEvent, WorkerId, WorkerMessage,
};
use crate::actors::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use crate::actors::pool::{ManagedWorker, WorkerPool};
use crate::actors::worker::WorkerActor;
use crate::alias::{slug_from_location, AliasResolver, ThreadId};
use crate::config::Config;
use crate::errors::TcError;
use crate::page::PageFactory;

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the dispatcher mailbox.
const DISPATCHER_CHANNEL_BUFFER: usize = 1000;

/// Buffer for worker-to-dispatcher events.
const WORKER_EVENT_BUFFER: usize = 256;

/// How long shutdown waits for each worker task.
const WORKER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the dispatcher actor.
///
/// This is the public interface for submitting actions. Cloneable; all
/// clones feed the same actor.
#[derive(Clone)]
pub struct DispatcherHandle {
    sender: mpsc::Sender<DispatcherMessage>,
    cancel_token: CancellationToken,
}

impl DispatcherHandle {
    /// Spawn the dispatcher actor and return a handle to it.
    #[must_use]
    pub fn new(config: &Config, factory: Arc<dyn PageFactory>, metrics: Arc<ActorMetrics>) -> Self {
        Self::with_cancel_token(config, factory, metrics, CancellationToken::new())
    }

    /// Spawn the dispatcher under an externally owned cancellation token.
    #[must_use]
    pub fn with_cancel_token(
        config: &Config,
        factory: Arc<dyn PageFactory>,
        metrics: Arc<ActorMetrics>,
        cancel_token: CancellationToken,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(DISPATCHER_CHANNEL_BUFFER);
        let (events_tx, events_rx) = mpsc::channel(WORKER_EVENT_BUFFER);

        let actor = DispatcherActor {
            instance_id: config.instance_id.clone(),
            thread_url_prefix: config.thread_url_prefix.clone(),
            action_timeout: config.action_timeout,
            factory,
            receiver,
            events_tx,
            events_rx,
            cancel_token: cancel_token.clone(),
            pool: WorkerPool::new(config.worker_limit),
            pending: PendingThreadQueue::new(),
            alias: AliasResolver::new(),
            draining: false,
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Dispatcher, config.instance_id.clone()),
        };

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
        }
    }

    /// Submit an operation against `thread`.
    ///
    /// Resolves when the operation completes or fails. Per-thread submission
    /// order is execution order, regardless of worker reassignment.
    ///
    /// # Errors
    ///
    /// `InvalidTarget` synchronously for an empty handle; `Navigation` when
    /// the binding the action was waiting on failed; `Draining` during
    /// shutdown; otherwise whatever the operation itself returns.
    pub async fn submit(&self, thread: &str, op: ActionFn) -> Result<(), TcError> {
        if thread.trim().is_empty() {
            return Err(TcError::InvalidTarget);
        }

        let (tx, rx) = oneshot::channel();
        let action = Action::new(op, tx);
        self.sender
            .send(DispatcherMessage::Submit {
                thread: thread.to_string(),
                action,
            })
            .await
            .map_err(|e| TcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| TcError::Internal(format!("response receive failed: {e}")))?
    }

    /// Get a snapshot of pool state.
    pub async fn status(&self) -> Result<PoolStatus, TcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DispatcherMessage::GetStatus { respond_to: tx })
            .await
            .map_err(|e| TcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| TcError::Internal(format!("response receive failed: {e}")))
    }

    /// Initiate graceful shutdown and wait for workers to stop.
    pub async fn shutdown(&self) -> Result<(), TcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DispatcherMessage::Shutdown { respond_to: tx })
            .await
            .map_err(|e| TcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| TcError::Internal(format!("response receive failed: {e}")))
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Get a child token for tasks that should stop with the dispatcher.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

/// The dispatcher actor implementation.
struct DispatcherActor {
    instance_id: String,
    thread_url_prefix: String,
    action_timeout: Option<Duration>,
    factory: Arc<dyn PageFactory>,
    receiver: mpsc::Receiver<DispatcherMessage>,
    /// Kept so the event channel never closes and for cloning to workers.
    events_tx: mpsc::Sender<WorkerEvent>,
    events_rx: mpsc::Receiver<WorkerEvent>,
    cancel_token: CancellationToken,
    pool: WorkerPool,
    pending: PendingThreadQueue,
    alias: AliasResolver,
    draining: bool,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl DispatcherActor {
    /// Run the actor message loop.
    #[instrument(skip_all, name = "tc.dispatcher", fields(instance_id = %self.instance_id))]
    async fn run(mut self) {
        info!(
            target: "tc.dispatcher",
            instance_id = %self.instance_id,
            "Dispatcher started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    self.graceful_shutdown().await;
                    break;
                }

                message = self.receiver.recv() => {
                    match message {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            let exit = self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                            if exit {
                                break;
                            }
                        }
                        None => {
                            info!(
                                target: "tc.dispatcher",
                                instance_id = %self.instance_id,
                                "Dispatcher channel closed, draining"
                            );
                            self.graceful_shutdown().await;
                            break;
                        }
                    }
                }

                Some(event) = self.events_rx.recv() => {
                    self.handle_worker_event(event).await;
                }
            }
        }

        info!(
            target: "tc.dispatcher",
            instance_id = %self.instance_id,
            messages_processed = self.mailbox.messages_processed(),
            "Dispatcher stopped"
        );
    }

    /// Handle a single message. Returns `true` when the actor should exit.
    async fn handle_message(&mut self, message: DispatcherMessage) -> bool {
        match message {
            DispatcherMessage::Submit { thread, action } => {
                self.handle_submit(&thread, action).await;
                false
            }

            DispatcherMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.status());
                false
            }

            DispatcherMessage::Shutdown { respond_to } => {
                self.graceful_shutdown().await;
                let _ = respond_to.send(());
                true
            }
        }
    }

    /// Route one submitted action (spec steps 1-4).
    async fn handle_submit(&mut self, thread: &str, action: Action) {
        if self.draining {
            action.fail(TcError::Draining);
            return;
        }

        let canonical = self.alias.resolve(thread);

        // A bound worker keeps per-thread FIFO by simply receiving the
        // action at the back of its mailbox.
        if let Some(id) = self.pool.find_bound(&canonical) {
            self.route_to_worker(id, action).await;
            return;
        }

        if !self.pool.at_capacity() {
            self.spawn_worker_for(canonical, vec![action]).await;
            return;
        }

        if let Some(id) = self.pool.find_idle() {
            self.rebind(id, canonical, vec![action]).await;
            return;
        }

        debug!(
            target: "tc.dispatcher",
            thread = %canonical,
            "Pool saturated with no idle worker, parking action"
        );
        self.pending.push(canonical, action);
    }

    /// Append an action to an already bound worker.
    async fn route_to_worker(&mut self, id: WorkerId, action: Action) {
        let Some(worker) = self.pool.get_mut(id) else {
            action.fail(TcError::Internal(format!("{id} vanished from the pool")));
            return;
        };

        worker.assigned += 1;
        worker.active = true;

        if let Err(send_error) = worker
            .handle
            .sender
            .send(WorkerMessage::Enqueue { action })
            .await
        {
            // The worker task is gone; a lifecycle bug, not load.
            error!(
                target: "tc.dispatcher",
                worker_id = %id,
                "Worker mailbox closed, dropping worker"
            );
            if let WorkerMessage::Enqueue { action } = send_error.0 {
                action.fail(TcError::Internal(
                    "worker terminated unexpectedly".to_string(),
                ));
            }
            self.pool.remove(id);
        }
    }

    /// Create a worker for `thread` and hand it the buffered actions.
    async fn spawn_worker_for(&mut self, thread: ThreadId, flush: Vec<Action>) {
        let page = match self.factory.open_page().await {
            Ok(page) => page,
            Err(e) => {
                warn!(
                    target: "tc.dispatcher",
                    thread = %thread,
                    error = %e,
                    "Failed to open a page for a new worker"
                );
                for action in flush {
                    action.fail(e.clone());
                }
                return;
            }
        };

        let id = self.pool.next_id();
        let (handle, task_handle) = WorkerActor::spawn(
            id,
            page,
            self.events_tx.clone(),
            self.cancel_token.child_token(),
            self.action_timeout,
            Arc::clone(&self.metrics),
        );

        let worker = ManagedWorker {
            handle,
            task_handle,
            bound: Some(thread.clone()),
            active: true,
            last_activity: Instant::now(),
            assigned: flush.len() as u64,
            created_at: chrono::Utc::now().timestamp(),
        };

        self.metrics.worker_spawned();
        info!(
            target: "tc.dispatcher",
            worker_id = %id,
            thread = %thread,
            pool_size = self.pool.len() + 1,
            "Worker created"
        );

        if let Err(send_error) = worker
            .handle
            .sender
            .send(WorkerMessage::Bind { thread, flush })
            .await
        {
            error!(
                target: "tc.dispatcher",
                worker_id = %id,
                "New worker rejected its bind"
            );
            if let WorkerMessage::Bind { flush, .. } = send_error.0 {
                for action in flush {
                    action.fail(TcError::Internal(
                        "worker terminated unexpectedly".to_string(),
                    ));
                }
            }
            return;
        }

        self.pool.insert(worker);
    }

    /// Rebind an idle worker to `thread` and flush its buffered actions.
    async fn rebind(&mut self, id: WorkerId, thread: ThreadId, flush: Vec<Action>) {
        let Some(worker) = self.pool.get_mut(id) else {
            for action in flush {
                action.fail(TcError::Internal(format!("{id} vanished from the pool")));
            }
            return;
        };

        debug!(
            target: "tc.dispatcher",
            worker_id = %id,
            from = ?worker.bound,
            to = %thread,
            actions = flush.len(),
            "Rebinding worker"
        );

        worker.bound = Some(thread.clone());
        worker.active = true;
        worker.assigned += flush.len() as u64;
        self.metrics.record_rebind();

        if let Err(send_error) = worker
            .handle
            .sender
            .send(WorkerMessage::Bind { thread, flush })
            .await
        {
            error!(
                target: "tc.dispatcher",
                worker_id = %id,
                "Worker mailbox closed during rebind, dropping worker"
            );
            if let WorkerMessage::Bind { flush, .. } = send_error.0 {
                for action in flush {
                    action.fail(TcError::Internal(
                        "worker terminated unexpectedly".to_string(),
                    ));
                }
            }
            self.pool.remove(id);
        }
    }

    /// React to navigation results and drained queues.
    async fn handle_worker_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Navigated {
                worker,
                requested,
                outcome,
            } => match outcome {
                Ok(location) => self.record_navigation(worker, requested, &location),
                Err(error) => {
                    debug!(
                        target: "tc.dispatcher",
                        worker_id = %worker,
                        thread = %requested,
                        error = %error,
                        "Worker failed to bind"
                    );
                    if let Some(entry) = self.pool.get_mut(worker) {
                        entry.bound = None;
                    }
                }
            },

            WorkerEvent::Drained { worker, completed } => {
                let Some(entry) = self.pool.get_mut(worker) else {
                    return;
                };
                if completed < entry.assigned {
                    // Stale signal: an enqueue raced the drain.
                    return;
                }

                entry.active = false;
                entry.last_activity = Instant::now();

                // Arrival-order fairness: the freed worker goes to the
                // longest-waiting pending thread before anything new.
                if let Some((thread, actions)) = self.pending.pop_front() {
                    debug!(
                        target: "tc.dispatcher",
                        worker_id = %worker,
                        thread = %thread,
                        actions = actions.len(),
                        "Flushing pending thread to drained worker"
                    );
                    self.rebind(worker, thread, actions).await;
                }
            }
        }
    }

    /// Learn the canonical thread id a navigation settled on.
    fn record_navigation(&mut self, worker: WorkerId, requested: ThreadId, location: &str) {
        let Some(observed) = slug_from_location(&self.thread_url_prefix, location) else {
            debug!(
                target: "tc.dispatcher",
                worker_id = %worker,
                location = %location,
                "Navigation landed outside the thread prefix"
            );
            return;
        };
        let observed = observed.to_string();
        if observed == requested {
            return;
        }

        // Alias discovered. If another worker already serves the canonical
        // thread the resolver wins the race: all future work routes there
        // and this worker quietly drains under its stale key.
        if let Some(other) = self.pool.find_bound(&observed) {
            if other != worker {
                warn!(
                    target: "tc.dispatcher",
                    worker_id = %worker,
                    other_worker = %other,
                    thread = %observed,
                    "Two workers reached the same thread, keeping the earlier binding"
                );
                self.alias.record(observed, requested);
                return;
            }
        }

        if let Some(entry) = self.pool.get_mut(worker) {
            entry.bound = Some(observed.clone());
        }
        self.alias.record(observed, requested);
    }

    /// Build a status snapshot.
    fn status(&self) -> PoolStatus {
        PoolStatus {
            workers: self.pool.statuses(),
            pending_threads: self.pending.thread_count(),
            pending_actions: self.pending.action_count(),
            is_draining: self.draining,
            mailbox_depth: self.mailbox.current_depth(),
        }
    }

    /// Perform graceful shutdown: fail parked work, stop workers, join them.
    async fn graceful_shutdown(&mut self) {
        if self.draining {
            return;
        }
        self.draining = true;

        info!(
            target: "tc.dispatcher",
            instance_id = %self.instance_id,
            workers = self.pool.len(),
            pending_actions = self.pending.action_count(),
            "Draining dispatcher"
        );

        self.pending.fail_all(&TcError::Draining);

        // Child tokens stop every worker; in-flight actions finish first.
        self.cancel_token.cancel();

        for (id, worker) in self.pool.drain() {
            match tokio::time::timeout(WORKER_SHUTDOWN_TIMEOUT, worker.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "tc.dispatcher",
                        worker_id = %id,
                        "Worker exited cleanly"
                    );
                }
                Ok(Err(e)) => {
                    if e.is_panic() {
                        self.metrics.record_panic(ActorType::Worker);
                    }
                    warn!(
                        target: "tc.dispatcher",
                        worker_id = %id,
                        error = ?e,
                        "Worker task failed during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "tc.dispatcher",
                        worker_id = %id,
                        "Worker shutdown timed out"
                    );
                }
            }
        }

        info!(
            target: "tc.dispatcher",
            instance_id = %self.instance_id,
            "Dispatcher drained"
        );
    }
}
