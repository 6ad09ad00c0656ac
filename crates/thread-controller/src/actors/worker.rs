//! Worker actor: one browser page, bound to at most one thread at a time,
//! executing its actions strictly in order.
//!
//! # Lifecycle
//!
//! 1. Created by the dispatcher when a thread needs a page (up to the pool
//!    limit); the first message is always a `Bind`.
//! 2. Never destroyed while the controller runs - rebinding to another
//!    thread reuses the page instead of paying for a fresh one.
//! 3. Cancellation via child token propagates from the dispatcher.
//!
//! # Rebinding protocol
//!
//! A `Bind` pauses the action queue, navigates, and only resumes the queue
//! after the binding is settled, so no action can execute against the wrong
//! thread. On navigation failure every action flushed with the bind and
//! everything already queued resolves with the navigation error.

use crate::actions::{Action, ActionQueue};
use crate::actors::messages::{WorkerEvent, WorkerId, WorkerMessage};
use crate::actors::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use crate::alias::ThreadId;
use crate::errors::TcError;
use crate::page::PageContext;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Default channel buffer size for a worker mailbox.
pub(crate) const WORKER_CHANNEL_BUFFER: usize = 200;

/// The dispatcher's sending side of one worker.
#[derive(Debug)]
pub(crate) struct WorkerHandle {
    /// Worker id.
    pub id: WorkerId,
    /// Worker mailbox.
    pub sender: mpsc::Sender<WorkerMessage>,
}

/// The worker actor implementation.
pub(crate) struct WorkerActor {
    id: WorkerId,
    page: Arc<dyn PageContext>,
    receiver: mpsc::Receiver<WorkerMessage>,
    events: mpsc::Sender<WorkerEvent>,
    cancel_token: CancellationToken,
    queue: ActionQueue,
    bound: Option<ThreadId>,
    /// Error of the last failed binding; stray enqueues resolve with it.
    binding_error: Option<TcError>,
    /// Cumulative resolved actions, reported with every drained signal.
    completed: u64,
    action_timeout: Option<Duration>,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl WorkerActor {
    /// Spawn a worker owning `page`. Returns its handle and task handle.
    pub(crate) fn spawn(
        id: WorkerId,
        page: Arc<dyn PageContext>,
        events: mpsc::Sender<WorkerEvent>,
        cancel_token: CancellationToken,
        action_timeout: Option<Duration>,
        metrics: Arc<ActorMetrics>,
    ) -> (WorkerHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(WORKER_CHANNEL_BUFFER);

        let actor = Self {
            id,
            page,
            receiver,
            events,
            cancel_token,
            queue: ActionQueue::new(),
            bound: None,
            binding_error: None,
            completed: 0,
            action_timeout,
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Worker, id.to_string()),
        };

        let task_handle = tokio::spawn(actor.run());

        (WorkerHandle { id, sender }, task_handle)
    }

    /// Run the actor loop: absorb control traffic, then execute one action.
    #[instrument(skip_all, name = "tc.worker", fields(worker_id = %self.id))]
    async fn run(mut self) {
        debug!(target: "tc.worker", worker_id = %self.id, "Worker started");

        loop {
            // Absorb everything already in the mailbox before touching the
            // queue, so a Bind never waits behind queued actions.
            while let Ok(message) = self.receiver.try_recv() {
                self.handle_message(message).await;
            }

            if self.cancel_token.is_cancelled() {
                self.abort_queue();
                break;
            }

            if let Some(action) = self.queue.pop() {
                self.execute(action).await;
                self.notify_if_drained().await;
            } else {
                tokio::select! {
                    () = self.cancel_token.cancelled() => {
                        self.abort_queue();
                        break;
                    }
                    message = self.receiver.recv() => match message {
                        Some(message) => self.handle_message(message).await,
                        None => break,
                    }
                }
            }
        }

        debug!(
            target: "tc.worker",
            worker_id = %self.id,
            completed = self.completed,
            "Worker stopped"
        );
    }

    /// Handle a single message.
    async fn handle_message(&mut self, message: WorkerMessage) {
        self.mailbox.record_enqueue();
        match message {
            WorkerMessage::Bind { thread, flush } => self.handle_bind(thread, flush).await,
            WorkerMessage::Enqueue { action } => self.handle_enqueue(action).await,
        }
        self.mailbox.record_dequeue();
        self.metrics.record_message_processed();
    }

    /// Rebind the page: pause, navigate, then resume with the flushed
    /// actions - or fail everything that was riding on the binding.
    async fn handle_bind(&mut self, thread: ThreadId, flush: Vec<Action>) {
        self.queue.pause();

        debug!(
            target: "tc.worker",
            worker_id = %self.id,
            thread = %thread,
            flush = flush.len(),
            "Binding to thread"
        );

        let navigation = match self.action_timeout {
            Some(limit) => match tokio::time::timeout(limit, self.page.navigate(&thread)).await {
                Ok(result) => result,
                Err(_) => Err(TcError::Navigation(format!(
                    "navigation to {thread} timed out"
                ))),
            },
            None => self.page.navigate(&thread).await,
        };

        match navigation {
            Ok(outcome) => {
                self.bound = Some(thread.clone());
                self.binding_error = None;
                for action in flush {
                    self.queue.push(action);
                }
                self.queue.resume();
                self.send_event(WorkerEvent::Navigated {
                    worker: self.id,
                    requested: thread,
                    outcome: Ok(outcome.location),
                })
                .await;
            }
            Err(e) => {
                let error = match e {
                    TcError::Navigation(_) => e,
                    other => TcError::Navigation(other.to_string()),
                };
                warn!(
                    target: "tc.worker",
                    worker_id = %self.id,
                    thread = %thread,
                    error = %error,
                    "Navigation failed, failing actions bound to it"
                );

                self.bound = None;
                self.binding_error = Some(error.clone());
                for action in flush {
                    self.completed += 1;
                    self.metrics.action_failed();
                    action.fail(error.clone());
                }
                for action in self.queue.drain() {
                    self.completed += 1;
                    self.metrics.action_failed();
                    action.fail(error.clone());
                }
                self.queue.resume();
                self.metrics.record_navigation_failure();

                self.send_event(WorkerEvent::Navigated {
                    worker: self.id,
                    requested: thread,
                    outcome: Err(error),
                })
                .await;
                self.notify_if_drained().await;
            }
        }
    }

    /// Queue one action, or fail it if the binding is gone.
    async fn handle_enqueue(&mut self, action: Action) {
        if self.bound.is_none() {
            // Only reachable when an enqueue raced a failed binding: the
            // dispatcher routed it before observing the failure.
            let error = self.binding_error.clone().unwrap_or_else(|| {
                TcError::Navigation("worker is not bound to a thread".to_string())
            });
            self.completed += 1;
            self.metrics.action_failed();
            action.fail(error);
            self.notify_if_drained().await;
            return;
        }
        self.queue.push(action);
    }

    /// Execute one action to completion or failure.
    async fn execute(&mut self, action: Action) {
        let page = Arc::clone(&self.page);
        let result = action.run(page, self.action_timeout).await;
        self.completed += 1;
        match result {
            Ok(()) => self.metrics.action_executed(),
            Err(e) => {
                self.metrics.action_failed();
                debug!(
                    target: "tc.worker",
                    worker_id = %self.id,
                    error = %e,
                    "Action resolved with failure"
                );
            }
        }
    }

    /// Report a drained queue to the dispatcher.
    async fn notify_if_drained(&mut self) {
        if self.queue.is_empty() && !self.queue.is_paused() {
            self.send_event(WorkerEvent::Drained {
                worker: self.id,
                completed: self.completed,
            })
            .await;
        }
    }

    async fn send_event(&mut self, event: WorkerEvent) {
        if self.events.send(event).await.is_err() {
            warn!(
                target: "tc.worker",
                worker_id = %self.id,
                "Dispatcher gone, dropping worker event"
            );
        }
    }

    /// Fail everything still queued or in the mailbox during shutdown.
    fn abort_queue(&mut self) {
        for action in self.queue.drain() {
            self.completed += 1;
            action.fail(TcError::Draining);
        }
        while let Ok(message) = self.receiver.try_recv() {
            match message {
                WorkerMessage::Enqueue { action } => {
                    self.completed += 1;
                    action.fail(TcError::Draining);
                }
                WorkerMessage::Bind { flush, .. } => {
                    for action in flush {
                        self.completed += 1;
                        action.fail(TcError::Draining);
                    }
                }
            }
        }
    }
}
