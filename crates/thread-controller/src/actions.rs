//! Actions and their queueing.
//!
//! An action carries an explicit operation closure taking the page
//! capability as an argument, plus the oneshot sink its result resolves.
//! Queues here are plain data structures; all concurrency lives in the
//! actors that own them.

use crate::alias::ThreadId;
use crate::errors::TcError;
use crate::page::PageContext;
use futures::future::BoxFuture;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Result reported to the submitter of an action.
pub type ActionResult = Result<(), TcError>;

/// Boxed operation closure: takes the page capability, returns its outcome.
pub type ActionFn =
    Box<dyn FnOnce(Arc<dyn PageContext>) -> BoxFuture<'static, ActionResult> + Send>;

/// One dispatched operation: the closure plus its result sink.
///
/// Created on dispatch, destroyed once resolved - either by running against
/// a page or by being failed without running.
pub struct Action {
    op: ActionFn,
    respond_to: oneshot::Sender<ActionResult>,
}

impl Action {
    /// Pair an operation with its result sink.
    #[must_use]
    pub fn new(op: ActionFn, respond_to: oneshot::Sender<ActionResult>) -> Self {
        Self { op, respond_to }
    }

    /// Run the operation against a page and resolve the sink.
    ///
    /// With a soft deadline configured, an overrunning operation future is
    /// dropped and the action resolves with [`TcError::ActionTimeout`]. The
    /// returned copy of the result is for the caller's bookkeeping; the
    /// submitter is resolved either way.
    pub async fn run(
        self,
        page: Arc<dyn PageContext>,
        deadline: Option<Duration>,
    ) -> ActionResult {
        let operation = (self.op)(page);
        let result = match deadline {
            Some(limit) => match tokio::time::timeout(limit, operation).await {
                Ok(result) => result,
                Err(_) => Err(TcError::ActionTimeout(limit)),
            },
            None => operation.await,
        };
        let _ = self.respond_to.send(result.clone());
        result
    }

    /// Resolve the sink with a failure without running the operation.
    pub fn fail(self, error: TcError) {
        let _ = self.respond_to.send(Err(error));
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action").finish_non_exhaustive()
    }
}

/// Per-worker strict-FIFO queue, concurrency 1.
///
/// `pause` gates `pop` during rebinding, which is what makes "no action
/// executes mid-rebind" an enforced invariant rather than a convention.
#[derive(Debug, Default)]
pub struct ActionQueue {
    items: VecDeque<Action>,
    paused: bool,
}

impl ActionQueue {
    /// Create an empty, running queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an action.
    pub fn push(&mut self, action: Action) {
        self.items.push_back(action);
    }

    /// Take the next action, unless the queue is paused or empty.
    pub fn pop(&mut self) -> Option<Action> {
        if self.paused {
            return None;
        }
        self.items.pop_front()
    }

    /// Stop handing out actions until [`ActionQueue::resume`].
    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Resume handing out actions.
    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// Whether the queue is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Whether the queue holds no actions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of queued actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Remove every queued action, e.g. to fail them on a dead binding.
    pub fn drain(&mut self) -> Vec<Action> {
        self.items.drain(..).collect()
    }
}

/// Per-thread action backlog awaiting a free worker, serviced in arrival
/// order.
///
/// A thread registers in the arrival list at most once; further actions for
/// an already-pending thread append to its list without a second entry.
#[derive(Debug, Default)]
pub struct PendingThreadQueue {
    actions: HashMap<ThreadId, Vec<Action>>,
    arrival: VecDeque<ThreadId>,
}

impl PendingThreadQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Park an action for `thread`.
    pub fn push(&mut self, thread: ThreadId, action: Action) {
        match self.actions.entry(thread.clone()) {
            Entry::Occupied(mut entry) => entry.get_mut().push(action),
            Entry::Vacant(entry) => {
                entry.insert(vec![action]);
                self.arrival.push_back(thread);
            }
        }
    }

    /// Take the earliest-arrived thread and all of its parked actions.
    pub fn pop_front(&mut self) -> Option<(ThreadId, Vec<Action>)> {
        let thread = self.arrival.pop_front()?;
        let actions = self.actions.remove(&thread).unwrap_or_default();
        Some((thread, actions))
    }

    /// Fail every parked action (drain/shutdown path).
    pub fn fail_all(&mut self, error: &TcError) {
        for (_, actions) in self.actions.drain() {
            for action in actions {
                action.fail(error.clone());
            }
        }
        self.arrival.clear();
    }

    /// Number of distinct pending threads.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.arrival.len()
    }

    /// Total parked actions across all threads.
    #[must_use]
    pub fn action_count(&self) -> usize {
        self.actions.values().map(Vec::len).sum()
    }

    /// Whether nothing is parked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.arrival.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn noop_action() -> (Action, oneshot::Receiver<ActionResult>) {
        let (tx, rx) = oneshot::channel();
        let action = Action::new(Box::new(|_| Box::pin(async { Ok(()) })), tx);
        (action, rx)
    }

    #[test]
    fn test_queue_is_fifo() {
        let mut queue = ActionQueue::new();
        let (a1, _rx1) = noop_action();
        let (a2, _rx2) = noop_action();
        queue.push(a1);
        queue.push(a2);

        assert_eq!(queue.len(), 2);
        assert!(queue.pop().is_some());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_pause_gates_pop() {
        let mut queue = ActionQueue::new();
        let (action, _rx) = noop_action();
        queue.push(action);

        queue.pause();
        assert!(queue.is_paused());
        assert!(queue.pop().is_none());
        assert_eq!(queue.len(), 1);

        queue.resume();
        assert!(queue.pop().is_some());
    }

    #[test]
    fn test_drain_empties_queue() {
        let mut queue = ActionQueue::new();
        let (a1, _rx1) = noop_action();
        let (a2, _rx2) = noop_action();
        queue.push(a1);
        queue.push(a2);

        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_fail_resolves_sink() {
        let (action, rx) = noop_action();
        action.fail(TcError::Draining);

        let result = rx.await.expect("sink resolved");
        assert!(matches!(result, Err(TcError::Draining)));
    }

    #[test]
    fn test_pending_registers_thread_once() {
        let mut pending = PendingThreadQueue::new();
        let (a1, _r1) = noop_action();
        let (a2, _r2) = noop_action();
        let (b1, _r3) = noop_action();

        pending.push("a".to_string(), a1);
        pending.push("b".to_string(), b1);
        pending.push("a".to_string(), a2);

        assert_eq!(pending.thread_count(), 2);
        assert_eq!(pending.action_count(), 3);

        let (thread, actions) = pending.pop_front().unwrap();
        assert_eq!(thread, "a");
        assert_eq!(actions.len(), 2);

        let (thread, actions) = pending.pop_front().unwrap();
        assert_eq!(thread, "b");
        assert_eq!(actions.len(), 1);

        assert!(pending.pop_front().is_none());
    }

    #[tokio::test]
    async fn test_pending_fail_all_resolves_sinks() {
        let mut pending = PendingThreadQueue::new();
        let (a1, r1) = noop_action();
        let (b1, r2) = noop_action();
        pending.push("a".to_string(), a1);
        pending.push("b".to_string(), b1);

        pending.fail_all(&TcError::Draining);
        assert!(pending.is_empty());
        assert!(matches!(r1.await.unwrap(), Err(TcError::Draining)));
        assert!(matches!(r2.await.unwrap(), Err(TcError::Draining)));
    }
}
