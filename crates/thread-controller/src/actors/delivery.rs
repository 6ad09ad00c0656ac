//! Ordered event delivery and listener registry.
//!
//! One actor owns the registry and fans every event out to each listener in
//! insertion order, awaiting each before the next. That gives a global
//! delivery order at the cost of head-of-line blocking: a stalled listener
//! delays everything behind it. That backpressure is deliberate, which is
//! also why the mailbox is unbounded - events queue rather than drop.

use crate::actors::metrics::{ActorType, MailboxMonitor, PipelineMetrics};
use crate::errors::TcError;

use futures::future::BoxFuture;
use push_protocol::delta::DeliveredEvent;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace};

/// A registered event callback.
pub type EventListener = Arc<dyn Fn(DeliveredEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap an async closure into an [`EventListener`].
///
/// Each call creates a distinct listener identity; hold on to the returned
/// `Arc` if you want re-registration to be idempotent.
#[must_use]
pub fn listener<F, Fut>(f: F) -> EventListener
where
    F: Fn(DeliveredEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |event| Box::pin(f(event)) as BoxFuture<'static, ()>)
}

/// Identifier of one listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Messages sent to the delivery actor.
enum DeliveryMessage {
    /// Fan one event out to every listener.
    Deliver { event: DeliveredEvent },
    /// Register a listener (idempotent on identity).
    Subscribe {
        listener: EventListener,
        respond_to: oneshot::Sender<ListenerId>,
    },
    /// Remove one registration.
    Unsubscribe {
        id: ListenerId,
        respond_to: oneshot::Sender<bool>,
    },
    /// Remove every registration.
    UnsubscribeAll { respond_to: oneshot::Sender<()> },
    /// Current registration count (introspection/tests).
    ListenerCount { respond_to: oneshot::Sender<usize> },
}

/// Insertion-ordered listener set with identity-based idempotence.
#[derive(Default)]
pub(crate) struct ListenerRegistry {
    entries: Vec<(ListenerId, EventListener)>,
    next_id: u64,
}

impl ListenerRegistry {
    /// Register a listener; re-registering the same `Arc` returns the
    /// existing registration instead of adding a duplicate.
    pub fn subscribe(&mut self, listener: EventListener) -> ListenerId {
        if let Some((id, _)) = self
            .entries
            .iter()
            .find(|(_, existing)| same_listener(existing, &listener))
        {
            return *id;
        }
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, listener));
        id
    }

    /// Remove exactly one registration. Returns whether it was present.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(existing, _)| *existing != id);
        self.entries.len() != before
    }

    /// Remove every registration.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of registrations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Registrations in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &(ListenerId, EventListener)> {
        self.entries.iter()
    }
}

/// Identity comparison on the listener's data pointer. The vtable half of a
/// fat pointer is not stable across codegen units, so only the data address
/// is compared.
fn same_listener(a: &EventListener, b: &EventListener) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a).cast::<()>(),
        Arc::as_ptr(b).cast::<()>(),
    )
}

/// Handle to the delivery actor.
#[derive(Clone)]
pub struct DeliveryHandle {
    sender: mpsc::UnboundedSender<DeliveryMessage>,
    cancel_token: CancellationToken,
}

impl DeliveryHandle {
    /// Spawn the delivery actor. Returns the handle and the task handle.
    #[must_use]
    pub fn new(
        metrics: Arc<PipelineMetrics>,
        cancel_token: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::unbounded_channel();

        let actor = DeliveryActor {
            receiver,
            registry: ListenerRegistry::default(),
            cancel_token: cancel_token.clone(),
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Delivery, "delivery"),
        };

        let task_handle = tokio::spawn(actor.run());

        (
            Self {
                sender,
                cancel_token,
            },
            task_handle,
        )
    }

    /// Queue an event for ordered fan-out. Synchronous by design: the
    /// queue is unbounded, so producers never block.
    ///
    /// # Errors
    ///
    /// `Draining` when the delivery actor has stopped.
    pub fn deliver(&self, event: DeliveredEvent) -> Result<(), TcError> {
        self.sender
            .send(DeliveryMessage::Deliver { event })
            .map_err(|_| TcError::Draining)
    }

    /// Register a listener. Re-registering the same `Arc` yields the same
    /// registration (exactly one delivery per event).
    pub async fn subscribe(&self, listener: EventListener) -> Result<Subscription, TcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DeliveryMessage::Subscribe {
                listener,
                respond_to: tx,
            })
            .map_err(|_| TcError::Draining)?;
        let id = rx
            .await
            .map_err(|e| TcError::Internal(format!("response receive failed: {e}")))?;
        Ok(Subscription {
            id,
            sender: self.sender.clone(),
        })
    }

    /// Remove every listener.
    pub async fn unsubscribe_all(&self) -> Result<(), TcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DeliveryMessage::UnsubscribeAll { respond_to: tx })
            .map_err(|_| TcError::Draining)?;
        rx.await
            .map_err(|e| TcError::Internal(format!("response receive failed: {e}")))
    }

    /// Current registration count.
    pub async fn listener_count(&self) -> Result<usize, TcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DeliveryMessage::ListenerCount { respond_to: tx })
            .map_err(|_| TcError::Draining)?;
        rx.await
            .map_err(|e| TcError::Internal(format!("response receive failed: {e}")))
    }

    /// Cancel the actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }
}

/// One listener registration.
///
/// Dropping a `Subscription` does NOT unsubscribe - removal is the explicit
/// [`Subscription::unsubscribe`] call, mirroring the unsubscribe function
/// the event API hands back.
pub struct Subscription {
    id: ListenerId,
    sender: mpsc::UnboundedSender<DeliveryMessage>,
}

impl Subscription {
    /// The registration's id.
    #[must_use]
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Remove exactly this registration. Returns whether it was present.
    pub async fn unsubscribe(self) -> bool {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(DeliveryMessage::Unsubscribe {
                id: self.id,
                respond_to: tx,
            })
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }
}

/// The delivery actor implementation.
struct DeliveryActor {
    receiver: mpsc::UnboundedReceiver<DeliveryMessage>,
    registry: ListenerRegistry,
    cancel_token: CancellationToken,
    metrics: Arc<PipelineMetrics>,
    mailbox: MailboxMonitor,
}

impl DeliveryActor {
    /// Run the actor message loop.
    #[instrument(skip_all, name = "tc.delivery")]
    async fn run(mut self) {
        debug!(target: "tc.delivery", "Delivery queue started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => break,

                message = self.receiver.recv() => {
                    match message {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                        }
                        None => break,
                    }
                }
            }
        }

        debug!(
            target: "tc.delivery",
            events_delivered = self.metrics.events_delivered_count(),
            "Delivery queue stopped"
        );
    }

    /// Handle a single message.
    async fn handle_message(&mut self, message: DeliveryMessage) {
        match message {
            DeliveryMessage::Deliver { event } => {
                // Sequential fan-out: each listener completes before the
                // next listener, and the next event waits for all of them.
                for (id, callback) in self.registry.iter() {
                    trace!(
                        target: "tc.delivery",
                        listener = ?id,
                        message_id = %event.message_id,
                        "Delivering event"
                    );
                    callback(event.clone()).await;
                }
                self.metrics.event_delivered();
            }

            DeliveryMessage::Subscribe {
                listener,
                respond_to,
            } => {
                let id = self.registry.subscribe(listener);
                debug!(
                    target: "tc.delivery",
                    listener = ?id,
                    listeners = self.registry.len(),
                    "Listener subscribed"
                );
                let _ = respond_to.send(id);
            }

            DeliveryMessage::Unsubscribe { id, respond_to } => {
                let removed = self.registry.unsubscribe(id);
                debug!(
                    target: "tc.delivery",
                    listener = ?id,
                    removed,
                    listeners = self.registry.len(),
                    "Listener unsubscribed"
                );
                let _ = respond_to.send(removed);
            }

            DeliveryMessage::UnsubscribeAll { respond_to } => {
                info!(
                    target: "tc.delivery",
                    listeners = self.registry.len(),
                    "Removing all listeners"
                );
                self.registry.clear();
                let _ = respond_to.send(());
            }

            DeliveryMessage::ListenerCount { respond_to } => {
                let _ = respond_to.send(self.registry.len());
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::sync::Mutex;
    use std::time::Duration;

    fn test_event(message_id: &str) -> DeliveredEvent {
        DeliveredEvent {
            kind: "message".to_string(),
            body: "hello".to_string(),
            thread: 1,
            sender: 2,
            timestamp: 3,
            message_id: message_id.to_string(),
            attachments: Vec::<Value>::new(),
        }
    }

    fn spawn_delivery() -> DeliveryHandle {
        let (handle, _task) = DeliveryHandle::new(PipelineMetrics::new(), CancellationToken::new());
        handle
    }

    fn recording_listener(
        log: &Arc<Mutex<Vec<String>>>,
        tag: &'static str,
    ) -> EventListener {
        let log = Arc::clone(log);
        listener(move |event: DeliveredEvent| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push(format!("{tag}:{}", event.message_id));
            }
        })
    }

    #[test]
    fn test_registry_identity_dedup() {
        let mut registry = ListenerRegistry::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let callback = recording_listener(&log, "a");

        let first = registry.subscribe(Arc::clone(&callback));
        let second = registry.subscribe(Arc::clone(&callback));
        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);

        // A distinct closure is a distinct identity.
        let other = registry.subscribe(recording_listener(&log, "b"));
        assert_ne!(first, other);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_registry_unsubscribe() {
        let mut registry = ListenerRegistry::default();
        let log = Arc::new(Mutex::new(Vec::new()));

        let id = registry.subscribe(recording_listener(&log, "a"));
        assert!(registry.unsubscribe(id));
        assert!(!registry.unsubscribe(id));
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_subscription_delivers_once() {
        let handle = spawn_delivery();
        let log = Arc::new(Mutex::new(Vec::new()));
        let callback = recording_listener(&log, "dup");

        let first = handle.subscribe(Arc::clone(&callback)).await.unwrap();
        let second = handle.subscribe(Arc::clone(&callback)).await.unwrap();
        assert_eq!(first.id(), second.id());

        handle.deliver(test_event("m1")).unwrap();

        // Synchronize on the actor having processed the delivery.
        assert_eq!(handle.listener_count().await.unwrap(), 1);
        assert_eq!(*log.lock().unwrap(), vec!["dup:m1".to_string()]);
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_exactly_that_listener() {
        let handle = spawn_delivery();
        let log = Arc::new(Mutex::new(Vec::new()));

        let keep = handle
            .subscribe(recording_listener(&log, "keep"))
            .await
            .unwrap();
        let drop_me = handle
            .subscribe(recording_listener(&log, "drop"))
            .await
            .unwrap();

        assert!(drop_me.unsubscribe().await);
        handle.deliver(test_event("m1")).unwrap();
        assert_eq!(handle.listener_count().await.unwrap(), 1);

        assert_eq!(*log.lock().unwrap(), vec!["keep:m1".to_string()]);
        drop(keep);
    }

    #[tokio::test]
    async fn test_unsubscribe_all_clears_registry() {
        let handle = spawn_delivery();
        let log = Arc::new(Mutex::new(Vec::new()));

        let _a = handle
            .subscribe(recording_listener(&log, "a"))
            .await
            .unwrap();
        let _b = handle
            .subscribe(recording_listener(&log, "b"))
            .await
            .unwrap();
        assert_eq!(handle.listener_count().await.unwrap(), 2);

        handle.unsubscribe_all().await.unwrap();
        assert_eq!(handle.listener_count().await.unwrap(), 0);

        handle.deliver(test_event("m1")).unwrap();
        assert_eq!(handle.listener_count().await.unwrap(), 0);
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_slow_listener_delays_everyone() {
        let handle = spawn_delivery();
        let log = Arc::new(Mutex::new(Vec::new()));

        // First listener stalls on every event.
        let slow_log = Arc::clone(&log);
        let slow = listener(move |event: DeliveredEvent| {
            let log = Arc::clone(&slow_log);
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                log.lock().unwrap().push(format!("slow:{}", event.message_id));
            }
        });
        let _slow_sub = handle.subscribe(slow).await.unwrap();
        let _fast_sub = handle
            .subscribe(recording_listener(&log, "fast"))
            .await
            .unwrap();

        handle.deliver(test_event("e1")).unwrap();
        handle.deliver(test_event("e2")).unwrap();

        // Synchronize on both deliveries having been processed.
        assert_eq!(handle.listener_count().await.unwrap(), 2);

        let entries = log.lock().unwrap().clone();
        assert_eq!(
            entries,
            vec![
                "slow:e1".to_string(),
                "fast:e1".to_string(),
                "slow:e2".to_string(),
                "fast:e2".to_string(),
            ],
            "slow listener must gate both events for every listener"
        );
    }
}
