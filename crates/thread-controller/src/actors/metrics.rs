//! Actor metrics and mailbox monitoring.
//!
//! Mailbox depth thresholds per actor type:
//!
//! | Actor Type | Normal | Warning | Critical |
//! |------------|--------|---------|----------|
//! | Dispatcher | < 100  | 100-500 | > 500    |
//! | Worker     | < 50   | 50-200  | > 200    |
//! | Delivery   | < 100  | 100-500 | > 500    |
//!
//! All counters are in-process atomics; exporting them is the embedding
//! application's concern.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Mailbox depth thresholds for the dispatcher and delivery actors.
pub const DISPATCHER_MAILBOX_NORMAL: usize = 100;
pub const DISPATCHER_MAILBOX_WARNING: usize = 500;

/// Mailbox depth thresholds for worker actors.
pub const WORKER_MAILBOX_NORMAL: usize = 50;
pub const WORKER_MAILBOX_WARNING: usize = 200;

/// Actor type for metrics labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    /// The dispatcher singleton.
    Dispatcher,
    /// A worker (one per browser page).
    Worker,
    /// The delivery queue.
    Delivery,
}

impl ActorType {
    /// Returns the actor type as a string for log fields.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActorType::Dispatcher => "dispatcher",
            ActorType::Worker => "worker",
            ActorType::Delivery => "delivery",
        }
    }

    /// Returns the warning threshold for this actor type.
    #[must_use]
    pub const fn warning_threshold(&self) -> usize {
        match self {
            ActorType::Dispatcher | ActorType::Delivery => DISPATCHER_MAILBOX_WARNING,
            ActorType::Worker => WORKER_MAILBOX_WARNING,
        }
    }

    /// Returns the normal threshold for this actor type.
    #[must_use]
    pub const fn normal_threshold(&self) -> usize {
        match self {
            ActorType::Dispatcher | ActorType::Delivery => DISPATCHER_MAILBOX_NORMAL,
            ActorType::Worker => WORKER_MAILBOX_NORMAL,
        }
    }
}

/// Mailbox depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    /// Below normal threshold.
    Normal,
    /// Between normal and warning thresholds.
    Warning,
    /// Above warning threshold.
    Critical,
}

/// Mailbox monitor for tracking queue depth.
#[derive(Debug)]
pub struct MailboxMonitor {
    /// Actor type for labeling.
    actor_type: ActorType,
    /// Actor identifier (instance id, worker id, ...).
    actor_id: String,
    /// Current mailbox depth.
    depth: AtomicUsize,
    /// Peak mailbox depth since last reset.
    peak_depth: AtomicUsize,
    /// Total messages processed.
    messages_processed: AtomicU64,
}

impl MailboxMonitor {
    /// Create a new mailbox monitor for the given actor.
    #[must_use]
    pub fn new(actor_type: ActorType, actor_id: impl Into<String>) -> Self {
        Self {
            actor_type,
            actor_id: actor_id.into(),
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
        }
    }

    /// Record a message being added to the mailbox.
    pub fn record_enqueue(&self) {
        let new_depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;

        // Update peak if necessary
        let mut current_peak = self.peak_depth.load(Ordering::Relaxed);
        while new_depth > current_peak {
            match self.peak_depth.compare_exchange_weak(
                current_peak,
                new_depth,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current_peak = actual,
            }
        }

        let level = self.level_for_depth(new_depth);
        if level == MailboxLevel::Critical {
            warn!(
                target: "tc.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                depth = new_depth,
                threshold = self.actor_type.warning_threshold(),
                "Mailbox depth critical"
            );
        } else if level == MailboxLevel::Warning && new_depth == self.actor_type.normal_threshold()
        {
            // Log once when crossing the warning threshold
            debug!(
                target: "tc.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                depth = new_depth,
                "Mailbox depth elevated"
            );
        }
    }

    /// Record a message being removed from the mailbox (processed).
    pub fn record_dequeue(&self) {
        self.depth.fetch_sub(1, Ordering::Relaxed);
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current mailbox depth.
    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    /// Get the peak mailbox depth.
    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    /// Get total messages processed.
    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    /// Get the current mailbox level.
    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        self.level_for_depth(self.current_depth())
    }

    /// Determine mailbox level for a given depth.
    fn level_for_depth(&self, depth: usize) -> MailboxLevel {
        if depth > self.actor_type.warning_threshold() {
            MailboxLevel::Critical
        } else if depth > self.actor_type.normal_threshold() {
            MailboxLevel::Warning
        } else {
            MailboxLevel::Normal
        }
    }
}

/// Aggregated metrics for the dispatcher/worker side.
#[derive(Debug, Default)]
pub struct ActorMetrics {
    /// Workers created over the controller's lifetime.
    pub workers_spawned: AtomicUsize,
    /// Rebinding operations performed.
    pub rebinds: AtomicU64,
    /// Failed bind/rebind navigations.
    pub navigation_failures: AtomicU64,
    /// Actions completed successfully.
    pub actions_executed: AtomicU64,
    /// Actions resolved with a failure (operation, timeout or navigation).
    pub actions_failed: AtomicU64,
    /// Actor panics observed during shutdown joins (indicates bugs).
    pub actor_panics: AtomicU64,
    /// Total messages processed across all actors.
    pub total_messages_processed: AtomicU64,
}

impl ActorMetrics {
    /// Create a new shared metrics instance.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record a worker creation.
    pub fn worker_spawned(&self) {
        self.workers_spawned.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a rebinding operation.
    pub fn record_rebind(&self) {
        self.rebinds.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed bind/rebind navigation.
    pub fn record_navigation_failure(&self) {
        self.navigation_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successfully completed action.
    pub fn action_executed(&self) {
        self.actions_executed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an action resolved with a failure.
    pub fn action_failed(&self) {
        self.actions_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an actor panic.
    pub fn record_panic(&self, actor_type: ActorType) {
        self.actor_panics.fetch_add(1, Ordering::Relaxed);
        tracing::error!(
            target: "tc.actor.panic",
            actor_type = actor_type.as_str(),
            total_panics = self.actor_panics.load(Ordering::Relaxed),
            "Actor panic detected - indicates bug, investigation required"
        );
    }

    /// Record a message being processed.
    pub fn record_message_processed(&self) {
        self.total_messages_processed
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Workers created so far.
    #[must_use]
    pub fn workers_spawned_count(&self) -> usize {
        self.workers_spawned.load(Ordering::Relaxed)
    }

    /// Actions completed successfully so far.
    #[must_use]
    pub fn actions_executed_count(&self) -> u64 {
        self.actions_executed.load(Ordering::Relaxed)
    }

    /// Actions resolved with a failure so far.
    #[must_use]
    pub fn actions_failed_count(&self) -> u64 {
        self.actions_failed.load(Ordering::Relaxed)
    }
}

/// Aggregated metrics for the ingest/delivery side.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    /// Raw transport frames received from the tap.
    pub frames_received: AtomicU64,
    /// Push-topic packets decoded.
    pub packets_decoded: AtomicU64,
    /// Deltas classified (all classes).
    pub deltas_classified: AtomicU64,
    /// Events fanned out to listeners.
    pub events_delivered: AtomicU64,
    /// Deltas filtered out (self-origin, ignored or unknown classes).
    pub events_filtered: AtomicU64,
}

impl PipelineMetrics {
    /// Create a new shared metrics instance.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record one raw frame.
    pub fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one decoded push packet.
    pub fn packet_decoded(&self) {
        self.packets_decoded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one classified delta.
    pub fn delta_classified(&self) {
        self.deltas_classified.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one event fanned out.
    pub fn event_delivered(&self) {
        self.events_delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one delta that produced no event.
    pub fn event_filtered(&self) {
        self.events_filtered.fetch_add(1, Ordering::Relaxed);
    }

    /// Raw frames received so far.
    #[must_use]
    pub fn frames_received_count(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    /// Events fanned out so far.
    #[must_use]
    pub fn events_delivered_count(&self) -> u64 {
        self.events_delivered.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_type_as_str() {
        assert_eq!(ActorType::Dispatcher.as_str(), "dispatcher");
        assert_eq!(ActorType::Worker.as_str(), "worker");
        assert_eq!(ActorType::Delivery.as_str(), "delivery");
    }

    #[test]
    fn test_actor_type_thresholds() {
        assert_eq!(ActorType::Dispatcher.normal_threshold(), 100);
        assert_eq!(ActorType::Dispatcher.warning_threshold(), 500);
        assert_eq!(ActorType::Worker.normal_threshold(), 50);
        assert_eq!(ActorType::Worker.warning_threshold(), 200);
    }

    #[test]
    fn test_mailbox_monitor_enqueue_dequeue() {
        let monitor = MailboxMonitor::new(ActorType::Worker, "worker-1");

        assert_eq!(monitor.current_depth(), 0);

        monitor.record_enqueue();
        monitor.record_enqueue();
        monitor.record_enqueue();
        assert_eq!(monitor.current_depth(), 3);
        assert_eq!(monitor.peak_depth(), 3);

        monitor.record_dequeue();
        assert_eq!(monitor.current_depth(), 2);
        assert_eq!(monitor.peak_depth(), 3); // Peak stays at 3
        assert_eq!(monitor.messages_processed(), 1);
    }

    #[test]
    fn test_mailbox_monitor_levels() {
        let monitor = MailboxMonitor::new(ActorType::Worker, "worker-1");

        assert_eq!(monitor.current_level(), MailboxLevel::Normal);

        for _ in 0..75 {
            monitor.record_enqueue();
        }
        assert_eq!(monitor.current_level(), MailboxLevel::Warning);

        for _ in 0..150 {
            monitor.record_enqueue();
        }
        assert_eq!(monitor.current_level(), MailboxLevel::Critical);
    }

    #[test]
    fn test_actor_metrics_counters() {
        let metrics = ActorMetrics::new();

        metrics.worker_spawned();
        metrics.worker_spawned();
        assert_eq!(metrics.workers_spawned_count(), 2);

        metrics.action_executed();
        metrics.action_failed();
        assert_eq!(metrics.actions_executed_count(), 1);
        assert_eq!(metrics.actions_failed_count(), 1);

        metrics.record_rebind();
        assert_eq!(metrics.rebinds.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_pipeline_metrics_counters() {
        let metrics = PipelineMetrics::new();

        metrics.frame_received();
        metrics.packet_decoded();
        metrics.delta_classified();
        metrics.event_delivered();
        metrics.event_filtered();

        assert_eq!(metrics.frames_received_count(), 1);
        assert_eq!(metrics.events_delivered_count(), 1);
        assert_eq!(metrics.events_filtered.load(Ordering::Relaxed), 1);
    }
}
