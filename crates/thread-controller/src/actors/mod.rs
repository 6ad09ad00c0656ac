//! Actor model implementation for the thread controller.
//!
//! Two independent actor domains share nothing but the clock:
//!
//! ```text
//! DispatcherActor (singleton per client)
//! ├── owns the WorkerPool, PendingThreadQueue and AliasResolver
//! └── supervises N WorkerActors (one browser page each, bound to <= 1 thread)
//!     └── ActionQueue (strict FIFO, paused during rebinding)
//!
//! DeliveryActor (singleton per client)
//! └── owns the ListenerRegistry, fans events out in insertion order
//! ```
//!
//! # Key Design Decisions
//!
//! - **All structural pool state mutates on the dispatcher task**: admission,
//!   rebinding and pending-queue edits are serialized by the mailbox, never
//!   by locks.
//! - **CancellationToken propagation**: parent actors hand child tokens down
//!   for graceful shutdown.
//! - **Message passing**: all inter-actor communication via
//!   `tokio::sync::mpsc`, request-reply via `tokio::sync::oneshot`.
//!
//! # Modules
//!
//! - [`dispatcher`] - dispatcher actor and its public handle
//! - [`worker`] - per-page worker actors
//! - [`pool`] - pool bookkeeping owned by the dispatcher
//! - [`delivery`] - ordered event fan-out and the listener registry
//! - [`messages`] - message types for actor communication
//! - [`metrics`] - mailbox monitoring and actor metrics

pub mod delivery;
pub mod dispatcher;
pub mod messages;
pub mod metrics;
pub(crate) mod pool;
pub(crate) mod worker;

// Re-export primary types
pub use delivery::{listener, DeliveryHandle, EventListener, ListenerId, Subscription};
pub use dispatcher::DispatcherHandle;
pub use messages::{PoolStatus, WorkerId, WorkerStatus};
pub use metrics::{ActorMetrics, ActorType, MailboxMonitor, PipelineMetrics};
