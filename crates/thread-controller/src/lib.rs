//! Switchboard Thread Controller Library
//!
//! Drives a messaging web client through a small pool of browser pages,
//! each bound to one conversation thread at a time, and decodes the site's
//! real-time push stream into discrete message events delivered to
//! subscribers in order:
//!
//! - Thread-affine action dispatch with strict per-thread FIFO
//! - Worker pool with admission, LRU rebinding and arrival-order fairness
//! - Streaming push-packet decoding and delta classification
//! - Ordered event fan-out with identity-idempotent subscriptions
//!
//! # Architecture
//!
//! Two independent concurrency domains, coordinated only by message
//! passing:
//!
//! ```text
//! callers -> DispatcherActor -> WorkerActor (one per page, serial queue)
//!                 |                  ^
//!                 +-- PendingThreadQueue / AliasResolver
//!
//! transport tap -> pipeline task -> DeliveryActor -> listeners
//!                  (decode + classify)   (ordered fan-out)
//! ```
//!
//! # Key Design Decisions
//!
//! - **Workers are rebound, never recreated**: opening a page is expensive;
//!   an idle worker is renavigated to the next thread instead.
//! - **One mailbox serializes the pool**: admission, rebinding and pending
//!   edits all happen on the dispatcher task; no locks.
//! - **Best-effort ingest**: malformed frames, packets and deltas are
//!   dropped (and counted), never retried; the pipeline survives them.
//!
//! # Modules
//!
//! - [`client`] - high-level facade (send, listen, custom actions)
//! - [`actors`] - dispatcher, workers, delivery queue
//! - [`actions`] - action type, per-worker queue, pending backlog
//! - [`alias`] - thread handle to canonical id resolution
//! - [`page`] - execution-context capability boundary
//! - [`config`] - configuration from environment
//! - [`errors`] - error types

pub mod actions;
pub mod actors;
pub mod alias;
pub mod client;
pub mod config;
pub mod errors;
pub mod page;
pub(crate) mod pipeline;

pub use client::Client;
pub use config::Config;
pub use errors::TcError;

// The wire-protocol types consumers interact with.
pub use push_protocol::delta::{DeliveredEvent, EVENT_TYPE_MESSAGE};
pub use push_protocol::frame::RawFrame;
