//! Thread controller error types.
//!
//! Failures are local by policy: an error resolves the specific pending
//! result it belongs to and never terminates the pipeline or sibling
//! workers.

use std::time::Duration;
use thiserror::Error;

/// Thread controller error type.
///
/// `Clone` because a single navigation failure resolves every action that
/// was waiting on that binding.
#[derive(Debug, Clone, Error)]
pub enum TcError {
    /// Dispatch was called without a resolvable thread handle.
    #[error("Invalid target: thread handle is empty")]
    InvalidTarget,

    /// Binding or rebinding failed to reach the target thread.
    #[error("Navigation failed: {0}")]
    Navigation(String),

    /// The action's own operation failed; scoped to that one action.
    #[error("Operation failed: {0}")]
    Operation(String),

    /// The action exceeded its soft deadline and was abandoned.
    #[error("Action timed out after {0:?}")]
    ActionTimeout(Duration),

    /// The controller is shutting down; no new work is accepted.
    #[error("Controller is draining")]
    Draining,

    /// Internal error (channel wiring, actor lifecycle).
    #[error("Internal error: {0}")]
    Internal(String),
}
