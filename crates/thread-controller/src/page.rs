//! Execution-context capability boundary.
//!
//! The dispatcher and workers never interpret pages; they only bind them to
//! threads and sequence operations against them. A production
//! implementation drives a real browser tab; tests substitute mocks.

use crate::errors::TcError;
use std::path::Path;
use std::sync::Arc;

/// DOM selectors the stock client actions rely on.
pub mod selectors {
    /// Message composer input.
    pub const COMPOSER: &str = "[aria-label^=\"Type a message\"]";
    /// Attachment file input.
    pub const FILE_INPUT: &str = "input[type=file][title=\"Add Files\"]";
}

/// Keyboard keys used by the stock client actions.
pub mod keys {
    /// Submits the composer contents.
    pub const ENTER: &str = "Enter";
}

/// Result of navigating a page to a thread.
#[derive(Debug, Clone)]
pub struct NavigationOutcome {
    /// Location the page settled on; carries the canonical thread slug.
    pub location: String,
}

/// One browser execution context (tab), already authenticated.
///
/// Implementations are expected to skip the navigation when the page is
/// already at the requested thread and to report the settled location
/// either way.
#[async_trait::async_trait]
pub trait PageContext: Send + Sync {
    /// Navigate to a thread by handle or canonical id.
    async fn navigate(&self, thread: &str) -> Result<NavigationOutcome, TcError>;

    /// Current page location.
    async fn current_location(&self) -> Result<String, TcError>;

    /// Type text into the control matching `selector`.
    async fn type_text(&self, selector: &str, text: &str) -> Result<(), TcError>;

    /// Press a keyboard key.
    async fn press_key(&self, key: &str) -> Result<(), TcError>;

    /// Click the control matching `selector`.
    async fn click(&self, selector: &str) -> Result<(), TcError>;

    /// Attach a file through the control matching `selector`.
    async fn upload_file(&self, selector: &str, path: &Path) -> Result<(), TcError>;
}

/// Source of execution contexts for the worker pool.
#[async_trait::async_trait]
pub trait PageFactory: Send + Sync {
    /// Open a fresh page. Called once per worker, up to the pool limit;
    /// workers are rebound rather than recreated, so this stays rare.
    async fn open_page(&self) -> Result<Arc<dyn PageContext>, TcError>;
}
