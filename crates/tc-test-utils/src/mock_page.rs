//! Scripted page and page-factory mocks.
//!
//! `MockPage` implements the `PageContext` capability against an in-memory
//! "site": navigations resolve vanity handles through a configured alias
//! table, and every operation is appended to a shared log tagged with the
//! page id, so tests can assert which page executed what, in which order.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thread_controller::config::DEFAULT_THREAD_URL_PREFIX;
use thread_controller::errors::TcError;
use thread_controller::page::{NavigationOutcome, PageContext, PageFactory};

/// One recorded page operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOp {
    /// A navigation to a thread handle.
    Navigate { thread: String },
    /// Text typed into a control.
    Type { selector: String, text: String },
    /// A key press.
    Press { key: String },
    /// A click on a control.
    Click { selector: String },
    /// A file attached through a control.
    Upload { selector: String, path: PathBuf },
}

/// Shared operations log: `(page id, op)` in global execution order.
pub type OpsLog = Arc<Mutex<Vec<(usize, PageOp)>>>;

/// Behavior shared by every page a factory opens.
#[derive(Debug, Default, Clone)]
struct PageBehavior {
    /// Vanity handle -> canonical slug the fake site resolves it to.
    vanity: HashMap<String, String>,
    /// Threads whose navigation fails.
    failing_threads: Vec<String>,
    /// When set, every navigation fails with this message.
    fail_all_navigation: Option<String>,
    /// Selectors whose operations fail (missing control).
    failing_selectors: Vec<String>,
    /// Artificial latency per operation.
    op_delay: Option<Duration>,
}

/// A scripted `PageContext`.
pub struct MockPage {
    id: usize,
    prefix: String,
    ops: OpsLog,
    behavior: PageBehavior,
    location: Mutex<String>,
}

impl MockPage {
    /// A standalone page with its own log and default behavior.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: 0,
            prefix: DEFAULT_THREAD_URL_PREFIX.to_string(),
            ops: Arc::new(Mutex::new(Vec::new())),
            behavior: PageBehavior::default(),
            location: Mutex::new("about:blank".to_string()),
        }
    }

    /// Fail every navigation with `message`.
    #[must_use]
    pub fn failing_navigation(mut self, message: &str) -> Self {
        self.behavior.fail_all_navigation = Some(message.to_string());
        self
    }

    /// Resolve `handle` to `slug` on navigation.
    #[must_use]
    pub fn with_vanity(mut self, handle: &str, slug: &str) -> Self {
        self.behavior
            .vanity
            .insert(handle.to_string(), slug.to_string());
        self
    }

    /// Fail operations that touch `selector`.
    #[must_use]
    pub fn with_failing_selector(mut self, selector: &str) -> Self {
        self.behavior.failing_selectors.push(selector.to_string());
        self
    }

    /// The page's operations log.
    #[must_use]
    pub fn ops(&self) -> OpsLog {
        Arc::clone(&self.ops)
    }

    /// Recorded operations of this page only.
    #[must_use]
    pub fn recorded(&self) -> Vec<PageOp> {
        self.ops
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == self.id)
            .map(|(_, op)| op.clone())
            .collect()
    }

    async fn pace(&self) {
        if let Some(delay) = self.behavior.op_delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn record(&self, op: PageOp) {
        self.ops.lock().unwrap().push((self.id, op));
    }

    fn check_selector(&self, selector: &str) -> Result<(), TcError> {
        if self
            .behavior
            .failing_selectors
            .iter()
            .any(|s| s == selector)
        {
            return Err(TcError::Operation(format!("control not found: {selector}")));
        }
        Ok(())
    }
}

impl Default for MockPage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PageContext for MockPage {
    async fn navigate(&self, thread: &str) -> Result<NavigationOutcome, TcError> {
        self.pace().await;
        self.record(PageOp::Navigate {
            thread: thread.to_string(),
        });

        if let Some(message) = &self.behavior.fail_all_navigation {
            return Err(TcError::Navigation(message.clone()));
        }
        if self.behavior.failing_threads.iter().any(|t| t == thread) {
            return Err(TcError::Navigation(format!("could not reach {thread}")));
        }

        let slug = self
            .behavior
            .vanity
            .get(thread)
            .cloned()
            .unwrap_or_else(|| thread.to_string());
        let location = format!("{}{}", self.prefix, slug);
        *self.location.lock().unwrap() = location.clone();
        Ok(NavigationOutcome { location })
    }

    async fn current_location(&self) -> Result<String, TcError> {
        Ok(self.location.lock().unwrap().clone())
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), TcError> {
        self.pace().await;
        self.check_selector(selector)?;
        self.record(PageOp::Type {
            selector: selector.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<(), TcError> {
        self.pace().await;
        self.record(PageOp::Press {
            key: key.to_string(),
        });
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<(), TcError> {
        self.pace().await;
        self.check_selector(selector)?;
        self.record(PageOp::Click {
            selector: selector.to_string(),
        });
        Ok(())
    }

    async fn upload_file(&self, selector: &str, path: &Path) -> Result<(), TcError> {
        self.pace().await;
        self.check_selector(selector)?;
        self.record(PageOp::Upload {
            selector: selector.to_string(),
            path: path.to_path_buf(),
        });
        Ok(())
    }
}

/// A `PageFactory` producing `MockPage`s that share one operations log.
pub struct MockPageFactory {
    prefix: String,
    ops: OpsLog,
    next_id: AtomicUsize,
    pages_opened: AtomicUsize,
    behavior: Mutex<PageBehavior>,
    fail_open: Mutex<Option<String>>,
}

impl MockPageFactory {
    /// A factory with default behavior.
    #[must_use]
    pub fn new() -> Self {
        Self {
            prefix: DEFAULT_THREAD_URL_PREFIX.to_string(),
            ops: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicUsize::new(0),
            pages_opened: AtomicUsize::new(0),
            behavior: Mutex::new(PageBehavior::default()),
            fail_open: Mutex::new(None),
        }
    }

    /// Resolve `handle` to `slug` on every page this factory opens.
    #[must_use]
    pub fn with_vanity(self, handle: &str, slug: &str) -> Self {
        self.behavior
            .lock()
            .unwrap()
            .vanity
            .insert(handle.to_string(), slug.to_string());
        self
    }

    /// Fail navigations to `thread` on every page.
    #[must_use]
    pub fn with_failing_thread(self, thread: &str) -> Self {
        self.behavior
            .lock()
            .unwrap()
            .failing_threads
            .push(thread.to_string());
        self
    }

    /// Add artificial latency to every page operation.
    #[must_use]
    pub fn with_op_delay(self, delay: Duration) -> Self {
        self.behavior.lock().unwrap().op_delay = Some(delay);
        self
    }

    /// Make `open_page` fail with `message`.
    pub fn fail_open(&self, message: &str) {
        *self.fail_open.lock().unwrap() = Some(message.to_string());
    }

    /// The shared operations log.
    #[must_use]
    pub fn ops(&self) -> OpsLog {
        Arc::clone(&self.ops)
    }

    /// Recorded operations across all pages, in execution order.
    #[must_use]
    pub fn recorded(&self) -> Vec<(usize, PageOp)> {
        self.ops.lock().unwrap().clone()
    }

    /// Navigations across all pages, in execution order.
    #[must_use]
    pub fn navigations(&self) -> Vec<(usize, String)> {
        self.ops
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(id, op)| match op {
                PageOp::Navigate { thread } => Some((*id, thread.clone())),
                _ => None,
            })
            .collect()
    }

    /// Number of pages opened so far.
    #[must_use]
    pub fn pages_opened(&self) -> usize {
        self.pages_opened.load(Ordering::SeqCst)
    }
}

impl Default for MockPageFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PageFactory for MockPageFactory {
    async fn open_page(&self) -> Result<Arc<dyn PageContext>, TcError> {
        if let Some(message) = self.fail_open.lock().unwrap().clone() {
            return Err(TcError::Internal(message));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.pages_opened.fetch_add(1, Ordering::SeqCst);

        let page = MockPage {
            id,
            prefix: self.prefix.clone(),
            ops: Arc::clone(&self.ops),
            behavior: self.behavior.lock().unwrap().clone(),
            location: Mutex::new("about:blank".to_string()),
        };
        Ok(Arc::new(page))
    }
}
