//! # Thread Controller Test Utilities
//!
//! Shared test utilities for the Switchboard thread controller.
//!
//! This crate provides mock implementations and test fixtures for isolated
//! controller testing without a real browser or push socket.
//!
//! ## Modules
//!
//! - `mock_page` - scripted page/page-factory mocks with an operations log
//! - `push_fixtures` - wire-frame and delta builders for the push pipeline
//! - `logging` - opt-in tracing subscriber for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tc_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     init_tracing();
//!
//!     // A factory whose pages resolve a vanity handle to a canonical slug
//!     let factory = MockPageFactory::new().with_vanity("jane.doe", "1234567890");
//!
//!     // A ready-to-feed push frame carrying one NewMessage delta
//!     let frame = push_frame(&[new_message_delta(1, 42, 1_700_000_000_000, "mid.1", "hi")]);
//!
//!     // Run your test...
//! }
//! ```

pub mod logging;
pub mod mock_page;
pub mod push_fixtures;

// Re-export commonly used items
pub use logging::*;
pub use mock_page::*;
pub use push_fixtures::*;
