//! Thread alias resolution.
//!
//! Callers may address a thread by a vanity handle; the canonical id only
//! becomes known from the page location after a navigation. The resolver
//! remembers that mapping so later submissions land on the worker already
//! bound to the thread.

use std::collections::HashMap;
use tracing::debug;

/// Canonical thread identifier: the slug observed in a page location.
pub type ThreadId = String;

/// Maps externally supplied thread handles to the canonical ids observed
/// after navigation.
///
/// Stored as handle -> canonical (the inverse of the observed mapping),
/// which is the direction affinity checks need. Last write wins; entries
/// are recorded only after a successful navigation.
#[derive(Debug, Default)]
pub struct AliasResolver {
    by_handle: HashMap<String, ThreadId>,
}

impl AliasResolver {
    /// Create an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a handle to canonical form; identity if unknown.
    #[must_use]
    pub fn resolve(&self, handle: &str) -> ThreadId {
        self.by_handle
            .get(handle)
            .cloned()
            .unwrap_or_else(|| handle.to_string())
    }

    /// Record that navigating with `handle` landed on `canonical`.
    pub fn record(&mut self, canonical: ThreadId, handle: String) {
        if canonical == handle {
            return;
        }
        debug!(
            target: "tc.dispatcher",
            handle = %handle,
            canonical = %canonical,
            "Learned thread alias"
        );
        self.by_handle.insert(handle, canonical);
    }

    /// Number of learned aliases.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_handle.len()
    }

    /// Whether any alias has been learned yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_handle.is_empty()
    }
}

/// Extract the thread slug from a page location under `prefix`.
///
/// Query strings, fragments and trailing slashes are not part of the slug.
#[must_use]
pub fn slug_from_location<'a>(prefix: &str, location: &'a str) -> Option<&'a str> {
    let rest = location.strip_prefix(prefix)?;
    let slug = rest.split(['?', '#']).next().unwrap_or(rest);
    let slug = slug.trim_end_matches('/');
    (!slug.is_empty()).then_some(slug)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const PREFIX: &str = "https://www.messenger.com/t/";

    #[test]
    fn test_resolve_unknown_handle_is_identity() {
        let resolver = AliasResolver::new();
        assert_eq!(resolver.resolve("jane.doe"), "jane.doe");
    }

    #[test]
    fn test_record_and_resolve() {
        let mut resolver = AliasResolver::new();
        resolver.record("1234567890".to_string(), "jane.doe".to_string());

        assert_eq!(resolver.resolve("jane.doe"), "1234567890");
        // Canonical ids resolve to themselves.
        assert_eq!(resolver.resolve("1234567890"), "1234567890");
        assert_eq!(resolver.len(), 1);
    }

    #[test]
    fn test_last_write_wins() {
        let mut resolver = AliasResolver::new();
        resolver.record("111".to_string(), "jane.doe".to_string());
        resolver.record("222".to_string(), "jane.doe".to_string());

        assert_eq!(resolver.resolve("jane.doe"), "222");
        assert_eq!(resolver.len(), 1);
    }

    #[test]
    fn test_identity_mapping_is_not_stored() {
        let mut resolver = AliasResolver::new();
        resolver.record("123".to_string(), "123".to_string());
        assert!(resolver.is_empty());
    }

    #[test]
    fn test_slug_from_location() {
        assert_eq!(
            slug_from_location(PREFIX, "https://www.messenger.com/t/1234567890"),
            Some("1234567890")
        );
        assert_eq!(
            slug_from_location(PREFIX, "https://www.messenger.com/t/1234567890/"),
            Some("1234567890")
        );
        assert_eq!(
            slug_from_location(PREFIX, "https://www.messenger.com/t/jane.doe?ref=x#top"),
            Some("jane.doe")
        );
    }

    #[test]
    fn test_slug_from_location_rejects_other_urls() {
        assert_eq!(slug_from_location(PREFIX, "https://www.messenger.com/"), None);
        assert_eq!(slug_from_location(PREFIX, "https://example.com/t/123"), None);
        assert_eq!(slug_from_location(PREFIX, "https://www.messenger.com/t/"), None);
    }
}
