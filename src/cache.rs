//! Command result caching.
//!
//! Many controller parameters (units, range limits, loop mode) only change
//! when explicitly written, so re-reading them over a 115200-baud link is
//! wasted latency. The cache keeps the last parsed value per command keyword
//! and hands it back instead of a round trip.
//!
//! Two gates control caching:
//!
//! - a **process-wide enable flag** ([`set_cache_enabled`]) - deliberately
//!   global, shared mutable configuration affecting every device instance at
//!   once. Tests that toggle it must run serialized and restore it.
//! - a per-device **allow-list** of cacheable keywords; keywords not on the
//!   list are never cached regardless of the flag.
//!
//! Writes invalidate their keyword's entry *before* transmission, so a
//! subsequent read can never observe stale data even if the write itself
//! fails partway. Entries have no TTL and no size bound; they live until
//! invalidated, cleared, or the channel disconnects.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

static CACHE_ENABLED: AtomicBool = AtomicBool::new(true);

/// Enables or disables result caching process-wide.
///
/// This is shared mutable configuration: it affects all device instances
/// simultaneously, not just those created afterwards.
pub fn set_cache_enabled(enabled: bool) {
    CACHE_ENABLED.store(enabled, Ordering::SeqCst);
}

/// Whether result caching is currently enabled process-wide.
pub fn cache_enabled() -> bool {
    CACHE_ENABLED.load(Ordering::SeqCst)
}

/// Per-channel mapping from command keyword to last parsed value list.
pub struct CommandCache {
    allowed: &'static [&'static str],
    entries: Mutex<HashMap<String, Vec<String>>>,
}

impl CommandCache {
    /// Creates a cache restricted to the given keyword allow-list.
    pub fn new(allowed: &'static [&'static str]) -> Self {
        Self {
            allowed,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Whether results for `keyword` may be cached at all.
    pub fn is_cacheable(&self, keyword: &str) -> bool {
        self.allowed.contains(&keyword)
    }

    /// Returns the cached value list for `keyword`, honoring the global flag.
    pub fn lookup(&self, keyword: &str) -> Option<Vec<String>> {
        if !cache_enabled() || !self.is_cacheable(keyword) {
            return None;
        }
        self.lock().get(keyword).cloned()
    }

    /// Stores a value list for `keyword` if it is cacheable and the flag is on.
    pub fn store(&self, keyword: &str, values: &[String]) {
        if !cache_enabled() || !self.is_cacheable(keyword) {
            return;
        }
        self.lock().insert(keyword.to_string(), values.to_vec());
    }

    /// Drops the entry for `keyword`, if any.
    pub fn invalidate(&self, keyword: &str) {
        self.lock().remove(keyword);
    }

    /// Drops all entries unconditionally.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Whether an entry for `keyword` exists, ignoring the global flag.
    ///
    /// Intended for tests that assert on cache state.
    pub fn contains(&self, keyword: &str) -> bool {
        self.lock().contains_key(keyword)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<String>>> {
        // A poisoned map only means another test thread panicked mid-insert;
        // the data is still a valid HashMap.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
