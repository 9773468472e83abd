//! Duplicate-message suppression.
//!
//! Clients (and webhook retries) double-send. An identical
//! `(session, text)` pair arriving within the window of the last
//! *processed* occurrence is dropped silently. The key tracks the
//! last-seen timestamp per hash rather than a wall-clock bucket, so two
//! duplicates straddling a bucket boundary cannot both slip through.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

pub struct DedupeCache {
    seen: Mutex<HashMap<[u8; 32], Instant>>,
    window: Duration,
}

impl DedupeCache {
    pub fn new(window: Duration) -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
            window,
        }
    }

    fn key(session_id: &str, text: &str) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(session_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(text.as_bytes());
        hasher.finalize().into()
    }

    /// Returns `true` when this message is a duplicate and must be
    /// dropped. A processed (non-duplicate) message refreshes the
    /// timestamp; a dropped one does not extend the window.
    pub fn should_drop(&self, session_id: &str, text: &str) -> bool {
        let key = Self::key(session_id, text);
        let now = Instant::now();
        let mut seen = self.seen.lock();

        if let Some(last) = seen.get(&key) {
            if now.duration_since(*last) < self.window {
                return true;
            }
        }
        seen.insert(key, now);
        false
    }

    /// Drop expired entries. Run from the background sweeper.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut seen = self.seen.lock();
        let before = seen.len();
        seen.retain(|_, last| now.duration_since(*last) < self.window);
        before - seen.len()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_within_window_is_dropped() {
        let cache = DedupeCache::new(Duration::from_secs(5));
        assert!(!cache.should_drop("s1", "hello"));
        assert!(cache.should_drop("s1", "hello"));
        assert!(cache.should_drop("s1", "hello"));
    }

    #[test]
    fn different_text_or_session_is_not_a_duplicate() {
        let cache = DedupeCache::new(Duration::from_secs(5));
        assert!(!cache.should_drop("s1", "hello"));
        assert!(!cache.should_drop("s1", "hello!"));
        assert!(!cache.should_drop("s2", "hello"));
    }

    #[test]
    fn outside_the_window_both_process() {
        let cache = DedupeCache::new(Duration::from_millis(0));
        assert!(!cache.should_drop("s1", "hello"));
        assert!(!cache.should_drop("s1", "hello"));
    }

    #[test]
    fn sweep_clears_expired_entries() {
        let cache = DedupeCache::new(Duration::from_millis(0));
        cache.should_drop("s1", "a");
        cache.should_drop("s1", "b");
        assert_eq!(cache.sweep(), 2);
        assert!(cache.is_empty());
    }
}
