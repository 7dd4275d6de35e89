//! Reasoning cache - remembers the reasoning behind each assistant reply
//!
//! Some thinking backends require a `reasoning_content` field on every prior
//! assistant turn, but clients only ever send back the visible content. This
//! cache bridges the gap: the stream relay stores the reasoning it saw next
//! to the content it preceded, and the bridge looks the reasoning up again
//! when it rebuilds the conversation for the upstream.
//!
//! Keys are a fingerprint of the assistant content (first `FINGERPRINT_CHARS`
//! characters, hashed) so retrieval works even when the caller re-sends a
//! content string that was truncated or re-encoded past that prefix.

use lru::LruCache;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::Mutex;

/// Returned when no reasoning was recorded for a piece of content.
///
/// Upstream providers that demand `reasoning_content` on every assistant
/// turn reject requests where the field is missing, so absence has to map
/// to a plausible non-empty string rather than to nothing.
pub const DEFAULT_REASONING: &str = "I analyzed the request carefully before responding.";

/// Characters of content that participate in the fingerprint
const FINGERPRINT_CHARS: usize = 64;

/// Bounded entries before LRU eviction kicks in
const CACHE_CAPACITY: usize = 512;

/// Process-wide content -> reasoning mapping with LRU eviction
///
/// Concurrent readers and a single writer are expected; a plain mutex is
/// enough because every operation is a short map touch.
pub struct ReasoningCache {
    entries: Mutex<LruCache<String, String>>,
}

impl Default for ReasoningCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ReasoningCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(CACHE_CAPACITY).expect("capacity is non-zero"),
            )),
        }
    }

    /// Index `reasoning` under the fingerprint of `content`
    ///
    /// Empty reasoning is not worth remembering; storing it would only
    /// evict a useful entry.
    pub fn store(&self, content: &str, reasoning: &str) {
        if reasoning.is_empty() {
            return;
        }
        let key = fingerprint(content);
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(_) => return, // Poisoned mutex - skip caching
        };
        entries.put(key, reasoning.to_string());
    }

    /// Return the reasoning recorded for `content`, or the sentinel default
    pub fn retrieve(&self, content: &str) -> String {
        let key = fingerprint(content);
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(_) => return DEFAULT_REASONING.to_string(),
        };
        entries
            .get(&key)
            .cloned()
            .unwrap_or_else(|| DEFAULT_REASONING.to_string())
    }

    /// Whether a non-default entry exists for `content`
    pub fn contains(&self, content: &str) -> bool {
        let key = fingerprint(content);
        match self.entries.lock() {
            Ok(entries) => entries.peek(&key).is_some(),
            Err(_) => false,
        }
    }
}

/// Stable fingerprint of the leading characters of `content`
fn fingerprint(content: &str) -> String {
    let prefix: String = content.chars().take(FINGERPRINT_CHARS).collect();
    let mut hasher = Sha256::new();
    hasher.update(prefix.as_bytes());
    let hash = hasher.finalize();
    // First 16 bytes as hex - plenty for a 512-entry map
    hash[..16].iter().map(|b| format!("{:02x}", b)).collect()
}
