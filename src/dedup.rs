use std::num::NonZeroUsize;

use lru::LruCache;
use tokio::sync::RwLock;

/// A bounded, insertion-ordered set of content hashes (spec.md §4.2).
///
/// Backed by `lru::LruCache`, but used only through `contains` (never
/// `get`) and `put` on genuinely new keys, so recency never changes for an
/// already-present entry — the cache's "least recently used" eviction
/// degenerates to exactly the "oldest by first insertion" rule the spec
/// requires. `contains` takes a shared lock; `add` takes an exclusive one,
/// matching the read-mostly/write-serialized contract.
pub struct DedupWindow {
    inner: RwLock<LruCache<String, ()>>,
}

impl DedupWindow {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            inner: RwLock::new(LruCache::new(cap)),
        }
    }

    pub async fn contains(&self, hash: &str) -> bool {
        self.inner.read().await.contains(hash)
    }

    /// Inserts `hash` if absent. A second `add` of a present hash is a
    /// no-op and does not disturb eviction order. Returns whether the hash
    /// was newly inserted.
    pub async fn add(&self, hash: &str) -> bool {
        let mut guard = self.inner.write().await;
        if guard.contains(hash) {
            return false;
        }
        guard.put(hash.to_string(), ());
        true
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}
