//! Sharded, memory-bounded per-domain state table
//!
//! Domains are assigned to shards by an xxh3 hash of the domain name. Each
//! shard is an independent LRU guarded by its own lock, so lookups for
//! different domains rarely contend and there is no global lock on the
//! steady-state path. The lock is held only for the lookup; callers mutate
//! the returned `Arc<V>` through its own synchronization.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use xxhash_rust::xxh3::xxh3_64;

/// Map a domain to one of `shards` buckets
#[inline]
#[must_use]
pub fn shard_for(domain: &str, shards: usize) -> usize {
    if shards <= 1 {
        return 0;
    }
    (xxh3_64(domain.as_bytes()) % shards as u64) as usize
}

/// Per-domain values created lazily and evicted least-recently-used
pub struct DomainTable<V> {
    shards: Vec<Mutex<LruCache<String, Arc<V>>>>,
}

impl<V> DomainTable<V> {
    /// Create a table holding at most roughly `capacity` domains
    ///
    /// Capacity is split evenly across `shards`; each shard keeps at least
    /// one entry.
    #[must_use]
    pub fn new(capacity: usize, shards: usize) -> Self {
        let shards = shards.max(1);
        let per_shard = NonZeroUsize::new((capacity / shards).max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            shards: (0..shards)
                .map(|_| Mutex::new(LruCache::new(per_shard)))
                .collect(),
        }
    }

    fn shard(&self, domain: &str) -> &Mutex<LruCache<String, Arc<V>>> {
        &self.shards[shard_for(domain, self.shards.len())]
    }

    /// Get the value for `domain`, creating it on first reference
    pub fn get_or_insert_with<F>(&self, domain: &str, make: F) -> Arc<V>
    where
        F: FnOnce() -> V,
    {
        let mut shard = self.shard(domain).lock();
        if let Some(existing) = shard.get(domain) {
            return Arc::clone(existing);
        }
        let value = Arc::new(make());
        shard.put(domain.to_string(), Arc::clone(&value));
        value
    }

    /// Get the value without creating it or touching LRU order
    #[must_use]
    pub fn peek(&self, domain: &str) -> Option<Arc<V>> {
        self.shard(domain).lock().peek(domain).map(Arc::clone)
    }

    /// Drop the value for `domain`
    pub fn remove(&self, domain: &str) -> Option<Arc<V>> {
        self.shard(domain).lock().pop(domain)
    }

    /// Number of domains currently held
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every held entry, shard by shard
    #[must_use]
    pub fn entries(&self) -> Vec<(String, Arc<V>)> {
        let mut out = Vec::new();
        for shard in &self.shards {
            let shard = shard.lock();
            out.extend(shard.iter().map(|(k, v)| (k.clone(), Arc::clone(v))));
        }
        out
    }

    /// Drop every entry
    pub fn clear(&self) {
        for shard in &self.shards {
            shard.lock().clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_lazily_creates_once() {
        let table: DomainTable<AtomicUsize> = DomainTable::new(100, 4);
        let a = table.get_or_insert_with("a.com", || AtomicUsize::new(0));
        a.fetch_add(1, Ordering::SeqCst);
        let again = table.get_or_insert_with("a.com", || AtomicUsize::new(99));
        assert_eq!(again.load(Ordering::SeqCst), 1);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let table: DomainTable<u32> = DomainTable::new(2, 1);
        table.get_or_insert_with("a.com", || 1);
        table.get_or_insert_with("b.com", || 2);
        // touch a.com so b.com becomes the eviction candidate
        table.get_or_insert_with("a.com", || 0);
        table.get_or_insert_with("c.com", || 3);
        assert!(table.peek("a.com").is_some());
        assert!(table.peek("b.com").is_none());
        assert!(table.peek("c.com").is_some());
    }

    #[test]
    fn test_shard_assignment_is_stable() {
        assert_eq!(shard_for("example.com", 16), shard_for("example.com", 16));
        assert!(shard_for("example.com", 16) < 16);
        assert_eq!(shard_for("example.com", 1), 0);
    }
}
